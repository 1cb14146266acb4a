//! Proof Key for Code Exchange
//!
//! [`PkceHandler`] binds an authorization code to a secret held by the
//! client, as described in [RFC7636]. At the authorize endpoint it records
//! the `code_challenge` under the signature of the code issued by the
//! authorization code handler, which must therefore run first. At the token
//! endpoint it consumes that record and checks the `code_verifier` against
//! it.
//!
//! A record is consumed before the verifier is checked, so each code can be
//! tried exactly once.
//!
//! ```
//! use keyward_pkce::CodeChallengeMethod;
//!
//! let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
//! assert_eq!(
//!     CodeChallengeMethod::S256.challenge(verifier),
//!     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
//! );
//! ```
//!
//! [RFC7636]: https://tools.ietf.org/html/rfc7636

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use aliri_base64::Base64Url;
use async_trait::async_trait;
use keyward::{
    error,
    storage::{PkceRequestStorage, StorageError},
    strategy::AuthorizeCodeStrategy,
    AccessRequest, AccessResponse, AuthorizeCodeRef, AuthorizeEndpointHandler, AuthorizeRequest,
    AuthorizeResponse, Client, Config, Error, Outcome, TokenEndpointHandler,
    GRANT_TYPE_AUTHORIZATION_CODE, RESPONSE_TYPE_CODE,
};
use once_cell::sync::Lazy;
use regex::Regex;

const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

static VERIFIER_WRONG_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-zA-Z0-9~._-]").expect("verifier pattern is valid"));

/// Form parameters kept when persisting a challenge
const SANITIZE_ALLOWED: &[&str] = &["code_challenge", "code_challenge_method"];

/// Configuration read by the PKCE handler
pub trait PkceConfig: Send + Sync {
    /// Whether every client must use PKCE
    fn enforce_pkce(&self) -> bool;
    /// Whether public clients must use PKCE
    fn enforce_pkce_for_public_clients(&self) -> bool;
    /// Whether the `plain` challenge method is accepted
    fn enable_pkce_plain_challenge_method(&self) -> bool;
}

impl PkceConfig for Config {
    fn enforce_pkce(&self) -> bool {
        self.enforce_pkce
    }

    fn enforce_pkce_for_public_clients(&self) -> bool {
        self.enforce_pkce_for_public_clients
    }

    fn enable_pkce_plain_challenge_method(&self) -> bool {
        self.enable_pkce_plain_challenge_method
    }
}

/// A code challenge method
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    /// `BASE64URL(SHA256(verifier))`
    S256,
    /// The verifier itself
    Plain,
}

impl CodeChallengeMethod {
    /// Parses a `code_challenge_method` value
    ///
    /// An empty value means `plain`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "S256" => Some(Self::S256),
            "plain" | "" => Some(Self::Plain),
            _ => None,
        }
    }

    /// The parameter value of this method
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }

    /// Derives the challenge for a verifier
    #[must_use]
    pub fn challenge(self, verifier: &str) -> String {
        match self {
            Self::S256 => {
                let digest = ring::digest::digest(&ring::digest::SHA256, verifier.as_bytes());
                Base64Url::from_raw(digest.as_ref().to_vec()).to_string()
            }
            Self::Plain => verifier.to_owned(),
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforces PKCE on the authorization code grant
#[derive(Debug)]
pub struct PkceHandler<T, S, C> {
    storage: Arc<T>,
    strategy: Arc<S>,
    config: Arc<C>,
}

impl<T, S, C> Clone for PkceHandler<T, S, C> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            strategy: Arc::clone(&self.strategy),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T, S, C> PkceHandler<T, S, C>
where
    T: PkceRequestStorage,
    S: AuthorizeCodeStrategy,
    C: PkceConfig,
{
    /// Constructs a handler
    ///
    /// `strategy` must derive code signatures the same way as the strategy
    /// used by the authorization code handler.
    pub fn new(storage: Arc<T>, strategy: Arc<S>, config: Arc<C>) -> Self {
        Self {
            storage,
            strategy,
            config,
        }
    }

    /// Records the code challenge of an authorize request
    ///
    /// Requests that do not ask for a `code` are left alone.
    ///
    /// # Errors
    ///
    /// * `invalid_request` if the challenge is missing but required, or uses
    ///   a method that is not allowed
    /// * `server_error` if no code has been issued yet or the record cannot
    ///   be persisted
    pub async fn handle_authorize_endpoint_request(
        &self,
        request: &AuthorizeRequest,
        response: &AuthorizeResponse,
    ) -> Result<(), Error> {
        if !request.response_types().has(RESPONSE_TYPE_CODE) {
            return Ok(());
        }

        let challenge = request.form().get("code_challenge").unwrap_or_default();
        let method = request
            .form()
            .get("code_challenge_method")
            .unwrap_or_default();

        self.validate(challenge, method, request.client())?;

        if challenge.is_empty() && method.is_empty() {
            return Ok(());
        }

        let code = response.code().ok_or_else(|| {
            error::server_error("no authorization code in the authorize response")
                .with_debug("The PKCE handler must be loaded after the authorize code handler.")
        })?;

        let signature = self.strategy.authorize_code_signature(code);
        self.storage
            .create_pkce_request_session(&signature, request.sanitize(SANITIZE_ALLOWED))
            .await
            .map_err(error::server_error)?;

        tracing::debug!(%signature, %method, "stored PKCE challenge");
        Ok(())
    }

    /// Checks the code verifier of a token request
    ///
    /// # Errors
    ///
    /// * `unknown_request` if the grant type is not `authorization_code`
    /// * `invalid_request` if PKCE is required but was never initiated
    /// * `invalid_grant` if the verifier is malformed, does not match, or
    ///   no challenge is on record for it
    /// * `server_error` on storage failure
    pub async fn handle_token_endpoint_request(
        &self,
        request: &mut AccessRequest,
    ) -> Result<(), Error> {
        if !request.grant_types().exact_one(GRANT_TYPE_AUTHORIZATION_CODE) {
            return Err(error::unknown_request());
        }

        let verifier = request.form().get("code_verifier").unwrap_or_default();
        let code = AuthorizeCodeRef::from_str(request.form().get("code").unwrap_or_default());
        let signature = self.strategy.authorize_code_signature(code);

        let authorize_request = match self.storage.get_pkce_request_session(&signature).await {
            Ok(r) => r,
            Err(err @ StorageError::NotFound) => {
                if verifier.is_empty() {
                    return self.validate_no_pkce(request.client());
                }
                return Err(error::invalid_grant()
                    .with_hint("Unable to find initial PKCE data tied to this request")
                    .wrap(err));
            }
            Err(err) => return Err(error::server_error(err)),
        };

        match self.storage.delete_pkce_request_session(&signature).await {
            Ok(()) => {}
            Err(err @ StorageError::NotFound) => {
                return Err(error::invalid_grant()
                    .with_hint("Unable to find initial PKCE data tied to this request")
                    .wrap(err));
            }
            Err(err) => return Err(error::server_error(err)),
        }

        tracing::debug!(%signature, "consumed PKCE challenge");

        let challenge = authorize_request
            .form()
            .get("code_challenge")
            .unwrap_or_default();
        let method = authorize_request
            .form()
            .get("code_challenge_method")
            .unwrap_or_default();

        self.validate(challenge, method, authorize_request.client())?;

        if !self.config.enforce_pkce() && challenge.is_empty() && verifier.is_empty() {
            return Ok(());
        }

        check_verifier_format(verifier)?;

        if challenge.is_empty() {
            return Err(error::invalid_grant().with_hint(
                "The PKCE code verifier was provided but the code challenge was absent from the authorization request.",
            ));
        }

        let method = CodeChallengeMethod::parse(method).unwrap_or(CodeChallengeMethod::Plain);
        if method.challenge(verifier) != challenge {
            return Err(error::invalid_grant()
                .with_hint("The PKCE code challenge did not match the code verifier."));
        }

        Ok(())
    }

    /// Nothing to add to the response once the verifier has been accepted
    ///
    /// # Errors
    ///
    /// Returns `unknown_request` if the grant type is not `authorization_code`.
    pub fn populate_token_endpoint_response(&self, request: &AccessRequest) -> Result<(), Error> {
        if request.grant_types().exact_one(GRANT_TYPE_AUTHORIZATION_CODE) {
            Ok(())
        } else {
            Err(error::unknown_request())
        }
    }

    /// Checks a challenge and its method against the configuration
    ///
    /// # Errors
    ///
    /// Returns `invalid_request` if the challenge is missing but required, or
    /// if the method is unsupported or not allowed.
    pub fn validate(&self, challenge: &str, method: &str, client: &Client) -> Result<(), Error> {
        if challenge.is_empty() {
            return self.validate_no_pkce(client);
        }

        match CodeChallengeMethod::parse(method) {
            Some(CodeChallengeMethod::S256) => Ok(()),
            Some(CodeChallengeMethod::Plain) => {
                if self.config.enable_pkce_plain_challenge_method() {
                    Ok(())
                } else {
                    Err(error::invalid_request()
                        .with_hint(
                            "Clients must use code_challenge_method=S256, plain is not allowed.",
                        )
                        .with_debug(
                            "The server is configured in a way that enforces PKCE S256 as challenge method for clients.",
                        ))
                }
            }
            None => Err(error::invalid_request()
                .with_hint("The code_challenge_method is not supported, use S256 instead.")),
        }
    }

    /// Checks that going without PKCE is allowed for a client
    ///
    /// # Errors
    ///
    /// Returns `invalid_request` if PKCE is enforced for every client, or for
    /// public clients and `client` is public.
    pub fn validate_no_pkce(&self, client: &Client) -> Result<(), Error> {
        if self.config.enforce_pkce() {
            return Err(error::invalid_request()
                .with_hint(
                    "Clients must include a code_challenge when performing the authorize code flow, but it is missing.",
                )
                .with_debug("The server is configured in a way that enforces PKCE for clients."));
        }

        if self.config.enforce_pkce_for_public_clients() && client.is_public() {
            return Err(error::invalid_request()
                .with_hint(
                    "This client must include a code_challenge when performing the authorize code flow, but it is missing.",
                )
                .with_debug(
                    "The server is configured in a way that enforces PKCE for this client.",
                ));
        }

        Ok(())
    }
}

fn check_verifier_format(verifier: &str) -> Result<(), Error> {
    if verifier.len() < MIN_VERIFIER_LEN {
        Err(error::invalid_grant()
            .with_hint("The PKCE code verifier must be at least 43 characters."))
    } else if verifier.len() > MAX_VERIFIER_LEN {
        Err(error::invalid_grant()
            .with_hint("The PKCE code verifier can not be longer than 128 characters."))
    } else if VERIFIER_WRONG_FORMAT.is_match(verifier) {
        Err(error::invalid_grant().with_hint(
            "The PKCE code verifier must only contain [a-Z], [0-9], '-', '.', '_', '~'.",
        ))
    } else {
        Ok(())
    }
}

#[async_trait]
impl<T, S, C> TokenEndpointHandler for PkceHandler<T, S, C>
where
    T: PkceRequestStorage + fmt::Debug,
    S: AuthorizeCodeStrategy + fmt::Debug,
    C: PkceConfig + fmt::Debug,
{
    fn can_handle(&self, request: &AccessRequest) -> bool {
        request.grant_types().exact_one(GRANT_TYPE_AUTHORIZATION_CODE)
    }

    async fn handle(&self, request: &mut AccessRequest) -> Outcome {
        self.handle_token_endpoint_request(request).await.into()
    }

    async fn populate_response(
        &self,
        request: &mut AccessRequest,
        _response: &mut AccessResponse,
    ) -> Outcome {
        self.populate_token_endpoint_response(request).into()
    }
}

#[async_trait]
impl<T, S, C> AuthorizeEndpointHandler for PkceHandler<T, S, C>
where
    T: PkceRequestStorage + fmt::Debug,
    S: AuthorizeCodeStrategy + fmt::Debug,
    C: PkceConfig + fmt::Debug,
{
    async fn handle(
        &self,
        request: &mut AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Outcome {
        if !request.response_types().has(RESPONSE_TYPE_CODE) {
            return Outcome::not_applicable("response type does not include \"code\"");
        }

        self.handle_authorize_endpoint_request(request, response)
            .await
            .into()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use aliri_clock::{TestClock, UnixTime};
    use color_eyre::Result;
    use keyward::{
        strategy::HmacStrategy, AuthorizeCode, AuthorizeEndpoint, ClientId, ErrorKind, Form,
        Request, TokenEndpoint, TokenSignatureRef,
    };
    use keyward_memory::MemoryStore;
    use keyward_oauth2::AuthorizeCodeHandler;
    use tracing_test::traced_test;

    use super::*;

    type FailingHandler = PkceHandler<FailingStore, HmacStrategy<TestClock>, Config>;

    const NOW: UnixTime = UnixTime(1_700_000_000);
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    struct Fixture {
        store: Arc<MemoryStore<TestClock>>,
        strategy: Arc<HmacStrategy<TestClock>>,
        config: Arc<Config>,
    }

    impl Fixture {
        fn new(config: Config) -> Self {
            let clock = TestClock::new(NOW);
            Self {
                store: Arc::new(MemoryStore::with_clock(clock.clone())),
                strategy: Arc::new(HmacStrategy::with_clock(b"a server secret", clock)),
                config: Arc::new(config),
            }
        }

        fn handler(&self) -> PkceHandler<MemoryStore<TestClock>, HmacStrategy<TestClock>, Config> {
            PkceHandler::new(
                self.store.clone(),
                self.strategy.clone(),
                self.config.clone(),
            )
        }

        fn failing_handler(&self, failing: Failing) -> FailingHandler {
            PkceHandler::new(
                Arc::new(FailingStore {
                    inner: self.store.clone(),
                    failing,
                }),
                self.strategy.clone(),
                self.config.clone(),
            )
        }

        /// Stores a challenge the way the authorize phase would and returns its code
        async fn pending(&self, challenge: &str, method: &str) -> Result<AuthorizeCode> {
            let mut response = AuthorizeResponse::new();
            let request = authorize_request(confidential(), challenge, method);
            let (code, _) = self.strategy.generate_authorize_code(&request)?;
            response.set_code(code.clone());
            self.handler()
                .handle_authorize_endpoint_request(&request, &response)
                .await?;
            Ok(code)
        }

        async fn exchange(&self, code: &AuthorizeCodeRef, verifier: &str) -> Result<(), Error> {
            let mut request = token_request(confidential(), code, verifier);
            self.handler()
                .handle_token_endpoint_request(&mut request)
                .await
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Failing {
        Create,
        Get,
        Delete,
    }

    /// Fails one operation and passes the rest through to memory
    #[derive(Debug)]
    struct FailingStore {
        inner: Arc<MemoryStore<TestClock>>,
        failing: Failing,
    }

    impl FailingStore {
        fn check(&self, op: Failing) -> Result<(), StorageError> {
            if self.failing == op {
                Err(StorageError::backend("connection reset by peer"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl PkceRequestStorage for FailingStore {
        async fn create_pkce_request_session(
            &self,
            signature: &TokenSignatureRef,
            request: Request,
        ) -> Result<(), StorageError> {
            self.check(Failing::Create)?;
            self.inner
                .create_pkce_request_session(signature, request)
                .await
        }

        async fn get_pkce_request_session(
            &self,
            signature: &TokenSignatureRef,
        ) -> Result<Request, StorageError> {
            self.check(Failing::Get)?;
            self.inner.get_pkce_request_session(signature).await
        }

        async fn delete_pkce_request_session(
            &self,
            signature: &TokenSignatureRef,
        ) -> Result<(), StorageError> {
            self.check(Failing::Delete)?;
            self.inner.delete_pkce_request_session(signature).await
        }
    }

    fn confidential() -> Arc<Client> {
        Arc::new(
            Client::new(ClientId::from_static("confidential"))
                .with_grant_types([GRANT_TYPE_AUTHORIZATION_CODE])
                .with_response_types([RESPONSE_TYPE_CODE])
                .with_scopes(["read"]),
        )
    }

    fn public() -> Arc<Client> {
        Arc::new(
            Client::new(ClientId::from_static("public"))
                .with_public(true)
                .with_grant_types([GRANT_TYPE_AUTHORIZATION_CODE])
                .with_response_types([RESPONSE_TYPE_CODE]),
        )
    }

    fn authorize_request(client: Arc<Client>, challenge: &str, method: &str) -> AuthorizeRequest {
        let mut form: Form = [("response_type", RESPONSE_TYPE_CODE)]
            .into_iter()
            .collect();
        if !challenge.is_empty() {
            form.set("code_challenge", challenge);
        }
        if !method.is_empty() {
            form.set("code_challenge_method", method);
        }
        AuthorizeRequest::new(client, form, NOW)
    }

    fn token_request(
        client: Arc<Client>,
        code: &AuthorizeCodeRef,
        verifier: &str,
    ) -> AccessRequest {
        let mut form: Form = [
            ("grant_type", GRANT_TYPE_AUTHORIZATION_CODE),
            ("code", code.as_str()),
        ]
        .into_iter()
        .collect();
        if !verifier.is_empty() {
            form.set("code_verifier", verifier);
        }
        AccessRequest::new(client, form, NOW)
    }

    fn plain_allowed() -> Config {
        Config::default().with_pkce_plain_challenge_method(true)
    }

    #[test]
    fn s256_matches_known_vector() {
        assert_eq!(CodeChallengeMethod::S256.challenge(RFC_VERIFIER), RFC_CHALLENGE);
        assert_eq!(CodeChallengeMethod::Plain.challenge("abc"), "abc");
        assert_eq!(CodeChallengeMethod::parse(""), Some(CodeChallengeMethod::Plain));
        assert_eq!(CodeChallengeMethod::parse("S512"), None);
    }

    #[tokio::test]
    #[traced_test]
    async fn accepts_s256_verifier_once() -> Result<()> {
        let fixture = Fixture::new(Config::default());
        let code = fixture.pending(RFC_CHALLENGE, "S256").await?;

        fixture.exchange(&code, RFC_VERIFIER).await?;

        let err = fixture.exchange(&code, RFC_VERIFIER).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrant);
        assert_eq!(
            err.hint(),
            Some("Unable to find initial PKCE data tied to this request")
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_check_still_consumes_challenge() -> Result<()> {
        let fixture = Fixture::new(Config::default());
        let code = fixture.pending(RFC_CHALLENGE, "S256").await?;

        let wrong = "x".repeat(43);
        let err = fixture.exchange(&code, &wrong).await.unwrap_err();
        assert_eq!(
            err.hint(),
            Some("The PKCE code challenge did not match the code verifier.")
        );

        let err = fixture.exchange(&code, RFC_VERIFIER).await.unwrap_err();
        assert_eq!(
            err.hint(),
            Some("Unable to find initial PKCE data tied to this request")
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn verifier_length_boundaries() -> Result<()> {
        let fixture = Fixture::new(plain_allowed());

        for len in [43, 128] {
            let verifier = "v".repeat(len);
            let code = fixture.pending(&verifier, "plain").await?;
            fixture.exchange(&code, &verifier).await?;
        }

        let cases = [
            (42, "The PKCE code verifier must be at least 43 characters."),
            (129, "The PKCE code verifier can not be longer than 128 characters."),
        ];
        for (len, hint) in cases {
            let verifier = "v".repeat(len);
            let code = fixture.pending(&verifier, "plain").await?;
            let err = fixture.exchange(&code, &verifier).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidGrant);
            assert_eq!(err.hint(), Some(hint));
        }
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn verifier_must_use_unreserved_characters() -> Result<()> {
        let fixture = Fixture::new(plain_allowed());

        for verifier in [format!("{}!", "a".repeat(42)), format!("{} b", "a".repeat(60))] {
            let code = fixture.pending(&verifier, "plain").await?;
            let err = fixture.exchange(&code, &verifier).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidGrant);
            assert_eq!(
                err.hint(),
                Some("The PKCE code verifier must only contain [a-Z], [0-9], '-', '.', '_', '~'.")
            );
        }

        let verifier = format!("{}-._~", "Az09".repeat(10));
        let code = fixture.pending(&verifier, "plain").await?;
        fixture.exchange(&code, &verifier).await?;
        Ok(())
    }

    #[test]
    fn plain_requires_configuration() {
        let fixture = Fixture::new(Config::default());
        let handler = fixture.handler();

        for method in ["plain", ""] {
            let err = handler
                .validate("a-challenge", method, &confidential())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest);
            assert_eq!(
                err.hint(),
                Some("Clients must use code_challenge_method=S256, plain is not allowed.")
            );
        }

        let err = handler
            .validate("a-challenge", "S512", &confidential())
            .unwrap_err();
        assert_eq!(
            err.hint(),
            Some("The code_challenge_method is not supported, use S256 instead.")
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn plain_compares_verifier_directly() -> Result<()> {
        let fixture = Fixture::new(plain_allowed());
        let verifier = "p".repeat(50);

        let code = fixture.pending(&verifier, "").await?;
        fixture.exchange(&code, &verifier).await?;

        let code = fixture.pending(&verifier, "plain").await?;
        let err = fixture.exchange(&code, &"q".repeat(50)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrant);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn enforcement_applies_at_authorize_time() -> Result<()> {
        let fixture = Fixture::new(Config::default().with_enforce_pkce(true));
        let request = authorize_request(confidential(), "", "");
        let err = fixture
            .handler()
            .handle_authorize_endpoint_request(&request, &AuthorizeResponse::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let fixture = Fixture::new(Config::default().with_enforce_pkce_for_public_clients(true));
        let handler = fixture.handler();
        let err = handler
            .handle_authorize_endpoint_request(
                &authorize_request(public(), "", ""),
                &AuthorizeResponse::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.hint(),
            Some("This client must include a code_challenge when performing the authorize code flow, but it is missing.")
        );

        handler
            .handle_authorize_endpoint_request(
                &authorize_request(confidential(), "", ""),
                &AuthorizeResponse::new(),
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn enforcement_applies_when_no_challenge_is_on_record() -> Result<()> {
        let code = AuthorizeCodeRef::from_str("a2V5.c2ln");

        let fixture = Fixture::new(Config::default());
        fixture.exchange(code, "").await?;

        let err = fixture.exchange(code, &"v".repeat(43)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrant);

        let fixture = Fixture::new(Config::default().with_enforce_pkce(true));
        let err = fixture.exchange(code, "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn verifier_without_challenge_is_rejected() -> Result<()> {
        let fixture = Fixture::new(Config::default());
        let request = authorize_request(confidential(), "", "");
        let (code, signature) = fixture.strategy.generate_authorize_code(&request)?;
        fixture
            .store
            .create_pkce_request_session(&signature, request.sanitize(SANITIZE_ALLOWED))
            .await?;

        let err = fixture.exchange(&code, &"v".repeat(43)).await.unwrap_err();
        assert_eq!(
            err.hint(),
            Some("The PKCE code verifier was provided but the code challenge was absent from the authorization request.")
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn challenge_without_code_is_a_server_error() {
        let fixture = Fixture::new(Config::default());
        let request = authorize_request(confidential(), RFC_CHALLENGE, "S256");
        let err = fixture
            .handler()
            .handle_authorize_endpoint_request(&request, &AuthorizeResponse::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(
            err.debug(),
            Some("The PKCE handler must be loaded after the authorize code handler.")
        );
    }

    #[tokio::test]
    async fn other_grants_are_not_applicable() {
        let fixture = Fixture::new(Config::default());
        let form: Form = [("grant_type", "client_credentials")]
            .into_iter()
            .collect();
        let mut request = AccessRequest::new(confidential(), form, NOW);
        assert!(matches!(
            TokenEndpointHandler::handle(&fixture.handler(), &mut request).await,
            Outcome::NotApplicable(_)
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn storage_failures_are_server_errors() -> Result<()> {
        let fixture = Fixture::new(Config::default());

        let request = authorize_request(confidential(), RFC_CHALLENGE, "S256");
        let (code, _) = fixture.strategy.generate_authorize_code(&request)?;
        let mut response = AuthorizeResponse::new();
        response.set_code(code.clone());
        let err = fixture
            .failing_handler(Failing::Create)
            .handle_authorize_endpoint_request(&request, &response)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(fixture.store.pkce_request_count(), 0);

        let code = fixture.pending(RFC_CHALLENGE, "S256").await?;
        for op in [Failing::Get, Failing::Delete] {
            let mut request = token_request(confidential(), &code, RFC_VERIFIER);
            let err = fixture
                .failing_handler(op)
                .handle_token_endpoint_request(&mut request)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ServerError, "{:?}", op);
        }

        fixture.exchange(&code, RFC_VERIFIER).await?;
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn authorization_code_flow_with_s256() -> Result<()> {
        let clock = TestClock::new(NOW);
        let lifespan = Duration::from_secs(1_800);
        let fixture = Fixture::new(Config::default().with_access_token_lifespan(lifespan));
        let code_handler = AuthorizeCodeHandler::with_clock(
            fixture.store.clone(),
            fixture.strategy.clone(),
            fixture.config.clone(),
            clock,
        );

        let authorize = AuthorizeEndpoint::new()
            .with_handler(code_handler.clone())
            .with_handler(fixture.handler());
        let token = TokenEndpoint::new()
            .with_handler(code_handler)
            .with_handler(fixture.handler());

        let mut request = authorize_request(confidential(), RFC_CHALLENGE, "S256");
        request.grant_scope("read");
        let response = authorize.handle_authorize_request(&mut request).await?;
        let code = response.code().expect("code issued").to_owned();

        let mut request = token_request(confidential(), &code, RFC_VERIFIER);
        token.handle_access_request(&mut request).await?;
        let response = token.populate_access_response(&mut request).await?;

        assert!(response.access_token().is_some());
        assert_eq!(response.token_type(), "bearer");
        assert_eq!(response.expires_in(), Some(lifespan));
        assert!(response.scopes().has("read"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn authorization_code_flow_rejects_wrong_verifier() -> Result<()> {
        let clock = TestClock::new(NOW);
        let fixture = Fixture::new(Config::default());
        let code_handler = AuthorizeCodeHandler::with_clock(
            fixture.store.clone(),
            fixture.strategy.clone(),
            fixture.config.clone(),
            clock,
        );

        let authorize = AuthorizeEndpoint::new()
            .with_handler(code_handler.clone())
            .with_handler(fixture.handler());
        let token = TokenEndpoint::new()
            .with_handler(code_handler)
            .with_handler(fixture.handler());

        let mut request = authorize_request(confidential(), RFC_CHALLENGE, "S256");
        let response = authorize.handle_authorize_request(&mut request).await?;
        let code = response.code().expect("code issued").to_owned();

        let mut request = token_request(confidential(), &code, &"z".repeat(43));
        let err = token.handle_access_request(&mut request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrant);
        Ok(())
    }
}
