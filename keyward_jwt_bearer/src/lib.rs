//! The JWT bearer authorization grant
//!
//! [`JwtBearerGrantHandler`] implements [RFC7523, section 2.1][RFC7523]: a
//! client presents a signed JWT as the `assertion` parameter and receives
//! an access token acting on behalf of the assertion's subject. There is no
//! authorize step. The assertion itself is the grant.
//!
//! Assertions are checked against public keys registered for their issuer
//! and subject. Each key carries the set of scopes it may request, and each
//! JWT ID is accepted once until the assertion expires.
//!
//! [RFC7523]: https://tools.ietf.org/html/rfc7523#section-2.1

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

use std::{fmt, sync::Arc, time::Duration};

use aliri::{
    jwt::{CoreClaims, CoreHeaders, CoreValidator, Decomposed, IssuerRef, SubjectRef},
    Jwk, JwtRef,
};
use aliri_base64::Base64Url;
use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;
use keyward::{
    effective_lifespan, error,
    issue::issue_access_token,
    storage::{AccessTokenStorage, JwtBearerKeyStorage, StorageError},
    strategy::AccessTokenStrategy,
    AccessRequest, AccessResponse, AudienceMatchingStrategy, Config, Error, Outcome,
    ScopeStrategy, TokenEndpointHandler, TokenType, GRANT_TYPE_JWT_BEARER,
};

mod claims;

pub use claims::AssertionClaims;

/// Configuration read by the JWT bearer grant handler
pub trait JwtBearerConfig: Send + Sync {
    /// Lifespan of access tokens
    fn access_token_lifespan(&self) -> Duration;
    /// Audience values identifying this server's token endpoint
    fn token_urls(&self) -> &[String];
    /// Whether clients may use this grant without authenticating
    fn jwt_bearer_can_skip_client_auth(&self) -> bool;
    /// Whether assertions may omit the `jti` claim
    fn jwt_bearer_id_optional(&self) -> bool;
    /// Whether assertions may omit the `iat` claim
    fn jwt_bearer_issued_date_optional(&self) -> bool;
    /// The longest lifetime an assertion may claim
    fn jwt_max_duration(&self) -> Duration;
    /// How requested scopes are matched against a key's scopes
    fn scope_strategy(&self) -> ScopeStrategy;
    /// How requested audiences are matched against the client's audiences
    fn audience_matching_strategy(&self) -> AudienceMatchingStrategy;
}

impl JwtBearerConfig for Config {
    fn access_token_lifespan(&self) -> Duration {
        self.access_token_lifespan
    }

    fn token_urls(&self) -> &[String] {
        &self.token_urls
    }

    fn jwt_bearer_can_skip_client_auth(&self) -> bool {
        self.jwt_bearer_can_skip_client_auth
    }

    fn jwt_bearer_id_optional(&self) -> bool {
        self.jwt_bearer_id_optional
    }

    fn jwt_bearer_issued_date_optional(&self) -> bool {
        self.jwt_bearer_issued_date_optional
    }

    fn jwt_max_duration(&self) -> Duration {
        self.jwt_max_duration
    }

    fn scope_strategy(&self) -> ScopeStrategy {
        self.scope_strategy
    }

    fn audience_matching_strategy(&self) -> AudienceMatchingStrategy {
        self.audience_matching_strategy
    }
}

/// Handles the JWT bearer authorization grant
#[derive(Debug)]
pub struct JwtBearerGrantHandler<T, S, C, K = System> {
    storage: Arc<T>,
    strategy: Arc<S>,
    config: Arc<C>,
    clock: K,
}

impl<T, S, C, K: Clone> Clone for JwtBearerGrantHandler<T, S, C, K> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            strategy: Arc::clone(&self.strategy),
            config: Arc::clone(&self.config),
            clock: self.clock.clone(),
        }
    }
}

impl<T, S, C> JwtBearerGrantHandler<T, S, C> {
    /// Constructs a handler using the system clock
    pub fn new(storage: Arc<T>, strategy: Arc<S>, config: Arc<C>) -> Self {
        Self::with_clock(storage, strategy, config, System)
    }
}

impl<T, S, C, K> JwtBearerGrantHandler<T, S, C, K> {
    /// Constructs a handler reading time from `clock`
    pub fn with_clock(storage: Arc<T>, strategy: Arc<S>, config: Arc<C>, clock: K) -> Self {
        Self {
            storage,
            strategy,
            config,
            clock,
        }
    }
}

fn assertion_hint(rest: &str) -> String {
    format!("The JWT in \"assertion\" request parameter {}", rest)
}

impl<T, S, C, K> JwtBearerGrantHandler<T, S, C, K>
where
    T: JwtBearerKeyStorage + AccessTokenStorage,
    S: AccessTokenStrategy,
    C: JwtBearerConfig,
    K: Clock + Send + Sync,
{
    /// Whether the request uses the JWT bearer grant and the client may use it
    ///
    /// # Errors
    ///
    /// * `unknown_request` if the grant type is not the JWT bearer grant
    /// * `unauthorized_client` if client authentication is required and the
    ///   client is not registered for the grant
    pub fn check_request(&self, request: &AccessRequest) -> Result<(), Error> {
        if !self.can_handle_token_endpoint_request(request) {
            return Err(error::unknown_request());
        }

        if !self.config.jwt_bearer_can_skip_client_auth()
            && !request.client().grant_types().has(GRANT_TYPE_JWT_BEARER)
        {
            return Err(error::unauthorized_client().with_hint(format!(
                "The OAuth 2.0 Client is not allowed to use authorization grant \"{}\".",
                GRANT_TYPE_JWT_BEARER
            )));
        }

        Ok(())
    }

    /// Validates the assertion and grants the requested scopes
    ///
    /// Nothing is recorded unless every check passes. On success the
    /// assertion's JWT ID is marked as used, the requested scopes and the
    /// assertion's audiences are granted, and the session acts on behalf of
    /// the assertion's subject.
    ///
    /// # Errors
    ///
    /// * `unknown_request` or `unauthorized_client` per [`check_request`]
    /// * `invalid_request` if no assertion is present or the requested
    ///   audience is not allowed for the client
    /// * `invalid_grant` if the assertion is malformed, unverifiable, or
    ///   carries unacceptable claims
    /// * `jti_known` if the assertion's JWT ID was already used
    /// * `invalid_scope` if the signing key may not request a scope
    /// * `server_error` on storage failure
    ///
    /// [`check_request`]: Self::check_request
    pub async fn handle_token_endpoint_request(
        &self,
        request: &mut AccessRequest,
    ) -> Result<(), Error> {
        self.check_request(request)?;

        let assertion = request.form().get("assertion").unwrap_or_default();
        if assertion.is_empty() {
            return Err(error::invalid_request().with_hint(format!(
                "The assertion request parameter must be set when using grant_type of '{}'.",
                GRANT_TYPE_JWT_BEARER
            )));
        }

        let token = JwtRef::from_str(assertion);
        let decomposed: Decomposed = token.decompose().map_err(|e| {
            error::invalid_grant()
                .with_hint(
                    "Unable to parse JSON Web Token passed in \"assertion\" request parameter.",
                )
                .wrap(e)
        })?;

        let unverified = untrusted_claims(&decomposed)?;
        let (issuer, subject) = issuer_and_subject(&unverified)?;

        let key = self.find_public_key(&decomposed, issuer, subject).await?;

        let (_, claims) = decomposed
            .verify::<AssertionClaims, Jwk>(&key, &signature_only())
            .map_err(|e| {
                error::invalid_grant()
                    .with_hint("Unable to verify the integrity of the 'assertion' value.")
                    .wrap(e)
            })?
            .extract();

        // Verified claims from here on, the lookup claims above were untrusted.
        let (issuer, subject) = issuer_and_subject(&claims)?;

        let now = self.clock.now();
        let expires_at = self.validate_claims(&claims, now).await?;

        let allowed = self
            .storage
            .get_public_key_scopes(issuer, subject, key.key_id())
            .await
            .map_err(error::server_error)?;

        let strategy = self.config.scope_strategy();
        if let Some(scope) = request
            .requested_scopes()
            .iter()
            .find(|s| !strategy.is_match(&allowed, s))
        {
            return Err(error::invalid_scope().with_hint(format!(
                "The public key registered for issuer \"{}\" and subject \"{}\" is not allowed to request scope \"{}\".",
                issuer, subject, scope
            )));
        }

        self.config
            .audience_matching_strategy()
            .check(request.client().audience(), request.requested_audience())?;

        if let Some(jti) = claims.jti() {
            match self.storage.mark_jwt_used_for_time(jti, expires_at).await {
                Ok(()) => {}
                Err(StorageError::Conflict) => {
                    tracing::warn!(jti, "JWT ID used concurrently by another assertion");
                    return Err(error::jti_known());
                }
                Err(err) => return Err(error::server_error(err)),
            }
        }

        let requested = request.requested_scopes().clone();
        for scope in &requested {
            request.grant_scope(scope);
        }
        for audience in claims.aud().iter() {
            request.grant_audience(audience.as_str());
        }

        let lifespan = effective_lifespan(
            request.client(),
            GRANT_TYPE_JWT_BEARER,
            TokenType::AccessToken,
            self.config.access_token_lifespan(),
        );
        let session = request.session_mut();
        session.set_subject(subject.to_owned());
        session.set_expires_at(
            TokenType::AccessToken,
            UnixTime(now.0.saturating_add(lifespan.as_secs())),
        );

        tracing::debug!(%issuer, %subject, "accepted JWT bearer assertion");
        Ok(())
    }

    /// Issues an access token for a validated assertion
    ///
    /// # Errors
    ///
    /// * `unknown_request` or `unauthorized_client` per [`check_request`]
    /// * `server_error` if the token cannot be issued
    ///
    /// [`check_request`]: Self::check_request
    pub async fn populate_token_endpoint_response(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Result<(), Error> {
        self.check_request(request)?;

        let lifespan = effective_lifespan(
            request.client(),
            GRANT_TYPE_JWT_BEARER,
            TokenType::AccessToken,
            self.config.access_token_lifespan(),
        );

        issue_access_token(
            &*self.strategy,
            &*self.storage,
            &self.clock,
            lifespan,
            request,
            response,
        )
        .await
    }

    fn can_handle_token_endpoint_request(&self, request: &AccessRequest) -> bool {
        request.grant_types().exact_one(GRANT_TYPE_JWT_BEARER)
    }

    /// Finds the registered key that signed the assertion
    ///
    /// Uses the `kid` header when present. Otherwise every key registered
    /// for the issuer and subject is tried in turn.
    async fn find_public_key(
        &self,
        decomposed: &Decomposed<'_>,
        issuer: &IssuerRef,
        subject: &SubjectRef,
    ) -> Result<Jwk, Error> {
        let not_found = |err: Option<StorageError>| {
            let e = error::invalid_grant().with_hint(format!(
                "No public JWK was registered for issuer \"{}\" and subject \"{}\", and public key is required to check signature of JWT in \"assertion\" request parameter.",
                issuer, subject
            ));
            match err {
                Some(err) => e.wrap(err),
                None => e,
            }
        };

        if let Some(kid) = decomposed.kid() {
            let key = self
                .storage
                .get_public_key(issuer, subject, kid)
                .await
                .map_err(|e| not_found(Some(e)))?;
            tracing::debug!(%issuer, %subject, %kid, "resolved assertion key by ID");
            return Ok(key);
        }

        let keys = self
            .storage
            .get_public_keys(issuer, subject)
            .await
            .map_err(|e| not_found(Some(e)))?;

        let validator = signature_only();
        let key = keys
            .keys()
            .iter()
            .find(|key| {
                decomposed
                    .clone()
                    .verify::<AssertionClaims, Jwk>(key, &validator)
                    .is_ok()
            })
            .cloned()
            .ok_or_else(|| not_found(None))?;

        tracing::debug!(%issuer, %subject, "resolved assertion key by trial");
        Ok(key)
    }

    /// Checks the verified claims, returning the assertion's expiry
    async fn validate_claims(
        &self,
        claims: &AssertionClaims,
        now: UnixTime,
    ) -> Result<UnixTime, Error> {
        if claims.aud().is_empty() {
            return Err(error::invalid_grant()
                .with_hint(assertion_hint("MUST contain an \"aud\" (audience) claim.")));
        }

        let token_urls = self.config.token_urls();
        if !claims
            .aud()
            .iter()
            .any(|a| token_urls.iter().any(|u| u == a.as_str()))
        {
            return Err(error::invalid_grant().with_hint(assertion_hint(&format!(
                "MUST contain an \"aud\" (audience) claim containing a value \"{}\" that identifies the authorization server as an intended audience.",
                token_urls.join("\" or \"")
            ))));
        }

        let exp = claims.exp().ok_or_else(|| {
            error::invalid_grant()
                .with_hint(assertion_hint("MUST contain an \"exp\" (expiration time) claim."))
        })?;

        if exp <= now {
            return Err(error::invalid_grant().with_hint(assertion_hint("expired.")));
        }

        if let Some(nbf) = claims.nbf() {
            if nbf > now {
                return Err(error::invalid_grant().with_hint(assertion_hint(&format!(
                    "contains an \"nbf\" (not before) claim, that identifies the time '{}' before which the token MUST NOT be accepted.",
                    nbf.0
                ))));
            }
        }

        if !self.config.jwt_bearer_issued_date_optional() && claims.iat().is_none() {
            return Err(error::invalid_grant()
                .with_hint(assertion_hint("MUST contain an \"iat\" (issued at) claim.")));
        }

        let issued_at = claims.iat().unwrap_or(now);
        if exp.0.saturating_sub(issued_at.0) > self.config.jwt_max_duration().as_secs() {
            return Err(error::invalid_grant().with_hint(assertion_hint(&format!(
                "contains an \"exp\" (expiration time) claim with value \"{}\" that is unreasonably far in the future, considering token issued at \"{}\".",
                exp.0, issued_at.0
            ))));
        }

        if !self.config.jwt_bearer_id_optional() && claims.jti().is_none() {
            return Err(error::invalid_grant()
                .with_hint(assertion_hint("MUST contain an \"jti\" (JWT ID) claim.")));
        }

        if let Some(jti) = claims.jti() {
            let used = self
                .storage
                .is_jwt_used(jti)
                .await
                .map_err(error::server_error)?;
            if used {
                tracing::warn!(jti, "rejected replayed JWT bearer assertion");
                return Err(error::jti_known());
            }
        }

        Ok(exp)
    }
}

/// Reads the claims of an assertion whose signature has not been checked yet
fn untrusted_claims(decomposed: &Decomposed<'_>) -> Result<AssertionClaims, Error> {
    let no_claims = || {
        error::invalid_grant()
            .with_hint("Looks like there are no claims in JWT in \"assertion\" request parameter.")
    };

    let raw = Base64Url::from_encoded(decomposed.untrusted_payload())
        .map_err(|e| no_claims().wrap(e))?;
    serde_json::from_slice(raw.as_slice()).map_err(|e| no_claims().wrap(e))
}

fn issuer_and_subject(claims: &AssertionClaims) -> Result<(&IssuerRef, &SubjectRef), Error> {
    let issuer = claims.iss().ok_or_else(|| {
        error::invalid_grant().with_hint(assertion_hint("MUST contain an \"iss\" (issuer) claim."))
    })?;
    let subject = claims.sub().ok_or_else(|| {
        error::invalid_grant().with_hint(assertion_hint("MUST contain a \"sub\" (subject) claim."))
    })?;
    Ok((issuer, subject))
}

/// Checks nothing beyond the signature; time-based claims are checked
/// against the handler's clock instead
fn signature_only() -> CoreValidator {
    CoreValidator::default().ignore_expiration()
}

#[async_trait]
impl<T, S, C, K> TokenEndpointHandler for JwtBearerGrantHandler<T, S, C, K>
where
    T: JwtBearerKeyStorage + AccessTokenStorage + fmt::Debug,
    S: AccessTokenStrategy + fmt::Debug,
    C: JwtBearerConfig + fmt::Debug,
    K: Clock + Send + Sync + fmt::Debug,
{
    fn can_handle(&self, request: &AccessRequest) -> bool {
        self.can_handle_token_endpoint_request(request)
    }

    fn can_skip_client_auth(&self, _request: &AccessRequest) -> bool {
        self.config.jwt_bearer_can_skip_client_auth()
    }

    async fn handle(&self, request: &mut AccessRequest) -> Outcome {
        self.handle_token_endpoint_request(request).await.into()
    }

    async fn populate_response(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Outcome {
        self.populate_token_endpoint_response(request, response)
            .await
            .into()
    }
}
