//! The OAuth 2.0 authorization code grant
//!
//! [`AuthorizeCodeHandler`] takes part in both halves of the flow described
//! in [RFC6749, section 4.1][RFC6749]: it issues codes at the authorize
//! endpoint and exchanges them for access tokens at the token endpoint.
//! Other handlers, such as PKCE, are chained after it and rely on the code
//! it issues.
//!
//! [RFC6749]: https://tools.ietf.org/html/rfc6749#section-4.1

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

use std::{sync::Arc, time::Duration};

use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;
use keyward::{
    effective_lifespan, error,
    issue::issue_access_token,
    storage::{AccessTokenStorage, AuthorizeCodeStorage, StorageError},
    strategy::{AccessTokenStrategy, AuthorizeCodeStrategy},
    AccessRequest, AccessResponse, AudienceMatchingStrategy, AuthorizeCodeRef,
    AuthorizeEndpointHandler, AuthorizeRequest, AuthorizeResponse, Config, Error, Outcome,
    Request, ScopeStrategy, TokenEndpointHandler, TokenType, GRANT_TYPE_AUTHORIZATION_CODE,
    RESPONSE_TYPE_CODE,
};

/// Configuration read by the authorization code handler
pub trait AuthorizeCodeConfig: Send + Sync {
    /// Lifespan of access tokens
    fn access_token_lifespan(&self) -> Duration;
    /// Lifespan of authorization codes
    fn authorize_code_lifespan(&self) -> Duration;
    /// How requested scopes are matched against the client's scopes
    fn scope_strategy(&self) -> ScopeStrategy;
    /// How requested audiences are matched against the client's audiences
    fn audience_matching_strategy(&self) -> AudienceMatchingStrategy;
}

impl AuthorizeCodeConfig for Config {
    fn access_token_lifespan(&self) -> Duration {
        self.access_token_lifespan
    }

    fn authorize_code_lifespan(&self) -> Duration {
        self.authorize_code_lifespan
    }

    fn scope_strategy(&self) -> ScopeStrategy {
        self.scope_strategy
    }

    fn audience_matching_strategy(&self) -> AudienceMatchingStrategy {
        self.audience_matching_strategy
    }
}

/// Form parameters kept when persisting an authorize request
const SANITIZE_ALLOWED: &[&str] = &["redirect_uri"];

/// Handles the authorization code grant
#[derive(Debug)]
pub struct AuthorizeCodeHandler<T, S, C, K = System> {
    storage: Arc<T>,
    strategy: Arc<S>,
    config: Arc<C>,
    clock: K,
}

impl<T, S, C, K: Clone> Clone for AuthorizeCodeHandler<T, S, C, K> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            strategy: Arc::clone(&self.strategy),
            config: Arc::clone(&self.config),
            clock: self.clock.clone(),
        }
    }
}

impl<T, S, C> AuthorizeCodeHandler<T, S, C> {
    /// Constructs a handler using the system clock
    pub fn new(storage: Arc<T>, strategy: Arc<S>, config: Arc<C>) -> Self {
        Self::with_clock(storage, strategy, config, System)
    }
}

impl<T, S, C, K> AuthorizeCodeHandler<T, S, C, K> {
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

impl<T, S, C, K> AuthorizeCodeHandler<T, S, C, K>
where
    T: AuthorizeCodeStorage + AccessTokenStorage,
    S: AuthorizeCodeStrategy + AccessTokenStrategy,
    C: AuthorizeCodeConfig,
    K: Clock + Send + Sync,
{
    /// Issues an authorization code when exactly the `code` response type is requested
    ///
    /// Returns `Ok(false)` without side effects for any other response type.
    ///
    /// # Errors
    ///
    /// * `invalid_scope` if the client may not request one of the scopes
    /// * `invalid_request` if the client may not request one of the audiences
    /// * `server_error` if the code cannot be generated or persisted
    pub async fn handle_authorize_endpoint_request(
        &self,
        request: &mut AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Result<bool, Error> {
        if !request.response_types().exact_one(RESPONSE_TYPE_CODE) {
            return Ok(false);
        }

        let client = request.client().clone();
        let strategy = self.config.scope_strategy();
        if let Some(scope) = request
            .requested_scopes()
            .iter()
            .find(|s| !strategy.is_match(client.scopes(), s))
        {
            return Err(error::invalid_scope().with_hint(format!(
                "The OAuth 2.0 Client is not allowed to request scope '{}'.",
                scope
            )));
        }

        self.config
            .audience_matching_strategy()
            .check(client.audience(), request.requested_audience())?;

        let (code, signature) = self.strategy.generate_authorize_code(request)?;

        let lifespan = self.config.authorize_code_lifespan();
        let expires_at = UnixTime(self.clock.now().0.saturating_add(lifespan.as_secs()));
        request
            .session_mut()
            .set_expires_at(TokenType::AuthorizeCode, expires_at);

        self.storage
            .create_authorize_code_session(&signature, request.sanitize(SANITIZE_ALLOWED))
            .await
            .map_err(error::server_error)?;

        tracing::debug!(%signature, client.id = %client.id(), "issued authorization code");

        response.set_code(code);
        response.add_parameter("state", request.state().unwrap_or_default());
        response.add_parameter("scope", request.granted_scopes().to_string());

        Ok(true)
    }

    /// Validates an authorization code presented at the token endpoint
    ///
    /// # Errors
    ///
    /// * `unknown_request` if the grant type is not `authorization_code`
    /// * `unauthorized_client` if the client may not use this grant
    /// * `invalid_grant` if the code is unknown, reused, forged, expired, or
    ///   was issued to another client or redirect URI
    /// * `server_error` on storage failure
    pub async fn handle_token_endpoint_request(
        &self,
        request: &mut AccessRequest,
    ) -> Result<(), Error> {
        if !self.can_handle_token_endpoint_request(request) {
            return Err(error::unknown_request());
        }

        if !request
            .client()
            .grant_types()
            .has(GRANT_TYPE_AUTHORIZATION_CODE)
        {
            return Err(error::unauthorized_client().with_hint(
                "The OAuth 2.0 Client is not allowed to use authorization grant \"authorization_code\".",
            ));
        }

        let code = request.form().get("code").unwrap_or_default().to_owned();
        let code = AuthorizeCodeRef::from_str(&code);
        let signature = self.strategy.authorize_code_signature(code);

        let authorize_request = match self.storage.get_authorize_code_session(&signature).await {
            Ok(r) => r,
            Err(StorageError::Invalidated(previous)) => {
                tracing::warn!(%signature, "authorization code presented more than once");
                return Err(self.revoke_after_reuse(&previous).await);
            }
            Err(err @ StorageError::NotFound) => {
                return Err(error::invalid_grant()
                    .with_hint("The provided authorization code is unknown.")
                    .wrap(err));
            }
            Err(err) => return Err(error::server_error(err)),
        };

        self.strategy
            .validate_authorize_code(&authorize_request, code)?;

        request.set_requested_scopes(authorize_request.requested_scopes().clone());
        request.set_requested_audience(authorize_request.requested_audience().clone());

        if authorize_request.client().id() != request.client().id() {
            return Err(error::invalid_grant().with_hint(
                "The OAuth 2.0 Client ID from this request does not match the one from the authorize request.",
            ));
        }

        if let Some(forced) = authorize_request.form().get("redirect_uri") {
            if !forced.is_empty() && request.form().get("redirect_uri") != Some(forced) {
                return Err(error::invalid_grant().with_hint(
                    "The \"redirect_uri\" from this request does not match the one from the authorize request.",
                ));
            }
        }

        request.set_session(authorize_request.session().clone());
        request.set_id(authorize_request.id());

        let lifespan = effective_lifespan(
            request.client(),
            GRANT_TYPE_AUTHORIZATION_CODE,
            TokenType::AccessToken,
            self.config.access_token_lifespan(),
        );
        let expires_at = UnixTime(self.clock.now().0.saturating_add(lifespan.as_secs()));
        request
            .session_mut()
            .set_expires_at(TokenType::AccessToken, expires_at);

        Ok(())
    }

    /// Exchanges a validated authorization code for an access token
    ///
    /// # Errors
    ///
    /// * `unknown_request` if the grant type is not `authorization_code`
    /// * `invalid_grant` if the code was used in the meantime
    /// * `server_error` on storage failure
    pub async fn populate_token_endpoint_response(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Result<(), Error> {
        if !self.can_handle_token_endpoint_request(request) {
            return Err(error::unknown_request());
        }

        let code = request.form().get("code").unwrap_or_default().to_owned();
        let code = AuthorizeCodeRef::from_str(&code);
        let signature = self.strategy.authorize_code_signature(code);

        let authorize_request = match self.storage.get_authorize_code_session(&signature).await {
            Ok(r) => r,
            Err(StorageError::Invalidated(_)) => {
                return Err(error::invalid_grant()
                    .with_hint("The authorization code has already been used."));
            }
            Err(err) => return Err(error::server_error(err)),
        };

        self.strategy
            .validate_authorize_code(&authorize_request, code)
            .map_err(|e| error::invalid_request().wrap(e))?;

        for scope in authorize_request.granted_scopes() {
            request.grant_scope(scope);
        }
        for audience in authorize_request.granted_audience() {
            request.grant_audience(audience);
        }

        self.storage
            .invalidate_authorize_code_session(&signature)
            .await
            .map_err(error::server_error)?;

        let lifespan = effective_lifespan(
            request.client(),
            GRANT_TYPE_AUTHORIZATION_CODE,
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
        request.grant_types().exact_one(GRANT_TYPE_AUTHORIZATION_CODE)
    }

    async fn revoke_after_reuse(&self, previous: &Request) -> Error {
        let hint = "The authorization code has already been used.";
        match self.storage.revoke_access_token(previous.id()).await {
            Ok(()) => error::invalid_grant().with_hint(hint),
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "unable to revoke access tokens after code reuse");
                error::invalid_grant()
                    .with_hint(format!(
                        "{} Additionally, an error occurred during processing the access token revocation.",
                        hint
                    ))
                    .with_debug(format!("Revocation of access_token lead to error {}.", err))
            }
        }
    }
}

#[async_trait]
impl<T, S, C, K> TokenEndpointHandler for AuthorizeCodeHandler<T, S, C, K>
where
    T: AuthorizeCodeStorage + AccessTokenStorage + std::fmt::Debug,
    S: AuthorizeCodeStrategy + AccessTokenStrategy + std::fmt::Debug,
    C: AuthorizeCodeConfig + std::fmt::Debug,
    K: Clock + Send + Sync + std::fmt::Debug,
{
    fn can_handle(&self, request: &AccessRequest) -> bool {
        self.can_handle_token_endpoint_request(request)
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

#[async_trait]
impl<T, S, C, K> AuthorizeEndpointHandler for AuthorizeCodeHandler<T, S, C, K>
where
    T: AuthorizeCodeStorage + AccessTokenStorage + std::fmt::Debug,
    S: AuthorizeCodeStrategy + AccessTokenStrategy + std::fmt::Debug,
    C: AuthorizeCodeConfig + std::fmt::Debug,
    K: Clock + Send + Sync + std::fmt::Debug,
{
    async fn handle(
        &self,
        request: &mut AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Outcome {
        match self.handle_authorize_endpoint_request(request, response).await {
            Ok(true) => Outcome::Handled,
            Ok(false) => Outcome::not_applicable("response type is not exactly \"code\""),
            Err(err) => Outcome::Failed(err),
        }
    }
}
