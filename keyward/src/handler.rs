//! Handler traits and the dispatchers that run a chain of handlers
//!
//! Each handler inspects a request and either takes ownership of it or
//! declines with [`Outcome::NotApplicable`], letting the dispatcher move on
//! to the next handler in the chain. Several handlers may act on the same
//! request; PKCE, for instance, runs alongside the authorization code
//! handler.

use std::{borrow::Cow, fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    error, AccessRequest, AccessResponse, AuthorizeRequest, AuthorizeResponse, Error, ErrorKind,
};

/// The result of offering a request to a handler
#[derive(Debug)]
#[must_use]
pub enum Outcome {
    /// The handler processed the request
    Handled,
    /// The request is not the handler's concern
    NotApplicable(Cow<'static, str>),
    /// The handler rejected the request
    Failed(Error),
}

impl Outcome {
    /// A decline with the given reason
    pub fn not_applicable(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::NotApplicable(reason.into())
    }
}

impl From<Result<(), Error>> for Outcome {
    /// Maps the "unknown request" signal onto [`Outcome::NotApplicable`]
    fn from(result: Result<(), Error>) -> Self {
        match result {
            Ok(()) => Self::Handled,
            Err(err) if err.is(ErrorKind::UnknownRequest) => {
                Self::NotApplicable(err.hint().map_or(
                    Cow::Borrowed(ErrorKind::UnknownRequest.description()),
                    |h| Cow::Owned(h.to_owned()),
                ))
            }
            Err(err) => Self::Failed(err),
        }
    }
}

/// A handler taking part in token endpoint requests
#[async_trait]
pub trait TokenEndpointHandler: fmt::Debug + Send + Sync {
    /// Whether this handler is interested in the request at all
    fn can_handle(&self, request: &AccessRequest) -> bool;

    /// Whether the request may proceed without client authentication
    fn can_skip_client_auth(&self, _request: &AccessRequest) -> bool {
        false
    }

    /// Validates the request and records its outcome on the request
    async fn handle(&self, request: &mut AccessRequest) -> Outcome;

    /// Fills in the response for a request that passed validation
    async fn populate_response(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Outcome;
}

/// A handler taking part in authorize endpoint requests
#[async_trait]
pub trait AuthorizeEndpointHandler: fmt::Debug + Send + Sync {
    /// Validates the request and fills in the response
    async fn handle(
        &self,
        request: &mut AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Outcome;
}

/// Runs token endpoint requests through a chain of handlers
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct TokenEndpoint {
    handlers: Vec<Arc<dyn TokenEndpointHandler>>,
}

impl TokenEndpoint {
    /// An endpoint with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to the chain
    pub fn with_handler<H: TokenEndpointHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Appends a shared handler to the chain
    pub fn with_shared_handler(mut self, handler: Arc<dyn TokenEndpointHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Whether any handler allows the request to skip client authentication
    #[must_use]
    pub fn can_skip_client_auth(&self, request: &AccessRequest) -> bool {
        self.handlers
            .iter()
            .any(|h| h.can_handle(request) && h.can_skip_client_auth(request))
    }

    /// Validates a token request against every handler
    ///
    /// # Errors
    ///
    /// Returns the first failure reported by a handler, or `invalid_request`
    /// if no handler accepted the request.
    pub async fn handle_access_request(&self, request: &mut AccessRequest) -> Result<(), Error> {
        let mut handled = false;
        for handler in &self.handlers {
            if !handler.can_handle(request) {
                tracing::trace!(?handler, "handler declined token request");
                continue;
            }

            match handler.handle(request).await {
                Outcome::Handled => {
                    tracing::debug!(?handler, "handler accepted token request");
                    handled = true;
                }
                Outcome::NotApplicable(reason) => {
                    tracing::trace!(?handler, %reason, "handler declined token request");
                }
                Outcome::Failed(err) => return Err(err),
            }
        }

        if handled {
            Ok(())
        } else {
            Err(error::invalid_request().with_hint(
                "The request could not be processed by any handler; check the grant_type parameter.",
            ))
        }
    }

    /// Builds the response for a token request that passed validation
    ///
    /// # Errors
    ///
    /// Returns the first failure reported by a handler, or `server_error`
    /// if no handler issued an access token.
    pub async fn populate_access_response(
        &self,
        request: &mut AccessRequest,
    ) -> Result<AccessResponse, Error> {
        let mut response = AccessResponse::new();
        for handler in &self.handlers {
            if !handler.can_handle(request) {
                continue;
            }

            match handler.populate_response(request, &mut response).await {
                Outcome::Handled | Outcome::NotApplicable(_) => {}
                Outcome::Failed(err) => return Err(err),
            }
        }

        if response.access_token().is_none() || response.token_type().is_empty() {
            return Err(error::server_error(
                "access token or token type not set by token endpoint handlers",
            )
            .with_hint("An internal server error occurred while trying to complete the request."));
        }

        Ok(response)
    }
}

/// Runs authorize endpoint requests through a chain of handlers
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct AuthorizeEndpoint {
    handlers: Vec<Arc<dyn AuthorizeEndpointHandler>>,
}

impl AuthorizeEndpoint {
    /// An endpoint with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to the chain
    ///
    /// Order matters: handlers that depend on an issued code must come
    /// after the handler issuing it.
    pub fn with_handler<H: AuthorizeEndpointHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Appends a shared handler to the chain
    pub fn with_shared_handler(mut self, handler: Arc<dyn AuthorizeEndpointHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Runs an authorize request through every handler
    ///
    /// # Errors
    ///
    /// Returns the first failure reported by a handler, or
    /// `invalid_request` if no handler took the request.
    pub async fn handle_authorize_request(
        &self,
        request: &mut AuthorizeRequest,
    ) -> Result<AuthorizeResponse, Error> {
        let mut response = AuthorizeResponse::new();
        let mut handled = false;
        for handler in &self.handlers {
            match handler.handle(request, &mut response).await {
                Outcome::Handled => {
                    tracing::debug!(?handler, "handler accepted authorize request");
                    handled = true;
                }
                Outcome::NotApplicable(reason) => {
                    tracing::trace!(?handler, %reason, "handler declined authorize request");
                }
                Outcome::Failed(err) => return Err(err),
            }
        }

        if handled {
            Ok(response)
        } else {
            Err(error::invalid_request().with_hint(format!(
                "The authorization server does not support the response type '{}'.",
                request.response_types()
            )))
        }
    }
}
