//! Errors surfaced by token and authorize endpoint handlers
//!
//! Every failure carries an [`ErrorKind`], which maps onto the error codes
//! defined by [RFC6749][] and its extensions. A client-facing hint explains
//! what went wrong, while the debug detail and wrapped source are intended
//! for server-side diagnostics and are only exposed to clients on request.
//!
//! [RFC6749]: https://tools.ietf.org/html/rfc6749#section-5.2

use std::{borrow::Cow, error::Error as StdError, fmt};

use serde::Serialize;
use thiserror::Error;

/// The class of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request is malformed or missing a required parameter
    InvalidRequest,
    /// The grant presented is invalid, expired or otherwise unusable
    InvalidGrant,
    /// The requested scope is invalid, unknown or not permitted
    InvalidScope,
    /// The client may not use the requested grant type
    UnauthorizedClient,
    /// The handler is not responsible for this request
    ///
    /// This is not a true failure. Dispatchers treat it as a signal to try
    /// the next handler.
    UnknownRequest,
    /// An unexpected internal condition, such as a storage failure
    ServerError,
    /// The JWT ID of an assertion has already been used
    JtiKnown,
}

impl ErrorKind {
    /// The stable error code sent to clients
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidScope => "invalid_scope",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnknownRequest => "unknown_request",
            Self::ServerError => "server_error",
            Self::JtiKnown => "jti_known",
        }
    }

    /// A stable, human-readable description of the error code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InvalidRequest => "The request is missing a required parameter, includes an invalid parameter value, includes a parameter more than once, or is otherwise malformed.",
            Self::InvalidGrant => "The provided authorization grant (e.g., authorization code, resource owner credentials) or refresh token is invalid, expired, revoked, does not match the redirection URI used in the authorization request, or was issued to another client.",
            Self::InvalidScope => "The requested scope is invalid, unknown, or malformed.",
            Self::UnauthorizedClient => "The client is not authorized to request a token using this method.",
            Self::UnknownRequest => "The handler is not responsible for this request.",
            Self::ServerError => "The authorization server encountered an unexpected condition that prevented it from fulfilling the request.",
            Self::JtiKnown => "The jti was already used.",
        }
    }

    /// The HTTP status code conventionally paired with this error
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::UnauthorizedClient => 401,
            Self::ServerError => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An error produced while handling an OAuth 2.0 request
#[derive(Debug, Error)]
#[error("{kind}: {}", .kind.description())]
#[must_use]
pub struct Error {
    kind: ErrorKind,
    hint: Option<Cow<'static, str>>,
    debug: Option<String>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    /// Constructs a new error of the given kind
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            debug: None,
            source: None,
        }
    }

    /// Attaches a client-facing hint
    pub fn with_hint(self, hint: impl Into<Cow<'static, str>>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..self
        }
    }

    /// Attaches debug detail, only shown to clients when explicitly enabled
    pub fn with_debug(self, debug: impl Into<String>) -> Self {
        Self {
            debug: Some(debug.into()),
            ..self
        }
    }

    /// Wraps an underlying cause, copying its message into the debug detail
    pub fn wrap<E>(self, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let source = source.into();
        Self {
            debug: Some(source.to_string()),
            source: Some(source),
            ..self
        }
    }

    /// The class of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether this error is of the given kind
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// The client-facing hint, if any
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Debug detail, if any
    #[must_use]
    pub fn debug(&self) -> Option<&str> {
        self.debug.as_deref()
    }

    /// A serializable view of this error suitable for an error response body
    ///
    /// The debug detail is only included when `expose_debug` is set.
    pub fn body(&self, expose_debug: bool) -> ErrorBody<'_> {
        ErrorBody {
            error: self.kind.code(),
            error_description: self.kind.description(),
            error_hint: self.hint(),
            error_debug: if expose_debug { self.debug() } else { None },
        }
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// The body of an OAuth 2.0 error response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody<'a> {
    /// The error code
    pub error: &'static str,
    /// The description of the error code
    pub error_description: &'static str,
    /// A hint specific to this failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_hint: Option<&'a str>,
    /// Debug detail, only populated when explicitly enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_debug: Option<&'a str>,
}

/// An `invalid_request` error
#[inline]
pub fn invalid_request() -> Error {
    Error::new(ErrorKind::InvalidRequest)
}

/// An `invalid_grant` error
#[inline]
pub fn invalid_grant() -> Error {
    Error::new(ErrorKind::InvalidGrant)
}

/// An `invalid_scope` error
#[inline]
pub fn invalid_scope() -> Error {
    Error::new(ErrorKind::InvalidScope)
}

/// An `unauthorized_client` error
#[inline]
pub fn unauthorized_client() -> Error {
    Error::new(ErrorKind::UnauthorizedClient)
}

/// The "not my request" signal
#[inline]
pub fn unknown_request() -> Error {
    Error::new(ErrorKind::UnknownRequest)
}

/// A replayed JWT ID
#[inline]
pub fn jti_known() -> Error {
    Error::new(ErrorKind::JtiKnown)
}

/// Wraps an unexpected failure as a `server_error`
///
/// The failure is logged once here, so callers should not log it again.
pub fn server_error<E>(source: E) -> Error
where
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    let source = source.into();
    let error: &dyn StdError = &*source;
    tracing::error!(error, "unexpected failure while handling request");
    Error::new(ErrorKind::ServerError).wrap(source)
}
