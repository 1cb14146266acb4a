//! Core building blocks for composing OAuth 2.0 token endpoint handlers
//!
//! This crate holds the vocabulary shared by the `keyward` family of
//! handler crates:
//!
//! * the request and response model handed to each handler,
//! * the [`Error`] taxonomy surfaced to callers,
//! * the storage contracts handlers depend on,
//! * the [`TokenEndpointHandler`] and [`AuthorizeEndpointHandler`] traits
//!   along with dispatchers that run a chain of handlers, and
//! * shared configuration, scope matching and token strategies.
//!
//! Concrete handlers live in their own crates, such as `keyward_pkce` for
//! [RFC7636][] and `keyward_jwt_bearer` for [RFC7523][].
//!
//! [RFC7636]: https://tools.ietf.org/html/rfc7636
//! [RFC7523]: https://tools.ietf.org/html/rfc7523
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use keyward::{AccessRequest, Client, ClientId, Form, GRANT_TYPE_JWT_BEARER};
//! use aliri_clock::UnixTime;
//!
//! let client = Client::new(ClientId::from_static("my-client"))
//!     .with_grant_types([GRANT_TYPE_JWT_BEARER]);
//!
//! let form: Form = [
//!     ("grant_type", GRANT_TYPE_JWT_BEARER),
//!     ("scope", "read write"),
//! ]
//! .into_iter()
//! .collect();
//!
//! let request = AccessRequest::new(Arc::new(client), form, UnixTime(1_700_000_000));
//! assert!(request.grant_types().exact_one(GRANT_TYPE_JWT_BEARER));
//! assert!(request.requested_scopes().has("write"));
//! ```

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

mod arguments;
pub mod audience;
mod braids;
mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod issue;
mod request;
mod response;
pub mod scope;
pub mod storage;
pub mod strategy;

pub use arguments::Arguments;
#[doc(inline)]
pub use audience::AudienceMatchingStrategy;
pub use braids::*;
pub use client::{effective_lifespan, Client, TokenType};
#[doc(inline)]
pub use config::Config;
#[doc(inline)]
pub use error::{Error, ErrorKind};
#[doc(inline)]
pub use handler::{
    AuthorizeEndpoint, AuthorizeEndpointHandler, Outcome, TokenEndpoint, TokenEndpointHandler,
};
pub use request::{AccessRequest, AuthorizeRequest, Form, Request, Session};
pub use response::{AccessResponse, AuthorizeResponse};
#[doc(inline)]
pub use scope::ScopeStrategy;

/// The `authorization_code` grant type
pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";

/// The JWT bearer authorization grant type from RFC 7523
pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// The `code` response type
pub const RESPONSE_TYPE_CODE: &str = "code";
