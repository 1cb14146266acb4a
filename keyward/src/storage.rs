//! Storage contracts consumed by the handlers
//!
//! Handlers rely on storage for every exactly-once guarantee they make.
//! Implementations must be atomic per key: a PKCE record or an
//! authorization code may only be consumed once, and a JWT ID may only be
//! marked as used once while it is still valid. Under concurrent access,
//! the losing caller must observe [`StorageError::NotFound`] or
//! [`StorageError::Conflict`] respectively.
//!
//! Every operation is asynchronous. Dropping a returned future abandons the
//! operation; implementations that time out or are otherwise cancelled
//! should report [`StorageError::Backend`].

use std::error::Error as StdError;

use aliri::{
    jwk::KeyIdRef,
    jwt::{IssuerRef, SubjectRef},
    Jwk, Jwks,
};
use aliri_clock::UnixTime;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{Arguments, Request, TokenSignatureRef};

/// A storage failure
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record exists under the requested key
    #[error("record not found")]
    NotFound,

    /// A conflicting record already exists under the requested key
    #[error("conflicting record already exists")]
    Conflict,

    /// The record exists but has been invalidated
    ///
    /// The invalidated record is returned so that callers can revoke
    /// anything derived from it.
    #[error("record has been invalidated")]
    Invalidated(Box<Request>),

    /// The backend failed
    #[error("storage backend failed")]
    Backend(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl StorageError {
    /// Wraps a backend failure
    pub fn backend(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::Backend(err.into())
    }

    /// Whether this is a [`StorageError::NotFound`]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Persistence for PKCE challenges between the authorize and token phases
#[async_trait]
pub trait PkceRequestStorage: Send + Sync {
    /// Stores the authorize request carrying the challenge, keyed by the code's signature
    async fn create_pkce_request_session(
        &self,
        signature: &TokenSignatureRef,
        request: Request,
    ) -> Result<(), StorageError>;

    /// Retrieves the authorize request stored under a code's signature
    async fn get_pkce_request_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<Request, StorageError>;

    /// Removes the record, reporting [`StorageError::NotFound`] if it is already gone
    async fn delete_pkce_request_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<(), StorageError>;
}

/// Persistence for issued authorization codes
#[async_trait]
pub trait AuthorizeCodeStorage: Send + Sync {
    /// Stores the authorize request, keyed by the code's signature
    async fn create_authorize_code_session(
        &self,
        signature: &TokenSignatureRef,
        request: Request,
    ) -> Result<(), StorageError>;

    /// Retrieves the authorize request stored under a code's signature
    ///
    /// Returns [`StorageError::Invalidated`] if the code was already used.
    async fn get_authorize_code_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<Request, StorageError>;

    /// Marks a code as used
    async fn invalidate_authorize_code_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<(), StorageError>;
}

/// Persistence for issued access tokens
#[async_trait]
pub trait AccessTokenStorage: Send + Sync {
    /// Stores the request a token was issued for, keyed by the token's signature
    async fn create_access_token_session(
        &self,
        signature: &TokenSignatureRef,
        request: Request,
    ) -> Result<(), StorageError>;

    /// Retrieves the request stored under a token's signature
    async fn get_access_token_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<Request, StorageError>;

    /// Removes a single access token
    async fn delete_access_token_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<(), StorageError>;

    /// Removes every access token issued for a request
    async fn revoke_access_token(&self, request_id: Uuid) -> Result<(), StorageError>;
}

/// Registered public keys and replay state for JWT bearer assertions
#[async_trait]
pub trait JwtBearerKeyStorage: Send + Sync {
    /// Retrieves a specific key registered for an issuer and subject
    async fn get_public_key(
        &self,
        issuer: &IssuerRef,
        subject: &SubjectRef,
        key_id: &KeyIdRef,
    ) -> Result<Jwk, StorageError>;

    /// Retrieves every key registered for an issuer and subject
    async fn get_public_keys(
        &self,
        issuer: &IssuerRef,
        subject: &SubjectRef,
    ) -> Result<Jwks, StorageError>;

    /// Retrieves the scopes a registered key may request
    ///
    /// A key registered without an ID is addressed with `None`.
    async fn get_public_key_scopes(
        &self,
        issuer: &IssuerRef,
        subject: &SubjectRef,
        key_id: Option<&KeyIdRef>,
    ) -> Result<Arguments, StorageError>;

    /// Whether a JWT ID has been used and has not yet expired
    async fn is_jwt_used(&self, jti: &str) -> Result<bool, StorageError>;

    /// Marks a JWT ID as used until `expiry`
    ///
    /// Returns [`StorageError::Conflict`] if the JWT ID is already marked
    /// and has not yet expired.
    async fn mark_jwt_used_for_time(&self, jti: &str, expiry: UnixTime)
        -> Result<(), StorageError>;
}
