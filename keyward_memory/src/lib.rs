//! An in-memory implementation of the `keyward` storage contracts
//!
//! [`MemoryStore`] is intended for tests and single-process deployments.
//! Each kind of record lives behind its own lock, and every operation that
//! checks and mutates a record does so while holding that lock, which
//! satisfies the per-key atomicity the handlers rely on.
//!
//! ```
//! use aliri::{jwa, jwk, jwt, Jwk};
//! use aliri_base64::Base64Url;
//! use keyward_memory::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let key = Jwk::from(jwa::Hmac::new(Base64Url::from_raw(b"secret".to_vec())))
//!     .with_algorithm(jwa::Algorithm::HS256)
//!     .with_key_id(jwk::KeyId::from_static("key-1"));
//!
//! store.register_public_key(
//!     jwt::Issuer::from_static("https://issuer.example.com"),
//!     jwt::Subject::from_static("service-account"),
//!     key,
//!     ["read", "write"],
//! );
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

use std::collections::HashMap;

use aliri::{
    jwk::KeyIdRef,
    jwt::{Issuer, IssuerRef, Subject, SubjectRef},
    Jwk, Jwks,
};
use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;
use keyward::{
    storage::{
        AccessTokenStorage, AuthorizeCodeStorage, JwtBearerKeyStorage, PkceRequestStorage,
        StorageError,
    },
    Arguments, Request, TokenSignature, TokenSignatureRef,
};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug)]
struct CodeEntry {
    active: bool,
    request: Request,
}

#[derive(Debug)]
struct RegisteredKey {
    jwk: Jwk,
    scopes: Arguments,
}

/// In-memory storage for every `keyward` handler
#[derive(Debug, Default)]
pub struct MemoryStore<C = System> {
    clock: C,
    pkce: Mutex<HashMap<TokenSignature, Request>>,
    authorize_codes: Mutex<HashMap<TokenSignature, CodeEntry>>,
    access_tokens: Mutex<HashMap<TokenSignature, Request>>,
    public_keys: Mutex<HashMap<(Issuer, Subject), Vec<RegisteredKey>>>,
    used_jtis: Mutex<HashMap<String, UnixTime>>,
}

impl MemoryStore {
    /// An empty store using the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> MemoryStore<C> {
    /// An empty store reading time from `clock`
    ///
    /// The clock decides when used JWT IDs expire.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            pkce: Mutex::default(),
            authorize_codes: Mutex::default(),
            access_tokens: Mutex::default(),
            public_keys: Mutex::default(),
            used_jtis: Mutex::default(),
        }
    }

    /// Registers a public key that may sign assertions for an issuer and subject
    ///
    /// Registering a key with the ID of an existing key for the same issuer
    /// and subject replaces it.
    pub fn register_public_key<I, S>(&self, issuer: Issuer, subject: Subject, jwk: Jwk, scopes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys = self.public_keys.lock();
        let entry = keys.entry((issuer, subject)).or_default();
        entry.retain(|k| k.jwk.key_id() != jwk.key_id());
        entry.push(RegisteredKey {
            jwk,
            scopes: scopes.into_iter().collect(),
        });
    }

    /// The number of access tokens currently stored
    #[must_use]
    pub fn access_token_count(&self) -> usize {
        self.access_tokens.lock().len()
    }

    /// The number of PKCE challenges awaiting exchange
    #[must_use]
    pub fn pkce_request_count(&self) -> usize {
        self.pkce.lock().len()
    }

    fn with_keys<T>(
        &self,
        issuer: &IssuerRef,
        subject: &SubjectRef,
        f: impl FnOnce(&[RegisteredKey]) -> Option<T>,
    ) -> Result<T, StorageError> {
        let keys = self.public_keys.lock();
        keys.get(&(issuer.to_owned(), subject.to_owned()))
            .and_then(|k| f(k))
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> PkceRequestStorage for MemoryStore<C> {
    async fn create_pkce_request_session(
        &self,
        signature: &TokenSignatureRef,
        request: Request,
    ) -> Result<(), StorageError> {
        self.pkce.lock().insert(signature.to_owned(), request);
        Ok(())
    }

    async fn get_pkce_request_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<Request, StorageError> {
        self.pkce
            .lock()
            .get(signature)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn delete_pkce_request_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<(), StorageError> {
        self.pkce
            .lock()
            .remove(signature)
            .map(drop)
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AuthorizeCodeStorage for MemoryStore<C> {
    async fn create_authorize_code_session(
        &self,
        signature: &TokenSignatureRef,
        request: Request,
    ) -> Result<(), StorageError> {
        self.authorize_codes.lock().insert(
            signature.to_owned(),
            CodeEntry {
                active: true,
                request,
            },
        );
        Ok(())
    }

    async fn get_authorize_code_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<Request, StorageError> {
        let codes = self.authorize_codes.lock();
        let entry = codes.get(signature).ok_or(StorageError::NotFound)?;
        if entry.active {
            Ok(entry.request.clone())
        } else {
            Err(StorageError::Invalidated(Box::new(entry.request.clone())))
        }
    }

    async fn invalidate_authorize_code_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<(), StorageError> {
        let mut codes = self.authorize_codes.lock();
        let entry = codes.get_mut(signature).ok_or(StorageError::NotFound)?;
        entry.active = false;
        Ok(())
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AccessTokenStorage for MemoryStore<C> {
    async fn create_access_token_session(
        &self,
        signature: &TokenSignatureRef,
        request: Request,
    ) -> Result<(), StorageError> {
        self.access_tokens
            .lock()
            .insert(signature.to_owned(), request);
        Ok(())
    }

    async fn get_access_token_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<Request, StorageError> {
        self.access_tokens
            .lock()
            .get(signature)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn delete_access_token_session(
        &self,
        signature: &TokenSignatureRef,
    ) -> Result<(), StorageError> {
        self.access_tokens
            .lock()
            .remove(signature)
            .map(drop)
            .ok_or(StorageError::NotFound)
    }

    async fn revoke_access_token(&self, request_id: Uuid) -> Result<(), StorageError> {
        let mut tokens = self.access_tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, r| r.id() != request_id);
        tracing::debug!(
            %request_id,
            revoked = before - tokens.len(),
            "revoked access tokens"
        );
        Ok(())
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> JwtBearerKeyStorage for MemoryStore<C> {
    async fn get_public_key(
        &self,
        issuer: &IssuerRef,
        subject: &SubjectRef,
        key_id: &KeyIdRef,
    ) -> Result<Jwk, StorageError> {
        self.with_keys(issuer, subject, |keys| {
            keys.iter()
                .find(|k| k.jwk.key_id() == Some(key_id))
                .map(|k| k.jwk.clone())
        })
    }

    async fn get_public_keys(
        &self,
        issuer: &IssuerRef,
        subject: &SubjectRef,
    ) -> Result<Jwks, StorageError> {
        self.with_keys(issuer, subject, |keys| {
            let mut jwks = Jwks::default();
            for k in keys {
                jwks.add_key(k.jwk.clone());
            }
            Some(jwks)
        })
    }

    async fn get_public_key_scopes(
        &self,
        issuer: &IssuerRef,
        subject: &SubjectRef,
        key_id: Option<&KeyIdRef>,
    ) -> Result<Arguments, StorageError> {
        self.with_keys(issuer, subject, |keys| {
            keys.iter()
                .find(|k| k.jwk.key_id() == key_id)
                .map(|k| k.scopes.clone())
        })
    }

    async fn is_jwt_used(&self, jti: &str) -> Result<bool, StorageError> {
        let now = self.clock.now();
        let used = self.used_jtis.lock();
        Ok(used.get(jti).map_or(false, |&exp| exp > now))
    }

    async fn mark_jwt_used_for_time(
        &self,
        jti: &str,
        expiry: UnixTime,
    ) -> Result<(), StorageError> {
        let now = self.clock.now();
        let mut used = self.used_jtis.lock();
        used.retain(|_, &mut exp| exp > now);

        if used.contains_key(jti) {
            return Err(StorageError::Conflict);
        }

        used.insert(jti.to_owned(), expiry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aliri::{jwa, jwk::KeyId};
    use aliri_base64::Base64Url;
    use aliri_clock::TestClock;
    use color_eyre::Result;
    use keyward::{Client, ClientId, Form};
    use tracing_test::traced_test;

    use super::*;

    fn request() -> Request {
        let client = Arc::new(Client::new(ClientId::from_static("client")));
        Request::new(client, Form::new(), UnixTime(0))
    }

    fn hmac_key(kid: Option<&'static str>) -> Jwk {
        let jwk = Jwk::from(jwa::Hmac::new(Base64Url::from_raw(b"secret".to_vec())))
            .with_algorithm(jwa::Algorithm::HS256);
        match kid {
            Some(kid) => jwk.with_key_id(KeyId::from_static(kid)),
            None => jwk,
        }
    }

    #[tokio::test]
    async fn pkce_record_is_consumed_once() -> Result<()> {
        let store = MemoryStore::new();
        let sig = TokenSignature::from_static("sig");

        store.create_pkce_request_session(&sig, request()).await?;
        store.get_pkce_request_session(&sig).await?;
        store.delete_pkce_request_session(&sig).await?;

        assert!(matches!(
            store.delete_pkce_request_session(&sig).await,
            Err(StorageError::NotFound)
        ));
        assert!(store.get_pkce_request_session(&sig).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn invalidated_code_returns_request() -> Result<()> {
        let store = MemoryStore::new();
        let sig = TokenSignature::from_static("code");
        let req = request();
        let id = req.id();

        store.create_authorize_code_session(&sig, req).await?;
        store.invalidate_authorize_code_session(&sig).await?;

        match store.get_authorize_code_session(&sig).await {
            Err(StorageError::Invalidated(r)) => assert_eq!(r.id(), id),
            other => panic!("unexpected result: {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn revokes_tokens_by_request_id() -> Result<()> {
        let store = MemoryStore::new();
        let kept = request();
        let revoked = request();

        store
            .create_access_token_session(TokenSignatureRef::from_str("a"), kept.clone())
            .await?;
        store
            .create_access_token_session(TokenSignatureRef::from_str("b"), revoked.clone())
            .await?;
        store.revoke_access_token(revoked.id()).await?;

        assert_eq!(store.access_token_count(), 1);
        assert_eq!(
            store
                .get_access_token_session(TokenSignatureRef::from_str("a"))
                .await?
                .id(),
            kept.id()
        );
        Ok(())
    }

    #[tokio::test]
    async fn jti_is_known_until_expiry() -> Result<()> {
        let clock = TestClock::new(UnixTime(1_000));
        let store = MemoryStore::with_clock(clock);

        assert!(!store.is_jwt_used("x").await?);
        store.mark_jwt_used_for_time("x", UnixTime(1_060)).await?;
        assert!(store.is_jwt_used("x").await?);
        assert!(matches!(
            store.mark_jwt_used_for_time("x", UnixTime(1_120)).await,
            Err(StorageError::Conflict)
        ));

        let later = MemoryStore::with_clock(TestClock::new(UnixTime(1_060)));
        later.mark_jwt_used_for_time("x", UnixTime(1_060)).await?;
        assert!(!later.is_jwt_used("x").await?);
        later.mark_jwt_used_for_time("x", UnixTime(1_200)).await?;
        assert!(later.is_jwt_used("x").await?);
        Ok(())
    }

    #[tokio::test]
    async fn looks_up_keys_and_scopes() -> Result<()> {
        let store = MemoryStore::new();
        let iss = Issuer::from_static("iss");
        let sub = Subject::from_static("sub");
        store.register_public_key(iss.clone(), sub.clone(), hmac_key(Some("k1")), ["a", "b"]);
        store.register_public_key(iss.clone(), sub.clone(), hmac_key(None), ["c"]);

        let key = store
            .get_public_key(&iss, &sub, KeyIdRef::from_str("k1"))
            .await?;
        assert_eq!(key.key_id(), Some(KeyIdRef::from_str("k1")));

        assert!(store
            .get_public_key(&iss, &sub, KeyIdRef::from_str("k2"))
            .await
            .map_err(|e| e.is_not_found())
            .unwrap_err());

        assert_eq!(store.get_public_keys(&iss, &sub).await?.keys().len(), 2);

        let scopes = store
            .get_public_key_scopes(&iss, &sub, Some(KeyIdRef::from_str("k1")))
            .await?;
        assert!(scopes.matches(&["a", "b"]));

        let scopes = store.get_public_key_scopes(&iss, &sub, None).await?;
        assert!(scopes.matches(&["c"]));

        assert!(store
            .get_public_keys(&iss, SubjectRef::from_str("other"))
            .await
            .is_err());
        Ok(())
    }
}
