//! Generation and verification of opaque tokens
//!
//! Handlers never persist raw tokens. They persist state under a token's
//! *signature*, which a strategy derives from the token.

use std::time::Duration;

use aliri_base64::Base64Url;
use aliri_clock::{Clock, System, UnixTime};
use ring::{
    hmac,
    rand::{SecureRandom, SystemRandom},
};

use crate::{
    error, AccessToken, AccessTokenRef, AuthorizeCode, AuthorizeCodeRef, Error, Request,
    TokenSignature, TokenType,
};

/// Issues and checks authorization codes
pub trait AuthorizeCodeStrategy: Send + Sync {
    /// Derives the storage signature of a code
    fn authorize_code_signature(&self, code: &AuthorizeCodeRef) -> TokenSignature;

    /// Generates a new code along with its signature
    ///
    /// # Errors
    ///
    /// Returns `server_error` if no secure randomness is available.
    fn generate_authorize_code(
        &self,
        request: &Request,
    ) -> Result<(AuthorizeCode, TokenSignature), Error>;

    /// Checks the integrity and expiry of a code against its stored request
    ///
    /// # Errors
    ///
    /// Returns `invalid_grant` if the code was not produced by this strategy
    /// or has expired.
    fn validate_authorize_code(&self, request: &Request, code: &AuthorizeCodeRef)
        -> Result<(), Error>;
}

/// Issues access tokens
pub trait AccessTokenStrategy: Send + Sync {
    /// Derives the storage signature of an access token
    fn access_token_signature(&self, token: &AccessTokenRef) -> TokenSignature;

    /// Generates a new access token along with its signature
    ///
    /// # Errors
    ///
    /// Returns `server_error` if no secure randomness is available.
    fn generate_access_token(&self, request: &Request)
        -> Result<(AccessToken, TokenSignature), Error>;
}

const KEY_LEN: usize = 32;

/// A strategy producing tokens of the form `<key>.<signature>`
///
/// `key` is random and `signature` is an HMAC-SHA256 of `key` under a
/// server secret. Both parts are unpadded URL-safe base64. The signature
/// part doubles as the storage key.
#[derive(Debug)]
pub struct HmacStrategy<C = System> {
    key: hmac::Key,
    rng: SystemRandom,
    authorize_code_lifespan: Duration,
    clock: C,
}

impl HmacStrategy {
    /// Constructs a strategy from a server secret
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self::with_clock(secret, System)
    }
}

impl<C: Clock> HmacStrategy<C> {
    /// Constructs a strategy from a server secret, reading time from `clock`
    #[must_use]
    pub fn with_clock(secret: &[u8], clock: C) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            rng: SystemRandom::new(),
            authorize_code_lifespan: Duration::from_secs(15 * 60),
            clock,
        }
    }

    /// Sets the code lifespan assumed when a session carries no code expiry
    #[must_use]
    pub fn with_authorize_code_lifespan(self, lifespan: Duration) -> Self {
        Self {
            authorize_code_lifespan: lifespan,
            ..self
        }
    }

    fn generate(&self) -> Result<(String, TokenSignature), Error> {
        let mut raw = [0_u8; KEY_LEN];
        self.rng
            .fill(&mut raw)
            .map_err(|_| error::server_error("unable to gather random bytes for token"))?;

        let tag = hmac::sign(&self.key, &raw);
        let key = Base64Url::from_raw(raw.to_vec());
        let signature = Base64Url::from_raw(tag.as_ref().to_vec());

        Ok((
            format!("{}.{}", key, signature),
            TokenSignature::new(signature.to_string()),
        ))
    }

    fn verify(&self, token: &str) -> Result<(), Error> {
        let (key, signature) = token
            .split_once('.')
            .ok_or_else(|| error::invalid_grant().with_hint("The token is malformed."))?;

        let key = Base64Url::from_encoded(key)
            .map_err(|e| error::invalid_grant().with_hint("The token is malformed.").wrap(e))?;
        let signature = Base64Url::from_encoded(signature)
            .map_err(|e| error::invalid_grant().with_hint("The token is malformed.").wrap(e))?;

        hmac::verify(&self.key, key.as_slice(), signature.as_slice())
            .map_err(|_| error::invalid_grant().with_hint("The token signature is invalid."))
    }
}

fn signature_of(token: &str) -> TokenSignature {
    let signature = token.split_once('.').map_or("", |(_, s)| s);
    TokenSignature::new(signature.to_owned())
}

impl<C: Clock + Send + Sync> AuthorizeCodeStrategy for HmacStrategy<C> {
    fn authorize_code_signature(&self, code: &AuthorizeCodeRef) -> TokenSignature {
        signature_of(code.as_str())
    }

    fn generate_authorize_code(
        &self,
        _request: &Request,
    ) -> Result<(AuthorizeCode, TokenSignature), Error> {
        let (code, signature) = self.generate()?;
        Ok((AuthorizeCode::new(code), signature))
    }

    fn validate_authorize_code(
        &self,
        request: &Request,
        code: &AuthorizeCodeRef,
    ) -> Result<(), Error> {
        let expires_at = match request.session().expires_at(TokenType::AuthorizeCode) {
            Some(at) => at,
            None => {
                let lifespan = self.authorize_code_lifespan.as_secs();
                UnixTime(request.requested_at().0.saturating_add(lifespan))
            }
        };

        if expires_at < self.clock.now() {
            return Err(error::invalid_grant().with_hint("The authorization code has expired."));
        }

        self.verify(code.as_str())
    }
}

impl<C: Clock + Send + Sync> AccessTokenStrategy for HmacStrategy<C> {
    fn access_token_signature(&self, token: &AccessTokenRef) -> TokenSignature {
        signature_of(token.as_str())
    }

    fn generate_access_token(
        &self,
        _request: &Request,
    ) -> Result<(AccessToken, TokenSignature), Error> {
        let (token, signature) = self.generate()?;
        Ok((AccessToken::new(token), signature))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aliri_clock::{DurationSecs, TestClock};
    use color_eyre::Result;

    use super::*;
    use crate::{Client, ClientId, ErrorKind, Form};

    fn request(at: u64) -> Request {
        let client = Arc::new(Client::new(ClientId::from_static("client")));
        Request::new(client, Form::new(), UnixTime(at))
    }

    #[test]
    fn signature_is_derived_from_token() -> Result<()> {
        let strategy = HmacStrategy::new(b"a fairly long server secret value");
        let (token, signature) = strategy.generate_access_token(&request(0))?;

        assert_eq!(strategy.access_token_signature(&token), signature);
        assert!(token.as_str().ends_with(signature.as_str()));
        Ok(())
    }

    #[test]
    fn codes_are_unique() -> Result<()> {
        let strategy = HmacStrategy::new(b"secret");
        let (a, _) = strategy.generate_authorize_code(&request(0))?;
        let (b, _) = strategy.generate_authorize_code(&request(0))?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn rejects_forged_codes() -> Result<()> {
        let clock = TestClock::new(UnixTime(1_000));
        let strategy = HmacStrategy::with_clock(b"secret", clock.clone());
        let other = HmacStrategy::with_clock(b"another secret", clock.clone());

        let req = request(1_000);
        let (code, _) = other.generate_authorize_code(&req)?;

        let err = strategy.validate_authorize_code(&req, &code).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGrant);

        let err = strategy
            .validate_authorize_code(&req, AuthorizeCodeRef::from_str("no-dot"))
            .unwrap_err();
        assert_eq!(err.hint(), Some("The token is malformed."));
        Ok(())
    }

    #[test]
    fn rejects_expired_codes() -> Result<()> {
        let clock = TestClock::new(UnixTime(1_000));
        let strategy = HmacStrategy::with_clock(b"secret", clock.clone());

        let mut req = request(1_000);
        req.session_mut()
            .set_expires_at(TokenType::AuthorizeCode, UnixTime(1_600));
        let (code, _) = strategy.generate_authorize_code(&req)?;

        clock.set(UnixTime(1_600));
        strategy.validate_authorize_code(&req, &code)?;

        clock.advance(DurationSecs(1));
        let err = strategy.validate_authorize_code(&req, &code).unwrap_err();
        assert_eq!(err.hint(), Some("The authorization code has expired."));
        Ok(())
    }
}
