//! Access token issuance shared by grant handlers

use std::time::Duration;

use aliri_clock::Clock;

use crate::{
    error, storage::AccessTokenStorage, strategy::AccessTokenStrategy, AccessResponse, Error,
    Request, TokenType,
};

/// Issues an access token for a validated request and fills in the response
///
/// The token's signature is used to persist a sanitized copy of the request.
/// If the request's session already carries an absolute access token expiry,
/// `expires_in` is derived from it so that the advertised lifetime matches
/// what was stored; otherwise `lifespan` is advertised as is.
///
/// # Errors
///
/// Returns `server_error` if the token cannot be generated or persisted.
pub async fn issue_access_token<S, T, C>(
    strategy: &S,
    storage: &T,
    clock: &C,
    lifespan: Duration,
    request: &Request,
    response: &mut AccessResponse,
) -> Result<(), Error>
where
    S: AccessTokenStrategy + ?Sized,
    T: AccessTokenStorage + ?Sized,
    C: Clock + ?Sized,
{
    let (token, signature) = strategy.generate_access_token(request)?;

    storage
        .create_access_token_session(&signature, request.sanitize(&[]))
        .await
        .map_err(error::server_error)?;

    let expires_in = match request.session().expires_at(TokenType::AccessToken) {
        Some(at) => Duration::from_secs(at.0.saturating_sub(clock.now().0)),
        None => lifespan,
    };

    response.set_access_token(token);
    response.set_token_type("bearer");
    response.set_expires_in(expires_in);
    response.set_scopes(request.granted_scopes().clone());

    tracing::debug!(%signature, request.id = %request.id(), "issued access token");

    Ok(())
}
