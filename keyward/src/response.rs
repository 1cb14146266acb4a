use std::{collections::BTreeMap, time::Duration};

use serde::Serialize;

use crate::{
    arguments::serialize_space_delimited, AccessToken, AccessTokenRef, Arguments, AuthorizeCode,
    AuthorizeCodeRef,
};

/// A successful token endpoint response
///
/// Serializes to the JSON shape defined in RFC 6749, section 5.1.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AccessResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<AccessToken>,
    token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(
        rename = "scope",
        skip_serializing_if = "Arguments::is_empty",
        serialize_with = "serialize_space_delimited"
    )]
    scopes: Arguments,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl AccessResponse {
    /// An empty response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The issued access token
    #[must_use]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access_token.as_deref()
    }

    /// Sets the issued access token
    pub fn set_access_token(&mut self, token: AccessToken) {
        self.access_token = Some(token);
    }

    /// The token type, e.g. `bearer`
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Sets the token type
    pub fn set_token_type(&mut self, token_type: impl Into<String>) {
        self.token_type = token_type.into();
    }

    /// Remaining lifetime of the access token
    #[must_use]
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }

    /// Sets the remaining lifetime, truncated to whole seconds
    pub fn set_expires_in(&mut self, expires_in: Duration) {
        self.expires_in = Some(expires_in.as_secs());
    }

    /// Scopes granted to the access token
    #[must_use]
    pub fn scopes(&self) -> &Arguments {
        &self.scopes
    }

    /// Sets the granted scopes
    pub fn set_scopes(&mut self, scopes: Arguments) {
        self.scopes = scopes;
    }

    /// An additional response field
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    /// Sets an additional response field
    pub fn set_extra(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extra.insert(key.into(), value);
    }
}

/// A successful authorize endpoint response
#[derive(Clone, Debug, Default)]
pub struct AuthorizeResponse {
    code: Option<AuthorizeCode>,
    parameters: BTreeMap<String, String>,
}

impl AuthorizeResponse {
    /// An empty response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The authorization code, once issued
    #[must_use]
    pub fn code(&self) -> Option<&AuthorizeCodeRef> {
        self.code.as_deref()
    }

    /// Records the issued authorization code and adds it to the parameters
    pub fn set_code(&mut self, code: AuthorizeCode) {
        self.parameters
            .insert("code".to_owned(), code.as_str().to_owned());
        self.code = Some(code);
    }

    /// Adds a parameter to send back to the client
    pub fn add_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
    }

    /// A parameter to send back to the client
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Every parameter to send back to the client
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
