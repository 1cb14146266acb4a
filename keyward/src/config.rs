//! Server configuration
//!
//! [`Config`] holds every option read by the handlers in the `keyward`
//! family. Each handler crate declares a narrow trait listing exactly the
//! options it needs and implements it for [`Config`], so callers may also
//! provide those options from elsewhere.
//!
//! Durations are expressed in whole seconds when deserialized.
//!
//! ```
//! use std::time::Duration;
//! use keyward::{Config, ScopeStrategy};
//!
//! let config: Config = serde_json::from_str(r#"{
//!     "access_token_lifespan": 600,
//!     "token_urls": ["https://auth.example.com/oauth2/token"],
//!     "enforce_pkce": true,
//!     "scope_strategy": "hierarchic"
//! }"#).unwrap();
//!
//! assert_eq!(config.access_token_lifespan, Duration::from_secs(600));
//! assert_eq!(config.authorize_code_lifespan, Duration::from_secs(15 * 60));
//! assert_eq!(config.scope_strategy, ScopeStrategy::Hierarchic);
//! assert!(config.enforce_pkce);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::ErrorBody, AudienceMatchingStrategy, Error, ScopeStrategy};

const HOUR: u64 = 60 * 60;

/// Configuration shared by the token and authorize endpoint handlers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[must_use]
pub struct Config {
    /// Lifespan of access tokens
    #[serde(with = "duration_secs")]
    pub access_token_lifespan: Duration,

    /// Lifespan of refresh tokens
    #[serde(with = "duration_secs")]
    pub refresh_token_lifespan: Duration,

    /// Lifespan of authorization codes
    #[serde(with = "duration_secs")]
    pub authorize_code_lifespan: Duration,

    /// URLs identifying this server's token endpoint
    ///
    /// A JWT bearer assertion must name one of these as its audience.
    pub token_urls: Vec<String>,

    /// Require PKCE from every client
    pub enforce_pkce: bool,

    /// Require PKCE from public clients
    pub enforce_pkce_for_public_clients: bool,

    /// Allow the `plain` code challenge method
    pub enable_pkce_plain_challenge_method: bool,

    /// Allow the JWT bearer grant without client authentication
    pub jwt_bearer_can_skip_client_auth: bool,

    /// Accept JWT bearer assertions without a `jti` claim
    pub jwt_bearer_id_optional: bool,

    /// Accept JWT bearer assertions without an `iat` claim
    pub jwt_bearer_issued_date_optional: bool,

    /// The longest lifetime a JWT bearer assertion may claim
    #[serde(with = "duration_secs")]
    pub jwt_max_duration: Duration,

    /// How requested scopes are matched against allowed scopes
    pub scope_strategy: ScopeStrategy,

    /// How requested audiences are matched against allowed audiences
    pub audience_matching_strategy: AudienceMatchingStrategy,

    /// Include debug detail in error responses
    pub send_debug_messages_to_clients: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_token_lifespan: Duration::from_secs(HOUR),
            refresh_token_lifespan: Duration::from_secs(30 * 24 * HOUR),
            authorize_code_lifespan: Duration::from_secs(15 * 60),
            token_urls: Vec::new(),
            enforce_pkce: false,
            enforce_pkce_for_public_clients: false,
            enable_pkce_plain_challenge_method: false,
            jwt_bearer_can_skip_client_auth: false,
            jwt_bearer_id_optional: false,
            jwt_bearer_issued_date_optional: false,
            jwt_max_duration: Duration::from_secs(24 * HOUR),
            scope_strategy: ScopeStrategy::default(),
            audience_matching_strategy: AudienceMatchingStrategy::default(),
            send_debug_messages_to_clients: false,
        }
    }
}

impl Config {
    /// Sets the access token lifespan
    pub fn with_access_token_lifespan(self, lifespan: Duration) -> Self {
        Self {
            access_token_lifespan: lifespan,
            ..self
        }
    }

    /// Sets the authorization code lifespan
    pub fn with_authorize_code_lifespan(self, lifespan: Duration) -> Self {
        Self {
            authorize_code_lifespan: lifespan,
            ..self
        }
    }

    /// Adds a URL identifying this server's token endpoint
    pub fn add_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_urls.push(url.into());
        self
    }

    /// Requires PKCE from every client
    pub fn with_enforce_pkce(self, enforce_pkce: bool) -> Self {
        Self {
            enforce_pkce,
            ..self
        }
    }

    /// Requires PKCE from public clients
    pub fn with_enforce_pkce_for_public_clients(self, enforce: bool) -> Self {
        Self {
            enforce_pkce_for_public_clients: enforce,
            ..self
        }
    }

    /// Allows the `plain` code challenge method
    pub fn with_pkce_plain_challenge_method(self, enable: bool) -> Self {
        Self {
            enable_pkce_plain_challenge_method: enable,
            ..self
        }
    }

    /// Allows the JWT bearer grant without client authentication
    pub fn with_jwt_bearer_can_skip_client_auth(self, skip: bool) -> Self {
        Self {
            jwt_bearer_can_skip_client_auth: skip,
            ..self
        }
    }

    /// Accepts JWT bearer assertions without a `jti` claim
    pub fn with_jwt_bearer_id_optional(self, optional: bool) -> Self {
        Self {
            jwt_bearer_id_optional: optional,
            ..self
        }
    }

    /// Accepts JWT bearer assertions without an `iat` claim
    pub fn with_jwt_bearer_issued_date_optional(self, optional: bool) -> Self {
        Self {
            jwt_bearer_issued_date_optional: optional,
            ..self
        }
    }

    /// Sets the longest lifetime a JWT bearer assertion may claim
    pub fn with_jwt_max_duration(self, max: Duration) -> Self {
        Self {
            jwt_max_duration: max,
            ..self
        }
    }

    /// Sets the scope matching strategy
    pub fn with_scope_strategy(self, scope_strategy: ScopeStrategy) -> Self {
        Self {
            scope_strategy,
            ..self
        }
    }

    /// Sets the audience matching strategy
    pub fn with_audience_matching_strategy(self, strategy: AudienceMatchingStrategy) -> Self {
        Self {
            audience_matching_strategy: strategy,
            ..self
        }
    }

    /// Includes debug detail in error responses
    pub fn with_debug_messages(self, send: bool) -> Self {
        Self {
            send_debug_messages_to_clients: send,
            ..self
        }
    }

    /// The response body for `err`
    ///
    /// Debug detail is only included if debug messages are enabled.
    pub fn error_body<'e>(&self, err: &'e Error) -> ErrorBody<'e> {
        err.body(self.send_debug_messages_to_clients)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
