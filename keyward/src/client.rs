use std::{collections::BTreeMap, time::Duration};

use crate::{Arguments, ClientId, ClientIdRef};

/// The kinds of token whose lifespans are tracked on a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenType {
    /// An access token
    AccessToken,
    /// A refresh token
    RefreshToken,
    /// An authorization code
    AuthorizeCode,
}

/// A registered OAuth 2.0 client
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Client {
    id: ClientId,
    public: bool,
    grant_types: Arguments,
    response_types: Arguments,
    scopes: Arguments,
    audience: Arguments,
    lifespans: BTreeMap<(String, TokenType), Duration>,
}

impl Client {
    /// A confidential client with no permissions
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            public: false,
            grant_types: Arguments::new(),
            response_types: Arguments::new(),
            scopes: Arguments::new(),
            audience: Arguments::new(),
            lifespans: BTreeMap::new(),
        }
    }

    /// Marks the client as public, i.e. unable to keep a secret
    pub fn with_public(self, public: bool) -> Self {
        Self { public, ..self }
    }

    /// Sets the grant types the client may use
    pub fn with_grant_types<I, S>(self, grant_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            grant_types: grant_types.into_iter().collect(),
            ..self
        }
    }

    /// Sets the response types the client may request
    pub fn with_response_types<I, S>(self, response_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            response_types: response_types.into_iter().collect(),
            ..self
        }
    }

    /// Sets the scopes the client may request
    pub fn with_scopes<I, S>(self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().collect(),
            ..self
        }
    }

    /// Sets the audiences the client may request
    pub fn with_audience<I, S>(self, audience: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            audience: audience.into_iter().collect(),
            ..self
        }
    }

    /// Overrides the lifespan of a token issued through a particular grant
    pub fn with_lifespan(
        mut self,
        grant_type: impl Into<String>,
        token_type: TokenType,
        lifespan: Duration,
    ) -> Self {
        self.lifespans
            .insert((grant_type.into(), token_type), lifespan);
        self
    }

    /// The client identifier
    #[must_use]
    pub fn id(&self) -> &ClientIdRef {
        &self.id
    }

    /// Whether this is a public client
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.public
    }

    /// Grant types the client may use
    pub fn grant_types(&self) -> &Arguments {
        &self.grant_types
    }

    /// Response types the client may request
    pub fn response_types(&self) -> &Arguments {
        &self.response_types
    }

    /// Scopes the client may request
    pub fn scopes(&self) -> &Arguments {
        &self.scopes
    }

    /// Audiences the client may request
    pub fn audience(&self) -> &Arguments {
        &self.audience
    }

    /// The client-specific lifespan for a token issued through a grant, if configured
    #[must_use]
    pub fn lifespan(&self, grant_type: &str, token_type: TokenType) -> Option<Duration> {
        self.lifespans
            .get(&(grant_type.to_owned(), token_type))
            .copied()
    }
}

/// The lifespan to use for a token, preferring a client-specific override
#[must_use]
pub fn effective_lifespan(
    client: &Client,
    grant_type: &str,
    token_type: TokenType,
    fallback: Duration,
) -> Duration {
    client.lifespan(grant_type, token_type).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GRANT_TYPE_JWT_BEARER;

    #[test]
    fn client_override_wins_over_fallback() {
        let two_minutes = Duration::from_secs(120);
        let client = Client::new(ClientId::from_static("c"))
            .with_lifespan(GRANT_TYPE_JWT_BEARER, TokenType::AccessToken, two_minutes);

        let fallback = Duration::from_secs(3600);
        let lifespan = |grant: &str, token| effective_lifespan(&client, grant, token, fallback);
        assert_eq!(
            lifespan(GRANT_TYPE_JWT_BEARER, TokenType::AccessToken),
            two_minutes
        );
        assert_eq!(
            lifespan("authorization_code", TokenType::AccessToken),
            fallback
        );
        assert_eq!(
            lifespan(GRANT_TYPE_JWT_BEARER, TokenType::RefreshToken),
            fallback
        );
    }
}
