//! Strategies for matching requested audiences against a client's allowed audiences

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{error, Arguments, Error};

/// Determines whether the audiences requested by a client are allowed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceMatchingStrategy {
    /// URL-aware matching
    ///
    /// The requested audience must share the scheme, host and port of an
    /// allowed audience, and its path must either equal the allowed path
    /// (ignoring a trailing `/`) or sit beneath it. Values that are not
    /// absolute URLs are compared as bare paths.
    #[default]
    Default,

    /// Each requested audience must appear verbatim in the allowed set
    Exact,
}

impl AudienceMatchingStrategy {
    /// Checks every requested audience against the allowed set
    ///
    /// An empty request is always allowed.
    ///
    /// # Errors
    ///
    /// Returns `invalid_request` naming the first audience that is not
    /// allowed, or that cannot be parsed.
    pub fn check(self, allowed: &Arguments, requested: &Arguments) -> Result<(), Error> {
        for needle in requested {
            let found = match self {
                Self::Exact => allowed.has(needle),
                Self::Default => {
                    let n = Target::parse(needle).map_err(|e| {
                        error::invalid_request()
                            .with_hint(format!("Unable to parse requested audience '{}'.", needle))
                            .wrap(e)
                    })?;

                    let mut found = false;
                    for h in allowed {
                        let h = Target::parse(h).map_err(|e| {
                            error::invalid_request()
                                .with_hint(format!("Unable to parse whitelisted audience '{}'.", h))
                                .wrap(e)
                        })?;
                        found |= h.allows(&n);
                    }
                    found
                }
            };

            if !found {
                return Err(error::invalid_request().with_hint(format!(
                    "Requested audience '{}' has not been whitelisted by the OAuth 2.0 Client.",
                    needle
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Target {
    scheme: String,
    host: Option<String>,
    port: Option<u16>,
    path: String,
}

impl Target {
    fn parse(value: &str) -> Result<Self, url::ParseError> {
        match Url::parse(value) {
            Ok(url) => Ok(Self {
                scheme: url.scheme().to_owned(),
                host: url.host_str().map(ToOwned::to_owned),
                port: url.port(),
                path: url.path().to_owned(),
            }),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self {
                scheme: String::new(),
                host: None,
                port: None,
                path: value.to_owned(),
            }),
            Err(e) => Err(e),
        }
    }

    fn allows(&self, requested: &Self) -> bool {
        if self.scheme != requested.scheme
            || self.host != requested.host
            || self.port != requested.port
        {
            return false;
        }

        let allowed_path = self.path.trim_end_matches('/');
        requested.path == self.path
            || requested.path == allowed_path
            || requested
                .path
                .strip_prefix(allowed_path)
                .map_or(false, |rest| rest.starts_with('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn args(s: &str) -> Arguments {
        Arguments::from_space_delimited(s)
    }

    #[test]
    fn empty_request_is_allowed() {
        let s = AudienceMatchingStrategy::Default;
        assert!(s.check(&Arguments::new(), &Arguments::new()).is_ok());
    }

    #[test]
    fn default_allows_sub_paths() {
        let allowed = args("https://api.example.com/v1/ https://other.example.com");
        let s = AudienceMatchingStrategy::Default;

        assert!(s
            .check(&allowed, &args("https://api.example.com/v1"))
            .is_ok());
        assert!(s
            .check(&allowed, &args("https://api.example.com/v1/"))
            .is_ok());
        assert!(s
            .check(&allowed, &args("https://api.example.com/v1/users"))
            .is_ok());
        assert!(s
            .check(&allowed, &args("https://other.example.com/any"))
            .is_ok());
    }

    #[test]
    fn default_rejects_siblings_and_other_hosts() {
        let allowed = args("https://api.example.com/v1");
        let s = AudienceMatchingStrategy::Default;

        let err = s
            .check(&allowed, &args("https://api.example.com/v10"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(
            err.hint(),
            Some("Requested audience 'https://api.example.com/v10' has not been whitelisted by the OAuth 2.0 Client.")
        );

        assert!(s
            .check(&allowed, &args("http://api.example.com/v1"))
            .is_err());
        assert!(s
            .check(&allowed, &args("https://api.example.com:8443/v1"))
            .is_err());
    }

    #[test]
    fn default_treats_plain_strings_as_paths() {
        let allowed = args("my-api");
        let s = AudienceMatchingStrategy::Default;

        assert!(s.check(&allowed, &args("my-api")).is_ok());
        assert!(s.check(&allowed, &args("my-api/reports")).is_ok());
        assert!(s.check(&allowed, &args("other-api")).is_err());
    }

    #[test]
    fn exact_requires_verbatim_match() {
        let allowed = args("https://api.example.com/v1");
        let s = AudienceMatchingStrategy::Exact;

        assert!(s
            .check(&allowed, &args("https://api.example.com/v1"))
            .is_ok());
        assert!(s
            .check(&allowed, &args("https://api.example.com/v1/users"))
            .is_err());
    }
}
