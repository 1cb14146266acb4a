//! Strategies for matching a requested scope against a set of granted scopes

use serde::{Deserialize, Serialize};

use crate::Arguments;

/// Determines whether a requested scope is covered by a set of allowed scopes
///
/// Scopes are split into segments on `.`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStrategy {
    /// A `*` segment matches any non-empty segment, and a trailing `*`
    /// matches any number of remaining segments
    ///
    /// `users.*` allows `users.read` and `users.read.own`, but not `users`.
    #[default]
    Wildcard,

    /// An allowed scope covers itself and every scope beneath it
    ///
    /// `users` allows `users.read`, but `users.read` does not allow `users`.
    Hierarchic,

    /// Only identical scopes match
    Exact,
}

impl ScopeStrategy {
    /// Checks whether `needle` is permitted by any scope in `haystack`
    #[must_use]
    pub fn is_match(self, haystack: &Arguments, needle: &str) -> bool {
        match self {
            Self::Wildcard => haystack.iter().any(|m| wildcard_match(m, needle)),
            Self::Hierarchic => haystack.iter().any(|h| hierarchic_match(h, needle)),
            Self::Exact => haystack.has(needle),
        }
    }
}

fn hierarchic_match(allowed: &str, needle: &str) -> bool {
    if allowed == needle {
        return true;
    }

    if allowed.len() > needle.len() {
        return false;
    }

    let allowed: Vec<&str> = allowed.split('.').collect();
    for (k, part) in needle.split('.').enumerate() {
        match allowed.get(k) {
            None => return true,
            Some(current) if *current != part => return false,
            Some(_) => {}
        }
    }

    false
}

fn wildcard_match(matcher: &str, needle: &str) -> bool {
    let needle: Vec<&str> = needle.split('.').collect();
    let matcher: Vec<&str> = matcher.split('.').collect();

    if matcher.len() > needle.len() {
        return false;
    }

    let last = matcher.len() - 1;
    for (k, &part) in matcher.iter().enumerate() {
        if k == last && matcher.len() != needle.len() && part != "*" {
            return false;
        }

        if part == "*" && !needle[k].is_empty() {
            continue;
        }

        if part != needle[k] {
            return false;
        }
    }

    true
}
