use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// An OAuth 2.0 client identifier
#[braid(serde)]
pub struct ClientId;

/// An opaque access token
///
/// The token is hidden when printed unless the alternate format is
/// requested, i.e. `{:#}`.
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 8);

/// An authorization code issued by the authorize endpoint
#[braid(serde, debug = "owned", display = "owned")]
pub struct AuthorizeCode;

limited_reveal!(AuthorizeCodeRef: "AUTHORIZE CODE", 8);

/// The signature portion of a token, used as its storage key
///
/// A signature is safe to log. It cannot be used to reconstruct the token
/// it was derived from.
#[braid(serde)]
pub struct TokenSignature;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_is_hidden_by_default() {
        let token = AccessToken::from_static("abcdefghijklmnop.qrstuvwxyz");
        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{:#?}", token), "\"abcdefg…\"");
        assert_eq!(format!("{:#}", token), "abcdefghijklmnop.qrstuvwxyz");
    }

    #[test]
    fn authorize_code_reveal_width_is_configurable() {
        let code = AuthorizeCodeRef::from_str("0123456789");
        assert_eq!(format!("{:#4?}", code), "\"012…\"");
        assert_eq!(format!("{:#1?}", code), "\"…\"");
    }
}
