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

/// The identity of a signed-in user
///
/// Taken from the name identifier claim of the user's ID token. It is only
/// ever used as a key.
#[braid(serde)]
pub struct UserId;

impl UserIdRef {
    /// Derives the session key under which this user's token cache is kept
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(format!("{}{}", self.as_str(), CacheKey::SUFFIX))
    }
}

/// The session key holding a user's serialized token cache
#[braid(serde)]
pub struct CacheKey;

impl CacheKey {
    /// Suffix appended to a user ID to form its cache key
    pub const SUFFIX: &'static str = "_TokenCache";
}

/// A client ID
#[braid(serde)]
pub struct ClientId;

/// A client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

limited_reveal!(ClientSecretRef: "CLIENT SECRET", 5);

/// The URI the authority redirects back to after sign-in
#[braid(serde)]
pub struct RedirectUri;

/// An OAuth2 authorization code
#[braid(serde, debug = "owned", display = "owned")]
pub struct AuthorizationCode;

limited_reveal!(AuthorizationCodeRef: "AUTHORIZATION CODE", 5);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// An OpenID Connect ID token
#[braid(serde)]
pub struct IdToken;

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_appends_suffix() {
        let user = UserId::from_static("alice-123");
        assert_eq!(user.cache_key().as_str(), "alice-123_TokenCache");
    }

    #[test]
    fn secrets_are_hidden_unless_alternate() {
        let token = AccessToken::from_static("eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{:#?}", token), "\"eyJ0eXAiOiJKV1…\"");
    }

    #[test]
    fn short_secrets_are_revealed_whole() {
        let secret = RefreshToken::from_static("abc");
        assert_eq!(format!("{:#}", secret), "abc");
        assert_eq!(format!("{:#1}", secret), "…");
    }
}
