//! Client and locking configuration

use crate::{
    scope::SIGN_IN_SCOPES, ClientId, ClientSecret, RedirectUri, Scope, Scopes,
};

/// The default authority for multi-tenant sign-in
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common/v2.0";

/// Registration details of the confidential client application
#[derive(Debug, Clone)]
pub struct ClientConfig {
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_uri: RedirectUri,
    authority: String,
    scopes: Scopes,
}

impl ClientConfig {
    /// Constructs a client configuration against the default authority
    ///
    /// `scopes` are the application's own scopes, as configured, e.g.
    /// `"User.Read Mail.Read"` or `"User.Read,Mail.Read"`.
    pub fn new(
        client_id: ClientId,
        client_secret: ClientSecret,
        redirect_uri: RedirectUri,
        scopes: &str,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            authority: DEFAULT_AUTHORITY.to_owned(),
            scopes: Scopes::parse_list(scopes),
        }
    }

    /// Uses a different authority
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// The client ID
    #[inline]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The client secret
    #[inline]
    pub fn client_secret(&self) -> &ClientSecret {
        &self.client_secret
    }

    /// The redirect URI registered for the client
    #[inline]
    pub fn redirect_uri(&self) -> &RedirectUri {
        &self.redirect_uri
    }

    /// The authority issuing tokens
    #[inline]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The application's own scopes
    #[inline]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// The full scope set to request when the user signs in
    pub fn sign_in_scopes(&self) -> Scopes {
        let mut scopes = self.scopes.clone();
        scopes.extend(SIGN_IN_SCOPES.into_iter().map(Scope::from_static));
        scopes
    }
}

/// How a session token cache locks while writing back to the session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PersistLockMode {
    /// Writes take the lock in shared mode, like loads
    ///
    /// Concurrent writes for the same session are not serialized against each
    /// other and the last writer wins.
    #[default]
    Shared,
    /// Writes take the lock exclusively
    Exclusive,
}

/// Configuration for a [`SessionLock`][crate::SessionLock]
#[derive(Clone, Copy, Debug)]
pub struct SessionLockConfig {
    shards: usize,
    persist_mode: PersistLockMode,
}

impl Default for SessionLockConfig {
    /// Default lock configuration
    ///
    /// Uses a single lock for the whole process, taken in shared mode for
    /// both loads and writes.
    fn default() -> Self {
        Self {
            shards: 1,
            persist_mode: PersistLockMode::Shared,
        }
    }
}

impl SessionLockConfig {
    /// Constructs a new lock configuration
    ///
    /// `shards` is clamped to at least one.
    pub fn new(shards: usize, persist_mode: PersistLockMode) -> Self {
        Self {
            shards: shards.max(1),
            persist_mode,
        }
    }

    /// Shards the lock by cache key into `shards` independent locks
    #[must_use]
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }

    /// Sets the mode used when writing back to the session
    #[must_use]
    pub fn with_persist_mode(mut self, persist_mode: PersistLockMode) -> Self {
        self.persist_mode = persist_mode;
        self
    }

    /// The number of lock shards
    #[inline]
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// The mode used when writing back to the session
    #[inline]
    pub fn persist_mode(&self) -> PersistLockMode {
        self.persist_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new(
            ClientId::from_static("app"),
            ClientSecret::from_static("secret"),
            RedirectUri::from_static("http://localhost:1234"),
            "User.Read, Mail.Read Calendars.Read",
        )
    }

    #[test]
    fn sign_in_scopes_include_openid_scopes() {
        let scopes = config().sign_in_scopes();
        for s in ["openid", "offline_access", "profile", "email", "Mail.Read"] {
            assert!(scopes.iter().any(|x| x.as_str() == s), "missing {}", s);
        }
        assert_eq!(scopes.len(), 7);
    }

    #[test]
    fn authority_defaults_to_common_endpoint() {
        assert_eq!(config().authority(), DEFAULT_AUTHORITY);
        assert_eq!(
            config().with_authority("https://example.com").authority(),
            "https://example.com"
        );
    }

    #[test]
    fn shard_count_is_never_zero() {
        assert_eq!(SessionLockConfig::default().with_shards(0).shards(), 1);
        assert_eq!(SessionLockConfig::new(0, PersistLockMode::Exclusive).shards(), 1);
    }
}
