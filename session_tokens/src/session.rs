//! A token cache persisted in the user's web session

use std::{fmt, sync::Arc};

use aliri_clock::{Clock, System};

use crate::{
    cache::{CacheAccessArgs, TokenCache, TokenCacheAccess},
    error::CacheError,
    lock::SessionLock,
    store::SessionStore,
    CacheKey, CacheKeyRef, ClientIdRef, UserId, UserIdRef,
};

/// A per-user token cache kept in a web session
///
/// Construct one per request that needs token access. Construction loads
/// whatever the session already holds for the user. The cache then reloads
/// from the session immediately before every access by the token
/// acquisition client, and writes back immediately after any access that
/// changed it, so concurrent requests within one session see each other's
/// updates.
///
/// All loads and writes are ordered through the shared [`SessionLock`].
/// With [`PersistLockMode::Shared`][crate::PersistLockMode::Shared], two
/// requests writing back at the same time race and the last writer wins.
///
/// ```
/// use std::sync::Arc;
///
/// use session_tokens::{InMemorySession, SessionLock, SessionTokenCache, UserId};
///
/// let lock = Arc::new(SessionLock::default());
/// let session = InMemorySession::new();
///
/// let cache = SessionTokenCache::new(UserId::from_static("alice-123"), &session, lock)?;
/// if !cache.has_data() {
///     // Signed-in cookie, but no tokens behind it: send the user through sign-out.
/// }
/// # Ok::<(), session_tokens::CacheError>(())
/// ```
pub struct SessionTokenCache<S> {
    user_id: UserId,
    cache_key: CacheKey,
    session: S,
    lock: Arc<SessionLock>,
    cache: TokenCache,
}

impl<S: SessionStore> SessionTokenCache<S> {
    /// Constructs the cache for `user_id` and loads it from `session`
    ///
    /// A session that holds nothing for the user yields an empty cache.
    pub fn new(user_id: UserId, session: S, lock: Arc<SessionLock>) -> Result<Self, CacheError> {
        let cache_key = user_id.cache_key();
        let this = Self {
            user_id,
            cache_key,
            session,
            lock,
            cache: TokenCache::new(),
        };

        this.load()?;
        Ok(this)
    }

    /// The user whose tokens are cached
    #[inline]
    pub fn user_id(&self) -> &UserIdRef {
        &self.user_id
    }

    /// The session key the cache is stored under
    #[inline]
    pub fn cache_key(&self) -> &CacheKeyRef {
        &self.cache_key
    }

    /// Replaces the in-memory cache with the session's current copy
    pub fn load(&self) -> Result<(), CacheError> {
        let _guard = self.lock.read(&self.cache_key);
        let blob = self.session.get(&self.cache_key)?;
        tracing::trace!(
            key = %self.cache_key,
            bytes = blob.as_ref().map_or(0, Vec::len),
            "loaded token cache from session"
        );
        self.cache.deserialize(blob.as_deref())
    }

    /// Writes the in-memory cache back to the session if it has changed
    ///
    /// The change flag is cleared before the write begins, so a change made
    /// by a concurrent access while writing is picked up by the next write.
    /// Returns whether anything was written.
    pub fn persist(&self) -> Result<bool, CacheError> {
        let _guard = self.lock.persist(&self.cache_key);

        if !self.cache.take_state_changed() {
            tracing::trace!(key = %self.cache_key, "token cache unchanged, skipping write");
            return Ok(false);
        }

        let written = self.cache.serialize().and_then(|blob| {
            tracing::trace!(
                key = %self.cache_key,
                bytes = blob.len(),
                "writing token cache to session"
            );
            self.session
                .set(&self.cache_key, blob)
                .map_err(CacheError::from)
        });

        if let Err(error) = written {
            self.cache.set_state_changed(true);
            return Err(error);
        }

        Ok(true)
    }

    /// Clears the client's tokens and removes the cache from the session
    ///
    /// The session entry is removed even if this instance never saw it.
    pub fn clear(&self, client_id: &ClientIdRef) -> Result<(), CacheError> {
        self.cache.clear(client_id);
        self.session.remove(&self.cache_key)?;
        self.cache.set_state_changed(false);
        tracing::debug!(key = %self.cache_key, "removed token cache from session");
        Ok(())
    }

    /// Whether the cache holds at least one usable token
    ///
    /// A signed-in user whose cache is empty, e.g. because the server
    /// restarted while the browser kept its cookie, should be signed out.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.has_data_with_clock(&System)
    }

    /// Whether the cache holds at least one usable token as of the time
    /// reported by the provided clock
    pub fn has_data_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.cache.has_usable_entry_at(clock.now())
    }
}

impl<S: SessionStore> TokenCacheAccess for SessionTokenCache<S> {
    #[inline]
    fn token_cache(&self) -> &TokenCache {
        &self.cache
    }

    fn before_access(&self, _: &CacheAccessArgs<'_>) -> Result<(), CacheError> {
        self.load()
    }

    fn after_access(&self, _: &CacheAccessArgs<'_>) -> Result<(), CacheError> {
        if self.cache.has_state_changed() {
            self.persist()?;
        }
        Ok(())
    }
}

impl<S> fmt::Debug for SessionTokenCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionTokenCache")
            .field("user_id", &self.user_id)
            .field("cache_key", &self.cache_key)
            .field("cache", &self.cache)
            .finish()
    }
}
