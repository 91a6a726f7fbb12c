//! Synchronization of session access across requests

use std::{
    collections::hash_map::RandomState,
    fmt,
    hash::BuildHasher,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{CacheKeyRef, PersistLockMode, SessionLockConfig};

/// The reader/writer lock guarding loads from and writes to session stores
///
/// Construct one when the process starts and share it with every
/// [`SessionTokenCache`][crate::SessionTokenCache]. With the default
/// configuration this is a single lock for all sessions; with more than one
/// shard, cache keys are spread across independent locks so that unrelated
/// sessions do not contend. Any one cache key always maps to the same shard.
pub struct SessionLock {
    shards: Box<[RwLock<()>]>,
    hasher: RandomState,
    persist_mode: PersistLockMode,
}

impl SessionLock {
    /// Constructs a lock with the given configuration
    pub fn new(config: SessionLockConfig) -> Self {
        Self {
            shards: (0..config.shards()).map(|_| RwLock::new(())).collect(),
            hasher: RandomState::new(),
            persist_mode: config.persist_mode(),
        }
    }

    /// The mode taken when writing back to the session
    #[inline]
    pub fn persist_mode(&self) -> PersistLockMode {
        self.persist_mode
    }

    fn shard(&self, key: &CacheKeyRef) -> &RwLock<()> {
        if self.shards.len() == 1 {
            return &self.shards[0];
        }

        let idx = self.hasher.hash_one(key.as_str()) % self.shards.len() as u64;
        &self.shards[idx as usize]
    }

    /// Takes the lock for `key` in shared mode, for loading
    pub fn read(&self, key: &CacheKeyRef) -> RwLockReadGuard<'_, ()> {
        // Guards protect no data; poisoning is ignored.
        self.shard(key)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the lock for `key` in the configured persist mode
    pub fn persist(&self, key: &CacheKeyRef) -> PersistGuard<'_> {
        let shard = self.shard(key);
        match self.persist_mode {
            PersistLockMode::Shared => {
                PersistGuard::Shared(shard.read().unwrap_or_else(PoisonError::into_inner))
            }
            PersistLockMode::Exclusive => {
                PersistGuard::Exclusive(shard.write().unwrap_or_else(PoisonError::into_inner))
            }
        }
    }
}

impl Default for SessionLock {
    fn default() -> Self {
        Self::new(SessionLockConfig::default())
    }
}

impl fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionLock")
            .field("shards", &self.shards.len())
            .field("persist_mode", &self.persist_mode)
            .finish()
    }
}

/// A held session lock, taken for a write back to the session
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub enum PersistGuard<'a> {
    /// Held in shared mode
    Shared(RwLockReadGuard<'a, ()>),
    /// Held exclusively
    Exclusive(RwLockWriteGuard<'a, ()>),
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread, time::Duration};

    use super::*;
    use crate::CacheKey;

    #[test]
    fn one_key_always_maps_to_one_shard() {
        let lock = SessionLock::new(SessionLockConfig::default().with_shards(16));
        let key = CacheKey::from_static("alice-123_TokenCache");
        let first = lock.shard(&key) as *const _;
        for _ in 0..10 {
            assert_eq!(lock.shard(&key) as *const _, first);
        }
    }

    #[test]
    fn shared_persist_does_not_block_loads() {
        let lock = SessionLock::default();
        let key = CacheKey::from_static("k");
        let _persist = lock.persist(&key);
        assert!(matches!(lock.persist(&key), PersistGuard::Shared(_)));
        let _load = lock.read(&key);
    }

    #[test]
    fn exclusive_persist_blocks_loads_until_released() {
        let lock = SessionLock::new(
            SessionLockConfig::default().with_persist_mode(PersistLockMode::Exclusive),
        );
        let key = CacheKey::from_static("k");
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let guard = lock.persist(&key);
            assert!(matches!(guard, PersistGuard::Exclusive(_)));
            let (lock, key) = (&lock, &key);
            s.spawn(move || {
                let _load = lock.read(key);
                tx.send(()).unwrap();
            });

            assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
            drop(guard);
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        });
    }
}
