//! Session storage

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{error::SessionStoreError, CacheKeyRef};

/// A key-to-blob store scoped to a single browser session
///
/// The store is owned by the web framework and outlives individual requests,
/// but not the session itself. Implementations must tolerate calls from
/// several requests of the same session at once.
pub trait SessionStore: Send + Sync {
    /// Reads the blob stored under `key`, if any
    fn get(&self, key: &CacheKeyRef) -> Result<Option<Vec<u8>>, SessionStoreError>;

    /// Stores `value` under `key`, replacing any previous blob
    fn set(&self, key: &CacheKeyRef, value: Vec<u8>) -> Result<(), SessionStoreError>;

    /// Removes the blob stored under `key`, if any
    fn remove(&self, key: &CacheKeyRef) -> Result<(), SessionStoreError>;
}

impl<T: SessionStore + ?Sized> SessionStore for &T {
    #[inline]
    fn get(&self, key: &CacheKeyRef) -> Result<Option<Vec<u8>>, SessionStoreError> {
        (**self).get(key)
    }

    #[inline]
    fn set(&self, key: &CacheKeyRef, value: Vec<u8>) -> Result<(), SessionStoreError> {
        (**self).set(key, value)
    }

    #[inline]
    fn remove(&self, key: &CacheKeyRef) -> Result<(), SessionStoreError> {
        (**self).remove(key)
    }
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    #[inline]
    fn get(&self, key: &CacheKeyRef) -> Result<Option<Vec<u8>>, SessionStoreError> {
        (**self).get(key)
    }

    #[inline]
    fn set(&self, key: &CacheKeyRef, value: Vec<u8>) -> Result<(), SessionStoreError> {
        (**self).set(key, value)
    }

    #[inline]
    fn remove(&self, key: &CacheKeyRef) -> Result<(), SessionStoreError> {
        (**self).remove(key)
    }
}

/// An in-memory session
///
/// Cloning yields another handle to the same session.
#[derive(Clone, Debug, Default)]
pub struct InMemorySession {
    values: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemorySession {
    /// Constructs a new, empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of keys held in the session
    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the session holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the session holds a value under `key`
    pub fn contains(&self, key: &CacheKeyRef) -> bool {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key.as_str())
    }
}

impl SessionStore for InMemorySession {
    fn get(&self, key: &CacheKeyRef) -> Result<Option<Vec<u8>>, SessionStoreError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key.as_str()).cloned())
    }

    fn set(&self, key: &CacheKeyRef, value: Vec<u8>) -> Result<(), SessionStoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.as_str().to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &CacheKeyRef) -> Result<(), SessionStoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key.as_str());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheKey;

    #[test]
    fn clones_share_one_session() {
        let session = InMemorySession::new();
        let other = session.clone();
        let key = CacheKey::from_static("k");

        session.set(&key, b"blob".to_vec()).unwrap();
        assert_eq!(other.get(&key).unwrap().as_deref(), Some(&b"blob"[..]));

        other.remove(&key).unwrap();
        assert!(session.get(&key).unwrap().is_none());
        assert!(session.is_empty());
    }

    #[test]
    fn removing_absent_key_is_not_an_error() {
        let session = InMemorySession::new();
        session.remove(&CacheKey::from_static("missing")).unwrap();
    }
}
