//! Errors surfaced by session token caches

use std::error;

use thiserror::Error;

/// The session store could not be reached
///
/// This is fatal for the current request. It is never retried.
#[derive(Debug, Error)]
#[error("session store unavailable: {reason}")]
pub struct SessionStoreError {
    reason: String,
    #[source]
    source: Option<Box<dyn error::Error + Send + Sync + 'static>>,
}

impl SessionStoreError {
    /// Constructs an error describing why the store is unavailable
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
        }
    }

    /// Constructs an error wrapping the backing store's own failure
    pub fn with_source(
        reason: impl Into<String>,
        source: impl error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The reason the store is unavailable
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// An error loading or persisting a token cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The session store backing the cache failed
    #[error(transparent)]
    Store(#[from] SessionStoreError),
    /// The in-memory cache could not be serialized
    #[error("unable to serialize token cache")]
    Serialize(#[source] serde_json::Error),
    /// The stored blob could not be read back into a cache
    #[error("stored token cache is malformed")]
    Deserialize(#[source] serde_json::Error),
}

/// An error acquiring a token
#[derive(Debug, Error)]
pub enum AcquireError<E> {
    /// No cached credentials can satisfy the request; the user must sign in
    /// interactively
    #[error("interactive sign-in required")]
    UiRequired,
    /// The token authority rejected the request or could not be reached
    #[error("token authority request failed")]
    Authority(#[source] E),
    /// The token cache could not be loaded or persisted
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl<E> AcquireError<E> {
    /// Whether the caller should send the user through sign-in again
    pub fn is_ui_required(&self) -> bool {
        matches!(self, Self::UiRequired)
    }
}
