//! Per-user token caches kept in a web session
//!
//! Web applications that sign users in with OpenID Connect and then call APIs
//! on their behalf need somewhere to keep each user's access and refresh
//! tokens between requests. This crate keeps them in the user's own web
//! session: one opaque, serialized token cache per signed-in user, stored
//! under a key derived from the user's identity.
//!
//! Requests from the same browser session can run concurrently, for example
//! parallel XHR calls or two open tabs. Each request builds its own
//! [`SessionTokenCache`], which reloads the session's copy immediately before
//! every access to the cache and writes it back immediately after any access
//! that changed it. Loads and writes are ordered through a [`SessionLock`]
//! that the application constructs once at start-up and shares with every
//! request.
//!
//! # General Flow
//!
//! On start-up, create the lock and the client configuration. Then, for each
//! request needing tokens, construct a [`SessionTokenCache`] for the signed-in
//! user and hand it to a [`ConfidentialClient`]. The client calls the cache's
//! hooks around each read and write, so the session stays in sync without the
//! client knowing anything about sessions.
//!
//! ```
//! use std::sync::Arc;
//!
//! use session_tokens::{
//!     ClientConfig, ClientId, ClientSecret, ConfidentialClient, InMemorySession,
//!     RedirectUri, SessionLock, SessionLockConfig, SessionTokenCache, UserId,
//! };
//!
//! # #[derive(Debug)]
//! # struct Authority;
//! # #[async_trait::async_trait]
//! # impl session_tokens::TokenAuthority for Authority {
//! #     type Error = std::io::Error;
//! #     async fn redeem_code(
//! #         &self,
//! #         _: &ClientConfig,
//! #         _: &session_tokens::AuthorizationCodeRef,
//! #         _: &session_tokens::Scopes,
//! #     ) -> Result<session_tokens::TokenResponse, Self::Error> {
//! #         Err(std::io::ErrorKind::Unsupported.into())
//! #     }
//! #     async fn refresh(
//! #         &self,
//! #         _: &ClientConfig,
//! #         _: &session_tokens::RefreshTokenRef,
//! #         _: &session_tokens::Scopes,
//! #     ) -> Result<session_tokens::TokenResponse, Self::Error> {
//! #         Err(std::io::ErrorKind::Unsupported.into())
//! #     }
//! # }
//! # let session = InMemorySession::new();
//! #
//! let lock = Arc::new(SessionLock::new(SessionLockConfig::default()));
//! let config = ClientConfig::new(
//!     ClientId::from_static("00000000-0000-0000-0000-000000000000"),
//!     ClientSecret::from_static("secret"),
//!     RedirectUri::from_static("http://localhost:1234/"),
//!     "User.Read Mail.Read Calendars.Read Contacts.Read",
//! );
//!
//! // Per request:
//! let user = UserId::from_static("alice-123");
//! let cache = SessionTokenCache::new(user, &session, Arc::clone(&lock))?;
//!
//! if !cache.has_data() {
//!     // The browser still holds a sign-in cookie, but the session has no
//!     // tokens for it. Sign the user out rather than carrying on.
//! }
//!
//! let client = ConfidentialClient::new(config, Authority, &cache);
//! # /* Commented out due to this trying to interact with the world.
//! let account = client.accounts()?.remove(0);
//! let result = client.acquire_token_silent(client.config().scopes(), &account).await?;
//! # */
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! On sign-out, call [`SessionTokenCache::clear`] to drop the user's tokens
//! and remove the entry from the session.
//!
//! # Consistency
//!
//! By default a single process-wide lock is taken in shared mode for both
//! loads and writes. Two requests of the same session writing back at the same
//! time are not serialized against each other; the session ends up holding
//! one of the two writes in full. [`SessionLockConfig`] can shard the lock by
//! cache key and can make writes exclusive.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod cache;
pub mod client;
mod config;
mod error;
mod lock;
mod scope;
mod session;
pub mod store;
pub mod tokens;

pub use braids::*;
pub use cache::{CacheAccessArgs, TokenCache, TokenCacheAccess};
pub use client::{AuthenticationResult, ConfidentialClient, TokenAuthority, TokenResponse};
pub use config::{ClientConfig, PersistLockMode, SessionLockConfig, DEFAULT_AUTHORITY};
pub use error::{AcquireError, CacheError, SessionStoreError};
pub use lock::{PersistGuard, SessionLock};
pub use scope::{Scope, ScopeRef, Scopes, SIGN_IN_SCOPES};
pub use session::SessionTokenCache;
pub use store::{InMemorySession, SessionStore};
