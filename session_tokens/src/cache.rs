//! The in-memory token cache and its access hooks

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use aliri_clock::{Clock, DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{
    error::CacheError,
    tokens::{AccessTokenEntry, Account, IdTokenEntry, RefreshTokenEntry, TokenStatus},
    AccessToken, ClientIdRef, IdToken, RefreshToken, Scopes, UserIdRef,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheState {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    access_tokens: Vec<AccessTokenEntry>,
    #[serde(default)]
    refresh_tokens: Vec<RefreshTokenEntry>,
    #[serde(default)]
    id_tokens: Vec<IdTokenEntry>,
}

impl CacheState {
    fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.access_tokens.is_empty()
            && self.refresh_tokens.is_empty()
            && self.id_tokens.is_empty()
    }
}

/// The in-memory token cache
///
/// Holds accounts along with their access, refresh, and ID tokens. Every
/// mutation raises the change flag, which stays raised until someone takes
/// it, typically a cache writing the state back to durable storage.
///
/// A cache on its own has no durable storage. Wrap it in something that
/// implements [`TokenCacheAccess`] with meaningful hooks, such as
/// [`SessionTokenCache`][crate::SessionTokenCache], to keep it across
/// requests.
#[derive(Default)]
pub struct TokenCache {
    state: RwLock<CacheState>,
    changed: AtomicBool,
}

impl TokenCache {
    /// Constructs a new, empty token cache
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }

    /// Serializes the cache state into an opaque blob
    pub fn serialize(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(&*self.read()).map_err(CacheError::Serialize)
    }

    /// Replaces the cache state with the contents of a serialized blob
    ///
    /// An absent or empty blob leaves the cache empty. This does not raise
    /// the change flag.
    pub fn deserialize(&self, blob: Option<&[u8]>) -> Result<(), CacheError> {
        let state = match blob {
            Some(data) if !data.is_empty() => {
                serde_json::from_slice(data).map_err(CacheError::Deserialize)?
            }
            _ => CacheState::default(),
        };

        *self.write() = state;
        Ok(())
    }

    /// Whether the cache was mutated since the flag was last cleared
    #[inline]
    pub fn has_state_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    /// Sets or clears the change flag
    #[inline]
    pub fn set_state_changed(&self, changed: bool) {
        self.changed.store(changed, Ordering::SeqCst);
    }

    /// Clears the change flag, returning whether it was set
    #[inline]
    pub fn take_state_changed(&self) -> bool {
        self.changed.swap(false, Ordering::SeqCst)
    }

    /// Whether the cache holds no records at all
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether the cache holds a refresh token, or an access token that has
    /// not expired as of `time`
    pub fn has_usable_entry_at(&self, time: UnixTime) -> bool {
        let state = self.read();
        !state.refresh_tokens.is_empty()
            || state
                .access_tokens
                .iter()
                .any(|t| t.token_status_at(time, DurationSecs(0)) != TokenStatus::Expired)
    }

    /// Removes every record belonging to `client_id`
    ///
    /// Accounts no longer referenced by any token are dropped as well.
    pub fn clear(&self, client_id: &ClientIdRef) {
        let mut state = self.write();
        let before = record_count(&state);

        state.access_tokens.retain(|t| *t.client_id != *client_id);
        state.refresh_tokens.retain(|t| *t.client_id != *client_id);
        state.id_tokens.retain(|t| *t.client_id != *client_id);

        let CacheState {
            accounts,
            access_tokens,
            refresh_tokens,
            id_tokens,
        } = &mut *state;
        accounts.retain(|a| {
            let id = a.home_account_id();
            access_tokens.iter().any(|t| t.home_account_id == *id)
                || refresh_tokens.iter().any(|t| t.home_account_id == *id)
                || id_tokens.iter().any(|t| t.home_account_id == *id)
        });

        if record_count(&state) != before {
            drop(state);
            self.mark_changed();
        }
    }

    /// Lists the accounts known to the cache
    pub fn accounts(&self) -> Vec<Account> {
        self.read().accounts.clone()
    }

    /// Finds a known account
    pub fn account(&self, home_account_id: &UserIdRef) -> Option<Account> {
        self.read()
            .accounts
            .iter()
            .find(|a| **a.home_account_id() == *home_account_id)
            .cloned()
    }

    /// Adds an account, replacing any account with the same ID
    pub fn add_account(&self, account: Account) {
        let mut state = self.write();
        state
            .accounts
            .retain(|a| a.home_account_id() != account.home_account_id());
        state.accounts.push(account);
        drop(state);
        self.mark_changed();
    }

    /// Removes an account and every token issued to it for `client_id`
    pub fn remove_account(&self, client_id: &ClientIdRef, home_account_id: &UserIdRef) {
        let mut state = self.write();
        let before = record_count(&state);

        let owned = |c: &ClientIdRef, h: &UserIdRef| *c == *client_id && *h == *home_account_id;
        state
            .access_tokens
            .retain(|t| !owned(&*t.client_id, &*t.home_account_id));
        state
            .refresh_tokens
            .retain(|t| !owned(&*t.client_id, &*t.home_account_id));
        state
            .id_tokens
            .retain(|t| !owned(&*t.client_id, &*t.home_account_id));
        state
            .accounts
            .retain(|a| **a.home_account_id() != *home_account_id);

        if record_count(&state) != before {
            drop(state);
            self.mark_changed();
        }
    }

    /// Stores an access token for an account
    ///
    /// Any token for the same client and account whose scopes overlap with
    /// `scopes` is replaced.
    pub fn save_access_token(
        &self,
        client_id: &ClientIdRef,
        home_account_id: &UserIdRef,
        scopes: Scopes,
        access_token: AccessToken,
        cached_at: UnixTime,
        expires_on: UnixTime,
    ) {
        let mut state = self.write();
        state.access_tokens.retain(|t| {
            *t.client_id != *client_id
                || *t.home_account_id != *home_account_id
                || !t.scopes.iter().any(|s| scopes.iter().any(|n| n == s))
        });
        state.access_tokens.push(AccessTokenEntry {
            client_id: client_id.to_owned(),
            home_account_id: home_account_id.to_owned(),
            scopes,
            secret: access_token,
            cached_at,
            expires_on,
        });
        drop(state);
        self.mark_changed();
    }

    /// Stores the refresh token for an account, replacing any previous one
    pub fn save_refresh_token(
        &self,
        client_id: &ClientIdRef,
        home_account_id: &UserIdRef,
        refresh_token: RefreshToken,
    ) {
        let mut state = self.write();
        state
            .refresh_tokens
            .retain(|t| *t.client_id != *client_id || *t.home_account_id != *home_account_id);
        state.refresh_tokens.push(RefreshTokenEntry {
            client_id: client_id.to_owned(),
            home_account_id: home_account_id.to_owned(),
            secret: refresh_token,
        });
        drop(state);
        self.mark_changed();
    }

    /// Stores the ID token for an account, replacing any previous one
    pub fn save_id_token(
        &self,
        client_id: &ClientIdRef,
        home_account_id: &UserIdRef,
        id_token: IdToken,
    ) {
        let mut state = self.write();
        state
            .id_tokens
            .retain(|t| *t.client_id != *client_id || *t.home_account_id != *home_account_id);
        state.id_tokens.push(IdTokenEntry {
            client_id: client_id.to_owned(),
            home_account_id: home_account_id.to_owned(),
            secret: id_token,
        });
        drop(state);
        self.mark_changed();
    }

    /// Finds an access token for the account covering every requested scope
    ///
    /// Only tokens valid for at least `minimum_validity` past the clock's
    /// current time are returned. Returns the token and its expiry.
    pub fn find_access_token<C: Clock>(
        &self,
        client_id: &ClientIdRef,
        home_account_id: &UserIdRef,
        scopes: &Scopes,
        minimum_validity: DurationSecs,
        clock: &C,
    ) -> Option<(AccessToken, UnixTime)> {
        let now = clock.now();
        self.read()
            .access_tokens
            .iter()
            .filter(|t| *t.client_id == *client_id && *t.home_account_id == *home_account_id)
            .filter(|t| t.scopes.contains_all(scopes))
            .filter(|t| t.token_status_at(now, minimum_validity) == TokenStatus::Valid)
            .max_by_key(|t| t.expires_on)
            .map(|t| (t.secret.clone(), t.expires_on))
    }

    /// Finds the refresh token for the account
    pub fn find_refresh_token(
        &self,
        client_id: &ClientIdRef,
        home_account_id: &UserIdRef,
    ) -> Option<RefreshToken> {
        self.read()
            .refresh_tokens
            .iter()
            .find(|t| *t.client_id == *client_id && *t.home_account_id == *home_account_id)
            .map(|t| t.secret.clone())
    }
}

fn record_count(state: &CacheState) -> usize {
    state.accounts.len()
        + state.access_tokens.len()
        + state.refresh_tokens.len()
        + state.id_tokens.len()
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.read();
        f.debug_struct("TokenCache")
            .field("accounts", &state.accounts.len())
            .field("access_tokens", &state.access_tokens.len())
            .field("refresh_tokens", &state.refresh_tokens.len())
            .field("id_tokens", &state.id_tokens.len())
            .field("changed", &self.has_state_changed())
            .finish()
    }
}

/// Details of a single access to a token cache
#[derive(Clone, Copy, Debug)]
pub struct CacheAccessArgs<'a> {
    client_id: &'a ClientIdRef,
    account: Option<&'a UserIdRef>,
    writing: bool,
}

impl<'a> CacheAccessArgs<'a> {
    /// Describes an access that only reads from the cache
    pub fn reading(client_id: &'a ClientIdRef, account: Option<&'a UserIdRef>) -> Self {
        Self {
            client_id,
            account,
            writing: false,
        }
    }

    /// Describes an access that may write to the cache
    pub fn writing(client_id: &'a ClientIdRef, account: Option<&'a UserIdRef>) -> Self {
        Self {
            client_id,
            account,
            writing: true,
        }
    }

    /// The client accessing the cache
    #[inline]
    pub fn client_id(&self) -> &'a ClientIdRef {
        self.client_id
    }

    /// The account the access concerns, if any
    #[inline]
    pub fn account(&self) -> Option<&'a UserIdRef> {
        self.account
    }

    /// Whether the access may modify the cache
    #[inline]
    pub fn is_writing(&self) -> bool {
        self.writing
    }
}

/// A token cache along with hooks run around every access to it
///
/// The token acquisition client calls [`before_access`] immediately before
/// it reads or writes the cache, and [`after_access`] immediately after.
/// Implementations use these to keep the in-memory cache in sync with a
/// durable store.
///
/// [`before_access`]: TokenCacheAccess::before_access
/// [`after_access`]: TokenCacheAccess::after_access
pub trait TokenCacheAccess: Send + Sync {
    /// The in-memory cache
    fn token_cache(&self) -> &TokenCache;

    /// Runs immediately before the cache is consulted
    fn before_access(&self, args: &CacheAccessArgs<'_>) -> Result<(), CacheError> {
        let _ = args;
        Ok(())
    }

    /// Runs immediately after the cache was consulted
    fn after_access(&self, args: &CacheAccessArgs<'_>) -> Result<(), CacheError> {
        let _ = args;
        Ok(())
    }
}

impl TokenCacheAccess for TokenCache {
    #[inline]
    fn token_cache(&self) -> &TokenCache {
        self
    }
}

impl<T: TokenCacheAccess + ?Sized> TokenCacheAccess for &T {
    #[inline]
    fn token_cache(&self) -> &TokenCache {
        (**self).token_cache()
    }

    #[inline]
    fn before_access(&self, args: &CacheAccessArgs<'_>) -> Result<(), CacheError> {
        (**self).before_access(args)
    }

    #[inline]
    fn after_access(&self, args: &CacheAccessArgs<'_>) -> Result<(), CacheError> {
        (**self).after_access(args)
    }
}

impl<T: TokenCacheAccess + ?Sized> TokenCacheAccess for Arc<T> {
    #[inline]
    fn token_cache(&self) -> &TokenCache {
        (**self).token_cache()
    }

    #[inline]
    fn before_access(&self, args: &CacheAccessArgs<'_>) -> Result<(), CacheError> {
        (**self).before_access(args)
    }

    #[inline]
    fn after_access(&self, args: &CacheAccessArgs<'_>) -> Result<(), CacheError> {
        (**self).after_access(args)
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;

    use super::*;
    use crate::{ClientId, UserId};

    const APP: &str = "app";
    const OTHER_APP: &str = "other-app";

    fn alice() -> UserId {
        UserId::from_static("alice-123")
    }

    fn populated() -> TokenCache {
        let cache = TokenCache::new();
        let app = ClientId::from_static(APP);
        cache.add_account(Account::new(alice(), "alice@contoso.com").with_name("Alice"));
        cache.save_access_token(
            &app,
            &alice(),
            Scopes::parse_list("Mail.Read User.Read"),
            AccessToken::from_static("at-1"),
            UnixTime(100),
            UnixTime(3_700),
        );
        cache.save_refresh_token(&app, &alice(), RefreshToken::from_static("rt-1"));
        cache.save_id_token(&app, &alice(), IdToken::from_static("id-1"));
        cache
    }

    #[test]
    fn mutations_raise_the_change_flag() {
        let cache = TokenCache::new();
        assert!(!cache.has_state_changed());
        cache.add_account(Account::new(alice(), "alice@contoso.com"));
        assert!(cache.has_state_changed());
        assert!(cache.take_state_changed());
        assert!(!cache.has_state_changed());
        assert!(!cache.take_state_changed());
    }

    #[test]
    fn serialized_state_reads_back_identically() {
        let cache = populated();
        let blob = cache.serialize().unwrap();

        let copy = TokenCache::new();
        copy.deserialize(Some(&blob)).unwrap();

        assert!(!copy.has_state_changed());
        assert_eq!(copy.serialize().unwrap(), blob);
        assert_eq!(copy.accounts(), cache.accounts());
    }

    #[test]
    fn absent_or_empty_blob_yields_empty_cache() {
        let cache = populated();
        cache.deserialize(None).unwrap();
        assert!(cache.is_empty());

        let cache = populated();
        cache.deserialize(Some(&[])).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn malformed_blob_is_an_error() {
        let cache = TokenCache::new();
        let err = cache.deserialize(Some(b"not json")).unwrap_err();
        assert!(matches!(err, CacheError::Deserialize(_)));
    }

    #[test]
    fn clear_only_touches_the_given_client() {
        let cache = populated();
        let other = ClientId::from_static(OTHER_APP);
        cache.save_refresh_token(&other, &alice(), RefreshToken::from_static("rt-other"));
        cache.take_state_changed();

        cache.clear(&ClientId::from_static(APP));

        assert!(cache.has_state_changed());
        assert!(cache
            .find_refresh_token(&ClientId::from_static(APP), &alice())
            .is_none());
        assert!(cache.find_refresh_token(&other, &alice()).is_some());
        assert_eq!(cache.accounts().len(), 1);
    }

    #[test]
    fn clear_drops_orphaned_accounts() {
        let cache = populated();
        cache.clear(&ClientId::from_static(APP));
        assert!(cache.is_empty());
    }

    #[test]
    fn clearing_an_empty_cache_changes_nothing() {
        let cache = TokenCache::new();
        cache.clear(&ClientId::from_static(APP));
        assert!(!cache.has_state_changed());
    }

    #[test]
    fn usable_entries() {
        let app = ClientId::from_static(APP);
        let cache = TokenCache::new();
        assert!(!cache.has_usable_entry_at(UnixTime(0)));

        cache.save_access_token(
            &app,
            &alice(),
            Scopes::parse_list("Mail.Read"),
            AccessToken::from_static("at"),
            UnixTime(0),
            UnixTime(1_000),
        );
        assert!(cache.has_usable_entry_at(UnixTime(999)));
        assert!(!cache.has_usable_entry_at(UnixTime(1_000)));

        cache.save_refresh_token(&app, &alice(), RefreshToken::from_static("rt"));
        assert!(cache.has_usable_entry_at(UnixTime(5_000)));
    }

    #[test]
    fn finds_tokens_covering_requested_scopes() {
        let cache = populated();
        let app = ClientId::from_static(APP);
        let clock = TestClock::new(UnixTime(200));

        let (token, expiry) = cache
            .find_access_token(
                &app,
                &alice(),
                &Scopes::parse_list("Mail.Read"),
                DurationSecs(300),
                &clock,
            )
            .unwrap();
        assert_eq!(token.as_str(), "at-1");
        assert_eq!(expiry, UnixTime(3_700));

        assert!(cache
            .find_access_token(
                &app,
                &alice(),
                &Scopes::parse_list("Calendars.Read"),
                DurationSecs(300),
                &clock,
            )
            .is_none());
    }

    #[test]
    fn tokens_near_expiry_are_not_returned() {
        let cache = populated();
        let clock = TestClock::new(UnixTime(3_500));
        assert!(cache
            .find_access_token(
                &ClientId::from_static(APP),
                &alice(),
                &Scopes::parse_list("Mail.Read"),
                DurationSecs(300),
                &clock,
            )
            .is_none());
    }

    #[test]
    fn overlapping_access_tokens_are_replaced() {
        let cache = populated();
        let app = ClientId::from_static(APP);
        cache.save_access_token(
            &app,
            &alice(),
            Scopes::parse_list("Mail.Read"),
            AccessToken::from_static("at-2"),
            UnixTime(200),
            UnixTime(3_800),
        );

        let clock = TestClock::new(UnixTime(300));
        assert!(cache
            .find_access_token(
                &app,
                &alice(),
                &Scopes::parse_list("User.Read"),
                DurationSecs(0),
                &clock,
            )
            .is_none());
    }

    #[test]
    fn remove_account_drops_its_tokens() {
        let cache = populated();
        let app = ClientId::from_static(APP);
        cache.remove_account(&app, &alice());
        assert!(cache.is_empty());
        assert!(cache.account(&alice()).is_none());
    }
}
