//! Token acquisition on behalf of signed-in users

use std::{error, fmt, sync::Arc};

use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    cache::{CacheAccessArgs, TokenCache, TokenCacheAccess},
    error::{AcquireError, CacheError},
    tokens::Account,
    AccessToken, AccessTokenRef, AuthorizationCodeRef, ClientConfig, IdToken, RefreshToken,
    RefreshTokenRef, Scopes, UserIdRef,
};

/// A token response from the authority
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The access token
    pub access_token: AccessToken,

    /// The number of seconds the access token is valid for
    pub expires_in: DurationSecs,

    /// The scopes granted, if the authority reports them
    #[serde(default)]
    pub scope: Option<String>,

    /// A refresh token, if one was issued
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,

    /// An ID token, if one was issued
    #[serde(default)]
    pub id_token: Option<IdToken>,

    /// The account the tokens were issued to
    pub account: Account,
}

/// An authority that issues tokens
///
/// The OAuth2 and OpenID Connect exchanges themselves live behind this
/// trait.
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// The error type returned in the event that a request fails
    type Error: error::Error + Send + Sync + 'static;

    /// Redeems an authorization code received on the redirect URI
    async fn redeem_code(
        &self,
        client: &ClientConfig,
        code: &AuthorizationCodeRef,
        scopes: &Scopes,
    ) -> Result<TokenResponse, Self::Error>;

    /// Obtains new tokens using a refresh token
    async fn refresh(
        &self,
        client: &ClientConfig,
        refresh_token: &RefreshTokenRef,
        scopes: &Scopes,
    ) -> Result<TokenResponse, Self::Error>;
}

#[async_trait]
impl<T: TokenAuthority + ?Sized> TokenAuthority for Arc<T> {
    type Error = T::Error;

    #[inline]
    async fn redeem_code(
        &self,
        client: &ClientConfig,
        code: &AuthorizationCodeRef,
        scopes: &Scopes,
    ) -> Result<TokenResponse, Self::Error> {
        (**self).redeem_code(client, code, scopes).await
    }

    #[inline]
    async fn refresh(
        &self,
        client: &ClientConfig,
        refresh_token: &RefreshTokenRef,
        scopes: &Scopes,
    ) -> Result<TokenResponse, Self::Error> {
        (**self).refresh(client, refresh_token, scopes).await
    }
}

/// The outcome of a successful token acquisition
#[derive(Debug)]
pub struct AuthenticationResult {
    access_token: AccessToken,
    expires_on: UnixTime,
    scopes: Scopes,
    account: Account,
    from_cache: bool,
}

impl AuthenticationResult {
    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the time that the access token will expire
    #[inline]
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// Gets the scopes requested for the access token
    #[inline]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Gets the account the token was issued to
    #[inline]
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Whether the token came straight from the cache
    #[inline]
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }
}

/// A confidential client application acquiring tokens through a cache
///
/// Every read or write of the cache is bracketed by the cache's
/// [`before_access`][TokenCacheAccess::before_access] and
/// [`after_access`][TokenCacheAccess::after_access] hooks. No cache access
/// spans a request to the authority.
pub struct ConfidentialClient<A, C, K = System> {
    config: ClientConfig,
    authority: A,
    cache: C,
    minimum_validity: DurationSecs,
    clock: K,
}

impl<A, C> ConfidentialClient<A, C, System> {
    /// Constructs a new client
    ///
    /// `cache` is usually a [`SessionTokenCache`][crate::SessionTokenCache]
    /// built for the current request.
    pub fn new(config: ClientConfig, authority: A, cache: C) -> Self {
        Self {
            config,
            authority,
            cache,
            minimum_validity: DurationSecs(300),
            clock: System,
        }
    }
}

impl<A, C, K> ConfidentialClient<A, C, K> {
    /// Sets the minimum validity for any cached access token returned
    ///
    /// A cached token that expires within `minimum_validity` is refreshed
    /// instead of returned.
    #[must_use]
    pub fn with_minimum_validity(mut self, minimum_validity: DurationSecs) -> Self {
        self.minimum_validity = minimum_validity;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> ConfidentialClient<A, C, D> {
        ConfidentialClient {
            config: self.config,
            authority: self.authority,
            cache: self.cache,
            minimum_validity: self.minimum_validity,
            clock,
        }
    }

    /// The client's configuration
    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The cache used by the client
    #[inline]
    pub fn cache(&self) -> &C {
        &self.cache
    }
}

impl<A, C, K> ConfidentialClient<A, C, K>
where
    A: TokenAuthority,
    C: TokenCacheAccess,
    K: Clock + Send + Sync,
{
    fn access<T>(
        &self,
        args: CacheAccessArgs<'_>,
        f: impl FnOnce(&TokenCache) -> T,
    ) -> Result<T, CacheError> {
        self.cache.before_access(&args)?;
        let out = f(self.cache.token_cache());
        self.cache.after_access(&args)?;
        Ok(out)
    }

    fn store_response(
        &self,
        response: TokenResponse,
        requested: &Scopes,
    ) -> Result<AuthenticationResult, CacheError> {
        let TokenResponse {
            access_token,
            expires_in,
            scope,
            refresh_token,
            id_token,
            account,
        } = response;

        let granted = match scope {
            Some(s) if !s.trim().is_empty() => Scopes::parse_list(&s),
            _ => requested.clone(),
        };

        let now = self.clock.now();
        let expires_on = now + expires_in;
        let client_id = self.config.client_id();
        let home_account_id = account.home_account_id().clone();

        self.access(
            CacheAccessArgs::writing(client_id, Some(&*home_account_id)),
            |cache| {
                cache.add_account(account.clone());
                cache.save_access_token(
                    client_id,
                    &home_account_id,
                    granted,
                    access_token.clone(),
                    now,
                    expires_on,
                );
                if let Some(refresh_token) = refresh_token {
                    cache.save_refresh_token(client_id, &home_account_id, refresh_token);
                }
                if let Some(id_token) = id_token {
                    cache.save_id_token(client_id, &home_account_id, id_token);
                }
            },
        )?;

        Ok(AuthenticationResult {
            access_token,
            expires_on,
            scopes: requested.clone(),
            account,
            from_cache: false,
        })
    }

    /// Redeems an authorization code and caches the resulting tokens
    pub async fn acquire_token_by_authorization_code(
        &self,
        code: &AuthorizationCodeRef,
        scopes: &Scopes,
    ) -> Result<AuthenticationResult, AcquireError<A::Error>> {
        let response = self
            .authority
            .redeem_code(&self.config, code, scopes)
            .await
            .map_err(AcquireError::Authority)?;

        tracing::debug!(
            account = %response.account.home_account_id(),
            "redeemed authorization code"
        );

        Ok(self.store_response(response, scopes)?)
    }

    /// Obtains an access token for `account` without user interaction
    ///
    /// Returns a cached access token if one covers `scopes` and meets the
    /// minimum validity. Otherwise the cached refresh token is redeemed for
    /// new tokens. Without a refresh token, the user must sign in again.
    pub async fn acquire_token_silent(
        &self,
        scopes: &Scopes,
        account: &Account,
    ) -> Result<AuthenticationResult, AcquireError<A::Error>> {
        let client_id = self.config.client_id();
        let home_account_id: &UserIdRef = account.home_account_id();
        let reading = CacheAccessArgs::reading(client_id, Some(home_account_id));

        let cached = self.access(reading, |cache| {
            cache.find_access_token(
                client_id,
                home_account_id,
                scopes,
                self.minimum_validity,
                &self.clock,
            )
        })?;

        if let Some((access_token, expires_on)) = cached {
            tracing::trace!(account = %home_account_id, "found access token in cache");
            return Ok(AuthenticationResult {
                access_token,
                expires_on,
                scopes: scopes.clone(),
                account: account.clone(),
                from_cache: true,
            });
        }

        let refresh_token = self
            .access(reading, |cache| {
                cache.find_refresh_token(client_id, home_account_id)
            })?
            .ok_or(AcquireError::UiRequired)?;

        tracing::debug!(account = %home_account_id, "no usable access token cached, refreshing");

        let response = self
            .authority
            .refresh(&self.config, &refresh_token, scopes)
            .await
            .map_err(AcquireError::Authority)?;

        Ok(self.store_response(response, scopes)?)
    }

    /// Lists the accounts with tokens in the cache
    pub fn accounts(&self) -> Result<Vec<Account>, CacheError> {
        self.access(
            CacheAccessArgs::reading(self.config.client_id(), None),
            TokenCache::accounts,
        )
    }

    /// Removes an account and its tokens from the cache
    pub fn remove_account(&self, account: &Account) -> Result<(), CacheError> {
        let client_id = self.config.client_id();
        let home_account_id: &UserIdRef = account.home_account_id();
        self.access(
            CacheAccessArgs::writing(client_id, Some(home_account_id)),
            |cache| cache.remove_account(client_id, home_account_id),
        )
    }
}

impl<A, C, K> fmt::Debug for ConfidentialClient<A, C, K>
where
    A: fmt::Debug,
    C: fmt::Debug,
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConfidentialClient")
            .field("config", &self.config)
            .field("authority", &self.authority)
            .field("cache", &self.cache)
            .field("minimum_validity", &self.minimum_validity)
            .field("clock", &self.clock)
            .finish()
    }
}
