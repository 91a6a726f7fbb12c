//! Records held in a token cache

use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, ClientId, IdToken, RefreshToken, Scopes, UserId};

/// A signed-in account known to the cache
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    home_account_id: UserId,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl Account {
    /// Constructs a new account record
    pub fn new(home_account_id: UserId, username: impl Into<String>) -> Self {
        Self {
            home_account_id,
            username: username.into(),
            name: None,
        }
    }

    /// Sets the account's display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The identity of the user owning the account
    #[inline]
    pub fn home_account_id(&self) -> &UserId {
        &self.home_account_id
    }

    /// The user's sign-in name
    #[inline]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The user's display name, if known
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A cached access token
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenEntry {
    pub(crate) client_id: ClientId,
    pub(crate) home_account_id: UserId,
    pub(crate) scopes: Scopes,
    pub(crate) secret: AccessToken,
    pub(crate) cached_at: UnixTime,
    pub(crate) expires_on: UnixTime,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid for at least the required minimum
    Valid,
    /// The token is valid, but will expire within the required minimum
    ExpiringSoon,
    /// The token is no longer valid
    Expired,
}

impl AccessTokenEntry {
    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.secret
    }

    /// Gets the scopes granted to the token
    #[inline]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Gets the time that the token was cached
    #[inline]
    pub fn cached_at(&self) -> UnixTime {
        self.cached_at
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// Gets the token's current status, requiring `minimum_validity` to remain
    #[inline]
    pub fn token_status(&self, minimum_validity: DurationSecs) -> TokenStatus {
        self.token_status_with_clock(&System, minimum_validity)
    }

    /// Gets the token's status based on the time reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(
        &self,
        clock: &C,
        minimum_validity: DurationSecs,
    ) -> TokenStatus {
        self.token_status_at(clock.now(), minimum_validity)
    }

    /// Gets the token's status as of the provided time
    pub fn token_status_at(&self, time: UnixTime, minimum_validity: DurationSecs) -> TokenStatus {
        if time >= self.expires_on {
            TokenStatus::Expired
        } else if time + minimum_validity > self.expires_on {
            TokenStatus::ExpiringSoon
        } else {
            TokenStatus::Valid
        }
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        if time < self.expires_on {
            self.expires_on - time
        } else {
            DurationSecs(0)
        }
    }
}

/// A cached refresh token
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshTokenEntry {
    pub(crate) client_id: ClientId,
    pub(crate) home_account_id: UserId,
    pub(crate) secret: RefreshToken,
}

impl RefreshTokenEntry {
    /// Gets the refresh token
    #[inline]
    pub fn refresh_token(&self) -> &RefreshToken {
        &self.secret
    }
}

/// A cached ID token
#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenEntry {
    pub(crate) client_id: ClientId,
    pub(crate) home_account_id: UserId,
    pub(crate) secret: IdToken,
}

impl IdTokenEntry {
    /// Gets the ID token
    #[inline]
    pub fn id_token(&self) -> &IdToken {
        &self.secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(expires_on: u64) -> AccessTokenEntry {
        AccessTokenEntry {
            client_id: ClientId::from_static("app"),
            home_account_id: UserId::from_static("alice-123"),
            scopes: Scopes::parse_list("Mail.Read"),
            secret: AccessToken::from_static("at"),
            cached_at: UnixTime(0),
            expires_on: UnixTime(expires_on),
        }
    }

    #[test]
    fn status_accounts_for_minimum_validity() {
        let token = entry(1_000);
        let min = DurationSecs(300);
        assert_eq!(token.token_status_at(UnixTime(699), min), TokenStatus::Valid);
        assert_eq!(token.token_status_at(UnixTime(700), min), TokenStatus::Valid);
        assert_eq!(token.token_status_at(UnixTime(701), min), TokenStatus::ExpiringSoon);
        assert_eq!(token.token_status_at(UnixTime(1_000), min), TokenStatus::Expired);
    }

    #[test]
    fn until_expired_saturates() {
        let token = entry(1_000);
        assert_eq!(token.until_expired_at(UnixTime(400)), DurationSecs(600));
        assert_eq!(token.until_expired_at(UnixTime(2_000)), DurationSecs(0));
    }
}
