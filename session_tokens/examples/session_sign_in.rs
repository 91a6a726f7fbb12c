use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use aliri_clock::DurationSecs;
use async_trait::async_trait;
use clap::Parser;
use session_tokens::{
    tokens::Account, AuthorizationCode, AuthorizationCodeRef, ClientConfig, ClientId,
    ClientSecret, ConfidentialClient, InMemorySession, PersistLockMode, RedirectUri,
    RefreshTokenRef, Scopes, SessionLock, SessionLockConfig, SessionTokenCache, TokenAuthority,
    TokenResponse, UserId,
};

#[derive(Debug, Parser)]
struct Opts {
    /// The client ID registered with the authority
    #[arg(long, env = "APP_ID")]
    app_id: ClientId,

    /// The client secret used to identify the client to the authority
    #[arg(long, env = "APP_PASSWORD", hide_env_values = true)]
    app_password: ClientSecret,

    /// The URI the authority redirects back to after sign-in
    #[arg(long, env = "REDIRECT_URI", default_value = "http://localhost:1234/")]
    redirect_uri: RedirectUri,

    /// The application's scopes, separated by spaces or commas
    #[arg(
        long,
        env = "APP_SCOPES",
        default_value = "User.Read Mail.Read Calendars.Read Contacts.Read"
    )]
    app_scopes: String,

    /// The number of shards to split the session lock into
    #[arg(long, env = "SESSION_LOCK_SHARDS", default_value_t = 1)]
    lock_shards: usize,

    /// Take the session lock exclusively when writing back to the session
    #[arg(long, env = "SESSION_LOCK_EXCLUSIVE")]
    exclusive_writes: bool,

    /// The number of parallel requests to simulate
    #[arg(long, default_value_t = 4)]
    parallel_requests: usize,
}

/// Stands in for the identity provider, issuing short-lived tokens
#[derive(Debug, Default)]
struct LocalAuthority {
    issued: AtomicUsize,
}

impl LocalAuthority {
    fn issue(&self, scopes: &Scopes) -> TokenResponse {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        TokenResponse {
            access_token: format!("access-{}", n).into(),
            expires_in: DurationSecs(3_600),
            scope: Some(scopes.to_request_string()),
            refresh_token: Some(format!("refresh-{}", n).into()),
            id_token: None,
            account: Account::new(UserId::from_static("alice-123"), "alice@contoso.com")
                .with_name("Alice"),
        }
    }
}

#[async_trait]
impl TokenAuthority for LocalAuthority {
    type Error = std::io::Error;

    async fn redeem_code(
        &self,
        _: &ClientConfig,
        _: &AuthorizationCodeRef,
        scopes: &Scopes,
    ) -> Result<TokenResponse, Self::Error> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(self.issue(scopes))
    }

    async fn refresh(
        &self,
        _: &ClientConfig,
        _: &RefreshTokenRef,
        scopes: &Scopes,
    ) -> Result<TokenResponse, Self::Error> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(self.issue(scopes))
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let persist_mode = if opts.exclusive_writes {
        PersistLockMode::Exclusive
    } else {
        PersistLockMode::Shared
    };
    let lock = Arc::new(SessionLock::new(SessionLockConfig::new(
        opts.lock_shards,
        persist_mode,
    )));
    let config = ClientConfig::new(
        opts.app_id,
        opts.app_password,
        opts.redirect_uri,
        &opts.app_scopes,
    );
    let authority = Arc::new(LocalAuthority::default());
    let session = Arc::new(InMemorySession::new());
    let user = UserId::from_static("alice-123");

    // Authorization code received on the redirect URI
    {
        let cache = SessionTokenCache::new(user.clone(), session.clone(), lock.clone())?;
        let client = ConfidentialClient::new(config.clone(), authority.clone(), &cache);
        let result = client
            .acquire_token_by_authorization_code(
                &AuthorizationCode::from_static("demo-code"),
                &config.sign_in_scopes(),
            )
            .await?;
        tracing::info!(
            account = %result.account().home_account_id(),
            token = format_args!("{:#?}", result.access_token()),
            "signed in"
        );
    }

    // Index page: only trust the cookie if the session still holds tokens
    {
        let cache = SessionTokenCache::new(user.clone(), session.clone(), lock.clone())?;
        tracing::info!(has_data = cache.has_data(), "checked session on index");
    }

    // Parallel API calls from one browser session
    let mut requests = Vec::new();
    for request in 0..opts.parallel_requests {
        let cache = SessionTokenCache::new(user.clone(), session.clone(), lock.clone())?;
        let client = ConfidentialClient::new(config.clone(), authority.clone(), cache)
            .with_minimum_validity(DurationSecs(if request % 2 == 0 { 300 } else { 3_601 }));
        requests.push(tokio::spawn(async move {
            let account = client.accounts()?.remove(0);
            let result = client
                .acquire_token_silent(client.config().scopes(), &account)
                .await?;
            tracing::info!(
                request,
                from_cache = result.is_from_cache(),
                token = format_args!("{:#?}", result.access_token()),
                "acquired token"
            );
            Ok::<_, color_eyre::Report>(())
        }));
    }
    for request in requests {
        request.await??;
    }

    // The process restarted: the cookie survives but the session is new
    {
        let fresh_session = InMemorySession::new();
        let cache = SessionTokenCache::new(user.clone(), &fresh_session, lock.clone())?;
        if !cache.has_data() {
            tracing::warn!("session has no tokens behind the sign-in cookie, signing out");
        }
    }

    // Sign-out
    {
        let cache = SessionTokenCache::new(user.clone(), session.clone(), lock.clone())?;
        cache.clear(config.client_id())?;
        let after = SessionTokenCache::new(user, session.clone(), lock)?;
        tracing::info!(has_data = after.has_data(), "signed out");
    }

    Ok(())
}
