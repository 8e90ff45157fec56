//! Command implementations for the `sessionbridge` binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use sessionbridge_core::auth::CredentialStore;
use sessionbridge_core::config::ENV_ACCESS_TOKEN;
use sessionbridge_core::{
    BootstrapConfig, CachedSession, Config, FileSessionCache, HttpIdentityProvider,
    LoadingReason, ManualProvider, MemorySessionCache, ProviderUser, SessionBootstrapper,
    SessionCache, SessionEvent, SessionState, UserProfile,
};

/// Keychain account holding the provider access token
const ACCESS_TOKEN_ACCOUNT: &str = "provider-access-token";

/// Bootstrap timeout used by `--demo`
const DEMO_TIMEOUT_MS: u64 = 500;

/// When the simulated provider confirms the user in `--demo`
const DEMO_PROVIDER_DELAY_MS: u64 = 2000;

pub fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    }
}

/// Access token from the environment, falling back to the keychain
fn access_token() -> Option<String> {
    std::env::var(ENV_ACCESS_TOKEN)
        .ok()
        .filter(|token| !token.is_empty())
        .or_else(|| CredentialStore::get(ACCESS_TOKEN_ACCOUNT).ok())
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StateChanged(state) => format!("state: {}", state),
        SessionEvent::LoadingFinished(reason) => {
            let why = match reason {
                LoadingReason::CacheHit => "restored from cache",
                LoadingReason::ProviderVerdict => "provider answered",
                LoadingReason::ProviderError => "provider error",
                LoadingReason::SubscribeFailed => "provider unavailable",
                LoadingReason::TimedOut => "provider timed out",
            };
            format!("ready ({})", why)
        }
    }
}

/// Build a bootstrapper over the on-disk cache and the configured userinfo endpoint.
fn bootstrapper(config: &Config) -> Result<SessionBootstrapper> {
    let cache = FileSessionCache::from_config(config).context("Failed to open session cache")?;
    let provider = HttpIdentityProvider::from_config(config, access_token())
        .context("Failed to set up identity provider (is SESSIONBRIDGE_USERINFO_URL set?)")?;

    Ok(SessionBootstrapper::new(
        Arc::new(cache),
        Arc::new(provider),
        config.bootstrap_config(),
    ))
}

/// Print events until Ctrl-C, or until `on_event` returns false.
async fn print_events(
    boot: &SessionBootstrapper,
    mut on_event: impl FnMut(&SessionEvent) -> bool,
) -> Result<()> {
    let mut events = boot.events();
    boot.start();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", describe(&event));
                    if !on_event(&event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Fell behind on session events");
                    println!("state: {}", boot.state());
                }
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    boot.stop();
    Ok(())
}

/// Default command: bootstrap and follow the session.
pub async fn watch(config: &mut Config) -> Result<()> {
    let boot = bootstrapper(config)?;

    let mut last_user = config.last_user_id.clone();
    print_events(&boot, |event| {
        if let SessionEvent::StateChanged(SessionState::Authenticated(profile)) = event {
            last_user = Some(profile.id.clone());
        }
        true
    })
    .await?;

    if last_user != config.last_user_id {
        config.last_user_id = last_user;
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }
    Ok(())
}

/// Simulated run: a returning user whose provider answers slower than the
/// bootstrap timeout.
pub async fn demo() -> Result<()> {
    let cached = CachedSession::new(
        UserProfile::from(ProviderUser::new("u1")),
        "cached-token",
    );
    let cache = Arc::new(MemorySessionCache::with_session(cached));
    let provider = Arc::new(ManualProvider::new());
    let boot = SessionBootstrapper::new(
        cache.clone(),
        provider.clone(),
        BootstrapConfig::with_timeout(Duration::from_millis(DEMO_TIMEOUT_MS)),
    );

    let script = {
        let provider = provider.clone();
        tokio::spawn(async move {
            provider.wait_for_subscriber().await;
            tokio::time::sleep(Duration::from_millis(DEMO_PROVIDER_DELAY_MS)).await;
            provider.emit_user(
                ProviderUser::new("u1")
                    .with_email("a@b.com", true)
                    .with_display_name("Demo User"),
            );
        })
    };

    println!(
        "demo: cached user u1, provider answers after {}ms, timeout {}ms",
        DEMO_PROVIDER_DELAY_MS, DEMO_TIMEOUT_MS
    );
    // Finish once the provider has confirmed the user (the cached profile has no email)
    print_events(&boot, |event| match event {
        SessionEvent::StateChanged(state) => state.profile().map_or(true, |p| p.email.is_none()),
        SessionEvent::LoadingFinished(_) => true,
    })
    .await?;
    script.abort();

    if let Some(session) = cache.current() {
        debug!(?session, "Cache after demo");
        println!("cache: {} (token refreshed)", session.profile.label());
    }
    Ok(())
}

/// Prompt for an access token and store it in the OS keychain.
pub fn login() -> Result<()> {
    let token = rpassword::prompt_password("Access token: ")?;
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("Access token required");
    }
    CredentialStore::store(ACCESS_TOKEN_ACCOUNT, token)?;
    println!("Access token stored in keychain");
    Ok(())
}

/// Sign out at the provider, forget the cached session and the stored token.
///
/// Without a configured provider the local session is still forgotten.
pub async fn sign_out(config: &Config) -> Result<()> {
    let cache = FileSessionCache::from_config(config).context("Failed to open session cache")?;
    let boot = match bootstrapper(config) {
        Ok(boot) => Some(boot),
        Err(e) => {
            let reason = format!("{:#}", e);
            warn!(error = %reason, "No identity provider, clearing local session only");
            None
        }
    };
    forget_session(boot.as_ref(), &cache).await?;

    CredentialStore::delete(ACCESS_TOKEN_ACCOUNT)?;
    println!("Signed out");
    Ok(())
}

async fn forget_session(
    boot: Option<&SessionBootstrapper>,
    cache: &dyn SessionCache,
) -> Result<()> {
    match boot {
        Some(boot) => boot.sign_out().await.context("Provider refused sign-out"),
        None => cache.clear().await.context("Failed to clear cached session"),
    }
}

/// Show what a fresh start would restore.
pub async fn status(config: &Config) -> Result<()> {
    let cache = FileSessionCache::from_config(config).context("Failed to open session cache")?;

    match cache.load().await {
        Ok(Some(session)) => {
            let profile = &session.profile;
            println!("Cached session: {}", profile.label());
            println!("  id:       {}", profile.id);
            if let Some(ref email) = profile.email {
                let verified = if profile.email_verified { "verified" } else { "unverified" };
                println!("  email:    {} ({})", email, verified);
            }
            println!("  cached:   {}", session.age_display());
        }
        Ok(None) => println!("No cached session"),
        Err(e) => println!("Cached session unreadable: {}", e),
    }

    let token = if std::env::var(ENV_ACCESS_TOKEN).is_ok_and(|t| !t.is_empty()) {
        "from environment"
    } else if CredentialStore::has_token(ACCESS_TOKEN_ACCOUNT) {
        "in keychain"
    } else {
        "missing"
    };
    println!("Access token: {}", token);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
