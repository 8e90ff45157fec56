//! Session bootstrapping.
//!
//! `SessionBootstrapper` combines a fast local cache read with a slower,
//! authoritative identity provider subscription and publishes one
//! forward-only `SessionState` for a UI to route on.
//!
//! A run goes through these steps:
//! 1. Load the cached session. A hit is published immediately as
//!    `Authenticated` and clears the loading flag, so returning users never
//!    see a login screen flash by.
//! 2. Subscribe to the provider, once per run.
//! 3. Provider verdicts update the cache and the state. Provider errors only
//!    clear loading: a flaky network never signs anybody out.
//!
//! The timeout is armed when the run starts and covers the cache read too.
//! If it fires first, loading is cleared without a verdict.
//!
//! `stop()` cancels the run. Once it returns, nothing from that run reaches
//! consumers and no new cache write is issued. A write the cache has already
//! handed off (to a blocking thread, say) may still land.
//!
//! Do not hold a `watch::Ref` from [`SessionBootstrapper::watch`] across calls
//! to `start`, `stop` or `sign_out`: publishing takes the lifecycle lock and
//! then the watch lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::SessionCache;
use crate::config::DEFAULT_TIMEOUT_MS;
use crate::error::{CacheError, ProviderError};
use crate::models::{
    reconcile, CachedSession, LoadingReason, ProviderUser, SessionEvent, SessionSnapshot,
    SessionState, UserProfile, Verdict,
};
use crate::provider::{IdentityProvider, ProviderEvent, ProviderEvents, Subscription};

/// Buffer size for the ordered event channel.
/// A run produces at most a handful of events before consumers catch up.
const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// How long to keep the UI in its loading state while waiting on the provider
    pub timeout: Duration,
    /// Capacity of the `events()` broadcast channel
    pub event_capacity: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl BootstrapConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

enum Lifecycle {
    Idle,
    Running {
        run_id: u64,
        task: JoinHandle<()>,
        subscription: Option<Subscription>,
    },
    Stopped,
}

/// Who is asking to publish. Driver updates are tied to their run; explicit
/// calls such as `sign_out` only need the bootstrapper not to be stopped.
#[derive(Debug, Clone, Copy)]
enum Origin {
    Run(u64),
    Caller,
}

struct Shared {
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    lifecycle: Mutex<Lifecycle>,
    /// Mirrors `lifecycle` for lock-free reads
    running: AtomicBool,
    next_run: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admits(lifecycle: &Lifecycle, origin: Origin) -> bool {
        match (lifecycle, origin) {
            (Lifecycle::Running { run_id, .. }, Origin::Run(id)) => *run_id == id,
            (Lifecycle::Stopped, _) => false,
            (_, Origin::Caller) => true,
            (Lifecycle::Idle, Origin::Run(_)) => false,
        }
    }

    fn is_current(&self, origin: Origin) -> bool {
        Self::admits(&self.lock(), origin)
    }

    /// Apply a verdict and/or clear the loading flag, then notify consumers.
    ///
    /// Publication happens under the lifecycle lock, so a concurrent `stop()`
    /// either sees this update already delivered or prevents it entirely.
    fn apply(&self, origin: Origin, verdict: Option<Verdict>, finished: Option<LoadingReason>) -> bool {
        let lifecycle = self.lock();
        if !Self::admits(&lifecycle, origin) {
            trace!(?origin, "Dropping update from inactive run");
            return false;
        }

        let mut emitted = Vec::new();
        self.snapshot.send_if_modified(|snapshot| {
            if let Some(verdict) = verdict {
                if let Some(next) = reconcile(&snapshot.state, verdict) {
                    snapshot.state = next.clone();
                    emitted.push(SessionEvent::StateChanged(next));
                }
            }
            if let Some(reason) = finished {
                if snapshot.loading {
                    snapshot.loading = false;
                    emitted.push(SessionEvent::LoadingFinished(reason));
                }
            }
            !emitted.is_empty()
        });

        for event in &emitted {
            debug!(?event, "Session event");
            // No receivers is fine; the watch channel still holds the latest value
            let _ = self.events.send(event.clone());
        }
        !emitted.is_empty()
    }

    /// Hand the run's subscription to the lifecycle so `stop()` can cancel it.
    /// Returns false (after cancelling) if the run was stopped meanwhile.
    fn attach_subscription(&self, run: u64, mut subscription: Subscription) -> bool {
        {
            let mut lifecycle = self.lock();
            if let Lifecycle::Running {
                run_id,
                subscription: slot,
                ..
            } = &mut *lifecycle
            {
                if *run_id == run {
                    *slot = Some(subscription);
                    return true;
                }
            }
        }
        subscription.unsubscribe();
        false
    }
}

// ============================================================================
// Bootstrapper
// ============================================================================

/// Reconciles a session cache with an identity provider.
///
/// Must be started from within a tokio runtime.
pub struct SessionBootstrapper {
    cache: Arc<dyn SessionCache>,
    provider: Arc<dyn IdentityProvider>,
    config: BootstrapConfig,
    shared: Arc<Shared>,
}

impl SessionBootstrapper {
    pub fn new(
        cache: Arc<dyn SessionCache>,
        provider: Arc<dyn IdentityProvider>,
        config: BootstrapConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            cache,
            provider,
            config,
            shared: Arc::new(Shared {
                snapshot,
                events,
                lifecycle: Mutex::new(Lifecycle::Idle),
                running: AtomicBool::new(false),
                next_run: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Begin bootstrapping. Returns `false` without doing anything if a run
    /// is already in progress. A stopped bootstrapper can be started again;
    /// the state it reached is kept.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.shared.lock();
        if matches!(*lifecycle, Lifecycle::Running { .. }) {
            debug!("Bootstrap already running, ignoring start");
            return false;
        }

        let run_id = self.shared.next_run.fetch_add(1, Ordering::SeqCst);
        let driver = Driver {
            run_id,
            cache: self.cache.clone(),
            provider: self.provider.clone(),
            shared: self.shared.clone(),
            timeout: self.config.timeout,
        };

        // The lock is held across spawn, so the driver cannot publish before
        // its run is registered
        let task = tokio::spawn(driver.run());
        *lifecycle = Lifecycle::Running {
            run_id,
            task,
            subscription: None,
        };
        self.shared.running.store(true, Ordering::SeqCst);
        info!(run_id, timeout_ms = self.config.timeout.as_millis() as u64, "Session bootstrap started");
        true
    }

    /// Cancel the current run: unsubscribe from the provider and drop the
    /// pending timer. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let previous = {
            let mut lifecycle = self.shared.lock();
            self.shared.running.store(false, Ordering::SeqCst);
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        if let Lifecycle::Running {
            run_id,
            task,
            subscription,
        } = previous
        {
            if let Some(mut subscription) = subscription {
                subscription.unsubscribe();
            }
            task.abort();
            info!(run_id, "Session bootstrap stopped");
        }
    }

    /// Does not take the lifecycle lock, so it is safe to call while
    /// holding a `watch::Ref`.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Explicit sign-out: end the provider session, forget the cached session
    /// and publish `Unauthenticated`.
    ///
    /// If the provider refuses, the error is returned and nothing changes.
    pub async fn sign_out(&self) -> Result<(), ProviderError> {
        self.provider.sign_out().await?;

        if self.shared.is_current(Origin::Caller) {
            if let Err(e) = self.cache.clear().await {
                warn!(error = %e, "Failed to clear cached session on sign-out");
            }
        }
        self.shared.apply(
            Origin::Caller,
            Some(Verdict::SignedOut),
            Some(LoadingReason::ProviderVerdict),
        );
        info!("Signed out");
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state.clone()
    }

    /// Latest-value view, for consumers that only care about "now".
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Every transition in order, starting from the moment of the call.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Wait until the loading flag is cleared and return that snapshot.
    ///
    /// Never resolves if the bootstrapper is stopped while still loading;
    /// race it against your own deadline if that can happen.
    pub async fn ready(&self) -> SessionSnapshot {
        let mut rx = self.watch();
        let snapshot = match rx.wait_for(|snapshot| !snapshot.loading).await {
            Ok(snapshot) => (*snapshot).clone(),
            // The sender lives as long as `self`, so this is unreachable in practice
            Err(_) => self.snapshot(),
        };
        snapshot
    }
}

impl Drop for SessionBootstrapper {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Owns one run. Lives in its own task so `stop()` can abort it wholesale.
struct Driver {
    run_id: u64,
    cache: Arc<dyn SessionCache>,
    provider: Arc<dyn IdentityProvider>,
    shared: Arc<Shared>,
    timeout: Duration,
}

impl Driver {
    fn origin(&self) -> Origin {
        Origin::Run(self.run_id)
    }

    async fn run(self) {
        let timer = tokio::time::sleep(self.timeout);
        tokio::pin!(timer);
        let mut timer_armed = true;

        let load = self.cache.load();
        tokio::pin!(load);
        let loaded = tokio::select! {
            loaded = &mut load => loaded,
            () = &mut timer => {
                timer_armed = false;
                self.release_on_timeout();
                load.await
            }
        };
        self.restore_cached(loaded);

        // Subscribing only after the cache read keeps the cached verdict
        // ahead of any provider verdict
        let (events, mut rx) = ProviderEvents::channel();
        let subscription = match self.provider.subscribe(events) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "Failed to subscribe to identity provider");
                self.shared
                    .apply(self.origin(), None, Some(LoadingReason::SubscribeFailed));
                return;
            }
        };
        if !self.shared.attach_subscription(self.run_id, subscription) {
            return;
        }

        let mut stream_open = true;

        loop {
            tokio::select! {
                event = rx.recv(), if stream_open => match event {
                    Some(event) => {
                        timer_armed = false;
                        self.handle(event).await;
                    }
                    None => {
                        debug!("Identity provider closed its event stream");
                        stream_open = false;
                    }
                },
                () = &mut timer, if timer_armed => {
                    timer_armed = false;
                    self.release_on_timeout();
                }
                else => break,
            }
        }
        debug!(run_id = self.run_id, "Bootstrap driver finished");
    }

    fn release_on_timeout(&self) {
        if self.shared.apply(self.origin(), None, Some(LoadingReason::TimedOut)) {
            info!(
                timeout_ms = self.timeout.as_millis() as u64,
                "Session not resolved in time, releasing loading state"
            );
        }
    }

    fn restore_cached(&self, loaded: Result<Option<CachedSession>, CacheError>) {
        match loaded {
            Ok(Some(cached)) => {
                debug!(
                    user_id = %cached.profile.id,
                    age = %cached.age_display(),
                    "Restored cached session"
                );
                self.shared.apply(
                    self.origin(),
                    Some(Verdict::Cached(cached.profile)),
                    Some(LoadingReason::CacheHit),
                );
            }
            Ok(None) => debug!("No cached session"),
            Err(e) => warn!(error = %e, "Failed to read cached session, treating as miss"),
        }
    }

    async fn handle(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::UserChanged(Some(user)) => {
                let profile = UserProfile::from(&user);
                self.persist(&user, &profile).await;
                self.shared.apply(
                    self.origin(),
                    Some(Verdict::Confirmed(profile)),
                    Some(LoadingReason::ProviderVerdict),
                );
            }
            ProviderEvent::UserChanged(None) => {
                if self.shared.is_current(self.origin()) {
                    if let Err(e) = self.cache.clear().await {
                        warn!(error = %e, "Failed to clear cached session");
                    }
                }
                self.shared.apply(
                    self.origin(),
                    Some(Verdict::SignedOut),
                    Some(LoadingReason::ProviderVerdict),
                );
            }
            ProviderEvent::Failed(e) => {
                warn!(error = %e, "Identity provider error, keeping current session state");
                self.shared
                    .apply(self.origin(), None, Some(LoadingReason::ProviderError));
            }
        }
    }

    /// Write the confirmed user and a fresh token to the cache. Failures are
    /// logged; the confirmed verdict is published regardless.
    async fn persist(&self, user: &ProviderUser, profile: &UserProfile) {
        let token = match self.provider.fetch_token(user).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, user_id = %user.uid, "Failed to fetch token, not caching session");
                return;
            }
        };

        if !self.shared.is_current(self.origin()) {
            return;
        }
        if let Err(e) = self.cache.save(&CachedSession::new(profile.clone(), token)).await {
            warn!(error = %e, user_id = %user.uid, "Failed to cache session");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
