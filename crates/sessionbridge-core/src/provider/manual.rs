use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use super::{IdentityProvider, ProviderEvents, Subscription};
use crate::error::ProviderError;
use crate::models::ProviderUser;

/// Identity provider driven by hand.
///
/// Nothing is delivered until `emit_*` is called, which makes provider
/// latency fully controllable from tests and the CLI demo.
#[derive(Default)]
pub struct ManualProvider {
    inner: Arc<Inner>,
    fail_subscribe: AtomicBool,
    fail_token: AtomicBool,
    fail_sign_out: AtomicBool,
    tokens_issued: AtomicU64,
}

#[derive(Default)]
struct Inner {
    subscribers: Mutex<Subscribers>,
    subscribed: Notify,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    active: HashMap<u64, ProviderEvents>,
    total: usize,
    last: Option<ProviderEvents>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ManualProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a signed-in user to every live subscriber.
    /// Returns the number of subscribers reached.
    pub fn emit_user(&self, user: ProviderUser) -> usize {
        self.broadcast(|events| events.user_changed(Some(user.clone())))
    }

    pub fn emit_signed_out(&self) -> usize {
        self.broadcast(|events| events.user_changed(None))
    }

    pub fn emit_error(&self, message: &str) -> usize {
        self.broadcast(|events| events.failed(ProviderError::Other(message.to_string())))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Number of `subscribe` calls that succeeded, including ended ones.
    pub fn subscribe_count(&self) -> usize {
        self.inner.lock().total
    }

    /// The sink from the most recent subscription, kept even after it was
    /// cancelled. Lets tests play a provider that calls back late.
    pub fn last_sink(&self) -> Option<ProviderEvents> {
        self.inner.lock().last.clone()
    }

    /// Resolve once at least one subscriber is live.
    pub async fn wait_for_subscriber(&self) {
        loop {
            let notified = self.inner.subscribed.notified();
            if self.subscriber_count() > 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_token(&self, fail: bool) {
        self.fail_token.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    fn broadcast(&self, send: impl Fn(&ProviderEvents) -> bool) -> usize {
        let sinks: Vec<ProviderEvents> = self.inner.lock().active.values().cloned().collect();
        sinks.iter().filter(|events| send(events)).count()
    }
}

#[async_trait]
impl IdentityProvider for ManualProvider {
    fn subscribe(&self, events: ProviderEvents) -> Result<Subscription, ProviderError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ProviderError::Subscribe("injected subscribe failure".to_string()));
        }

        let id = {
            let mut subscribers = self.inner.lock();
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.total += 1;
            subscribers.last = Some(events.clone());
            subscribers.active.insert(id, events);
            id
        };
        debug!(id, "Manual provider subscribed");
        self.inner.subscribed.notify_waiters();

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.lock().active.remove(&id);
                debug!(id, "Manual provider unsubscribed");
            }
        }))
    }

    async fn fetch_token(&self, user: &ProviderUser) -> Result<String, ProviderError> {
        if self.fail_token.load(Ordering::SeqCst) {
            return Err(ProviderError::Other("injected token failure".to_string()));
        }
        let n = self.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("manual-{}-{}", user.uid, n))
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(ProviderError::Other("injected sign-out failure".to_string()));
        }
        self.emit_signed_out();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderEvent;

    #[tokio::test]
    async fn test_emit_reaches_live_subscribers_only() {
        let provider = ManualProvider::new();
        assert_eq!(provider.emit_signed_out(), 0);

        let (events, mut rx) = ProviderEvents::channel();
        let mut subscription = provider.subscribe(events).unwrap();
        assert_eq!(provider.subscriber_count(), 1);

        assert_eq!(provider.emit_user(ProviderUser::new("u1")), 1);
        match rx.recv().await {
            Some(ProviderEvent::UserChanged(Some(user))) => assert_eq!(user.uid, "u1"),
            other => panic!("unexpected event: {:?}", other),
        }

        subscription.unsubscribe();
        assert_eq!(provider.subscriber_count(), 0);
        assert_eq!(provider.subscribe_count(), 1);
        assert_eq!(provider.emit_error("boom"), 0);
        assert!(provider.last_sink().is_some());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let provider = ManualProvider::new();
        provider.set_fail_subscribe(true);
        let (events, _rx) = ProviderEvents::channel();
        assert!(matches!(
            provider.subscribe(events),
            Err(ProviderError::Subscribe(_))
        ));
        assert_eq!(provider.subscribe_count(), 0);

        provider.set_fail_token(true);
        assert!(provider.fetch_token(&ProviderUser::new("u1")).await.is_err());

        provider.set_fail_sign_out(true);
        assert!(provider.sign_out().await.is_err());
    }

    #[tokio::test]
    async fn test_tokens_are_fresh() {
        let provider = ManualProvider::new();
        let user = ProviderUser::new("u1");
        let first = provider.fetch_token(&user).await.unwrap();
        let second = provider.fetch_token(&user).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_sign_out_notifies_subscribers() {
        let provider = ManualProvider::new();
        let (events, mut rx) = ProviderEvents::channel();
        let _subscription = provider.subscribe(events).unwrap();

        provider.sign_out().await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ProviderEvent::UserChanged(None))
        ));
    }
}
