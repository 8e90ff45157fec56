//! Identity provider integration.
//!
//! A provider pushes sign-in/sign-out changes through a [`ProviderEvents`]
//! sink handed to it on `subscribe`, and returns a [`Subscription`] whose
//! cancel closure runs exactly once.
//!
//! Implementations:
//! - `HttpIdentityProvider`: polls an OpenID Connect userinfo endpoint
//! - `ManualProvider`: driven by hand, for tests and demos

pub mod http;
pub mod manual;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::ProviderError;
use crate::models::ProviderUser;

pub use http::HttpIdentityProvider;
pub use manual::ManualProvider;

/// Authoritative source of "who is signed in".
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Start delivering changes to `events`. May deliver synchronously.
    fn subscribe(&self, events: ProviderEvents) -> Result<Subscription, ProviderError>;

    /// Issue a fresh credential token for a user the provider just reported.
    async fn fetch_token(&self, user: &ProviderUser) -> Result<String, ProviderError>;

    /// End the provider-side session.
    async fn sign_out(&self) -> Result<(), ProviderError>;
}

/// A single notification from a provider.
#[derive(Debug)]
pub enum ProviderEvent {
    UserChanged(Option<ProviderUser>),
    Failed(ProviderError),
}

/// Callback sink handed to `IdentityProvider::subscribe`.
///
/// Cheap to clone. Sending never blocks; once the listener is gone every
/// send is dropped and reports `false`.
#[derive(Clone)]
pub struct ProviderEvents {
    tx: mpsc::UnboundedSender<ProviderEvent>,
}

impl ProviderEvents {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProviderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report the current user, or `None` when nobody is signed in.
    pub fn user_changed(&self, user: Option<ProviderUser>) -> bool {
        self.send(ProviderEvent::UserChanged(user))
    }

    pub fn failed(&self, error: ProviderError) -> bool {
        self.send(ProviderEvent::Failed(error))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: ProviderEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                trace!(event = ?e.0, "Listener gone, dropping provider event");
                false
            }
        }
    }
}

impl fmt::Debug for ProviderEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEvents")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Handle for an active provider subscription.
///
/// The cancel closure runs exactly once: on the first `unsubscribe`, or on
/// drop if `unsubscribe` was never called.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscription.is_active());
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());
        drop(subscription);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_events_after_receiver_dropped() {
        let (events, rx) = ProviderEvents::channel();
        assert!(events.user_changed(None));
        drop(rx);
        assert!(events.is_closed());
        assert!(!events.user_changed(Some(ProviderUser::new("u1"))));
        assert!(!events.failed(ProviderError::Other("late".into())));
    }
}
