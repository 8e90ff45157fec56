//! Session bootstrapping for apps that sit behind an external identity provider.
//!
//! The centerpiece is [`SessionBootstrapper`], which reconciles a fast local
//! session cache with a slower, authoritative identity provider and exposes a
//! single forward-only [`SessionState`] to a UI layer.
//!
//! Collaborators live behind traits so that the bootstrapper never depends on
//! a particular storage backend or provider:
//! - [`SessionCache`]: persisted snapshot of the last confirmed user
//! - [`IdentityProvider`]: sign-in/sign-out event source

pub mod auth;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod provider;

pub use bootstrap::{BootstrapConfig, SessionBootstrapper};
pub use cache::{FileSessionCache, MemorySessionCache, SessionCache};
pub use config::Config;
pub use error::{CacheError, ProviderError};
pub use models::{
    CachedSession, LoadingReason, ProviderUser, SessionEvent, SessionSnapshot, SessionState,
    UserProfile,
};
pub use provider::{
    HttpIdentityProvider, IdentityProvider, ManualProvider, ProviderEvents, Subscription,
};
