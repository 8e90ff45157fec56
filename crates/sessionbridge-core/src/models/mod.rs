//! Data models shared by the bootstrapper, caches and providers.
//!
//! This module contains:
//! - `UserProfile` / `ProviderUser`: who is signed in
//! - `SessionState` and its transition rules
//! - `CachedSession`: the persisted snapshot written to a cache
//! - `SessionSnapshot` / `SessionEvent`: what consumers observe

pub mod profile;
pub mod session;

pub use profile::{ProviderUser, UserProfile};
pub use session::{
    reconcile, CachedSession, LoadingReason, SessionEvent, SessionSnapshot, SessionState, Verdict,
};
