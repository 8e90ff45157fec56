use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

use super::UserProfile;

// ============================================================================
// Session State
// ============================================================================

/// Whether a user is logged in, as far as the app currently knows.
///
/// Moves forward in confidence only: once a verdict has been reached the
/// state never goes back to `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "profile", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub enum SessionState {
    /// Startup, no verdict yet
    #[default]
    Unknown,
    Unauthenticated,
    Authenticated(UserProfile),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    /// True once any verdict has been reached.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionState::Unknown)
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    /// Compute the state that follows `self` when `next` is proposed.
    ///
    /// Returns `None` when the move is a no-op or would regress to `Unknown`.
    pub fn advance(&self, next: SessionState) -> Option<SessionState> {
        if next == SessionState::Unknown || *self == next {
            None
        } else {
            Some(next)
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unknown => write!(f, "unknown"),
            SessionState::Unauthenticated => write!(f, "signed out"),
            SessionState::Authenticated(profile) => write!(f, "signed in as {}", profile.label()),
        }
    }
}

/// Input to the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Profile read back from the local cache (fast, possibly stale)
    Cached(UserProfile),
    /// Profile confirmed by the identity provider
    Confirmed(UserProfile),
    /// Provider reported no user, or the user signed out
    SignedOut,
}

/// Apply a verdict to the current state.
///
/// A cached profile only counts while nothing better is known; provider
/// verdicts always win. Returns `None` when the state does not change.
pub fn reconcile(current: &SessionState, verdict: Verdict) -> Option<SessionState> {
    match verdict {
        Verdict::Cached(profile) => match current {
            SessionState::Unknown => current.advance(SessionState::Authenticated(profile)),
            _ => None,
        },
        Verdict::Confirmed(profile) => current.advance(SessionState::Authenticated(profile)),
        Verdict::SignedOut => current.advance(SessionState::Unauthenticated),
    }
}

// ============================================================================
// Observable Snapshot and Events
// ============================================================================

/// What a UI sees at any instant: a verdict plus whether to keep showing a
/// neutral splash screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub loading: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Unknown,
            loading: true,
        }
    }
}

/// Why the loading flag was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub enum LoadingReason {
    CacheHit,
    ProviderVerdict,
    ProviderError,
    SubscribeFailed,
    TimedOut,
}

/// Ordered notification delivered to `SessionBootstrapper::events` subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub enum SessionEvent {
    StateChanged(SessionState),
    LoadingFinished(LoadingReason),
}

// ============================================================================
// Cached Session
// ============================================================================

/// Last confirmed user plus an opaque credential token, persisted across
/// restarts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSession {
    pub profile: UserProfile,
    pub token: String,
    pub cached_at: DateTime<Utc>,
}

impl CachedSession {
    pub fn new(profile: UserProfile, token: impl Into<String>) -> Self {
        Self {
            profile,
            token: token.into(),
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Includes negative ages from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

impl fmt::Debug for CachedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSession")
            .field("profile", &self.profile)
            .field("token", &"<redacted>")
            .field("cached_at", &self.cached_at)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
