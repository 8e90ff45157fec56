use thiserror::Error;

/// Failures from a `SessionCache`. None of these are fatal to the
/// bootstrapper: a failed read is a cache miss, a failed write is logged.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to read cached session: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to write cached session: {0}")]
    Write(#[source] std::io::Error),

    #[error("Cached session is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Credential store error: {0}")]
    Credential(String),

    #[error("Could not find cache directory")]
    NoCacheDir,
}

/// Failures reported by an `IdentityProvider`. The bootstrapper never turns
/// one of these into a sign-out.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("{0}")]
    Other(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ProviderError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success HTTP status to an error. 401/403 are not mapped here:
    /// the HTTP provider treats them as "no user".
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            429 => ProviderError::RateLimited,
            500..=599 => ProviderError::Server(truncated),
            _ => ProviderError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Transient failures worth retrying on the next poll.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::Server(_) | ProviderError::RateLimited
        )
    }
}
