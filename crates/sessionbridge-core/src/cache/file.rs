use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::SessionCache;
use crate::auth::CredentialStore;
use crate::config::Config;
use crate::error::CacheError;
use crate::models::{CachedSession, UserProfile};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// On-disk layout. `token` is absent when it lives in the keychain.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    profile: UserProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    cached_at: DateTime<Utc>,
}

/// Session cache backed by a JSON file.
pub struct FileSessionCache {
    cache_dir: PathBuf,
    use_keyring: bool,
}

impl FileSessionCache {
    /// Store everything, token included, in `session.json`.
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            use_keyring: false,
        }
    }

    /// Keep the token in the OS keychain and only the profile on disk.
    pub fn with_keyring(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            use_keyring: true,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, CacheError> {
        let cache_dir = config.cache_dir().map_err(|_| CacheError::NoCacheDir)?;
        Ok(if config.store_token_in_keyring {
            Self::with_keyring(cache_dir)
        } else {
            Self::new(cache_dir)
        })
    }

    pub fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn token_account(user_id: &str) -> String {
        format!("session:{}", user_id)
    }

    async fn read_file(&self) -> Result<Option<SessionFile>, CacheError> {
        let contents = match tokio::fs::read_to_string(self.session_path()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Read(e)),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Keychain account of the stored session if it belongs to someone other
    /// than `user_id`.
    async fn stale_token_account(&self, user_id: &str) -> Option<String> {
        match self.read_file().await {
            Ok(Some(file)) if file.profile.id != user_id => {
                Some(Self::token_account(&file.profile.id))
            }
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Unreadable session file, nothing to clean up");
                None
            }
        }
    }
}

#[async_trait]
impl SessionCache for FileSessionCache {
    async fn load(&self) -> Result<Option<CachedSession>, CacheError> {
        let Some(file) = self.read_file().await? else {
            debug!(path = ?self.session_path(), "No cached session");
            return Ok(None);
        };

        let token = match file.token {
            Some(token) => token,
            None if self.use_keyring => {
                CredentialStore::get(&Self::token_account(&file.profile.id))
                    .map_err(|e| CacheError::Credential(format!("{:#}", e)))?
            }
            None => {
                return Err(CacheError::Credential(
                    "session file has no token".to_string(),
                ))
            }
        };

        Ok(Some(CachedSession {
            profile: file.profile,
            token,
            cached_at: file.cached_at,
        }))
    }

    async fn save(&self, session: &CachedSession) -> Result<(), CacheError> {
        let token = if self.use_keyring {
            if let Some(stale) = self.stale_token_account(&session.profile.id).await {
                if let Err(e) = CredentialStore::delete(&stale) {
                    warn!(error = %e, "Failed to delete previous user's token from keychain");
                }
            }
            CredentialStore::store(&Self::token_account(&session.profile.id), &session.token)
                .map_err(|e| CacheError::Credential(format!("{:#}", e)))?;
            None
        } else {
            Some(session.token.clone())
        };

        let file = SessionFile {
            profile: session.profile.clone(),
            token,
            cached_at: session.cached_at,
        };
        let contents = serde_json::to_string_pretty(&file)?;

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(CacheError::Write)?;
        tokio::fs::write(self.session_path(), contents)
            .await
            .map_err(CacheError::Write)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        if self.use_keyring {
            // The file names the keychain entry, so read it before removing
            match self.read_file().await {
                Ok(Some(file)) => {
                    if let Err(e) = CredentialStore::delete(&Self::token_account(&file.profile.id)) {
                        warn!(error = %e, "Failed to delete cached token from keychain");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Unreadable session file, removing anyway"),
            }
        }

        match tokio::fs::remove_file(self.session_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Write(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
