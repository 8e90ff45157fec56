use anyhow::{Context, Result};
use keyring::Entry;

use crate::config::APP_NAME;

/// OS keychain storage for credential tokens, keyed by account name.
///
/// Two kinds of account use it: cached session tokens (keyed by user id) and
/// the provider access token entered through the CLI.
pub struct CredentialStore;

impl CredentialStore {
    /// Store a token in the OS keychain
    pub fn store(account: &str, token: &str) -> Result<()> {
        let entry = Entry::new(APP_NAME, account).context("Failed to create keyring entry")?;
        entry
            .set_password(token)
            .context("Failed to store token in keychain")?;
        Ok(())
    }

    /// Retrieve the token for an account from the OS keychain
    pub fn get(account: &str) -> Result<String> {
        let entry = Entry::new(APP_NAME, account).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve token from keychain")
    }

    /// Delete the stored token for an account. Missing entries are not an error.
    pub fn delete(account: &str) -> Result<()> {
        let entry = Entry::new(APP_NAME, account).context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }

    /// Check if a token exists for an account
    pub fn has_token(account: &str) -> bool {
        Entry::new(APP_NAME, account)
            .and_then(|entry| entry.get_password())
            .is_ok()
    }
}
