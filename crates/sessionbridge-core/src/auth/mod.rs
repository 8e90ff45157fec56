//! Secure credential storage.
//!
//! `CredentialStore` wraps the OS keychain via `keyring`. It backs the
//! keychain mode of `FileSessionCache` and the CLI's stored access token.

pub mod credentials;

pub use credentials::CredentialStore;
