//! Identity provider backed by an OpenID Connect userinfo endpoint.
//!
//! The provider polls the endpoint with the current bearer token and reports
//! a change whenever the answer differs from the previous poll. A 401 or 403
//! means nobody is signed in; any other failure is reported as an error and
//! leaves the last answer in place.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, info, warn};

use super::{IdentityProvider, ProviderEvents, Subscription};
use crate::config::Config;
use crate::error::ProviderError;
use crate::models::ProviderUser;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// The bootstrap timeout unblocks the UI long before a slow poll gives up.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Polls a userinfo endpoint on behalf of subscribers.
/// Clone is cheap - state is shared behind an Arc.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    userinfo_url: String,
    access_token: RwLock<Option<String>>,
    poll_interval: Duration,
}

impl HttpIdentityProvider {
    pub fn new(
        userinfo_url: impl Into<String>,
        access_token: Option<String>,
        poll_interval: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                userinfo_url: userinfo_url.into(),
                access_token: RwLock::new(access_token),
                poll_interval,
            }),
        })
    }

    pub fn from_config(config: &Config, access_token: Option<String>) -> Result<Self, ProviderError> {
        let url = config
            .userinfo_url
            .clone()
            .ok_or_else(|| ProviderError::Other("No userinfo URL configured".to_string()))?;
        Self::new(url, access_token, config.poll_interval())
    }

    /// Replace the bearer token used for subsequent polls.
    pub fn set_access_token(&self, token: Option<String>) {
        *self
            .inner
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    /// Ask the endpoint who is signed in right now.
    pub async fn fetch_user(&self) -> Result<Option<ProviderUser>, ProviderError> {
        self.inner.fetch_user().await
    }
}

impl Inner {
    fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn fetch_user(&self) -> Result<Option<ProviderUser>, ProviderError> {
        let Some(token) = self.access_token() else {
            return Ok(None);
        };

        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&self.userinfo_url)
                .header(header::ACCEPT, "application/json")
                .bearer_auth(&token)
                .send()
                .await?;

            match response.status() {
                status if status.is_success() => {
                    let user = response
                        .json::<ProviderUser>()
                        .await
                        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                    return Ok(Some(user));
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    debug!(status = %response.status(), "Userinfo rejected token");
                    return Ok(None);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ProviderError::RateLimited);
                    }
                    warn!(retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::from_status(status, &body));
                }
            }
        }
    }

    async fn poll(self: Arc<Self>, events: ProviderEvents) {
        let mut last: Option<Option<ProviderUser>> = None;

        loop {
            match self.fetch_user().await {
                Ok(user) => {
                    if last.as_ref() != Some(&user) {
                        debug!(signed_in = user.is_some(), "Userinfo changed");
                        events.user_changed(user.clone());
                        last = Some(user);
                    }
                }
                Err(e) => {
                    warn!(error = %e, transient = e.is_transient(), "Userinfo poll failed");
                    events.failed(e);
                }
            }

            if events.is_closed() {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        debug!("Userinfo poll loop finished");
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn subscribe(&self, events: ProviderEvents) -> Result<Subscription, ProviderError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ProviderError::Subscribe(e.to_string()))?;
        let task = handle.spawn(self.inner.clone().poll(events));
        info!(url = %self.inner.userinfo_url, "Polling userinfo endpoint");
        Ok(Subscription::new(move || task.abort()))
    }

    async fn fetch_token(&self, _user: &ProviderUser) -> Result<String, ProviderError> {
        self.inner.access_token().ok_or(ProviderError::NotSignedIn)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.set_access_token(None);
        info!("Cleared provider access token");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderEvent;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `responses` in order, one per connection, then stop.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/userinfo", addr)
    }

    fn provider(url: String, token: Option<&str>) -> HttpIdentityProvider {
        HttpIdentityProvider::new(url, token.map(String::from), Duration::from_secs(3600)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_user_success() {
        let url = serve(vec![(200, r#"{"sub":"u1","email":"a@b.com","email_verified":true}"#)]).await;
        let user = provider(url, Some("tok")).fetch_user().await.unwrap().unwrap();
        assert_eq!(user.uid, "u1");
        assert!(user.email_verified);
    }

    #[tokio::test]
    async fn test_fetch_user_unauthorized_is_signed_out() {
        let url = serve(vec![(401, "{}")]).await;
        assert!(provider(url, Some("tok")).fetch_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_user_server_error() {
        let url = serve(vec![(503, "down")]).await;
        let err = provider(url, Some("tok")).fetch_user().await.unwrap_err();
        assert!(matches!(err, ProviderError::Server(ref body) if body == "down"));
    }

    #[tokio::test]
    async fn test_fetch_user_without_token_skips_request() {
        // Nothing is listening here; a request would fail
        let provider = provider("http://127.0.0.1:9/userinfo".to_string(), None);
        assert!(provider.fetch_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_reports_first_answer() {
        let url = serve(vec![(200, r#"{"sub":"u1"}"#)]).await;
        let provider = provider(url, Some("tok"));

        let (events, mut rx) = ProviderEvents::channel();
        let mut subscription = provider.subscribe(events).unwrap();

        match rx.recv().await {
            Some(ProviderEvent::UserChanged(Some(user))) => assert_eq!(user.uid, "u1"),
            other => panic!("unexpected event: {:?}", other),
        }
        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn test_token_and_sign_out() {
        let provider = provider("http://127.0.0.1:9/userinfo".to_string(), Some("tok"));
        let user = ProviderUser::new("u1");
        assert_eq!(provider.fetch_token(&user).await.unwrap(), "tok");

        provider.sign_out().await.unwrap();
        assert!(matches!(
            provider.fetch_token(&user).await,
            Err(ProviderError::NotSignedIn)
        ));
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = Config::default();
        assert!(HttpIdentityProvider::from_config(&config, None).is_err());
    }
}
