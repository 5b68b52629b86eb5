//! OAuth2 token acquisition for the LLM endpoint.
//!
//! The provider owns its cache outright: tokens are acquired with the
//! client-credentials grant, cached with their expiry, and refreshed on
//! demand. Refresh is serialized behind a mutex while cached tokens are
//! served to concurrent runs without contention. Process environment is
//! never written.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PodcastError;

/// Renew this long before the reported expiry to avoid serving a token that
/// dies mid-request.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub auth_url: String,
    pub grant_type: String,
    pub scope: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Token provider with cache-with-expiry and refresh-on-demand.
pub struct TokenProvider {
    config: OAuthConfig,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(config: OAuthConfig) -> Result<Self, PodcastError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PodcastError::Auth(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            cached: Mutex::new(None),
        })
    }

    /// Return a valid token, refreshing it first if the cached one expired.
    pub async fn get_token(&self) -> Result<String, PodcastError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.expires_at {
                return Ok(entry.token.clone());
            }
        }

        debug!(auth_url = %self.config.auth_url, "refreshing auth token");
        let body = [
            ("grant_type", self.config.grant_type.as_str()),
            ("scope", self.config.scope.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(&self.config.auth_url)
            .form(&body)
            .send()
            .await
            .map_err(|e| PodcastError::Auth(format!("token request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| PodcastError::Auth(format!("token endpoint rejected request: {}", e)))?;

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| PodcastError::Auth(format!("malformed token response: {}", e)))?;

        let token = data
            .access_token
            .ok_or_else(|| PodcastError::Auth("no access token in response".to_string()))?;
        let expires_in = Duration::from_secs(data.expires_in.unwrap_or(3600));
        let expires_at = Instant::now() + expires_in.saturating_sub(EXPIRY_SKEW);

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

/// Where the LLM client gets its bearer credential.
#[derive(Clone)]
pub enum TokenSource {
    /// A plain API key supplied at startup.
    Static(String),
    /// OAuth2 client-credentials flow with caching.
    OAuth(Arc<TokenProvider>),
}

impl TokenSource {
    pub async fn token(&self) -> Result<String, PodcastError> {
        match self {
            TokenSource::Static(key) => Ok(key.clone()),
            TokenSource::OAuth(provider) => provider.get_token().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_returns_key() {
        let source = TokenSource::Static("sk-test".to_string());
        assert_eq!(source.token().await.unwrap(), "sk-test");
    }

    #[tokio::test]
    async fn test_oauth_refresh_failure_is_auth_error() {
        // Nothing listens on this port, so the refresh must fail cleanly.
        let provider = TokenProvider::new(OAuthConfig {
            auth_url: "http://127.0.0.1:9/token".to_string(),
            grant_type: "client_credentials".to_string(),
            scope: "test".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        })
        .unwrap();
        let err = provider.get_token().await.unwrap_err();
        assert!(matches!(err, PodcastError::Auth(_)));
    }
}
