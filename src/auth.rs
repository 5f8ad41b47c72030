//! Identity seam: the gateway asks a [`TokenProvider`] for a bearer token
//! before every request and never knows which backend produced it.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Single-method capability satisfied by any identity backend.
///
/// Implementations must not fail: anything that goes wrong while acquiring a
/// token is logged and reported as `None`, which makes the gateway send the
/// request unauthenticated and lets the server decide.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Option<String>;
}

/// No identity backend configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn token(&self) -> Option<String> {
        None
    }
}

/// A fixed token, e.g. from `SCANWATCH_TOKEN`.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        let t = self.0.trim();
        (!t.is_empty()).then(|| t.to_string())
    }
}

/// Reads the token from a file on every call so an external login helper can
/// rotate it underneath a running client.
#[derive(Debug, Clone)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenProvider for FileToken {
    async fn token(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "auth: token file unreadable");
                None
            }
        }
    }
}

/// Settings for an OAuth2 client-credentials grant (Keycloak, Azure AD, ...).
#[derive(Debug, Clone)]
pub struct ClientCredentialsConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Refresh this long before the server-declared expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(30);
const DEFAULT_LIFETIME: Duration = Duration::from_secs(300);

/// OIDC client-credentials provider with an in-memory token cache.
pub struct ClientCredentials {
    cfg: ClientCredentialsConfig,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(cfg: ClientCredentialsConfig, http: reqwest::Client) -> Self {
        Self {
            cfg,
            http,
            cache: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken, String> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.cfg.client_id.as_str()),
            ("client_secret", self.cfg.client_secret.as_str()),
        ];
        if let Some(scope) = self.cfg.scope.as_deref() {
            form.push(("scope", scope));
        }
        let resp = self
            .http
            .post(&self.cfg.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("token endpoint returned {}", resp.status()));
        }
        let body: TokenResponse = resp.json().await.map_err(|e| e.to_string())?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);
        Ok(CachedToken {
            value: body.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_SKEW),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentials {
    async fn token(&self) -> Option<String> {
        let mut cache = self.cache.lock().await;
        if let Some(c) = cache.as_ref() {
            if Instant::now() < c.refresh_at {
                return Some(c.value.clone());
            }
        }
        match self.fetch().await {
            Ok(fresh) => {
                debug!(client_id = %self.cfg.client_id, "auth: token refreshed");
                let value = fresh.value.clone();
                *cache = Some(fresh);
                Some(value)
            }
            Err(e) => {
                warn!(token_url = %self.cfg.token_url, error = %e, "auth: token refresh failed");
                *cache = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_blank_means_none() {
        assert_eq!(StaticToken::new("  ").token().await, None);
        assert_eq!(StaticToken::new("abc\n").token().await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn missing_token_file_is_none_not_error() {
        let p = std::env::temp_dir().join(format!("scanwatch-missing-{}", std::process::id()));
        assert_eq!(FileToken::new(p).token().await, None);
    }

    #[tokio::test]
    async fn token_file_is_reread() {
        let p = std::env::temp_dir().join(format!("scanwatch-token-{}", std::process::id()));
        std::fs::write(&p, "one\n").unwrap();
        let provider = FileToken::new(&p);
        assert_eq!(provider.token().await.as_deref(), Some("one"));
        std::fs::write(&p, "two").unwrap();
        assert_eq!(provider.token().await.as_deref(), Some("two"));
        let _ = std::fs::remove_file(&p);
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_none() {
        let provider = ClientCredentials::new(
            ClientCredentialsConfig {
                token_url: "http://127.0.0.1:1/token".into(),
                client_id: "scanwatch".into(),
                client_secret: "s".into(),
                scope: None,
            },
            reqwest::Client::new(),
        );
        assert_eq!(provider.token().await, None);
    }
}
