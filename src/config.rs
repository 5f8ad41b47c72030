//! Connection settings shared by every subcommand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::api::HttpGateway;
use crate::auth::{ClientCredentials, ClientCredentialsConfig, FileToken, NoAuth, StaticToken, TokenProvider};
use crate::dashboard::PollIntervals;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Base URL of the monitoring API, including the version prefix.
    #[arg(long = "api-url", env = "SCANWATCH_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Bearer token sent with every request.
    #[arg(long, env = "SCANWATCH_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// File holding a bearer token; re-read on every request.
    #[arg(long = "token-file", env = "SCANWATCH_TOKEN_FILE", global = true)]
    pub token_file: Option<PathBuf>,

    /// OIDC token endpoint for the client-credentials grant.
    #[arg(long = "oidc-token-url", env = "SCANWATCH_OIDC_TOKEN_URL", global = true)]
    pub oidc_token_url: Option<String>,

    #[arg(long = "oidc-client-id", env = "SCANWATCH_OIDC_CLIENT_ID", global = true)]
    pub oidc_client_id: Option<String>,

    #[arg(long = "oidc-client-secret", env = "SCANWATCH_OIDC_CLIENT_SECRET", hide_env_values = true, global = true)]
    pub oidc_client_secret: Option<String>,

    #[arg(long = "oidc-scope", env = "SCANWATCH_OIDC_SCOPE", global = true)]
    pub oidc_scope: Option<String>,

    /// Per-request timeout in milliseconds.
    #[arg(long = "timeout-ms", env = "SCANWATCH_TIMEOUT_MS", default_value_t = 15_000, global = true)]
    pub timeout_ms: u64,

    /// Poll period for every feed, in seconds.
    #[arg(long = "poll-secs", env = "SCANWATCH_POLL_SECS", default_value_t = 30, global = true)]
    pub poll_secs: u64,

    /// Render dates in UTC instead of the local timezone.
    #[arg(long, default_value_t = false, global = true)]
    pub utc: bool,
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn poll_intervals(&self) -> PollIntervals {
        PollIntervals::uniform(Duration::from_secs(self.poll_secs.max(1)))
    }

    /// Pick the identity backend. At most one source may be configured.
    pub fn token_provider(&self) -> Result<Arc<dyn TokenProvider>> {
        let oidc = self.oidc_token_url.is_some() || self.oidc_client_id.is_some();
        let sources = [self.token.is_some(), self.token_file.is_some(), oidc]
            .iter()
            .filter(|s| **s)
            .count();
        if sources > 1 {
            bail!("use only one of --token, --token-file or the --oidc-* settings");
        }
        if let Some(tok) = &self.token {
            return Ok(Arc::new(StaticToken::new(tok.clone())));
        }
        if let Some(path) = &self.token_file {
            return Ok(Arc::new(FileToken::new(path.clone())));
        }
        if oidc {
            let cfg = ClientCredentialsConfig {
                token_url: self
                    .oidc_token_url
                    .clone()
                    .context("--oidc-token-url is required with --oidc-client-id")?,
                client_id: self
                    .oidc_client_id
                    .clone()
                    .context("--oidc-client-id is required with --oidc-token-url")?,
                client_secret: self.oidc_client_secret.clone().unwrap_or_default(),
                scope: self.oidc_scope.clone(),
            };
            let http = reqwest::Client::builder()
                .timeout(self.timeout())
                .build()
                .context("building token endpoint client")?;
            return Ok(Arc::new(ClientCredentials::new(cfg, http)));
        }
        Ok(Arc::new(NoAuth))
    }

    pub fn gateway(&self) -> Result<HttpGateway> {
        let auth = self.token_provider()?;
        HttpGateway::new(&self.api_url, auth, self.timeout())
            .with_context(|| format!("building API client for {}", self.api_url))
    }
}
