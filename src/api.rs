//! Remote data gateway: the typed REST surface of the scanning service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::error::{DashError, DashResult, Operation};
use crate::types::{
    AwsAccount, AwsAccountRequest, ChangeEvent, NewTarget, Notification, ScanResult, ScanSession,
    ScanStatus, SyncSummary, Target, TriggerScanResponse, UnreadCount,
};

/// One method per resource-verb pair of the scanning service.
///
/// Implementations never retry; retry policy belongs to the caller.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn list_targets(&self) -> DashResult<Vec<Target>>;
    async fn create_target(&self, req: &NewTarget) -> DashResult<Target>;
    async fn delete_target(&self, id: i64) -> DashResult<()>;
    async fn toggle_target(&self, id: i64) -> DashResult<Target>;

    async fn latest_results(&self) -> DashResult<Vec<ScanResult>>;
    async fn open_results(&self) -> DashResult<Vec<ScanResult>>;
    async fn results_for_ip(&self, ip: &str) -> DashResult<Vec<ScanResult>>;
    async fn scan_sessions(&self) -> DashResult<Vec<ScanSession>>;
    async fn change_history(&self) -> DashResult<Vec<ChangeEvent>>;

    async fn list_aws_accounts(&self) -> DashResult<Vec<AwsAccount>>;
    async fn create_aws_account(&self, req: &AwsAccountRequest) -> DashResult<AwsAccount>;
    async fn update_aws_account(&self, id: i64, req: &AwsAccountRequest) -> DashResult<AwsAccount>;
    async fn delete_aws_account(&self, id: i64) -> DashResult<()>;
    async fn sync_aws(&self) -> DashResult<SyncSummary>;

    async fn notifications(&self, unread_only: bool) -> DashResult<Vec<Notification>>;
    async fn unread_count(&self) -> DashResult<u64>;
    async fn mark_read(&self, id: i64) -> DashResult<()>;
    async fn mark_all_read(&self) -> DashResult<()>;
    async fn delete_notification(&self, id: i64) -> DashResult<()>;
    async fn delete_read_notifications(&self) -> DashResult<()>;

    async fn scan_status(&self) -> DashResult<ScanStatus>;
    async fn trigger_scan(&self) -> DashResult<TriggerScanResponse>;
}

/// [`DashboardApi`] over HTTP/JSON.
#[derive(Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    base: String,
    auth: Arc<dyn TokenProvider>,
}

impl HttpGateway {
    /// `base` is the versioned prefix, e.g. `http://localhost:8080/api/v1`.
    /// `timeout` bounds every request so a poll can never hang a feed.
    pub fn new(
        base: impl Into<String>,
        auth: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(http, base, auth))
    }

    pub fn with_client(
        http: reqwest::Client,
        base: impl Into<String>,
        auth: Arc<dyn TokenProvider>,
    ) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { http, base, auth }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    async fn send(
        &self,
        op: Operation,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> DashResult<reqwest::Response> {
        let url = format!("{}{}", self.base, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header(header::CONTENT_TYPE, "application/json");
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = self.auth.token().await {
            req = req.bearer_auth(token);
        }
        if let Some(bytes) = body {
            req = req.body(bytes);
        }

        let t0 = Instant::now();
        let resp = req.send().await.map_err(|e| {
            warn!(op = %op, %method, path, error = %e, "api: request failed");
            DashError::Network {
                operation: op,
                message: e.to_string(),
            }
        })?;
        let status = resp.status();
        debug!(op = %op, %method, path, status = status.as_u16(), took_ms = %t0.elapsed().as_millis(), "api: response");
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(DashError::Request {
            operation: op,
            status: status.as_u16(),
            message: error_message(op, status, &body),
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        op: Operation,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> DashResult<T> {
        let resp = self.send(op, method, path, query, body).await?;
        let bytes = resp.bytes().await.map_err(|e| DashError::Network {
            operation: op,
            message: e.to_string(),
        })?;
        decode_body(op, &bytes)
    }

    async fn list<T: DeserializeOwned>(&self, op: Operation, path: &str, query: &[(&str, &str)]) -> DashResult<Vec<T>> {
        // The server encodes an empty collection as `null` on some endpoints.
        let items: Option<Vec<T>> = self.json(op, Method::GET, path, query, None).await?;
        Ok(items.unwrap_or_default())
    }

    async fn unit(&self, op: Operation, method: Method, path: &str) -> DashResult<()> {
        self.send(op, method, path, &[], None).await.map(|_| ())
    }
}

/// Pick the most useful message out of a failed response body.
fn error_message(op: Operation, status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return op.default_message().to_string();
    }
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["message", "error"] {
            if let Some(m) = v.get(key).and_then(|m| m.as_str()) {
                if !m.trim().is_empty() {
                    return m.trim().to_string();
                }
            }
        }
    }
    if trimmed.len() > 512 {
        debug!(op = %op, status = status.as_u16(), "api: truncating long error body");
        let mut cut = 512;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        return trimmed[..cut].to_string();
    }
    trimmed.to_string()
}

fn decode_body<T: DeserializeOwned>(op: Operation, bytes: &[u8]) -> DashResult<T> {
    serde_json::from_slice(bytes).map_err(|e| DashError::Decode {
        operation: op,
        message: e.to_string(),
    })
}

fn encode<T: Serialize>(op: Operation, v: &T) -> DashResult<Option<Vec<u8>>> {
    serde_json::to_vec(v).map(Some).map_err(|e| DashError::Decode {
        operation: op,
        message: format!("could not encode request body: {e}"),
    })
}

#[async_trait]
impl DashboardApi for HttpGateway {
    async fn list_targets(&self) -> DashResult<Vec<Target>> {
        self.list(Operation::ListTargets, "/targets", &[]).await
    }

    async fn create_target(&self, req: &NewTarget) -> DashResult<Target> {
        let payload = encode(Operation::CreateTarget, req)?;
        self.json(Operation::CreateTarget, Method::POST, "/targets", &[], payload)
            .await
    }

    async fn delete_target(&self, id: i64) -> DashResult<()> {
        self.unit(Operation::DeleteTarget, Method::DELETE, &format!("/targets/{id}"))
            .await
    }

    async fn toggle_target(&self, id: i64) -> DashResult<Target> {
        self.json(Operation::ToggleTarget, Method::PUT, &format!("/targets/{id}/toggle"), &[], None)
            .await
    }

    async fn latest_results(&self) -> DashResult<Vec<ScanResult>> {
        self.list(Operation::LatestResults, "/results/latest", &[]).await
    }

    async fn open_results(&self) -> DashResult<Vec<ScanResult>> {
        self.list(Operation::OpenResults, "/results/open", &[]).await
    }

    async fn results_for_ip(&self, ip: &str) -> DashResult<Vec<ScanResult>> {
        self.list(Operation::ResultsForIp, "/results/ip", &[("ip", ip)]).await
    }

    async fn scan_sessions(&self) -> DashResult<Vec<ScanSession>> {
        self.list(Operation::ScanSessions, "/results/sessions", &[]).await
    }

    async fn change_history(&self) -> DashResult<Vec<ChangeEvent>> {
        self.list(Operation::ChangeHistory, "/results/changes", &[]).await
    }

    async fn list_aws_accounts(&self) -> DashResult<Vec<AwsAccount>> {
        self.list(Operation::ListAwsAccounts, "/aws/credentials", &[]).await
    }

    async fn create_aws_account(&self, req: &AwsAccountRequest) -> DashResult<AwsAccount> {
        let payload = encode(Operation::CreateAwsAccount, req)?;
        self.json(Operation::CreateAwsAccount, Method::POST, "/aws/credentials", &[], payload)
            .await
    }

    async fn update_aws_account(&self, id: i64, req: &AwsAccountRequest) -> DashResult<AwsAccount> {
        let payload = encode(Operation::UpdateAwsAccount, req)?;
        self.json(
            Operation::UpdateAwsAccount,
            Method::PUT,
            &format!("/aws/credentials/{id}"),
            &[],
            payload,
        )
        .await
    }

    async fn delete_aws_account(&self, id: i64) -> DashResult<()> {
        self.unit(Operation::DeleteAwsAccount, Method::DELETE, &format!("/aws/credentials/{id}"))
            .await
    }

    async fn sync_aws(&self) -> DashResult<SyncSummary> {
        self.json(Operation::SyncAws, Method::POST, "/aws/sync", &[], None)
            .await
    }

    async fn notifications(&self, unread_only: bool) -> DashResult<Vec<Notification>> {
        let flag = if unread_only { "true" } else { "false" };
        self.list(Operation::ListNotifications, "/notifications", &[("unread_only", flag)])
            .await
    }

    async fn unread_count(&self) -> DashResult<u64> {
        let c: UnreadCount = self
            .json(Operation::UnreadCount, Method::GET, "/notifications/unread/count", &[], None)
            .await?;
        Ok(c.count)
    }

    async fn mark_read(&self, id: i64) -> DashResult<()> {
        self.unit(Operation::MarkRead, Method::PUT, &format!("/notifications/{id}/read"))
            .await
    }

    async fn mark_all_read(&self) -> DashResult<()> {
        self.unit(Operation::MarkAllRead, Method::PUT, "/notifications/read-all")
            .await
    }

    async fn delete_notification(&self, id: i64) -> DashResult<()> {
        self.unit(Operation::DeleteNotification, Method::DELETE, &format!("/notifications/{id}"))
            .await
    }

    async fn delete_read_notifications(&self) -> DashResult<()> {
        self.unit(Operation::DeleteReadNotifications, Method::DELETE, "/notifications/read")
            .await
    }

    async fn scan_status(&self) -> DashResult<ScanStatus> {
        self.json(Operation::ScanStatus, Method::GET, "/scan/status", &[], None)
            .await
    }

    async fn trigger_scan(&self) -> DashResult<TriggerScanResponse> {
        self.json(Operation::TriggerScan, Method::POST, "/scan/trigger", &[], None)
            .await
    }
}
