//! In-memory backend speaking the same REST surface as the real monitoring
//! service. Used by `scanwatch serve-demo` and the HTTP integration tests.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use ipnet::IpNet;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::types::{
    AwsAccount, AwsAccountRequest, ChangeEvent, ChangeType, NewTarget, Notification, PortStatus,
    ScanResult, ScanSession, ScanStatus, SyncSummary, Target, TriggerScanResponse, UnreadCount,
};

/// Public addresses the fake EC2 inventory reports on every sync.
pub const DEMO_AWS_INVENTORY: &[&str] = &["3.120.10.4", "3.120.10.5", "18.194.7.22"];

/// Ports every simulated scan probes.
pub const DEMO_PORTS: &[u16] = &[22, 80, 443, 3389, 8080];

const MAX_NOTIFICATIONS: usize = 100;
const MAX_CHANGES: usize = 200;
const MAX_SUBNET_HOSTS: usize = 4;

#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// When set, every `/api/v1` request needs `Authorization: Bearer <token>`.
    pub require_token: Option<String>,
    /// Start with a few targets, results, changes and notifications.
    pub seed: bool,
    /// How long a triggered scan keeps `scanning` true.
    pub scan_duration: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            require_token: None,
            seed: true,
            scan_duration: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct DemoState {
    inner: Arc<RwLock<DemoData>>,
    token: Option<Arc<str>>,
    scan_duration: Duration,
}

#[derive(Debug, Default)]
struct DemoData {
    next_id: i64,
    targets: Vec<Target>,
    /// Latest observation per (ip, port).
    results: BTreeMap<(String, u16), ScanResult>,
    /// Newest first.
    changes: Vec<ChangeEvent>,
    /// Newest first.
    notifications: Vec<Notification>,
    /// The secret is checked on save and then dropped; the demo never needs it.
    accounts: Vec<AwsAccount>,
    sessions: Vec<ScanSession>,
    scanning: bool,
}

impl DemoData {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_target(&mut self, address: &str, description: &str, now: OffsetDateTime) -> Target {
        let t = Target {
            id: self.id(),
            address: address.to_string(),
            description: description.to_string(),
            enabled: true,
            created_at: now,
            updated_at: Some(now),
        };
        self.targets.push(t.clone());
        t
    }

    fn notify(&mut self, kind: &str, title: String, message: String, severity: &str, ip: &str, port: u16, now: OffsetDateTime) {
        let n = Notification {
            id: self.id(),
            kind: Some(kind.to_string()),
            title,
            message,
            severity: severity.to_string(),
            ip_address: Some(ip.to_string()),
            port: Some(port),
            is_read: false,
            created_at: now,
        };
        self.notifications.insert(0, n);
        self.notifications.truncate(MAX_NOTIFICATIONS);
    }

    fn seeded(now: OffsetDateTime) -> Self {
        let mut d = DemoData::default();
        let hour = time::Duration::hours(1);
        d.add_target("192.168.1.10", "web server", now - hour * 30);
        d.add_target("10.0.0.0/30", "lab subnet", now - hour * 26);
        let observed = [
            ("192.168.1.10", 22, PortStatus::Open, 3),
            ("192.168.1.10", 80, PortStatus::Open, 3),
            ("192.168.1.10", 443, PortStatus::Closed, 3),
            ("10.0.0.1", 22, PortStatus::Open, 1),
            ("10.0.0.2", 3389, PortStatus::Open, 1),
            ("10.0.0.2", 8080, PortStatus::Closed, 1),
        ];
        for (ip, port, status, hours_ago) in observed {
            let at = now - hour * hours_ago;
            d.results.insert(
                (ip.to_string(), port),
                ScanResult {
                    id: Some(d.next_id + 1),
                    target_id: None,
                    ip_address: ip.to_string(),
                    port,
                    status,
                    response_time_ms: u64::from(port % 40) + 2,
                    scanned_at: at,
                    first_discovered_at: (status == PortStatus::Open).then_some(at - hour * 24),
                    target_description: None,
                },
            );
            d.next_id += 1;
        }
        d.changes = vec![
            change("10.0.0.2", 3389, ChangeType::Opened, None, now - hour),
            change("192.168.1.10", 443, ChangeType::Closed, Some("web server"), now - hour * 3),
            change("10.0.0.1", 22, ChangeType::Opened, Some("lab subnet"), now - hour * 50),
        ];
        d.notify(
            "port_change",
            "Port closed".into(),
            "Port 443 closed on 192.168.1.10".into(),
            "info",
            "192.168.1.10",
            443,
            now - hour * 3,
        );
        d.notify(
            "port_change",
            "New open port detected".into(),
            "Port 3389 opened on 10.0.0.2".into(),
            "critical",
            "10.0.0.2",
            3389,
            now - hour,
        );
        if let Some(n) = d.notifications.last_mut() {
            n.is_read = true;
        }
        d
    }

    /// Fake one scan pass over every enabled target and record transitions.
    fn simulate_scan(&mut self, session_id: i64, now: OffsetDateTime) -> (u64, u64) {
        let hosts: Vec<(String, String)> = self
            .targets
            .iter()
            .filter(|t| t.enabled)
            .flat_map(|t| expand_hosts(&t.address).into_iter().map(move |ip| (ip, t.description.clone())))
            .collect();
        let mut ports_scanned = 0;
        for (ip, description) in &hosts {
            for &port in DEMO_PORTS {
                ports_scanned += 1;
                let status = if probe(ip, port, session_id) {
                    PortStatus::Open
                } else {
                    PortStatus::Closed
                };
                let key = (ip.clone(), port);
                let previous = self.results.get(&key).cloned();
                let first_discovered_at = match (&previous, status) {
                    (Some(p), PortStatus::Open) if p.status == PortStatus::Open => p.first_discovered_at,
                    (_, PortStatus::Open) => Some(now),
                    _ => None,
                };
                if let Some(p) = &previous {
                    if p.status != status {
                        let ct = match status {
                            PortStatus::Open => ChangeType::Opened,
                            PortStatus::Closed => ChangeType::Closed,
                        };
                        let desc = (!description.is_empty()).then_some(description.as_str());
                        self.changes.insert(0, change(ip, port, ct, desc, now));
                        let (title, severity) = match ct {
                            ChangeType::Opened => ("New open port detected", "warning"),
                            ChangeType::Closed => ("Port closed", "info"),
                        };
                        self.notify("port_change", title.into(), format!("Port {port} {ct} on {ip}"), severity, ip, port, now);
                    }
                }
                let id = self.id();
                self.results.insert(
                    key,
                    ScanResult {
                        id: Some(id),
                        target_id: None,
                        ip_address: ip.clone(),
                        port,
                        status,
                        response_time_ms: u64::from(port % 40) + 2,
                        scanned_at: now,
                        first_discovered_at,
                        target_description: (!description.is_empty()).then(|| description.clone()),
                    },
                );
            }
        }
        self.changes.truncate(MAX_CHANGES);
        (hosts.len() as u64, ports_scanned)
    }
}

fn change(ip: &str, port: u16, ct: ChangeType, desc: Option<&str>, at: OffsetDateTime) -> ChangeEvent {
    let (previous_status, new_status) = match ct {
        ChangeType::Opened => ("closed", "open"),
        ChangeType::Closed => ("open", "closed"),
    };
    ChangeEvent {
        ip_address: ip.to_string(),
        port,
        change_type: ct,
        previous_status: previous_status.into(),
        new_status: new_status.into(),
        target_description: desc.map(str::to_string),
        detected_at: at,
    }
}

/// Hosts a target stands for; subnets are capped to their first few hosts.
fn expand_hosts(address: &str) -> Vec<String> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return vec![ip.to_string()];
    }
    match address.parse::<IpNet>() {
        Ok(net) => net.hosts().take(MAX_SUBNET_HOSTS).map(|ip| ip.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Deterministic stand-in for a TCP connect.
fn probe(ip: &str, port: u16, session_id: i64) -> bool {
    let h = ip.bytes().fold(u64::from(port), |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    (h + session_id as u64) % 3 != 0
}

fn is_valid_target(s: &str) -> bool {
    s.parse::<IpAddr>().is_ok() || s.parse::<IpNet>().is_ok()
}

struct Reject(StatusCode, String);

impl Reject {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self(status, msg.into())
    }

    fn bad_body(_: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid request body")
    }
}

impl IntoResponse for Reject {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

type Reply<T> = Result<T, Reject>;

impl DemoState {
    pub fn new(opts: DemoOptions) -> Self {
        let data = if opts.seed {
            DemoData::seeded(OffsetDateTime::now_utc())
        } else {
            DemoData::default()
        };
        Self {
            inner: Arc::new(RwLock::new(data)),
            token: opts.require_token.filter(|t| !t.trim().is_empty()).map(Arc::from),
            scan_duration: opts.scan_duration,
        }
    }
}

pub fn router(state: DemoState) -> Router {
    let api = Router::new()
        .route("/targets", get(list_targets).post(create_target))
        .route("/targets/{id}", delete(delete_target))
        .route("/targets/{id}/toggle", put(toggle_target))
        .route("/results/latest", get(latest_results))
        .route("/results/open", get(open_results))
        .route("/results/ip", get(results_for_ip))
        .route("/results/sessions", get(scan_sessions))
        .route("/results/changes", get(change_history))
        .route("/aws/credentials", get(list_accounts).post(create_account))
        .route("/aws/credentials/{id}", put(update_account).delete(delete_account))
        .route("/aws/sync", post(sync_aws))
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread/count", get(unread_count))
        .route("/notifications/read-all", put(mark_all_read))
        .route("/notifications/read", delete(delete_read))
        .route("/notifications/{id}/read", put(mark_read))
        .route("/notifications/{id}", delete(delete_notification))
        .route("/scan/status", get(scan_status))
        .route("/scan/trigger", post(trigger_scan))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .with_state(state);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
}

/// Bind, spawn the server in the background and return the bound address.
pub async fn spawn_demo(bind: &str, opts: DemoOptions) -> Result<SocketAddr> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding demo backend to {bind}"))?;
    let addr = listener.local_addr()?;
    let app = router(DemoState::new(opts));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "demo backend stopped");
        }
    });
    info!(%addr, "demo backend listening");
    Ok(addr)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve_demo(bind: &str, opts: DemoOptions, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding demo backend to {bind}"))?;
    info!(addr = %listener.local_addr()?, "demo backend listening");
    axum::serve(listener, router(DemoState::new(opts)))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn require_bearer(State(app): State<DemoState>, req: Request, next: Next) -> Response {
    let Some(expected) = app.token.as_deref() else {
        return next.run(req).await;
    };
    let verdict = match req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        None => Err("Authorization header required"),
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(tok) if tok == expected => Ok(()),
            Some(_) => Err("Invalid token"),
            None => Err("Invalid authorization header format"),
        },
    };
    match verdict {
        Ok(()) => next.run(req).await,
        Err(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
    }
}

async fn list_targets(State(app): State<DemoState>) -> Json<Vec<Target>> {
    let d = app.inner.read().await;
    let mut out = d.targets.clone();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Json(out)
}

async fn create_target(
    State(app): State<DemoState>,
    body: Result<Json<NewTarget>, JsonRejection>,
) -> Reply<(StatusCode, Json<Target>)> {
    let Json(req) = body.map_err(Reject::bad_body)?;
    let address = req.target.trim();
    if !is_valid_target(address) {
        return Err(Reject::new(StatusCode::BAD_REQUEST, "Invalid IP address or CIDR notation"));
    }
    let mut d = app.inner.write().await;
    if d.targets.iter().any(|t| t.address == address) {
        return Err(Reject::new(StatusCode::CONFLICT, "Target already exists"));
    }
    let t = d.add_target(address, req.description.trim(), OffsetDateTime::now_utc());
    info!(id = t.id, target = %t.address, "demo: target created");
    Ok((StatusCode::CREATED, Json(t)))
}

async fn delete_target(State(app): State<DemoState>, Path(id): Path<i64>) -> Reply<StatusCode> {
    let mut d = app.inner.write().await;
    let before = d.targets.len();
    d.targets.retain(|t| t.id != id);
    if d.targets.len() == before {
        return Err(Reject::new(StatusCode::NOT_FOUND, "Target not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_target(State(app): State<DemoState>, Path(id): Path<i64>) -> Reply<Json<Target>> {
    let mut d = app.inner.write().await;
    let t = d
        .targets
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| Reject::new(StatusCode::NOT_FOUND, "Target not found"))?;
    t.enabled = !t.enabled;
    t.updated_at = Some(OffsetDateTime::now_utc());
    Ok(Json(t.clone()))
}

async fn latest_results(State(app): State<DemoState>) -> Json<Vec<ScanResult>> {
    Json(app.inner.read().await.results.values().cloned().collect())
}

async fn open_results(State(app): State<DemoState>) -> Json<Vec<ScanResult>> {
    let d = app.inner.read().await;
    Json(
        d.results
            .values()
            .filter(|r| r.status == PortStatus::Open)
            .cloned()
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
struct IpQuery {
    ip: Option<String>,
}

async fn results_for_ip(State(app): State<DemoState>, Query(q): Query<IpQuery>) -> Reply<Json<Vec<ScanResult>>> {
    let ip = q.ip.unwrap_or_default();
    let ip = ip.trim();
    if ip.is_empty() {
        return Err(Reject::new(StatusCode::BAD_REQUEST, "IP address is required"));
    }
    let d = app.inner.read().await;
    Ok(Json(d.results.values().filter(|r| r.ip_address == ip).cloned().collect()))
}

async fn scan_sessions(State(app): State<DemoState>) -> Json<Vec<ScanSession>> {
    let d = app.inner.read().await;
    Json(d.sessions.iter().rev().cloned().collect())
}

async fn change_history(State(app): State<DemoState>) -> Json<Vec<ChangeEvent>> {
    let d = app.inner.read().await;
    Json(d.changes.iter().take(MAX_CHANGES).cloned().collect())
}

async fn list_accounts(State(app): State<DemoState>) -> Json<Vec<AwsAccount>> {
    Json(app.inner.read().await.accounts.clone())
}

fn check_account(req: &AwsAccountRequest) -> Reply<()> {
    if req.account_name.trim().is_empty() {
        return Err(Reject::new(StatusCode::BAD_REQUEST, "Account name is required"));
    }
    if req.access_key_id.trim().is_empty() || req.secret_access_key.is_empty() {
        return Err(Reject::new(
            StatusCode::BAD_REQUEST,
            "Access key ID and secret access key are required",
        ));
    }
    Ok(())
}

async fn create_account(
    State(app): State<DemoState>,
    body: Result<Json<AwsAccountRequest>, JsonRejection>,
) -> Reply<Json<AwsAccount>> {
    let Json(req) = body.map_err(Reject::bad_body)?;
    check_account(&req)?;
    let mut d = app.inner.write().await;
    if d.accounts.iter().any(|a| a.account_name == req.account_name) {
        return Err(Reject::new(StatusCode::CONFLICT, "An account with this name already exists"));
    }
    let now = OffsetDateTime::now_utc();
    let acct = AwsAccount {
        id: d.id(),
        account_name: req.account_name,
        access_key_id: req.access_key_id,
        region: req.region,
        created_at: Some(now),
        updated_at: Some(now),
    };
    d.accounts.push(acct.clone());
    info!(id = acct.id, account = %acct.account_name, "demo: aws account saved");
    Ok(Json(acct))
}

async fn update_account(
    State(app): State<DemoState>,
    Path(id): Path<i64>,
    body: Result<Json<AwsAccountRequest>, JsonRejection>,
) -> Reply<Json<AwsAccount>> {
    let Json(req) = body.map_err(Reject::bad_body)?;
    check_account(&req)?;
    let mut d = app.inner.write().await;
    if d.accounts.iter().any(|a| a.id != id && a.account_name == req.account_name) {
        return Err(Reject::new(StatusCode::CONFLICT, "An account with this name already exists"));
    }
    let acct = d
        .accounts
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| Reject::new(StatusCode::NOT_FOUND, "Account not found"))?;
    acct.account_name = req.account_name;
    acct.access_key_id = req.access_key_id;
    acct.region = req.region;
    acct.updated_at = Some(OffsetDateTime::now_utc());
    Ok(Json(acct.clone()))
}

async fn delete_account(State(app): State<DemoState>, Path(id): Path<i64>) -> Reply<StatusCode> {
    let mut d = app.inner.write().await;
    let before = d.accounts.len();
    d.accounts.retain(|a| a.id != id);
    if d.accounts.len() == before {
        return Err(Reject::new(StatusCode::NOT_FOUND, "Account not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_aws(State(app): State<DemoState>) -> Reply<Json<SyncSummary>> {
    let mut d = app.inner.write().await;
    let Some(account) = d.accounts.first().map(|a| a.account_name.clone()) else {
        return Err(Reject::new(
            StatusCode::BAD_REQUEST,
            "No AWS credentials configured. Please configure credentials first.",
        ));
    };
    let now = OffsetDateTime::now_utc();
    let description = format!("Auto-imported from AWS EC2 ({account})");
    let mut summary = SyncSummary::default();
    for ip in DEMO_AWS_INVENTORY {
        if d.targets.iter().any(|t| t.address == *ip) {
            summary.skipped += 1;
        } else {
            d.add_target(ip, &description, now);
            summary.added += 1;
        }
    }
    info!(added = summary.added, skipped = summary.skipped, "demo: aws sync");
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct NotificationQuery {
    unread_only: Option<String>,
}

async fn list_notifications(
    State(app): State<DemoState>,
    Query(q): Query<NotificationQuery>,
) -> Json<Vec<Notification>> {
    let unread_only = q.unread_only.as_deref() == Some("true");
    let d = app.inner.read().await;
    Json(
        d.notifications
            .iter()
            .filter(|n| !unread_only || !n.is_read)
            .take(MAX_NOTIFICATIONS)
            .cloned()
            .collect(),
    )
}

async fn unread_count(State(app): State<DemoState>) -> Json<UnreadCount> {
    let d = app.inner.read().await;
    let count = d.notifications.iter().filter(|n| !n.is_read).count() as u64;
    Json(UnreadCount { count })
}

async fn mark_read(State(app): State<DemoState>, Path(id): Path<i64>) -> Reply<StatusCode> {
    let mut d = app.inner.write().await;
    let n = d
        .notifications
        .iter_mut()
        .find(|n| n.id == id)
        .ok_or_else(|| Reject::new(StatusCode::NOT_FOUND, "Notification not found"))?;
    n.is_read = true;
    Ok(StatusCode::OK)
}

async fn mark_all_read(State(app): State<DemoState>) -> StatusCode {
    let mut d = app.inner.write().await;
    d.notifications.iter_mut().for_each(|n| n.is_read = true);
    StatusCode::OK
}

async fn delete_notification(State(app): State<DemoState>, Path(id): Path<i64>) -> Reply<StatusCode> {
    let mut d = app.inner.write().await;
    let before = d.notifications.len();
    d.notifications.retain(|n| n.id != id);
    if d.notifications.len() == before {
        return Err(Reject::new(StatusCode::NOT_FOUND, "Notification not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_read(State(app): State<DemoState>) -> StatusCode {
    app.inner.write().await.notifications.retain(|n| !n.is_read);
    StatusCode::NO_CONTENT
}

async fn scan_status(State(app): State<DemoState>) -> Json<ScanStatus> {
    Json(ScanStatus {
        scanning: app.inner.read().await.scanning,
    })
}

async fn trigger_scan(State(app): State<DemoState>) -> (StatusCode, Json<TriggerScanResponse>) {
    let session_id = {
        let mut d = app.inner.write().await;
        if d.scanning {
            return (
                StatusCode::CONFLICT,
                Json(TriggerScanResponse {
                    success: false,
                    message: "Scan already in progress or queued".into(),
                }),
            );
        }
        d.scanning = true;
        let id = d.id();
        d.sessions.push(ScanSession {
            id,
            started_at: OffsetDateTime::now_utc(),
            completed_at: None,
            targets_scanned: 0,
            ports_scanned: 0,
            status: "running".into(),
        });
        id
    };

    let app2 = app.clone();
    tokio::spawn(async move {
        tokio::time::sleep(app2.scan_duration).await;
        let mut d = app2.inner.write().await;
        let now = OffsetDateTime::now_utc();
        let (targets, ports) = d.simulate_scan(session_id, now);
        if let Some(s) = d.sessions.iter_mut().find(|s| s.id == session_id) {
            s.completed_at = Some(now);
            s.targets_scanned = targets;
            s.ports_scanned = ports;
            s.status = "completed".into();
        }
        d.scanning = false;
        info!(session_id, targets, ports, "demo: scan completed");
    });

    (
        StatusCode::OK,
        Json(TriggerScanResponse {
            success: true,
            message: "Scan triggered successfully".into(),
        }),
    )
}
