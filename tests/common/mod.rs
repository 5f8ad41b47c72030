#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use scanwatch::api::DashboardApi;
use scanwatch::error::{DashError, DashResult, Operation};
use scanwatch::types::*;
use time::macros::datetime;
use time::OffsetDateTime;

pub const T0: OffsetDateTime = datetime!(2026-10-19 12:00:00 UTC);

pub fn result(ip: &str, port: u16, status: PortStatus) -> ScanResult {
    ScanResult {
        id: None,
        target_id: None,
        ip_address: ip.into(),
        port,
        status,
        response_time_ms: 3,
        scanned_at: T0,
        first_discovered_at: None,
        target_description: None,
    }
}

pub fn change(ip: &str, port: u16, ct: ChangeType) -> ChangeEvent {
    ChangeEvent {
        ip_address: ip.into(),
        port,
        change_type: ct,
        previous_status: "closed".into(),
        new_status: "open".into(),
        target_description: None,
        detected_at: T0,
    }
}

pub fn notification(id: i64, read: bool) -> Notification {
    Notification {
        id,
        kind: Some("port_change".into()),
        title: format!("notification {id}"),
        message: String::new(),
        severity: "warning".into(),
        ip_address: None,
        port: None,
        is_read: read,
        created_at: T0,
    }
}

#[derive(Debug, Default)]
pub struct MockData {
    pub next_id: i64,
    pub targets: Vec<Target>,
    pub results: Vec<ScanResult>,
    pub changes: Vec<ChangeEvent>,
    pub notifications: Vec<Notification>,
    pub accounts: Vec<AwsAccount>,
    pub sync: SyncSummary,
}

/// In-memory [`DashboardApi`] with call counters, an artificial fetch
/// delay and a failure switch.
#[derive(Default)]
pub struct MockApi {
    pub data: Mutex<MockData>,
    calls: Mutex<HashMap<Operation, usize>>,
    delay: Mutex<Duration>,
    fail: AtomicBool,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two hosts, three open ports, one closed; three changes; three
    /// notifications with one already read.
    pub fn seeded() -> Self {
        let api = Self::new();
        {
            let mut d = api.data.lock().unwrap();
            d.results = vec![
                result("10.0.0.1", 22, PortStatus::Open),
                result("10.0.0.1", 80, PortStatus::Open),
                result("10.0.0.2", 443, PortStatus::Open),
                result("10.0.0.2", 8080, PortStatus::Closed),
            ];
            d.changes = vec![
                change("10.0.0.1", 22, ChangeType::Opened),
                change("10.0.0.2", 8080, ChangeType::Closed),
                change("10.0.0.2", 443, ChangeType::Opened),
            ];
            d.notifications = vec![notification(1, false), notification(2, true), notification(3, false)];
            d.next_id = 100;
        }
        api
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock().unwrap() = d;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    async fn call(&self, op: Operation) -> DashResult<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DashError::Network {
                operation: op,
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    fn not_found(op: Operation) -> DashError {
        DashError::Request {
            operation: op,
            status: 404,
            message: "not found".into(),
        }
    }
}

#[async_trait]
impl DashboardApi for MockApi {
    async fn list_targets(&self) -> DashResult<Vec<Target>> {
        self.call(Operation::ListTargets).await?;
        Ok(self.data.lock().unwrap().targets.clone())
    }

    async fn create_target(&self, req: &NewTarget) -> DashResult<Target> {
        self.call(Operation::CreateTarget).await?;
        let mut d = self.data.lock().unwrap();
        d.next_id += 1;
        let t = Target {
            id: d.next_id,
            address: req.target.clone(),
            description: req.description.clone(),
            enabled: true,
            created_at: T0,
            updated_at: None,
        };
        d.targets.push(t.clone());
        Ok(t)
    }

    async fn delete_target(&self, id: i64) -> DashResult<()> {
        self.call(Operation::DeleteTarget).await?;
        let mut d = self.data.lock().unwrap();
        let before = d.targets.len();
        d.targets.retain(|t| t.id != id);
        if d.targets.len() == before {
            return Err(Self::not_found(Operation::DeleteTarget));
        }
        Ok(())
    }

    async fn toggle_target(&self, id: i64) -> DashResult<Target> {
        self.call(Operation::ToggleTarget).await?;
        let mut d = self.data.lock().unwrap();
        let t = d
            .targets
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Self::not_found(Operation::ToggleTarget))?;
        t.enabled = !t.enabled;
        Ok(t.clone())
    }

    async fn latest_results(&self) -> DashResult<Vec<ScanResult>> {
        self.call(Operation::LatestResults).await?;
        Ok(self.data.lock().unwrap().results.clone())
    }

    async fn open_results(&self) -> DashResult<Vec<ScanResult>> {
        self.call(Operation::OpenResults).await?;
        let d = self.data.lock().unwrap();
        Ok(d.results
            .iter()
            .filter(|r| r.status == PortStatus::Open)
            .cloned()
            .collect())
    }

    async fn results_for_ip(&self, ip: &str) -> DashResult<Vec<ScanResult>> {
        self.call(Operation::ResultsForIp).await?;
        let d = self.data.lock().unwrap();
        Ok(d.results.iter().filter(|r| r.ip_address == ip).cloned().collect())
    }

    async fn scan_sessions(&self) -> DashResult<Vec<ScanSession>> {
        self.call(Operation::ScanSessions).await?;
        Ok(Vec::new())
    }

    async fn change_history(&self) -> DashResult<Vec<ChangeEvent>> {
        self.call(Operation::ChangeHistory).await?;
        Ok(self.data.lock().unwrap().changes.clone())
    }

    async fn list_aws_accounts(&self) -> DashResult<Vec<AwsAccount>> {
        self.call(Operation::ListAwsAccounts).await?;
        Ok(self.data.lock().unwrap().accounts.clone())
    }

    async fn create_aws_account(&self, req: &AwsAccountRequest) -> DashResult<AwsAccount> {
        self.call(Operation::CreateAwsAccount).await?;
        let mut d = self.data.lock().unwrap();
        d.next_id += 1;
        let a = AwsAccount {
            id: d.next_id,
            account_name: req.account_name.clone(),
            access_key_id: req.access_key_id.clone(),
            region: req.region.clone(),
            created_at: Some(T0),
            updated_at: None,
        };
        d.accounts.push(a.clone());
        Ok(a)
    }

    async fn update_aws_account(&self, id: i64, req: &AwsAccountRequest) -> DashResult<AwsAccount> {
        self.call(Operation::UpdateAwsAccount).await?;
        let mut d = self.data.lock().unwrap();
        let a = d
            .accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Self::not_found(Operation::UpdateAwsAccount))?;
        a.account_name = req.account_name.clone();
        a.access_key_id = req.access_key_id.clone();
        a.region = req.region.clone();
        Ok(a.clone())
    }

    async fn delete_aws_account(&self, id: i64) -> DashResult<()> {
        self.call(Operation::DeleteAwsAccount).await?;
        self.data.lock().unwrap().accounts.retain(|a| a.id != id);
        Ok(())
    }

    async fn sync_aws(&self) -> DashResult<SyncSummary> {
        self.call(Operation::SyncAws).await?;
        Ok(self.data.lock().unwrap().sync)
    }

    async fn notifications(&self, unread_only: bool) -> DashResult<Vec<Notification>> {
        self.call(Operation::ListNotifications).await?;
        let d = self.data.lock().unwrap();
        Ok(d.notifications
            .iter()
            .filter(|n| !unread_only || !n.is_read)
            .cloned()
            .collect())
    }

    async fn unread_count(&self) -> DashResult<u64> {
        self.call(Operation::UnreadCount).await?;
        let d = self.data.lock().unwrap();
        Ok(d.notifications.iter().filter(|n| !n.is_read).count() as u64)
    }

    async fn mark_read(&self, id: i64) -> DashResult<()> {
        self.call(Operation::MarkRead).await?;
        let mut d = self.data.lock().unwrap();
        let n = d
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| Self::not_found(Operation::MarkRead))?;
        n.is_read = true;
        Ok(())
    }

    async fn mark_all_read(&self) -> DashResult<()> {
        self.call(Operation::MarkAllRead).await?;
        let mut d = self.data.lock().unwrap();
        d.notifications.iter_mut().for_each(|n| n.is_read = true);
        Ok(())
    }

    async fn delete_notification(&self, id: i64) -> DashResult<()> {
        self.call(Operation::DeleteNotification).await?;
        self.data.lock().unwrap().notifications.retain(|n| n.id != id);
        Ok(())
    }

    async fn delete_read_notifications(&self) -> DashResult<()> {
        self.call(Operation::DeleteReadNotifications).await?;
        self.data.lock().unwrap().notifications.retain(|n| !n.is_read);
        Ok(())
    }

    async fn scan_status(&self) -> DashResult<ScanStatus> {
        self.call(Operation::ScanStatus).await?;
        Ok(ScanStatus { scanning: false })
    }

    async fn trigger_scan(&self) -> DashResult<TriggerScanResponse> {
        self.call(Operation::TriggerScan).await?;
        Ok(TriggerScanResponse {
            success: true,
            message: "Scan triggered successfully".into(),
        })
    }
}
