//! The dashboard session: open feeds, view controls, and the commands a
//! front end issues against the backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use time::UtcOffset;
use tracing::info;

use crate::api::DashboardApi;
use crate::error::DashResult;
use crate::feed::{Feed, FeedData, FeedKind, NotificationFilter, ResultsMode};
use crate::forms::{validate_target, AwsAccountForm};
use crate::grouping::{
    group_records, ChangeTypeFilter, ExpandedSet, GroupBy, Group, Groupable, RecordFilter,
};
use crate::reconcile::{mutate_then_refetch, unread_count, ChangeTally};
use crate::refresher::{FeedRefresher, FeedRegistry, RefreshOutcome, DEFAULT_POLL_INTERVAL};
use crate::types::{AwsAccount, ChangeEvent, ScanResult, SyncSummary, Target, TriggerScanResponse};

/// Poll period per feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub targets: Duration,
    pub results: Duration,
    pub changes: Duration,
    pub notifications: Duration,
}

impl PollIntervals {
    pub fn uniform(period: Duration) -> Self {
        Self {
            targets: period,
            results: period,
            changes: period,
            notifications: period,
        }
    }

    pub fn for_kind(&self, kind: FeedKind) -> Duration {
        match kind {
            FeedKind::Targets => self.targets,
            FeedKind::Results => self.results,
            FeedKind::Changes => self.changes,
            FeedKind::Notifications => self.notifications,
        }
    }
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self::uniform(DEFAULT_POLL_INTERVAL)
    }
}

/// Controls of the scan results view. The mode is part of the feed identity
/// and only changes through [`Dashboard::set_results_mode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsControls {
    mode: ResultsMode,
    pub group_by: GroupBy,
    pub ip_query: String,
    pub expanded: ExpandedSet,
}

impl ResultsControls {
    pub fn mode(&self) -> ResultsMode {
        self.mode
    }

    fn filter(&self) -> RecordFilter {
        RecordFilter {
            change_type: ChangeTypeFilter::All,
            ip_contains: self.ip_query.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeControls {
    pub change_type: ChangeTypeFilter,
    pub group_by: GroupBy,
    pub ip_query: String,
    pub expanded: ExpandedSet,
}

impl ChangeControls {
    fn filter(&self) -> RecordFilter {
        RecordFilter {
            change_type: self.change_type,
            ip_contains: self.ip_query.clone(),
        }
    }
}

/// Group `records` and drop expanded keys that no longer name a group.
fn reconciled_groups<'a, R: Groupable>(
    records: &'a [R],
    by: GroupBy,
    filter: &RecordFilter,
    expanded: &mut ExpandedSet,
    offset: UtcOffset,
) -> Vec<Group<'a, R>> {
    let groups = group_records(records, by, filter, offset);
    expanded.retain_present(&groups);
    groups
}

pub struct Dashboard {
    api: Arc<dyn DashboardApi>,
    feeds: FeedRegistry,
    intervals: PollIntervals,
    offset: UtcOffset,
    results: ResultsControls,
    changes: ChangeControls,
    notification_filter: NotificationFilter,
}

impl Dashboard {
    pub fn new(api: Arc<dyn DashboardApi>, intervals: PollIntervals, offset: UtcOffset) -> Self {
        Self {
            feeds: FeedRegistry::new(api.clone()),
            api,
            intervals,
            offset,
            results: ResultsControls::default(),
            changes: ChangeControls::default(),
            notification_filter: NotificationFilter::default(),
        }
    }

    pub fn api(&self) -> &Arc<dyn DashboardApi> {
        &self.api
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    fn current_feed(&self, kind: FeedKind) -> Feed {
        match kind {
            FeedKind::Targets => Feed::Targets,
            FeedKind::Results => Feed::Results(self.results.mode),
            FeedKind::Changes => Feed::Changes,
            FeedKind::Notifications => Feed::Notifications(self.notification_filter),
        }
    }

    /// Register one feed with its current sub-mode. Does not fetch.
    pub async fn open(&mut self, kind: FeedKind) -> &mut FeedRefresher {
        let feed = self.current_feed(kind);
        let period = self.intervals.for_kind(kind);
        self.feeds.open(feed, period).await
    }

    pub async fn open_all(&mut self) {
        for kind in [
            FeedKind::Targets,
            FeedKind::Results,
            FeedKind::Changes,
            FeedKind::Notifications,
        ] {
            self.open(kind).await;
        }
    }

    pub fn start_polling(&mut self) {
        for kind in self.feeds.kinds() {
            if let Some(r) = self.feeds.get_mut(kind) {
                r.start();
            }
        }
    }

    pub fn stop_polling(&mut self) {
        for kind in self.feeds.kinds() {
            if let Some(r) = self.feeds.get_mut(kind) {
                r.stop();
            }
        }
    }

    pub fn close(&mut self) {
        self.feeds.close_all();
    }

    pub fn feed(&self, kind: FeedKind) -> Option<&FeedRefresher> {
        self.feeds.get(kind)
    }

    pub fn open_kinds(&self) -> Vec<FeedKind> {
        self.feeds.kinds()
    }

    /// Fetch every open feed once and wait for each.
    pub async fn refresh_all(&self) -> Vec<(FeedKind, RefreshOutcome)> {
        let mut out = Vec::new();
        for kind in self.feeds.kinds() {
            if let Some(r) = self.feeds.get(kind) {
                out.push((kind, r.refresh().await));
            }
        }
        out
    }

    pub async fn snapshot(&self, kind: FeedKind) -> Option<Arc<FeedData>> {
        self.feeds.get(kind)?.snapshot().await
    }

    pub fn results_controls(&self) -> &ResultsControls {
        &self.results
    }

    pub fn results_controls_mut(&mut self) -> &mut ResultsControls {
        &mut self.results
    }

    pub fn change_controls(&self) -> &ChangeControls {
        &self.changes
    }

    pub fn change_controls_mut(&mut self) -> &mut ChangeControls {
        &mut self.changes
    }

    pub fn notification_filter(&self) -> NotificationFilter {
        self.notification_filter
    }

    /// Switch the results feed between open ports and all latest records.
    pub async fn set_results_mode(&mut self, mode: ResultsMode) -> bool {
        self.results.mode = mode;
        match self.feeds.get_mut(FeedKind::Results) {
            Some(r) => r.switch(Feed::Results(mode)).await,
            None => false,
        }
    }

    pub async fn set_notification_filter(&mut self, filter: NotificationFilter) -> bool {
        self.notification_filter = filter;
        match self.feeds.get_mut(FeedKind::Notifications) {
            Some(r) => r.switch(Feed::Notifications(filter)).await,
            None => false,
        }
    }

    /// Render the grouped results view. `None` while there is no snapshot.
    pub async fn result_groups<T>(
        &mut self,
        render: impl FnOnce(&[Group<'_, ScanResult>], &ExpandedSet) -> T,
    ) -> Option<T> {
        let snap = self.snapshot(FeedKind::Results).await?;
        let records = snap.results()?;
        let filter = self.results.filter();
        let c = &mut self.results;
        let groups = reconciled_groups(records, c.group_by, &filter, &mut c.expanded, self.offset);
        Some(render(&groups, &c.expanded))
    }

    pub async fn change_groups<T>(
        &mut self,
        render: impl FnOnce(&[Group<'_, ChangeEvent>], &ExpandedSet) -> T,
    ) -> Option<T> {
        let snap = self.snapshot(FeedKind::Changes).await?;
        let records = snap.changes()?;
        let filter = self.changes.filter();
        let c = &mut self.changes;
        let groups = reconciled_groups(records, c.group_by, &filter, &mut c.expanded, self.offset);
        Some(render(&groups, &c.expanded))
    }

    /// Expand every result group currently on screen.
    pub async fn expand_all_results(&mut self) {
        self.result_groups(|g, _| g.iter().map(|g| g.key.clone()).collect::<Vec<_>>())
            .await
            .into_iter()
            .flatten()
            .for_each(|k| self.results.expanded.expand(k));
    }

    pub async fn expand_all_changes(&mut self) {
        self.change_groups(|g, _| g.iter().map(|g| g.key.clone()).collect::<Vec<_>>())
            .await
            .into_iter()
            .flatten()
            .for_each(|k| self.changes.expanded.expand(k));
    }

    pub async fn unread_count(&self) -> Option<usize> {
        let snap = self.snapshot(FeedKind::Notifications).await?;
        snap.notifications().map(unread_count)
    }

    pub async fn change_tally(&self) -> Option<ChangeTally> {
        let snap = self.snapshot(FeedKind::Changes).await?;
        snap.changes().map(ChangeTally::of)
    }

    async fn mutate<T, F>(&self, kind: FeedKind, what: &str, call: F) -> DashResult<T>
    where
        F: Future<Output = DashResult<T>>,
    {
        match self.feeds.get(kind) {
            Some(feed) => mutate_then_refetch(feed, what, call).await,
            None => call.await,
        }
    }

    pub async fn create_target(&self, address: &str, description: &str) -> DashResult<Target> {
        let req = validate_target(address, description)?;
        self.mutate(FeedKind::Targets, "create_target", self.api.create_target(&req))
            .await
    }

    pub async fn delete_target(&self, id: i64) -> DashResult<()> {
        self.mutate(FeedKind::Targets, "delete_target", self.api.delete_target(id))
            .await
    }

    pub async fn toggle_target(&self, id: i64) -> DashResult<Target> {
        self.mutate(FeedKind::Targets, "toggle_target", self.api.toggle_target(id))
            .await
    }

    pub async fn sync_aws(&self) -> DashResult<SyncSummary> {
        self.mutate(FeedKind::Targets, "sync_aws", self.api.sync_aws())
            .await
    }

    pub async fn list_aws_accounts(&self) -> DashResult<Vec<AwsAccount>> {
        self.api.list_aws_accounts().await
    }

    /// Create a new account, or update the one the form was opened for.
    pub async fn save_aws_account(&self, form: &AwsAccountForm) -> DashResult<AwsAccount> {
        match form.editing() {
            Some(id) => self.update_aws_account(id, form).await,
            None => {
                let req = form.validate()?;
                let acct = self.api.create_aws_account(&req).await?;
                info!(id = acct.id, account = %acct.account_name, "aws account created");
                Ok(acct)
            }
        }
    }

    pub async fn update_aws_account(&self, id: i64, form: &AwsAccountForm) -> DashResult<AwsAccount> {
        let req = form.validate()?;
        let acct = self.api.update_aws_account(id, &req).await?;
        info!(id, account = %acct.account_name, "aws account updated");
        Ok(acct)
    }

    pub async fn delete_aws_account(&self, id: i64) -> DashResult<()> {
        self.api.delete_aws_account(id).await?;
        info!(id, "aws account deleted");
        Ok(())
    }

    pub async fn mark_read(&self, id: i64) -> DashResult<()> {
        self.mutate(FeedKind::Notifications, "mark_read", self.api.mark_read(id))
            .await
    }

    pub async fn mark_all_read(&self) -> DashResult<()> {
        self.mutate(FeedKind::Notifications, "mark_all_read", self.api.mark_all_read())
            .await
    }

    pub async fn delete_notification(&self, id: i64) -> DashResult<()> {
        self.mutate(
            FeedKind::Notifications,
            "delete_notification",
            self.api.delete_notification(id),
        )
        .await
    }

    pub async fn delete_read_notifications(&self) -> DashResult<()> {
        self.mutate(
            FeedKind::Notifications,
            "delete_read_notifications",
            self.api.delete_read_notifications(),
        )
        .await
    }

    pub async fn trigger_scan(&self) -> DashResult<TriggerScanResponse> {
        self.mutate(FeedKind::Results, "trigger_scan", self.api.trigger_scan())
            .await
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.feeds.close_all();
    }
}
