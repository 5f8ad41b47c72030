//! Derived notification/change views and the mutate-then-refetch protocol.

use std::future::Future;

use tracing::{info, warn};

use crate::error::DashResult;
use crate::grouping::ChangeTypeFilter;
use crate::refresher::{FeedRefresher, RefreshOutcome};
use crate::types::{ChangeEvent, ChangeType, Notification, SyncSummary};

/// Unread notifications in the current snapshot.
pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.is_read).count()
}

/// Per-type counts shown on the change history filter buttons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTally {
    pub all: usize,
    pub opened: usize,
    pub closed: usize,
}

impl ChangeTally {
    pub fn of(events: &[ChangeEvent]) -> Self {
        events.iter().fold(Self::default(), |mut t, e| {
            t.all += 1;
            match e.change_type {
                ChangeType::Opened => t.opened += 1,
                ChangeType::Closed => t.closed += 1,
            }
            t
        })
    }

    pub fn for_filter(&self, f: ChangeTypeFilter) -> usize {
        match f {
            ChangeTypeFilter::All => self.all,
            ChangeTypeFilter::Only(ChangeType::Opened) => self.opened,
            ChangeTypeFilter::Only(ChangeType::Closed) => self.closed,
        }
    }
}

pub fn filter_changes(events: &[ChangeEvent], f: ChangeTypeFilter) -> Vec<&ChangeEvent> {
    events
        .iter()
        .filter(|e| f.admits(Some(e.change_type)))
        .collect()
}

/// Footer line under the change table.
pub fn showing_line(shown: usize, total: usize) -> String {
    format!("Showing {shown} of {total} total changes (last {})", crate::feed::CHANGE_HISTORY_LIMIT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Total over any wire value; unknown values map to `Info`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "warning" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn style(self) -> Style {
        match self {
            Severity::Critical => Style {
                background: "#fef2f2",
                border: "#fca5a5",
                text: "#991b1b",
            },
            Severity::Warning => Style {
                background: "#fef3c7",
                border: "#fcd34d",
                text: "#92400e",
            },
            Severity::Info => Style {
                background: "#eff6ff",
                border: "#93c5fd",
                text: "#1e40af",
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Colours for a badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    pub background: &'static str,
    pub border: &'static str,
    pub text: &'static str,
}

pub fn severity_style(raw: &str) -> Style {
    Severity::parse(raw).style()
}

pub fn change_style(ct: ChangeType) -> Style {
    match ct {
        ChangeType::Opened => Style {
            background: "#fef3c7",
            border: "#fcd34d",
            text: "#92400e",
        },
        ChangeType::Closed => Style {
            background: "#eff6ff",
            border: "#93c5fd",
            text: "#1e40af",
        },
    }
}

pub fn change_icon(ct: ChangeType) -> &'static str {
    match ct {
        ChangeType::Opened => "🔓",
        ChangeType::Closed => "🔒",
    }
}

pub fn sync_summary_message(s: &SyncSummary) -> String {
    format!(
        "Added {} new targets, skipped {} existing.",
        s.added, s.skipped
    )
}

/// Run a mutating call, then, whatever its outcome, invalidate `feed` so the
/// snapshot converges on server state. No local edit is ever made.
pub async fn mutate_then_refetch<T, F>(feed: &FeedRefresher, what: &str, call: F) -> DashResult<T>
where
    F: Future<Output = DashResult<T>>,
{
    let res = call.await;
    match &res {
        Ok(_) => info!(feed = %feed.feed(), what, "mutation applied"),
        Err(e) => warn!(feed = %feed.feed(), what, error = %e, "mutation failed"),
    }
    let refetch = feed.invalidate().await;
    if refetch == RefreshOutcome::Failed {
        warn!(feed = %feed.feed(), what, "refetch after mutation failed; snapshot stays stale");
    }
    res
}
