//! Feed identities and the collections they carry.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::api::DashboardApi;
use crate::error::DashResult;
use crate::types::{ChangeEvent, Notification, ScanResult, Target};

/// The server never surfaces more change events than this.
pub const CHANGE_HISTORY_LIMIT: usize = 200;

/// Open ports only, or the latest record for every scanned port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultsMode {
    #[default]
    Open,
    All,
}

impl FromStr for ResultsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(ResultsMode::Open),
            "all" => Ok(ResultsMode::All),
            other => Err(format!("unknown results mode: {other} (expected open or all)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NotificationFilter {
    #[default]
    All,
    Unread,
}

impl NotificationFilter {
    pub fn unread_only(self) -> bool {
        matches!(self, NotificationFilter::Unread)
    }
}

/// Which polled collection, without its sub-mode. Registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeedKind {
    Targets,
    Results,
    Changes,
    Notifications,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedKind::Targets => "targets",
            FeedKind::Results => "results",
            FeedKind::Changes => "changes",
            FeedKind::Notifications => "notifications",
        })
    }
}

/// Full feed identity. Changing the sub-mode changes the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Targets,
    Results(ResultsMode),
    Changes,
    Notifications(NotificationFilter),
}

impl Feed {
    pub fn kind(self) -> FeedKind {
        match self {
            Feed::Targets => FeedKind::Targets,
            Feed::Results(_) => FeedKind::Results,
            Feed::Changes => FeedKind::Changes,
            Feed::Notifications(_) => FeedKind::Notifications,
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feed::Targets => f.write_str("targets"),
            Feed::Results(ResultsMode::Open) => f.write_str("results/open"),
            Feed::Results(ResultsMode::All) => f.write_str("results/all"),
            Feed::Changes => f.write_str("changes"),
            Feed::Notifications(NotificationFilter::All) => f.write_str("notifications/all"),
            Feed::Notifications(NotificationFilter::Unread) => f.write_str("notifications/unread"),
        }
    }
}

/// One complete snapshot of a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedData {
    Targets(Vec<Target>),
    Results(Vec<ScanResult>),
    Changes(Vec<ChangeEvent>),
    Notifications(Vec<Notification>),
}

impl FeedData {
    pub fn len(&self) -> usize {
        match self {
            FeedData::Targets(v) => v.len(),
            FeedData::Results(v) => v.len(),
            FeedData::Changes(v) => v.len(),
            FeedData::Notifications(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn targets(&self) -> Option<&[Target]> {
        match self {
            FeedData::Targets(v) => Some(v),
            _ => None,
        }
    }

    pub fn results(&self) -> Option<&[ScanResult]> {
        match self {
            FeedData::Results(v) => Some(v),
            _ => None,
        }
    }

    pub fn changes(&self) -> Option<&[ChangeEvent]> {
        match self {
            FeedData::Changes(v) => Some(v),
            _ => None,
        }
    }

    pub fn notifications(&self) -> Option<&[Notification]> {
        match self {
            FeedData::Notifications(v) => Some(v),
            _ => None,
        }
    }
}

/// Issue the single request that backs `feed`.
pub async fn fetch_feed(api: &Arc<dyn DashboardApi>, feed: Feed) -> DashResult<FeedData> {
    Ok(match feed {
        Feed::Targets => FeedData::Targets(api.list_targets().await?),
        Feed::Results(ResultsMode::Open) => FeedData::Results(api.open_results().await?),
        Feed::Results(ResultsMode::All) => FeedData::Results(api.latest_results().await?),
        Feed::Changes => {
            let mut events = api.change_history().await?;
            events.truncate(CHANGE_HISTORY_LIMIT);
            FeedData::Changes(events)
        }
        Feed::Notifications(filter) => {
            FeedData::Notifications(api.notifications(filter.unread_only()).await?)
        }
    })
}
