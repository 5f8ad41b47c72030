use std::fmt;

/// Every gateway call, used to tag errors and pick fallback messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListTargets,
    CreateTarget,
    DeleteTarget,
    ToggleTarget,
    LatestResults,
    OpenResults,
    ResultsForIp,
    ScanSessions,
    ChangeHistory,
    ListAwsAccounts,
    CreateAwsAccount,
    UpdateAwsAccount,
    DeleteAwsAccount,
    SyncAws,
    ListNotifications,
    UnreadCount,
    MarkRead,
    MarkAllRead,
    DeleteNotification,
    DeleteReadNotifications,
    ScanStatus,
    TriggerScan,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::ListTargets => "list_targets",
            Operation::CreateTarget => "create_target",
            Operation::DeleteTarget => "delete_target",
            Operation::ToggleTarget => "toggle_target",
            Operation::LatestResults => "latest_results",
            Operation::OpenResults => "open_results",
            Operation::ResultsForIp => "results_for_ip",
            Operation::ScanSessions => "scan_sessions",
            Operation::ChangeHistory => "change_history",
            Operation::ListAwsAccounts => "list_aws_accounts",
            Operation::CreateAwsAccount => "create_aws_account",
            Operation::UpdateAwsAccount => "update_aws_account",
            Operation::DeleteAwsAccount => "delete_aws_account",
            Operation::SyncAws => "sync_aws",
            Operation::ListNotifications => "list_notifications",
            Operation::UnreadCount => "unread_count",
            Operation::MarkRead => "mark_read",
            Operation::MarkAllRead => "mark_all_read",
            Operation::DeleteNotification => "delete_notification",
            Operation::DeleteReadNotifications => "delete_read_notifications",
            Operation::ScanStatus => "scan_status",
            Operation::TriggerScan => "trigger_scan",
        }
    }

    /// Message used when a failed response carries no body.
    pub fn default_message(self) -> &'static str {
        match self {
            Operation::ListTargets => "Failed to fetch targets",
            Operation::CreateTarget => "Failed to create target",
            Operation::DeleteTarget => "Failed to delete target",
            Operation::ToggleTarget => "Failed to toggle target",
            Operation::LatestResults => "Failed to fetch results",
            Operation::OpenResults => "Failed to fetch open ports",
            Operation::ResultsForIp => "Failed to fetch results for IP",
            Operation::ScanSessions => "Failed to fetch scan sessions",
            Operation::ChangeHistory => "Failed to fetch change history",
            Operation::ListAwsAccounts => "Failed to fetch AWS credentials",
            Operation::CreateAwsAccount => "Failed to save AWS credentials",
            Operation::UpdateAwsAccount => "Failed to update AWS credentials",
            Operation::DeleteAwsAccount => "Failed to delete AWS credentials",
            Operation::SyncAws => "Failed to sync AWS EC2 instances",
            Operation::ListNotifications => "Failed to fetch notifications",
            Operation::UnreadCount => "Failed to fetch unread count",
            Operation::MarkRead => "Failed to mark notification as read",
            Operation::MarkAllRead => "Failed to mark all notifications as read",
            Operation::DeleteNotification => "Failed to delete notification",
            Operation::DeleteReadNotifications => "Failed to delete read notifications",
            Operation::ScanStatus => "Failed to fetch scan status",
            Operation::TriggerScan => "Failed to trigger scan",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failures surfaced by the gateway and the commands built on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DashError {
    /// Transport failure before any response arrived.
    #[error("{operation}: network error: {message}")]
    Network { operation: Operation, message: String },
    /// The server answered with a non-2xx status.
    #[error("{operation}: {message} (HTTP {status})")]
    Request {
        operation: Operation,
        status: u16,
        message: String,
    },
    /// Input rejected locally; no request was made.
    #[error("validation: {0}")]
    Validation(String),
    /// A 2xx response whose body did not match the expected shape.
    #[error("{operation}: could not decode response: {message}")]
    Decode { operation: Operation, message: String },
}

impl DashError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DashError::Validation(msg.into())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DashError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            DashError::Network { operation, .. }
            | DashError::Request { operation, .. }
            | DashError::Decode { operation, .. } => Some(*operation),
            DashError::Validation(_) => None,
        }
    }
}

pub type DashResult<T> = Result<T, DashError>;
