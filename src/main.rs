use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use time::{OffsetDateTime, UtcOffset};
use tokio_util::sync::CancellationToken;

use scanwatch::api::DashboardApi;
use scanwatch::config::Config;
use scanwatch::dashboard::Dashboard;
use scanwatch::demo::{self, DemoOptions};
use scanwatch::feed::{FeedKind, NotificationFilter, ResultsMode};
use scanwatch::forms::{AwsAccountForm, DEFAULT_AWS_REGION};
use scanwatch::grouping::{count_label, ChangeTypeFilter, ExpandedSet, Group, GroupBy};
use scanwatch::logging;
use scanwatch::reconcile::{change_icon, filter_changes, showing_line, sync_summary_message, Severity};
use scanwatch::refresher::{FeedPhase, RefreshOutcome};
use scanwatch::timefmt::{format_timestamp, local_offset, relative_time};
use scanwatch::types::{AwsAccount, ChangeEvent, Notification, ScanResult, ScanSession, Secret, Target};

/// scanwatch: terminal dashboard for a port-scanning monitoring service.
#[derive(Debug, Parser)]
#[command(
    name = "scanwatch",
    version,
    about = "Terminal dashboard for a port-scanning monitoring service.",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List or manage scan targets.
    Targets {
        #[command(subcommand)]
        action: Option<TargetsCmd>,
    },
    /// Latest scan results, grouped.
    Results {
        /// Show every scanned port instead of open ports only.
        #[arg(long, default_value_t = false)]
        all: bool,
        #[arg(long = "group-by", default_value = "ip")]
        group_by: GroupBy,
        /// Only addresses containing this text.
        #[arg(long)]
        ip: Option<String>,
        /// Expand this group (repeatable).
        #[arg(long)]
        expand: Vec<String>,
        #[arg(long = "expand-all", default_value_t = false)]
        expand_all: bool,
    },
    /// Every stored result for one address.
    Host { ip: String },
    /// Recent scan sessions.
    Sessions,
    /// Port state change history.
    Changes {
        #[arg(long = "type", default_value = "all")]
        change_type: ChangeTypeFilter,
        #[arg(long = "group-by", default_value = "ip")]
        group_by: GroupBy,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        expand: Vec<String>,
        #[arg(long = "expand-all", default_value_t = false)]
        expand_all: bool,
    },
    /// List or manage notifications.
    Notifications {
        #[arg(long, default_value_t = false)]
        unread: bool,
        #[command(subcommand)]
        action: Option<NotificationsCmd>,
    },
    /// AWS accounts used for target import.
    Aws {
        #[command(subcommand)]
        action: AwsCmd,
    },
    /// Scanner status and manual trigger.
    Scan {
        #[command(subcommand)]
        action: ScanCmd,
    },
    /// Poll every feed and print a line whenever one changes (Ctrl+C to stop).
    Watch {
        #[arg(long, default_value_t = false)]
        all: bool,
        #[arg(long, default_value_t = false)]
        unread: bool,
    },
    /// Run the in-memory demo backend.
    ServeDemo {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
        /// Require this bearer token on every API request.
        #[arg(long = "require-token", env = "SCANWATCH_DEMO_TOKEN", hide_env_values = true)]
        require_token: Option<String>,
        /// Start empty instead of with sample data.
        #[arg(long = "no-seed", default_value_t = false)]
        no_seed: bool,
        /// Seconds a triggered scan takes.
        #[arg(long = "scan-secs", default_value_t = 2)]
        scan_secs: u64,
    },
}

#[derive(Debug, Subcommand)]
enum TargetsCmd {
    List,
    /// Register an IP address or CIDR subnet.
    Add {
        address: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Rm { id: i64 },
    /// Enable or disable scanning of a target.
    Toggle { id: i64 },
}

#[derive(Debug, Subcommand)]
enum NotificationsCmd {
    List,
    Read { id: i64 },
    ReadAll,
    Rm { id: i64 },
    /// Delete every read notification.
    PurgeRead,
    /// Unread count as reported by the server.
    Count,
}

#[derive(Debug, clap::Args)]
struct AccountArgs {
    #[arg(long)]
    name: String,
    #[arg(long = "key-id")]
    key_id: String,
    /// Secret access key. Never printed.
    #[arg(long, env = "SCANWATCH_AWS_SECRET", hide_env_values = true)]
    secret: String,
    #[arg(long, default_value = DEFAULT_AWS_REGION)]
    region: String,
}

impl AccountArgs {
    fn into_form(self) -> AwsAccountForm {
        let mut form = AwsAccountForm::new();
        form.account_name = self.name;
        form.access_key_id = self.key_id;
        form.secret_access_key = Secret::new(self.secret);
        form.region = self.region;
        form
    }
}

#[derive(Debug, Subcommand)]
enum AwsCmd {
    List,
    Add(AccountArgs),
    /// Replace an account's settings; the secret must be given again.
    Update {
        id: i64,
        #[command(flatten)]
        account: AccountArgs,
    },
    Rm { id: i64 },
    /// Import public addresses from every configured account as targets.
    Sync,
}

#[derive(Debug, Subcommand)]
enum ScanCmd {
    Status,
    Trigger,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    // Resolve before any worker thread exists; the lookup can fail afterwards.
    let offset = if cli.config.utc { UtcOffset::UTC } else { local_offset() };
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;
    rt.block_on(run(cli, offset))
}

async fn run(cli: Cli, offset: UtcOffset) -> Result<()> {
    if let Command::ServeDemo { bind, require_token, no_seed, scan_secs } = &cli.command {
        let opts = DemoOptions {
            require_token: require_token.clone(),
            seed: !no_seed,
            scan_duration: Duration::from_secs(*scan_secs),
        };
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            trigger.cancel();
        });
        println!("Demo backend at http://{bind}/api/v1 (Ctrl+C to stop)");
        return demo::serve_demo(bind, opts, shutdown).await;
    }

    let api: Arc<dyn DashboardApi> = Arc::new(cli.config.gateway()?);
    let mut dash = Dashboard::new(api, cli.config.poll_intervals(), offset);

    match cli.command {
        Command::Targets { action } => targets(&mut dash, action.unwrap_or(TargetsCmd::List)).await?,
        Command::Results { all, group_by, ip, expand, expand_all } => {
            let mode = if all { ResultsMode::All } else { ResultsMode::Open };
            dash.set_results_mode(mode).await;
            {
                let c = dash.results_controls_mut();
                c.group_by = group_by;
                c.ip_query = ip.unwrap_or_default();
            }
            load(&mut dash, FeedKind::Results).await?;
            // Keys only survive if they name a group in the current view.
            expand.into_iter().for_each(|k| dash.results_controls_mut().expanded.expand(k));
            if expand_all {
                dash.expand_all_results().await;
            }
            let now = OffsetDateTime::now_utc();
            dash.result_groups(|groups, expanded| print_result_groups(groups, expanded, group_by, now, offset))
                .await;
        }
        Command::Host { ip } => {
            let rows = dash.api().results_for_ip(ip.trim()).await?;
            let groups = [Group { key: ip.trim().to_string(), records: rows.iter().collect() }];
            let mut expanded = ExpandedSet::new();
            expanded.expand_all(&groups);
            print_result_groups(&groups, &expanded, GroupBy::Ip, OffsetDateTime::now_utc(), offset);
        }
        Command::Sessions => print_sessions(&dash.api().scan_sessions().await?, offset),
        Command::Changes { change_type, group_by, ip, expand, expand_all } => {
            {
                let c = dash.change_controls_mut();
                c.change_type = change_type;
                c.group_by = group_by;
                c.ip_query = ip.unwrap_or_default();
            }
            load(&mut dash, FeedKind::Changes).await?;
            expand.into_iter().for_each(|k| dash.change_controls_mut().expanded.expand(k));
            if expand_all {
                dash.expand_all_changes().await;
            }
            if let Some(t) = dash.change_tally().await {
                println!(
                    "all: {}  opened: {}  closed: {}",
                    t.all, t.opened, t.closed
                );
            }
            let now = OffsetDateTime::now_utc();
            dash.change_groups(|groups, expanded| print_change_groups(groups, expanded, now, offset))
                .await;
            if let Some(snap) = dash.snapshot(FeedKind::Changes).await {
                if let Some(events) = snap.changes() {
                    let shown = filter_changes(events, change_type).len();
                    println!("{}", showing_line(shown, events.len()));
                }
            }
        }
        Command::Notifications { unread, action } => {
            let filter = if unread { NotificationFilter::Unread } else { NotificationFilter::All };
            notifications(&mut dash, filter, action.unwrap_or(NotificationsCmd::List)).await?
        }
        Command::Aws { action } => aws(&mut dash, action).await?,
        Command::Scan { action } => match action {
            ScanCmd::Status => {
                let s = dash.api().scan_status().await?;
                println!("{}", if s.scanning { "scanning" } else { "idle" });
            }
            ScanCmd::Trigger => {
                dash.open(FeedKind::Results).await;
                let r = dash.trigger_scan().await?;
                println!("{}", r.message);
            }
        },
        Command::Watch { all, unread } => {
            if all {
                dash.set_results_mode(ResultsMode::All).await;
            }
            if unread {
                dash.set_notification_filter(NotificationFilter::Unread).await;
            }
            watch(&mut dash).await?;
        }
        Command::ServeDemo { .. } => {}
    }
    dash.close();
    Ok(())
}

/// Open one feed and wait for its first snapshot.
async fn load(dash: &mut Dashboard, kind: FeedKind) -> Result<()> {
    let outcome = dash.open(kind).await.refresh().await;
    if outcome == RefreshOutcome::Failed {
        let err = match dash.feed(kind) {
            Some(f) => f.state().await.last_error,
            None => None,
        };
        bail!("{}", err.unwrap_or_else(|| format!("failed to load {kind}")));
    }
    Ok(())
}

async fn targets(dash: &mut Dashboard, cmd: TargetsCmd) -> Result<()> {
    dash.open(FeedKind::Targets).await;
    match cmd {
        TargetsCmd::List => load(dash, FeedKind::Targets).await?,
        TargetsCmd::Add { address, description } => {
            let t = dash.create_target(&address, &description).await?;
            println!("Added target {} (id {})", t.address, t.id);
        }
        TargetsCmd::Rm { id } => {
            dash.delete_target(id).await?;
            println!("Deleted target {id}");
        }
        TargetsCmd::Toggle { id } => {
            let t = dash.toggle_target(id).await?;
            println!(
                "Target {} is now {}",
                t.address,
                if t.enabled { "enabled" } else { "disabled" }
            );
        }
    }
    if let Some(snap) = dash.snapshot(FeedKind::Targets).await {
        if let Some(ts) = snap.targets() {
            print_targets(ts, dash.offset());
        }
    }
    Ok(())
}

async fn notifications(dash: &mut Dashboard, filter: NotificationFilter, cmd: NotificationsCmd) -> Result<()> {
    dash.set_notification_filter(filter).await;
    dash.open(FeedKind::Notifications).await;
    match cmd {
        NotificationsCmd::List => load(dash, FeedKind::Notifications).await?,
        NotificationsCmd::Read { id } => dash.mark_read(id).await?,
        NotificationsCmd::ReadAll => dash.mark_all_read().await?,
        NotificationsCmd::Rm { id } => dash.delete_notification(id).await?,
        NotificationsCmd::PurgeRead => dash.delete_read_notifications().await?,
        NotificationsCmd::Count => {
            println!("{}", dash.api().unread_count().await?);
            return Ok(());
        }
    }
    if let Some(snap) = dash.snapshot(FeedKind::Notifications).await {
        if let Some(ns) = snap.notifications() {
            print_notifications(ns, OffsetDateTime::now_utc(), dash.offset());
        }
    }
    if let Some(n) = dash.unread_count().await {
        println!("{} unread", n);
    }
    Ok(())
}

async fn aws(dash: &mut Dashboard, cmd: AwsCmd) -> Result<()> {
    match cmd {
        AwsCmd::List => {}
        AwsCmd::Add(args) => {
            let acct = dash.save_aws_account(&args.into_form()).await?;
            println!("Saved account {} (id {})", acct.account_name, acct.id);
        }
        AwsCmd::Update { id, account } => {
            let acct = dash.update_aws_account(id, &account.into_form()).await?;
            println!("Updated account {} (id {})", acct.account_name, acct.id);
        }
        AwsCmd::Rm { id } => {
            dash.delete_aws_account(id).await?;
            println!("Deleted account {id}");
        }
        AwsCmd::Sync => {
            dash.open(FeedKind::Targets).await;
            let summary = dash.sync_aws().await?;
            println!("{}", sync_summary_message(&summary));
            return Ok(());
        }
    }
    print_accounts(&dash.list_aws_accounts().await?, dash.offset());
    Ok(())
}

async fn watch(dash: &mut Dashboard) -> Result<()> {
    dash.open_all().await;
    let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    for kind in dash.open_kinds() {
        if let Some(feed) = dash.feed(kind) {
            let mut rx = feed.subscribe();
            let tx = tx.clone();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    if tx.send(kind).is_err() {
                        break;
                    }
                }
            });
        }
    }
    drop(tx);
    dash.start_polling();
    println!("Watching {} feeds (Ctrl+C to stop)", dash.open_kinds().len());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            ev = events.recv() => match ev {
                Some(kind) => report(dash, kind).await,
                None => break,
            },
        }
    }
    dash.stop_polling();
    Ok(())
}

async fn report(dash: &Dashboard, kind: FeedKind) {
    let Some(feed) = dash.feed(kind) else { return };
    let st = feed.state().await;
    if st.phase == FeedPhase::Fetching {
        return;
    }
    let items = st.snapshot.as_ref().map(|s| s.len()).unwrap_or(0);
    let mut line = format!(
        "{} {:<22} {}",
        format_timestamp(OffsetDateTime::now_utc(), dash.offset()),
        st.feed.to_string(),
        count_label(items, "item")
    );
    match kind {
        FeedKind::Notifications => {
            if let Some(n) = dash.unread_count().await {
                line.push_str(&format!(", {n} unread"));
            }
        }
        FeedKind::Changes => {
            if let Some(t) = dash.change_tally().await {
                line.push_str(&format!(", {} opened / {} closed", t.opened, t.closed));
            }
        }
        _ => {}
    }
    if st.stale {
        line.push_str(" (stale)");
    }
    if let Some(e) = &st.last_error {
        line.push_str(&format!(" [error: {e}]"));
    }
    println!("{line}");
}

/// Column-aligned table; widths follow the widest cell.
fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count().min(60));
        }
    }
    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
    };
    println!("{}", line(headers.iter().map(|h| h.to_string()).collect()));
    println!("{}", line(widths.iter().map(|w| "-".repeat(*w)).collect()));
    for row in rows {
        let cells = row
            .iter()
            .map(|c| {
                let mut c = c.clone();
                if c.chars().count() > 60 {
                    c = c.chars().take(60).collect();
                }
                c
            })
            .collect();
        println!("{}", line(cells));
    }
}

fn print_targets(targets: &[Target], offset: UtcOffset) {
    if targets.is_empty() {
        println!("No targets configured.");
        return;
    }
    let rows: Vec<Vec<String>> = targets
        .iter()
        .map(|t| {
            vec![
                t.id.to_string(),
                t.address.clone(),
                t.description.clone(),
                if t.enabled { "enabled" } else { "disabled" }.to_string(),
                format_timestamp(t.created_at, offset),
            ]
        })
        .collect();
    print_table(&["id", "target", "description", "state", "created"], &rows);
}

fn print_result_groups(
    groups: &[Group<'_, ScanResult>],
    expanded: &ExpandedSet,
    by: GroupBy,
    now: OffsetDateTime,
    offset: UtcOffset,
) {
    if groups.is_empty() {
        println!("No results.");
        return;
    }
    let noun = if by == GroupBy::Port { "host" } else { "port" };
    for g in groups {
        let open = expanded.is_expanded(&g.key);
        println!("{} {} ({})", if open { "▾" } else { "▸" }, g.key, count_label(g.records.len(), noun));
        if !open {
            continue;
        }
        let rows: Vec<Vec<String>> = g
            .records
            .iter()
            .map(|r| {
                vec![
                    r.ip_address.clone(),
                    r.port.to_string(),
                    r.status.to_string(),
                    format!("{}ms", r.response_time_ms),
                    relative_time(r.scanned_at, now, offset),
                    r.first_discovered_at
                        .map(|t| format_timestamp(t, offset))
                        .unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["ip", "port", "status", "response", "scanned", "first seen"], &rows);
    }
}

fn print_change_groups(
    groups: &[Group<'_, ChangeEvent>],
    expanded: &ExpandedSet,
    now: OffsetDateTime,
    offset: UtcOffset,
) {
    if groups.is_empty() {
        println!("No changes.");
        return;
    }
    for g in groups {
        let open = expanded.is_expanded(&g.key);
        println!("{} {} ({})", if open { "▾" } else { "▸" }, g.key, count_label(g.records.len(), "change"));
        if !open {
            continue;
        }
        let rows: Vec<Vec<String>> = g
            .records
            .iter()
            .map(|e| {
                vec![
                    format!("{} {}", change_icon(e.change_type), e.change_type),
                    e.ip_address.clone(),
                    e.port.to_string(),
                    format!("{} → {}", e.previous_status, e.new_status),
                    e.target_description.clone().unwrap_or_default(),
                    relative_time(e.detected_at, now, offset),
                ]
            })
            .collect();
        print_table(&["change", "ip", "port", "transition", "target", "detected"], &rows);
    }
}

fn print_notifications(ns: &[Notification], now: OffsetDateTime, offset: UtcOffset) {
    if ns.is_empty() {
        println!("No notifications.");
        return;
    }
    let rows: Vec<Vec<String>> = ns
        .iter()
        .map(|n| {
            vec![
                n.id.to_string(),
                if n.is_read { " " } else { "●" }.to_string(),
                Severity::parse(&n.severity).label().to_string(),
                n.title.clone(),
                n.message.clone(),
                relative_time(n.created_at, now, offset),
            ]
        })
        .collect();
    print_table(&["id", "", "severity", "title", "message", "when"], &rows);
}

fn print_accounts(accounts: &[AwsAccount], offset: UtcOffset) {
    if accounts.is_empty() {
        println!("No AWS accounts configured.");
        return;
    }
    let rows: Vec<Vec<String>> = accounts
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.account_name.clone(),
                a.access_key_id.clone(),
                a.region.clone(),
                a.updated_at
                    .or(a.created_at)
                    .map(|t| format_timestamp(t, offset))
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["id", "account", "access key id", "region", "updated"], &rows);
}

fn print_sessions(sessions: &[ScanSession], offset: UtcOffset) {
    if sessions.is_empty() {
        println!("No scan sessions yet.");
        return;
    }
    let rows: Vec<Vec<String>> = sessions
        .iter()
        .map(|s| {
            vec![
                s.id.to_string(),
                format_timestamp(s.started_at, offset),
                s.completed_at
                    .map(|t| format_timestamp(t, offset))
                    .unwrap_or_else(|| "-".into()),
                s.targets_scanned.to_string(),
                s.ports_scanned.to_string(),
                s.status.clone(),
            ]
        })
        .collect();
    print_table(&["id", "started", "completed", "targets", "ports", "status"], &rows);
}
