//! Per-feed polling with single-flight fetches.
//!
//! Each [`FeedRefresher`] owns one feed's snapshot, phase, last error and
//! repeating timer. A fetch only starts after flipping the phase to
//! `Fetching` under the state write lock, so there is never more than one
//! request in flight per feed; overlapping refresh requests are dropped.
//! Results that arrive after the feed was switched or closed are discarded
//! by comparing generations.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::DashboardApi;
use crate::error::DashResult;
use crate::feed::{fetch_feed, Feed, FeedData, FeedKind};

/// Default polling period for every feed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Idle,
    Fetching,
    /// Last fetch failed; the previous snapshot is still served and the next
    /// trigger proceeds as from `Idle`.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New snapshot stored.
    Applied,
    /// Fetch failed; snapshot unchanged.
    Failed,
    /// Another fetch was in flight; nothing was issued.
    Skipped,
    /// A follow-up fetch will run once the in-flight one completes.
    Queued,
    /// Feed was switched or closed while the request was in flight.
    Discarded,
}

#[derive(Debug, Clone)]
pub struct FeedState {
    pub feed: Feed,
    pub phase: FeedPhase,
    pub snapshot: Option<Arc<FeedData>>,
    /// Set by a mutating command until the next successful fetch.
    pub stale: bool,
    pub last_error: Option<String>,
    pub fetched_at: Option<OffsetDateTime>,
    /// Network requests issued for this refresher, across switches.
    pub requests: u64,
    /// Generation that owns the current `Fetching` phase.
    in_flight: Option<u64>,
}

impl FeedState {
    fn fresh(feed: Feed, requests: u64) -> Self {
        Self {
            feed,
            phase: FeedPhase::Idle,
            snapshot: None,
            stale: false,
            last_error: None,
            fetched_at: None,
            requests,
            in_flight: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    feed: Feed,
    generation: u64,
}

struct Shared {
    api: Arc<dyn DashboardApi>,
    state: RwLock<FeedState>,
    generation: AtomicU64,
    refetch: AtomicBool,
    version: watch::Sender<u64>,
}

impl Shared {
    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// A fetch left over from a closed generation does not count as in flight.
    fn busy(&self, st: &FeedState) -> bool {
        st.phase == FeedPhase::Fetching && st.in_flight == Some(self.generation.load(Ordering::SeqCst))
    }

    fn begin_locked(&self, st: &mut FeedState) -> Ticket {
        let generation = self.generation.load(Ordering::SeqCst);
        st.phase = FeedPhase::Fetching;
        st.in_flight = Some(generation);
        st.requests += 1;
        Ticket {
            feed: st.feed,
            generation,
        }
    }

    async fn begin(&self) -> Option<Ticket> {
        let ticket = {
            let mut st = self.state.write().await;
            if self.busy(&st) {
                debug!(feed = %st.feed, "refresh: fetch in flight, request dropped");
                return None;
            }
            self.begin_locked(&mut st)
        };
        self.notify();
        Some(ticket)
    }

    async fn run(self: Arc<Self>, mut ticket: Ticket) -> RefreshOutcome {
        loop {
            let t0 = Instant::now();
            let res = fetch_feed(&self.api, ticket.feed).await;
            let outcome = self.apply(ticket, res, t0).await;
            if outcome == RefreshOutcome::Discarded || !self.refetch.swap(false, Ordering::SeqCst) {
                return outcome;
            }
            match self.begin().await {
                Some(next) => ticket = next,
                None => return outcome,
            }
        }
    }

    async fn apply(&self, ticket: Ticket, res: DashResult<FeedData>, t0: Instant) -> RefreshOutcome {
        let took_ms = t0.elapsed().as_millis();
        let mut st = self.state.write().await;
        if self.generation.load(Ordering::SeqCst) != ticket.generation {
            debug!(feed = %ticket.feed, took_ms = %took_ms, "refresh: stale result discarded");
            if st.in_flight == Some(ticket.generation) {
                st.phase = FeedPhase::Idle;
                st.in_flight = None;
                drop(st);
                self.notify();
            }
            return RefreshOutcome::Discarded;
        }
        st.in_flight = None;
        let outcome = match res {
            Ok(data) => {
                debug!(feed = %ticket.feed, items = data.len(), took_ms = %took_ms, "refresh: snapshot replaced");
                st.snapshot = Some(Arc::new(data));
                st.phase = FeedPhase::Idle;
                st.stale = false;
                st.last_error = None;
                st.fetched_at = Some(OffsetDateTime::now_utc());
                RefreshOutcome::Applied
            }
            Err(e) => {
                warn!(feed = %ticket.feed, error = %e, took_ms = %took_ms, "refresh: fetch failed, keeping last snapshot");
                st.phase = FeedPhase::Error;
                st.last_error = Some(e.to_string());
                RefreshOutcome::Failed
            }
        };
        drop(st);
        self.notify();
        outcome
    }
}

/// Owns one feed: snapshot, phase, timer.
pub struct FeedRefresher {
    shared: Arc<Shared>,
    feed: Feed,
    period: Duration,
    timer: Option<CancellationToken>,
}

impl FeedRefresher {
    pub fn new(api: Arc<dyn DashboardApi>, feed: Feed, period: Duration) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                api,
                state: RwLock::new(FeedState::fresh(feed, 0)),
                generation: AtomicU64::new(0),
                refetch: AtomicBool::new(false),
                version,
            }),
            feed,
            period: period.max(Duration::from_millis(1)),
            timer: None,
        }
    }

    pub fn feed(&self) -> Feed {
        self.feed
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    pub async fn state(&self) -> FeedState {
        self.shared.state.read().await.clone()
    }

    pub async fn snapshot(&self) -> Option<Arc<FeedData>> {
        self.shared.state.read().await.snapshot.clone()
    }

    pub async fn phase(&self) -> FeedPhase {
        self.shared.state.read().await.phase
    }

    /// Receiver whose value changes on every phase or snapshot transition.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// Start the repeating timer. The first tick fires immediately.
    pub fn start(&mut self) {
        self.stop();
        let token = CancellationToken::new();
        let cancel = token.clone();
        let shared = self.shared.clone();
        let period = self.period;
        let feed = self.feed;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(ticket) = shared.begin().await {
                            // Fetch in its own task: stopping the timer must not abort it.
                            tokio::spawn(shared.clone().run(ticket));
                        }
                    }
                }
            }
            debug!(feed = %feed, "refresh: timer stopped");
        });
        info!(feed = %self.feed, period_ms = %self.period.as_millis(), "refresh: timer started");
        self.timer = Some(token);
    }

    /// Stop the timer. An in-flight fetch still completes and is applied.
    pub fn stop(&mut self) {
        if let Some(token) = self.timer.take() {
            token.cancel();
        }
    }

    /// Manual refresh in the background. Returns `false` when dropped
    /// because a fetch is already in flight.
    pub async fn trigger_now(&self) -> bool {
        match self.shared.begin().await {
            Some(ticket) => {
                tokio::spawn(self.shared.clone().run(ticket));
                true
            }
            None => false,
        }
    }

    /// Manual refresh that waits for the result. The fetch runs in its own
    /// task, so dropping this future does not leave the feed `Fetching`.
    pub async fn refresh(&self) -> RefreshOutcome {
        match self.shared.begin().await {
            Some(ticket) => self.run_detached(ticket).await,
            None => RefreshOutcome::Skipped,
        }
    }

    async fn run_detached(&self, ticket: Ticket) -> RefreshOutcome {
        match tokio::spawn(self.shared.clone().run(ticket)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(feed = %ticket.feed, error = %e, "refresh: fetch task aborted");
                RefreshOutcome::Failed
            }
        }
    }

    /// Mark the snapshot stale after a mutation and make sure a fetch issued
    /// after this point brings it back to server truth. If one is already in
    /// flight, a single follow-up fetch is chained behind it.
    pub async fn invalidate(&self) -> RefreshOutcome {
        let ticket = {
            let mut st = self.shared.state.write().await;
            st.stale = true;
            if self.shared.busy(&st) {
                self.shared.refetch.store(true, Ordering::SeqCst);
                debug!(feed = %st.feed, "refresh: invalidated during fetch, follow-up queued");
                None
            } else {
                Some(self.shared.begin_locked(&mut st))
            }
        };
        self.shared.notify();
        match ticket {
            Some(t) => self.run_detached(t).await,
            None => RefreshOutcome::Queued,
        }
    }

    /// Change sub-mode. This is a new feed identity: the old timer is
    /// cancelled, the snapshot cleared, in-flight results discarded, and a
    /// fetch for the new identity starts immediately.
    pub async fn switch(&mut self, feed: Feed) -> bool {
        if feed == self.feed {
            return false;
        }
        let was_running = self.is_running();
        self.stop();
        {
            let mut st = self.shared.state.write().await;
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            self.shared.refetch.store(false, Ordering::SeqCst);
            *st = FeedState::fresh(feed, st.requests);
        }
        info!(from = %self.feed, to = %feed, "refresh: feed switched");
        self.feed = feed;
        self.shared.notify();
        if was_running {
            self.start();
        } else {
            self.trigger_now().await;
        }
        true
    }

    /// Use `period` from the next timer start; a running timer is restarted.
    pub fn set_period(&mut self, period: Duration) -> bool {
        let period = period.max(Duration::from_millis(1));
        if period == self.period {
            return false;
        }
        self.period = period;
        if self.is_running() {
            self.start();
        }
        true
    }

    /// Tear down: stop polling and discard whatever is still in flight. The
    /// refresher may be started again; a fetch from before the close no
    /// longer blocks new ones.
    pub fn close(&mut self) {
        self.stop();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.refetch.store(false, Ordering::SeqCst);
    }
}

impl Drop for FeedRefresher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Refreshers keyed by feed kind; one per kind.
pub struct FeedRegistry {
    api: Arc<dyn DashboardApi>,
    feeds: HashMap<FeedKind, FeedRefresher>,
}

impl FeedRegistry {
    pub fn new(api: Arc<dyn DashboardApi>) -> Self {
        Self {
            api,
            feeds: HashMap::new(),
        }
    }

    /// Register `feed` (switching the existing refresher of the same kind
    /// if its sub-mode differs, and adopting `period`). Does not start polling.
    pub async fn open(&mut self, feed: Feed, period: Duration) -> &mut FeedRefresher {
        let api = self.api.clone();
        match self.feeds.entry(feed.kind()) {
            Entry::Occupied(slot) => {
                let existing = slot.into_mut();
                if feed != existing.feed() {
                    existing.period = period.max(Duration::from_millis(1));
                    existing.switch(feed).await;
                } else {
                    existing.set_period(period);
                }
                existing
            }
            Entry::Vacant(slot) => slot.insert(FeedRefresher::new(api, feed, period)),
        }
    }

    pub fn get(&self, kind: FeedKind) -> Option<&FeedRefresher> {
        self.feeds.get(&kind)
    }

    pub fn get_mut(&mut self, kind: FeedKind) -> Option<&mut FeedRefresher> {
        self.feeds.get_mut(&kind)
    }

    pub fn close(&mut self, kind: FeedKind) -> bool {
        match self.feeds.remove(&kind) {
            Some(mut r) => {
                r.close();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        for (_, mut r) in self.feeds.drain() {
            r.close();
        }
    }

    pub fn kinds(&self) -> Vec<FeedKind> {
        let mut k: Vec<FeedKind> = self.feeds.keys().copied().collect();
        k.sort();
        k
    }
}
