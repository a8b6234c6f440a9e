use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::notifier::Notifier;
use crate::pubg::client::short_id;
use crate::pubg::{FetchOutcome, MatchSource};
use crate::roster::TrackedPlayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Polling,
    Notifying,
    /// Terminal; entered once shutdown is requested.
    Stopped,
}

/// Outcome counters for one pass over the roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// Matches not yet in the last-seen index.
    pub new_matches: u32,
    pub notified: u32,
    /// Recorded without a post because the match was already posted for
    /// another tracked player.
    pub shared: u32,
    pub already_seen: u32,
    pub not_found: u32,
    pub fetch_failures: u32,
    pub delivery_failures: u32,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: CycleState,
    pub cycles_completed: u64,
    pub roster_size: usize,
    pub last_report: Option<CycleReport>,
}

/// Drives polling cycles: fetch each roster entry, post unseen matches, then
/// record them. A match is recorded only after its post succeeded.
pub struct Scheduler {
    roster: Vec<TrackedPlayer>,
    source: Arc<dyn MatchSource>,
    db: Database,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    status: watch::Sender<SchedulerStatus>,
    roster_updates: Option<watch::Receiver<Vec<TrackedPlayer>>>,
    cycle: u64,
}

impl Scheduler {
    pub fn new(
        roster: Vec<TrackedPlayer>,
        source: Arc<dyn MatchSource>,
        db: Database,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SchedulerStatus {
            state: CycleState::Idle,
            cycles_completed: 0,
            roster_size: roster.len(),
            last_report: None,
        });
        Scheduler {
            roster,
            source,
            db,
            notifier,
            interval,
            status,
            roster_updates: None,
            cycle: 0,
        }
    }

    /// Pick up roster edits from `updates`. They are applied at the start of
    /// the next cycle, never while one is running.
    pub fn with_roster_updates(mut self, updates: watch::Receiver<Vec<TrackedPlayer>>) -> Self {
        self.roster_updates = Some(updates);
        self
    }

    fn apply_roster_updates(&mut self) {
        let Some(updates) = self.roster_updates.as_mut() else {
            return;
        };
        if !updates.has_changed().unwrap_or(false) {
            return;
        }
        let roster = updates.borrow_and_update().clone();
        info!(
            "Roster updated: {} -> {} player(s)",
            self.roster.len(),
            roster.len()
        );
        self.source.roster_changed(&roster);
        self.status.send_modify(|s| s.roster_size = roster.len());
        self.roster = roster;
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    fn set_state(&self, state: CycleState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// Run cycles every `interval` until `cancel` fires. The first cycle starts
    /// immediately; a slow cycle pushes the next tick back instead of
    /// overlapping it.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Scheduler started ({} players, interval={:?})",
            self.roster.len(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.run_cycle(&cancel).await;
            if report.cancelled {
                break;
            }
            info!("Next check in {:?}", self.interval);
        }

        self.set_state(CycleState::Stopped);
        info!("Scheduler stopped after {} cycle(s)", self.cycle);
    }

    /// One pass over the roster. Per-player failures are logged and skipped.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        self.apply_roster_updates();
        self.cycle += 1;
        let started = Instant::now();
        let mut report = CycleReport {
            cycle: self.cycle,
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        // matches whose post failed this cycle; other players in them wait too
        let mut failed: HashSet<String> = HashSet::new();

        info!("Cycle {} started", self.cycle);
        self.set_state(CycleState::Polling);

        let total = self.roster.len();
        for (idx, player) in self.roster.iter().enumerate() {
            info!("[{}/{}] Checking {}", idx + 1, total, player);

            let fetched = tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                res = self.source.fetch_latest_match(player) => res,
            };

            let record = match fetched {
                Ok(FetchOutcome::Found(record)) => record,
                Ok(FetchOutcome::NotFound) => {
                    report.not_found += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", player, e);
                    report.fetch_failures += 1;
                    continue;
                }
            };

            match self.db.is_new(player, &record.match_id) {
                Ok(true) => {}
                Ok(false) => {
                    info!("{}: match {} already posted", player, short_id(&record.match_id));
                    report.already_seen += 1;
                    continue;
                }
                Err(e) => {
                    error!("Last-seen lookup failed for {}: {:#}", player, e);
                    report.fetch_failures += 1;
                    continue;
                }
            }
            report.new_matches += 1;

            if failed.contains(&record.match_id) {
                report.delivery_failures += 1;
                continue;
            }
            match self.db.was_posted(&record.match_id) {
                Ok(true) => {
                    info!(
                        "{}: match {} was already posted for another player",
                        player,
                        short_id(&record.match_id)
                    );
                    self.mark_seen(player, &record.match_id);
                    report.shared += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Posted-match lookup failed for {}: {:#}", record.match_id, e);
                    report.delivery_failures += 1;
                    continue;
                }
            }

            info!("{}: new match {}", player, short_id(&record.match_id));
            self.set_state(CycleState::Notifying);
            let sent = tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                res = self.notifier.send(&record) => res,
            };
            self.set_state(CycleState::Polling);

            match sent {
                Ok(()) => {
                    if let Err(e) = self.db.mark_posted(&record.match_id) {
                        error!("Failed to mark {} as posted: {:#}", record.match_id, e);
                    }
                    self.mark_seen(player, &record.match_id);
                    if let Err(e) = self.db.record_history(&record) {
                        warn!("Failed to store history for {}: {:#}", record.match_id, e);
                    }
                    report.notified += 1;
                }
                Err(e) => {
                    warn!(
                        "Delivery failed for {} match {}, will retry next cycle: {}",
                        player,
                        short_id(&record.match_id),
                        e
                    );
                    failed.insert(record.match_id.clone());
                    report.delivery_failures += 1;
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Cycle {} done in {:.1}s: {} new, {} posted, {} not found, {} fetch failures, {} delivery failures{}",
            report.cycle,
            report.elapsed_ms as f64 / 1000.0,
            report.new_matches,
            report.notified,
            report.not_found,
            report.fetch_failures,
            report.delivery_failures,
            if report.cancelled { " (cancelled)" } else { "" }
        );

        let finished = report.clone();
        self.status.send_modify(|s| {
            s.state = CycleState::Idle;
            s.cycles_completed = self.cycle;
            s.last_report = Some(finished);
        });
        report
    }

    fn mark_seen(&self, player: &TrackedPlayer, match_id: &str) {
        // A failed write means the match may be posted again next cycle.
        if let Err(e) = self.db.record(player, match_id) {
            error!("Failed to record {} for {}: {:#}", match_id, player, e);
        }
    }
}
