use anyhow::Result;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc, Weekday};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::models::HistoryEntry;
use crate::db::Database;
use crate::notifier::Notifier;
use crate::roster::Platform;

const POST_WEEKDAY: Weekday = Weekday::Wed;
const POST_HOUR_UTC: u32 = 16;
const CHECK_EVERY: Duration = Duration::from_secs(10 * 60);
pub const WINDOW_DAYS: i64 = 7;

/// One player's aggregate over the summary window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlayerWeek {
    pub player: String,
    pub platform: Platform,
    pub matches: u32,
    pub wins: u32,
    pub top5: u32,
    pub top10: u32,
    pub total_kills: u32,
    pub best_kills: u32,
    pub total_damage: f64,
    pub best_damage: f64,
    pub total_headshots: u32,
    pub total_assists: u32,
    pub total_dbnos: u32,
    pub total_survival_min: f64,
    pub best_survival_min: f64,
    pub total_distance_km: f64,
}

impl PlayerWeek {
    fn per_match(&self, total: f64) -> f64 {
        if self.matches == 0 {
            0.0
        } else {
            total / self.matches as f64
        }
    }

    pub fn avg_kills(&self) -> f64 {
        self.per_match(self.total_kills as f64)
    }

    pub fn avg_damage(&self) -> f64 {
        self.per_match(self.total_damage)
    }

    pub fn avg_survival(&self) -> f64 {
        self.per_match(self.total_survival_min)
    }

    pub fn avg_distance_km(&self) -> f64 {
        self.per_match(self.total_distance_km)
    }

    pub fn win_rate(&self) -> f64 {
        self.per_match(self.wins as f64) * 100.0
    }

    pub fn top5_rate(&self) -> f64 {
        self.per_match(self.top5 as f64) * 100.0
    }

    /// Weighted ranking score: rewards consistent kills and damage, wins and
    /// deep placements, survival time and headshots.
    pub fn score(&self) -> f64 {
        self.avg_kills() * 100.0
            + self.avg_damage() * 0.5
            + self.wins as f64 * 500.0
            + self.top5 as f64 * 100.0
            + self.top10 as f64 * 50.0
            + self.avg_survival() * 10.0
            + self.total_headshots as f64 * 20.0
    }

    fn add(&mut self, entry: &HistoryEntry) {
        let s = &entry.stats;
        self.matches += 1;
        if s.win_place == 1 {
            self.wins += 1;
        }
        if (1..=5).contains(&s.win_place) {
            self.top5 += 1;
        }
        if (1..=10).contains(&s.win_place) {
            self.top10 += 1;
        }
        self.total_kills += s.kills;
        self.best_kills = self.best_kills.max(s.kills);
        self.total_damage += s.damage_dealt;
        self.best_damage = self.best_damage.max(s.damage_dealt);
        self.total_headshots += s.headshot_kills;
        self.total_assists += s.assists;
        self.total_dbnos += s.dbnos;
        let survival = s.survival_minutes();
        self.total_survival_min += survival;
        self.best_survival_min = self.best_survival_min.max(survival);
        self.total_distance_km += s.distance_km();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// Sorted by score, best first.
    pub standings: Vec<PlayerWeek>,
}

/// Aggregate history rows per (name, platform); names compare case-insensitively.
pub fn summarize(entries: &[HistoryEntry], since: DateTime<Utc>, until: DateTime<Utc>) -> WeeklySummary {
    let mut by_player: HashMap<(Platform, String), PlayerWeek> = HashMap::new();
    for entry in entries
        .iter()
        .filter(|e| e.played_at >= since && e.played_at <= until)
    {
        by_player
            .entry((entry.platform, entry.player_name.to_lowercase()))
            .or_insert_with(|| PlayerWeek {
                player: entry.player_name.clone(),
                platform: entry.platform,
                ..Default::default()
            })
            .add(entry);
    }

    let mut standings: Vec<PlayerWeek> = by_player.into_values().collect();
    standings.sort_by(|a, b| {
        b.score()
            .total_cmp(&a.score())
            .then_with(|| a.player.cmp(&b.player))
    });

    WeeklySummary {
        since,
        until,
        standings,
    }
}

/// Standings for the window ending at `now`.
pub fn current_standings(db: &Database, now: DateTime<Utc>) -> Result<WeeklySummary> {
    let since = now - ChronoDuration::days(WINDOW_DAYS);
    let entries = db.history_since(since)?;
    Ok(summarize(&entries, since, now))
}

/// Posting opens Wednesday 16:00 UTC and stays open for the rest of the ISO
/// week, so a failed post is retried on later checks.
pub fn is_posting_due(now: DateTime<Utc>) -> bool {
    let day = now.weekday().num_days_from_monday();
    let open_day = POST_WEEKDAY.num_days_from_monday();
    day > open_day || (day == open_day && now.hour() >= POST_HOUR_UTC)
}

/// ISO week label, e.g. `2026-W42`.
pub fn week_key(now: DateTime<Utc>) -> String {
    let week = now.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Post the weekly summary if posting is due and this week has not been
/// posted yet. Returns whether a post went out.
pub async fn maybe_post_weekly(
    db: &Database,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !is_posting_due(now) {
        return Ok(false);
    }
    let key = week_key(now);
    if db.weekly_posted(&key)? {
        return Ok(false);
    }

    let summary = current_standings(db, now)?;
    if summary.standings.is_empty() {
        info!("No matches in the last {} days, skipping weekly summary", WINDOW_DAYS);
        db.mark_weekly_posted(&key)?;
        return Ok(false);
    }

    notifier.send_weekly(&summary).await?;
    db.mark_weekly_posted(&key)?;
    info!(
        "Weekly summary {} posted ({} players)",
        key,
        summary.standings.len()
    );
    Ok(true)
}

/// Periodic check that posts the weekly summary; exits when `cancel` fires.
pub async fn run_weekly_task(db: Database, notifier: Arc<dyn Notifier>, cancel: CancellationToken) {
    run_weekly_loop(db, notifier, cancel, Utc::now).await
}

async fn run_weekly_loop<C>(
    db: Database,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
    clock: C,
) where
    C: Fn() -> DateTime<Utc>,
{
    let mut interval = tokio::time::interval(CHECK_EVERY);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = maybe_post_weekly(&db, notifier.as_ref(), clock()) => {
                if let Err(e) = res {
                    error!("Weekly summary failed: {:#}", e);
                }
            }
        }
    }
    info!("Weekly summary task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MatchCategory, MatchRecord, MatchSummary, ParticipantStats};
    use crate::notifier::DeliveryError;
    use crate::roster::{Platform, TrackedPlayer};
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn entry(player: &str, place: u32, kills: u32, damage: f64, at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            player_name: player.into(),
            platform: Platform::Steam,
            match_id: format!("{}-{}", player, at.timestamp()),
            category: "NORMAL".into(),
            played_at: at,
            stats: ParticipantStats {
                name: player.into(),
                win_place: place,
                kills,
                damage_dealt: damage,
                time_survived_secs: 600.0,
                ..Default::default()
            },
        }
    }

    fn wednesday_16() -> DateTime<Utc> {
        // 2026-10-14 is a Wednesday
        Utc.with_ymd_and_hms(2026, 10, 14, 16, 5, 0).unwrap()
    }

    #[derive(Default)]
    struct RecordingNotifier {
        weekly: Mutex<Vec<WeeklySummary>>,
        attempts: Mutex<u32>,
        failures_left: Mutex<u32>,
    }

    impl RecordingNotifier {
        fn failing(times: u32) -> Self {
            RecordingNotifier {
                failures_left: Mutex::new(times),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, _record: &MatchRecord) -> Result<(), DeliveryError> {
            Ok(())
        }

        async fn send_weekly(&self, summary: &WeeklySummary) -> Result<(), DeliveryError> {
            *self.attempts.lock().unwrap() += 1;
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(DeliveryError::Timeout(Duration::from_secs(1)));
            }
            self.weekly.lock().unwrap().push(summary.clone());
            Ok(())
        }
    }

    #[test]
    fn test_summarize_aggregates_and_scores() {
        let now = wednesday_16();
        let entries = vec![
            entry("Alice", 1, 4, 400.0, now - ChronoDuration::days(1)),
            entry("alice", 8, 2, 200.0, now - ChronoDuration::days(2)),
            entry("Bob", 20, 0, 50.0, now - ChronoDuration::days(1)),
            entry("Bob", 1, 9, 900.0, now - ChronoDuration::days(9)),
        ];
        let summary = summarize(&entries, now - ChronoDuration::days(7), now);
        assert_eq!(summary.standings.len(), 2);

        let alice = &summary.standings[0];
        assert_eq!(alice.player, "Alice");
        assert_eq!(alice.matches, 2);
        assert_eq!(alice.wins, 1);
        assert_eq!(alice.top5, 1);
        assert_eq!(alice.top10, 2);
        assert_eq!(alice.best_kills, 4);
        assert_relative_eq!(alice.avg_kills(), 3.0);
        assert_relative_eq!(alice.avg_damage(), 300.0);
        assert_relative_eq!(alice.win_rate(), 50.0);
        // 3*100 + 300*0.5 + 500 + 100 + 2*50 + 10*10
        assert_relative_eq!(alice.score(), 1250.0);

        let bob = &summary.standings[1];
        assert_eq!(bob.matches, 1);
        assert_eq!(bob.wins, 0);
    }

    #[test]
    fn test_same_name_on_other_platform_ranked_separately() {
        let now = wednesday_16();
        let mut console = entry("Alice", 1, 5, 500.0, now - ChronoDuration::days(1));
        console.platform = Platform::Xbox;
        let entries = vec![entry("Alice", 9, 1, 100.0, now - ChronoDuration::days(1)), console];
        let summary = summarize(&entries, now - ChronoDuration::days(7), now);
        assert_eq!(summary.standings.len(), 2);
        assert_eq!(summary.standings[0].platform, Platform::Xbox);
        assert_eq!(summary.standings[1].platform, Platform::Steam);
    }

    #[test]
    fn test_posting_due_and_week_key() {
        let opens = Utc.with_ymd_and_hms(2026, 10, 14, 16, 0, 0).unwrap();
        assert!(is_posting_due(opens));
        assert!(is_posting_due(wednesday_16() + ChronoDuration::hours(1)));
        // Sunday night is still the same ISO week
        assert!(is_posting_due(Utc.with_ymd_and_hms(2026, 10, 18, 23, 59, 0).unwrap()));
        assert!(!is_posting_due(opens - ChronoDuration::minutes(1)));
        assert!(!is_posting_due(Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap()));
        assert_eq!(week_key(wednesday_16()), "2026-W42");
    }

    fn seeded_db(now: DateTime<Utc>) -> Database {
        let db = Database::open_in_memory().unwrap();
        let record = MatchRecord {
            match_id: "m1".into(),
            player: TrackedPlayer::new("Alice", Platform::Steam),
            played_at: Some(now - ChronoDuration::hours(5)),
            summary: MatchSummary {
                game_mode: "solo".into(),
                match_type: "official".into(),
                is_custom: false,
                map_name: "Erangel_Main".into(),
                duration_secs: 1500,
                category: MatchCategory::Normal { match_type: None },
                participants: vec![ParticipantStats {
                    name: "Alice".into(),
                    win_place: 2,
                    kills: 6,
                    ..Default::default()
                }],
            },
        };
        db.record_history(&record).unwrap();
        db
    }

    #[tokio::test]
    async fn test_weekly_posts_once_per_week() {
        let now = wednesday_16();
        let db = seeded_db(now);
        let notifier = RecordingNotifier::default();

        assert!(maybe_post_weekly(&db, &notifier, now).await.unwrap());
        assert!(!maybe_post_weekly(&db, &notifier, now + ChronoDuration::minutes(30))
            .await
            .unwrap());
        let sent = notifier.weekly.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].standings[0].player, "Alice");
    }

    #[tokio::test]
    async fn test_weekly_outside_window_does_nothing() {
        let now = wednesday_16() - ChronoDuration::hours(3);
        let db = seeded_db(now);
        let notifier = RecordingNotifier::default();
        assert!(!maybe_post_weekly(&db, &notifier, now).await.unwrap());
        assert!(notifier.weekly.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_weekly_failed_delivery_is_retried() {
        let now = wednesday_16();
        let db = seeded_db(now);
        let notifier = RecordingNotifier::failing(1);
        assert!(maybe_post_weekly(&db, &notifier, now).await.is_err());
        assert!(!db.weekly_posted(&week_key(now)).unwrap());

        // two hours later the week is still unposted and due
        let later = now + ChronoDuration::hours(2);
        assert!(maybe_post_weekly(&db, &notifier, later).await.unwrap());
        assert!(db.weekly_posted(&week_key(later)).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_weekly_loop_retries_after_failed_post() {
        let base = wednesday_16();
        let db = seeded_db(base);
        let notifier = Arc::new(RecordingNotifier::failing(1));
        let cancel = CancellationToken::new();

        let started = tokio::time::Instant::now();
        let clock = move || base + ChronoDuration::from_std(started.elapsed()).unwrap();
        let task = tokio::spawn(run_weekly_loop(
            db.clone(),
            notifier.clone(),
            cancel.clone(),
            clock,
        ));

        // ticks at 0, 10 and 20 minutes: fail, post, already posted
        tokio::time::sleep(Duration::from_secs(25 * 60)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(*notifier.attempts.lock().unwrap(), 2);
        assert_eq!(notifier.weekly.lock().unwrap().len(), 1);
        assert!(db.weekly_posted(&week_key(base)).unwrap());
    }
}
