use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

use crate::roster::{Platform, TrackedPlayer};

/// Rows kept in `match_history`; older rows are pruned on insert.
pub const MAX_HISTORY_ROWS: i64 = 500;
/// Match ids kept in `posted_matches`.
pub const MAX_POSTED_MATCHES: i64 = 500;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Last-seen index ───────────────────────────────────────────────────────

    /// True when nothing is recorded for `player` or the recorded match differs.
    pub fn is_new(&self, player: &TrackedPlayer, match_id: &str) -> Result<bool> {
        Ok(self.last_seen_for(player)?.as_deref() != Some(match_id))
    }

    /// Store `match_id` as the last announced match for `player`.
    pub fn record(&self, player: &TrackedPlayer, match_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO last_seen (player_key, match_id, recorded_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(player_key) DO UPDATE SET
                match_id=excluded.match_id,
                recorded_at=excluded.recorded_at
             WHERE last_seen.match_id != excluded.match_id",
            params![player.key(), match_id, Utc::now()],
        )?;
        Ok(())
    }

    pub fn last_seen_for(&self, player: &TrackedPlayer) -> Result<Option<String>> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT match_id FROM last_seen WHERE player_key = ?1",
                params![player.key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn list_last_seen(&self) -> Result<Vec<LastSeenEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT player_key, match_id, recorded_at FROM last_seen ORDER BY player_key",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LastSeenEntry {
                    player_key: row.get(0)?,
                    match_id: row.get(1)?,
                    recorded_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Posted matches ────────────────────────────────────────────────────────

    /// True once a summary for `match_id` has been delivered, whichever
    /// tracked player it was fetched for.
    pub fn was_posted(&self, match_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posted_matches WHERE match_id = ?1",
            params![match_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn mark_posted(&self, match_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO posted_matches (match_id, posted_at) VALUES (?1, ?2)",
            params![match_id, Utc::now()],
        )?;
        tx.execute(
            "DELETE FROM posted_matches WHERE rowid NOT IN (
                SELECT rowid FROM posted_matches ORDER BY posted_at DESC, rowid DESC LIMIT ?1
             )",
            params![MAX_POSTED_MATCHES],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── Match history ─────────────────────────────────────────────────────────

    /// Append one row per tracked participant of a delivered match.
    /// Returns the number of rows inserted.
    pub fn record_history(&self, record: &MatchRecord) -> Result<usize> {
        let played_at = record.played_at.unwrap_or_else(Utc::now);
        let category = record.summary.category.to_string();
        let platform = record.player.platform.as_str();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for stats in &record.summary.participants {
            let stats_json = serde_json::to_string(stats)?;
            inserted += tx.execute(
                "INSERT OR IGNORE INTO match_history
                    (player_name, platform, match_id, category, played_at, stats)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![stats.name, platform, record.match_id, category, played_at, stats_json],
            )?;
        }
        tx.execute(
            "DELETE FROM match_history WHERE id NOT IN (
                SELECT id FROM match_history ORDER BY played_at DESC, id DESC LIMIT ?1
             )",
            params![MAX_HISTORY_ROWS],
        )?;
        tx.commit()?;
        Ok(inserted)
    }

    pub fn history_since(&self, since: DateTime<Utc>) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT player_name, platform, match_id, category, played_at, stats
             FROM match_history WHERE played_at >= ?1 ORDER BY played_at",
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, DateTime<Utc>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(player_name, platform, match_id, category, played_at, stats)| {
                let platform = platform.parse::<Platform>().map_err(anyhow::Error::msg)?;
                let stats = serde_json::from_str(&stats)
                    .with_context(|| format!("Corrupt stats for {} in {}", player_name, match_id))?;
                Ok(HistoryEntry {
                    player_name,
                    platform,
                    match_id,
                    category,
                    played_at,
                    stats,
                })
            })
            .collect()
    }

    // ── Weekly posts ──────────────────────────────────────────────────────────

    pub fn weekly_posted(&self, week_key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM weekly_posts WHERE week_key = ?1",
            params![week_key],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn mark_weekly_posted(&self, week_key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO weekly_posts (week_key, posted_at) VALUES (?1, ?2)",
            params![week_key, Utc::now()],
        )?;
        Ok(())
    }
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS last_seen (
    player_key  TEXT    PRIMARY KEY,
    match_id    TEXT    NOT NULL,
    recorded_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS match_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    player_name TEXT    NOT NULL,
    platform    TEXT    NOT NULL,
    match_id    TEXT    NOT NULL,
    category    TEXT    NOT NULL,
    played_at   TEXT    NOT NULL,
    stats       TEXT    NOT NULL,
    UNIQUE (player_name, platform, match_id)
);

CREATE TABLE IF NOT EXISTS posted_matches (
    match_id    TEXT    PRIMARY KEY,
    posted_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS weekly_posts (
    week_key    TEXT    PRIMARY KEY,
    posted_at   TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_played_at ON match_history(played_at);
"#;
