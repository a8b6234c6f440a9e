//! `!` chat commands: roster editing, roster listing, a sample match post and
//! an on-demand weekly summary. Parsing and execution are independent of
//! Discord; `gateway` only moves messages in and replies out.

pub mod gateway;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::models::{MatchCategory, MatchRecord, MatchSummary, ParticipantStats};
use crate::db::Database;
use crate::notifier::card::{match_card, roster_card, MatchCard};
use crate::notifier::Notifier;
use crate::roster::{Platform, RosterStore, TrackedPlayer};
use crate::tracker::weekly::{current_standings, WINDOW_DAYS};

pub const PREFIX: char = '!';

#[derive(Debug, Clone, PartialEq)]
pub enum BotCommand {
    AddPlayer(TrackedPlayer),
    RemovePlayer {
        name: String,
        platform: Option<Platform>,
    },
    ListPlayers,
    /// Render a sample match card for a player (first roster entry if none).
    TestPost(Option<String>),
    WeeklyNow,
}

impl BotCommand {
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            BotCommand::AddPlayer(_) | BotCommand::RemovePlayer { .. } | BotCommand::WeeklyNow
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Card(MatchCard),
}

/// `Ok(None)` when `content` is not one of our commands. `Err` carries a
/// usage hint for a known command with bad arguments.
pub fn parse_command(content: &str) -> Result<Option<BotCommand>, String> {
    let Some(rest) = content.trim().strip_prefix(PREFIX) else {
        return Ok(None);
    };
    let mut words = rest.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match name.to_lowercase().as_str() {
        "addplayer" => {
            let (player, platform) = player_args(&args, "!addplayer PlayerName [platform]")?;
            BotCommand::AddPlayer(TrackedPlayer::new(player, platform.unwrap_or_default()))
        }
        "removeplayer" => {
            let (name, platform) = player_args(&args, "!removeplayer PlayerName [platform]")?;
            BotCommand::RemovePlayer { name, platform }
        }
        "listplayers" => BotCommand::ListPlayers,
        "testpost" => BotCommand::TestPost(args.first().map(|s| s.to_string())),
        "weeklynow" => BotCommand::WeeklyNow,
        _ => return Ok(None),
    };
    Ok(Some(command))
}

fn player_args(args: &[&str], usage: &str) -> Result<(String, Option<Platform>), String> {
    let (name, platform) = match args {
        [name] => (*name, None),
        [name, platform] => {
            let platform = platform
                .parse::<Platform>()
                .map_err(|e| format!("{}. Usage: {}", e, usage))?;
            (*name, Some(platform))
        }
        _ => return Err(format!("Usage: {}", usage)),
    };
    if name.contains(',') || name.starts_with('#') {
        return Err(format!("'{}' is not a valid player name", name));
    }
    Ok((name.to_string(), platform))
}

/// Executes parsed commands against the shared roster, history and notifier.
pub struct CommandDesk {
    roster: Arc<RosterStore>,
    db: Database,
    notifier: Arc<dyn Notifier>,
}

impl CommandDesk {
    pub fn new(roster: Arc<RosterStore>, db: Database, notifier: Arc<dyn Notifier>) -> Self {
        CommandDesk {
            roster,
            db,
            notifier,
        }
    }

    pub async fn execute(&self, command: BotCommand, is_admin: bool) -> Reply {
        if command.requires_admin() && !is_admin {
            return Reply::Text("❌ Only administrators can do this!".into());
        }

        match command {
            BotCommand::AddPlayer(player) => self.add_player(player),
            BotCommand::RemovePlayer { name, platform } => self.remove_player(&name, platform),
            BotCommand::ListPlayers => match self.roster.players() {
                Ok(players) if players.is_empty() => {
                    Reply::Text("📋 No players are currently being tracked.".into())
                }
                Ok(players) => Reply::Card(roster_card(&players)),
                Err(e) => Reply::Text(format!("❌ Could not read the roster: {}", e)),
            },
            BotCommand::TestPost(name) => self.sample_post(name),
            BotCommand::WeeklyNow => self.weekly_now().await,
        }
    }

    fn add_player(&self, player: TrackedPlayer) -> Reply {
        let shown = player.name.clone();
        match self.roster.add(player) {
            Ok(true) => Reply::Text(format!(
                "✅ Added `{}` to tracking list!\n📋 Total players: {}",
                shown,
                self.roster_len()
            )),
            Ok(false) => Reply::Text(format!("❌ Player `{}` is already being tracked!", shown)),
            Err(e) => {
                warn!("Failed to add {}: {:#}", shown, e);
                Reply::Text(format!("❌ Error saving player: {}", e))
            }
        }
    }

    fn remove_player(&self, name: &str, platform: Option<Platform>) -> Reply {
        match self.roster.remove(name, platform) {
            Ok(Some(removed)) => Reply::Text(format!(
                "✅ Removed `{}` from tracking!\n📋 Remaining players: {}",
                removed.name,
                self.roster_len()
            )),
            Ok(None) => Reply::Text(format!("❌ Player `{}` not found in tracking list!", name)),
            Err(e) => {
                warn!("Failed to remove {}: {:#}", name, e);
                Reply::Text(format!("❌ Error updating players file: {}", e))
            }
        }
    }

    fn roster_len(&self) -> usize {
        self.roster.players().map(|p| p.len()).unwrap_or_default()
    }

    fn sample_post(&self, name: Option<String>) -> Reply {
        let player = match name {
            Some(name) => TrackedPlayer::new(name, Platform::default()),
            None => match self.roster.players().ok().and_then(|p| p.into_iter().next()) {
                Some(first) => first,
                None => return Reply::Text("❌ No players being tracked!".into()),
            },
        };
        let now = Utc::now();
        Reply::Card(match_card(&sample_record(player, now), now))
    }

    async fn weekly_now(&self) -> Reply {
        let summary = match current_standings(&self.db, Utc::now()) {
            Ok(summary) => summary,
            Err(e) => return Reply::Text(format!("❌ Could not read match history: {}", e)),
        };
        if summary.standings.is_empty() {
            return Reply::Text(format!(
                "⚠️ No matches recorded in the last {} days",
                WINDOW_DAYS
            ));
        }
        match self.notifier.send_weekly(&summary).await {
            Ok(()) => {
                info!("Weekly summary posted on request");
                Reply::Text(format!(
                    "✅ Weekly summary posted ({} players)",
                    summary.standings.len()
                ))
            }
            Err(e) => Reply::Text(format!("❌ Error: {}", e)),
        }
    }
}

/// Fixed stats used to preview the match card layout.
fn sample_record(player: TrackedPlayer, now: chrono::DateTime<Utc>) -> MatchRecord {
    MatchRecord {
        match_id: "test-match-id-000000000000".into(),
        played_at: Some(now - ChronoDuration::minutes(30)),
        summary: MatchSummary {
            game_mode: "squad".into(),
            match_type: "official".into(),
            is_custom: false,
            map_name: "Baltic_Main".into(),
            duration_secs: 28 * 60,
            category: MatchCategory::Normal { match_type: None },
            participants: vec![ParticipantStats {
                name: player.name.clone(),
                win_place: 4,
                kills: 3,
                damage_dealt: 450.5,
                assists: 1,
                dbnos: 2,
                headshot_kills: 1,
                longest_kill: 187.3,
                revives: 1,
                heals: 3,
                boosts: 2,
                walk_distance: 2100.0,
                time_survived_secs: 24.5 * 60.0,
                ..Default::default()
            }],
        },
        player,
    }
}
