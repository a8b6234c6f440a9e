use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::roster::{Platform, TrackedPlayer};

/// One tracked participant's line in a match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStats {
    pub name: String,
    /// Final placement (1 = winner)
    pub win_place: u32,
    pub kills: u32,
    pub damage_dealt: f64,
    pub assists: u32,
    /// Knock-downs inflicted
    pub dbnos: u32,
    pub headshot_kills: u32,
    /// Metres
    pub longest_kill: f64,
    pub revives: u32,
    pub heals: u32,
    pub boosts: u32,
    /// Metres
    pub walk_distance: f64,
    /// Metres
    pub ride_distance: f64,
    /// Metres
    pub swim_distance: f64,
    pub time_survived_secs: f64,
    pub death_type: String,
}

impl ParticipantStats {
    pub fn survival_minutes(&self) -> f64 {
        self.time_survived_secs / 60.0
    }

    pub fn distance_km(&self) -> f64 {
        (self.walk_distance + self.ride_distance + self.swim_distance) / 1000.0
    }

    pub fn headshot_percent(&self) -> f64 {
        if self.kills == 0 {
            0.0
        } else {
            self.headshot_kills as f64 / self.kills as f64 * 100.0
        }
    }
}

/// Coarse match classification used in post titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchCategory {
    Custom,
    Ranked,
    Arcade,
    /// Standard solo/duo/squad queue; `match_type` is kept when it is not
    /// one of the usual official/seasonal values.
    Normal { match_type: Option<String> },
    Unknown(String),
}

const ARCADE_KEYWORDS: [&str; 11] = [
    "war", "zombie", "training", "tdm", "conquest", "intense", "esports", "event", "lab",
    "arcade", "casual",
];
const NORMAL_MODES: [&str; 6] = ["solo", "solo-fpp", "duo", "duo-fpp", "squad", "squad-fpp"];

impl MatchCategory {
    pub fn classify(game_mode: &str, match_type: &str, is_custom: bool) -> Self {
        if is_custom {
            return MatchCategory::Custom;
        }
        let mode = game_mode.to_lowercase();
        let kind = match_type.to_lowercase();

        if kind.contains("competitive") || kind.contains("ranked") {
            return MatchCategory::Ranked;
        }
        if ARCADE_KEYWORDS.iter().any(|k| mode.contains(k)) {
            return MatchCategory::Arcade;
        }
        if NORMAL_MODES.contains(&mode.as_str()) {
            let match_type = match kind.as_str() {
                "official" | "seasonal" => None,
                _ => Some(match_type.to_string()),
            };
            return MatchCategory::Normal { match_type };
        }
        MatchCategory::Unknown(game_mode.to_string())
    }
}

impl fmt::Display for MatchCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchCategory::Custom => f.write_str("CUSTOM"),
            MatchCategory::Ranked => f.write_str("RANKED"),
            MatchCategory::Arcade => f.write_str("ARCADE"),
            MatchCategory::Normal { match_type: None } => f.write_str("NORMAL"),
            MatchCategory::Normal {
                match_type: Some(t),
            } => write!(f, "NORMAL ({})", t),
            MatchCategory::Unknown(mode) => write!(f, "UNKNOWN ({})", mode),
        }
    }
}

/// Match metadata plus every tracked participant's stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub game_mode: String,
    pub match_type: String,
    pub is_custom: bool,
    pub map_name: String,
    pub duration_secs: u64,
    pub category: MatchCategory,
    pub participants: Vec<ParticipantStats>,
}

impl MatchSummary {
    pub fn best_rank(&self) -> Option<u32> {
        self.participants.iter().map(|p| p.win_place).min()
    }
}

/// Latest match observed for a tracked player during a poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub player: TrackedPlayer,
    pub played_at: Option<DateTime<Utc>>,
    pub summary: MatchSummary,
}

/// Row of the last-seen index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastSeenEntry {
    pub player_key: String,
    pub match_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// One tracked player's result in a delivered match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub player_name: String,
    /// Shard of the match; participants of one match share it.
    pub platform: Platform,
    pub match_id: String,
    pub category: String,
    pub played_at: DateTime<Utc>,
    pub stats: ParticipantStats,
}
