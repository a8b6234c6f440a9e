use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ConfigError;

/// PUBG API shard a player account lives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Used when a roster line names no platform.
    #[default]
    Steam,
    Psn,
    Xbox,
    Kakao,
    Stadia,
    Console,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Steam,
        Platform::Psn,
        Platform::Xbox,
        Platform::Kakao,
        Platform::Stadia,
        Platform::Console,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Steam => "steam",
            Platform::Psn => "psn",
            Platform::Xbox => "xbox",
            Platform::Kakao => "kakao",
            Platform::Stadia => "stadia",
            Platform::Console => "console",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown platform '{}'", s.trim()))
    }
}

/// A player identity polled every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedPlayer {
    pub name: String,
    pub platform: Platform,
}

impl TrackedPlayer {
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        TrackedPlayer {
            name: name.into(),
            platform,
        }
    }

    /// Storage key for the (name, platform) identity.
    pub fn key(&self) -> String {
        format!("{}:{}", self.platform, self.name)
    }

    /// Same account as `other`: platform equal, name equal ignoring case.
    pub fn same_account(&self, other: &TrackedPlayer) -> bool {
        self.platform == other.platform && self.name.eq_ignore_ascii_case(&other.name)
    }

    /// The players-file line for this player.
    pub fn roster_line(&self) -> String {
        if self.platform == Platform::default() {
            self.name.clone()
        } else {
            format!("{},{}", self.name, self.platform)
        }
    }
}

impl fmt::Display for TrackedPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.platform)
    }
}

/// Parse a roster: one `Name` or `Name,platform` per line, `#` comments and
/// blank lines ignored. File order is kept; repeated identities keep their
/// first position.
pub fn parse_roster(source: &str) -> Result<Vec<TrackedPlayer>, ConfigError> {
    let mut players = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let player = match parse_line(raw) {
            None => continue,
            Some(parsed) => parsed.map_err(|reason| ConfigError::Roster {
                line: line_no,
                reason,
            })?,
        };

        if seen.insert(player.clone()) {
            players.push(player);
        } else {
            warn!("Duplicate roster entry {} on line {}, ignoring", player, line_no);
        }
    }

    Ok(players)
}

/// `None` for blank and comment lines.
fn parse_line(raw: &str) -> Option<Result<TrackedPlayer, String>> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (name, platform) = match line.split_once(',') {
        Some((name, platform)) => match platform.parse::<Platform>() {
            Ok(platform) => (name.trim(), platform),
            Err(reason) => return Some(Err(reason)),
        },
        None => (line, Platform::default()),
    };
    if name.is_empty() {
        return Some(Err("player name is empty".into()));
    }
    Some(Ok(TrackedPlayer::new(name, platform)))
}

/// Read and parse the roster file at `path`.
pub fn load_roster(path: &Path) -> Result<Vec<TrackedPlayer>, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_roster(&source)
}

/// Roster shared by the command listener and the scheduler.
///
/// Edits are written to the players file first and only then published to
/// subscribers, so a failed write leaves both unchanged.
pub struct RosterStore {
    path: PathBuf,
    players: Mutex<Vec<TrackedPlayer>>,
    updates: watch::Sender<Vec<TrackedPlayer>>,
}

impl RosterStore {
    pub fn new(path: PathBuf, players: Vec<TrackedPlayer>) -> Self {
        let (updates, _) = watch::channel(players.clone());
        RosterStore {
            path,
            players: Mutex::new(players),
            updates,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<TrackedPlayer>> {
        self.updates.subscribe()
    }

    pub fn players(&self) -> Result<Vec<TrackedPlayer>> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<TrackedPlayer>>> {
        self.players
            .lock()
            .map_err(|_| anyhow!("roster mutex poisoned"))
    }

    /// Append `player` to the file. Returns false when the account is
    /// already tracked.
    pub fn add(&self, player: TrackedPlayer) -> Result<bool> {
        let mut players = self.lock()?;
        if players.iter().any(|p| p.same_account(&player)) {
            return Ok(false);
        }

        let existing = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let separator = if existing.is_empty() || existing.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{}{}", separator, player.roster_line()))
            .with_context(|| format!("Failed to update {}", self.path.display()))?;

        info!("Added {} to the roster ({} total)", player, players.len() + 1);
        players.push(player);
        self.updates.send_replace(players.clone());
        Ok(true)
    }

    /// Drop the first player named `name` (ignoring case), limited to
    /// `platform` when given. Comment lines in the file are kept.
    pub fn remove(&self, name: &str, platform: Option<Platform>) -> Result<Option<TrackedPlayer>> {
        let mut players = self.lock()?;
        let Some(idx) = players.iter().position(|p| {
            p.name.eq_ignore_ascii_case(name) && platform.map_or(true, |wanted| p.platform == wanted)
        }) else {
            return Ok(None);
        };
        let removed = players[idx].clone();

        let source = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let mut kept: String = source
            .lines()
            .filter(|line| !matches!(parse_line(line), Some(Ok(p)) if p.same_account(&removed)))
            .collect::<Vec<_>>()
            .join("\n");
        kept.push('\n');
        std::fs::write(&self.path, kept)
            .with_context(|| format!("Failed to update {}", self.path.display()))?;

        players.remove(idx);
        info!("Removed {} from the roster ({} left)", removed, players.len());
        self.updates.send_replace(players.clone());
        Ok(Some(removed))
    }
}
