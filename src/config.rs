use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const PLACEHOLDER_API_KEY: &str = "YOUR_PUBG_API_KEY_HERE";
pub const PLACEHOLDER_DISCORD_TOKEN: &str = "YOUR_DISCORD_BOT_TOKEN_HERE";
pub const PLACEHOLDER_CHANNEL_ID: u64 = 123456789012345678;
pub const DEFAULT_API_BASE_URL: &str = "https://api.pubg.com";

/// Longest accepted `check_interval_seconds`.
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Longest accepted `request_delay`.
pub const MAX_REQUEST_DELAY: Duration = Duration::from_secs(10 * 60);

/// PUBG match tracker that posts new matches to Discord
#[derive(Parser, Debug, Clone)]
#[command(name = "pubg-match-notifier", version, about)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Poll the PUBG API and post new matches (default)
    Run(RunArgs),
    /// Create default config.json and players.txt if they do not exist
    Init(InitArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the JSON config file
    #[arg(long, env = "PUBG_BOT_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Path to the tracked players list
    #[arg(long, env = "PUBG_BOT_PLAYERS", default_value = "players.txt")]
    pub players: PathBuf,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "pubg_tracker.db")]
    pub database_path: String,

    /// Status API listen address
    #[arg(long, env = "STATUS_ADDR", default_value = "127.0.0.1:8080")]
    pub status_addr: String,

    /// Do not start the status API
    #[arg(long, env = "NO_STATUS", default_value = "false")]
    pub no_status: bool,

    /// Do not connect to the Discord gateway for `!` commands
    #[arg(long, env = "NO_COMMANDS", default_value = "false")]
    pub no_commands: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Path to the JSON config file to create
    #[arg(long, env = "PUBG_BOT_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Path to the players list to create
    #[arg(long, env = "PUBG_BOT_PLAYERS", default_value = "players.txt")]
    pub players: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config key `{0}` is missing")]
    MissingKey(&'static str),
    #[error("config key `{key}` is invalid: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("players file line {line}: {reason}")]
    Roster { line: usize, reason: String },
}

/// On-disk layout of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    pub pubg_api_key: String,
    pub discord_token: String,
    pub discord_channel_id: u64,
    pub check_interval_seconds: f64,
    pub request_delay: f64,
    pub max_retries: u32,
    /// Channel for the weekly summary; defaults to `discord_channel_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_channel_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            pubg_api_key: PLACEHOLDER_API_KEY.to_string(),
            discord_token: PLACEHOLDER_DISCORD_TOKEN.to_string(),
            discord_channel_id: PLACEHOLDER_CHANNEL_ID,
            check_interval_seconds: 150.0,
            request_delay: 7.0,
            max_retries: 3,
            weekly_channel_id: None,
            api_base_url: None,
        }
    }
}

/// Polling cadence shared by the scheduler and the API client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub request_delay: Duration,
    pub max_retries: u32,
}

impl PollConfig {
    /// Returns a warning when one pass over `roster_size` players cannot fit in
    /// a single interval.
    pub fn overlap_warning(&self, roster_size: usize) -> Option<String> {
        let players = u32::try_from(roster_size).unwrap_or(u32::MAX);
        let cycle_floor = self.request_delay.saturating_mul(players);
        if self.interval <= cycle_floor {
            Some(format!(
                "check interval {:?} does not exceed request delay x {} players ({:?}); cycles will run back to back",
                self.interval, roster_size, cycle_floor
            ))
        } else {
            None
        }
    }
}

/// Validated runtime settings, built once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub pubg_api_key: String,
    pub discord_token: String,
    pub discord_channel_id: u64,
    pub weekly_channel_id: u64,
    pub api_base_url: String,
    pub poll: PollConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(&value)
    }

    /// Extract settings key by key so every failure names the offending key.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let obj = value.as_object().ok_or(ConfigError::InvalidValue {
            key: "<root>",
            reason: "expected a JSON object".into(),
        })?;

        let pubg_api_key = require_str(obj, "pubg_api_key")?;
        if pubg_api_key == PLACEHOLDER_API_KEY {
            return Err(placeholder("pubg_api_key"));
        }
        let discord_token = require_str(obj, "discord_token")?;
        if discord_token == PLACEHOLDER_DISCORD_TOKEN {
            return Err(placeholder("discord_token"));
        }
        let discord_channel_id = require_channel_id(obj, "discord_channel_id")?;
        let weekly_channel_id = match obj.get("weekly_channel_id") {
            None | Some(Value::Null) => discord_channel_id,
            Some(_) => require_channel_id(obj, "weekly_channel_id")?,
        };

        let interval = require_secs(obj, "check_interval_seconds", false, MAX_CHECK_INTERVAL)?;
        let request_delay = require_secs(obj, "request_delay", true, MAX_REQUEST_DELAY)?;
        let max_retries = require_u64(obj, "max_retries")?;
        let max_retries = u32::try_from(max_retries).map_err(|_| ConfigError::InvalidValue {
            key: "max_retries",
            reason: format!("{} is too large", max_retries),
        })?;

        let api_base_url = match obj.get("api_base_url") {
            None | Some(Value::Null) => DEFAULT_API_BASE_URL.to_string(),
            Some(Value::String(s)) => {
                url::Url::parse(s).map_err(|e| ConfigError::InvalidValue {
                    key: "api_base_url",
                    reason: e.to_string(),
                })?;
                s.trim_end_matches('/').to_string()
            }
            Some(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "api_base_url",
                    reason: "expected a string".into(),
                })
            }
        };

        Ok(Settings {
            pubg_api_key,
            discord_token,
            discord_channel_id,
            weekly_channel_id,
            api_base_url,
            poll: PollConfig {
                interval,
                request_delay,
                max_retries,
            },
        })
    }
}

fn placeholder(key: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        reason: "still set to the placeholder value; edit config.json".into(),
    }
}

fn require<'a>(obj: &'a Map<String, Value>, key: &'static str) -> Result<&'a Value, ConfigError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(ConfigError::MissingKey(key)),
        Some(v) => Ok(v),
    }
}

fn require_str(obj: &Map<String, Value>, key: &'static str) -> Result<String, ConfigError> {
    let s = require(obj, key)?
        .as_str()
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            reason: "expected a string".into(),
        })?
        .trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must not be empty".into(),
        });
    }
    Ok(s.to_string())
}

fn require_u64(obj: &Map<String, Value>, key: &'static str) -> Result<u64, ConfigError> {
    let v = require(obj, key)?;
    // Channel ids are sometimes pasted as strings to dodge JS number precision.
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            reason: format!("expected a non-negative integer, got {}", v),
        })
}

fn require_channel_id(obj: &Map<String, Value>, key: &'static str) -> Result<u64, ConfigError> {
    let id = require_u64(obj, key)?;
    if id == PLACEHOLDER_CHANNEL_ID {
        return Err(placeholder(key));
    }
    if id == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must be non-zero".into(),
        });
    }
    Ok(id)
}

fn require_f64(obj: &Map<String, Value>, key: &'static str) -> Result<f64, ConfigError> {
    let v = require(obj, key)?;
    v.as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            reason: format!("expected a number, got {}", v),
        })
}

/// A number of seconds in `[0, max]`, or `(0, max]` when zero is not allowed.
/// Values that round to a zero `Duration` count as zero.
fn require_secs(
    obj: &Map<String, Value>,
    key: &'static str,
    allow_zero: bool,
    max: Duration,
) -> Result<Duration, ConfigError> {
    let secs = require_f64(obj, key)?;
    let invalid = |reason: String| ConfigError::InvalidValue { key, reason };
    if secs < 0.0 {
        return Err(invalid(format!("must be 0 or greater, got {}", secs)));
    }
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|e| invalid(format!("{} seconds is out of range: {}", secs, e)))?;
    if duration > max {
        return Err(invalid(format!(
            "must be at most {} seconds, got {}",
            max.as_secs(),
            secs
        )));
    }
    if !allow_zero && duration.is_zero() {
        return Err(invalid(format!("must be greater than 0, got {}", secs)));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "pubg_api_key": "key",
            "discord_token": "token",
            "discord_channel_id": 42,
            "check_interval_seconds": 150,
            "request_delay": 7.0,
            "max_retries": 3
        })
    }

    #[test]
    fn test_valid_config() {
        let s = Settings::from_value(&valid()).unwrap();
        assert_eq!(s.discord_channel_id, 42);
        assert_eq!(s.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(s.poll.interval, Duration::from_secs(150));
        assert_eq!(s.poll.request_delay, Duration::from_secs(7));
        assert_eq!(s.poll.max_retries, 3);
    }

    #[test]
    fn test_missing_key_is_named() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("max_retries");
        let err = Settings::from_value(&v).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("max_retries")));
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_malformed_key_is_named() {
        let mut v = valid();
        v["request_delay"] = json!("soon");
        let err = Settings::from_value(&v).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "request_delay", .. }));
    }

    #[test]
    fn test_non_positive_interval_rejected() {
        let mut v = valid();
        v["check_interval_seconds"] = json!(0);
        assert!(matches!(
            Settings::from_value(&v),
            Err(ConfigError::InvalidValue { key: "check_interval_seconds", .. })
        ));
    }

    #[test]
    fn test_out_of_range_interval_rejected() {
        for bad in [json!(1e300), json!(1e-10), json!(-5), json!(8 * 24 * 60 * 60)] {
            let mut v = valid();
            v["check_interval_seconds"] = bad.clone();
            assert!(
                matches!(
                    Settings::from_value(&v),
                    Err(ConfigError::InvalidValue { key: "check_interval_seconds", .. })
                ),
                "accepted interval {}",
                bad
            );
        }
    }

    #[test]
    fn test_request_delay_bounds() {
        let mut v = valid();
        v["request_delay"] = json!(0);
        assert_eq!(Settings::from_value(&v).unwrap().poll.request_delay, Duration::ZERO);

        v["request_delay"] = json!(1e300);
        assert!(matches!(
            Settings::from_value(&v),
            Err(ConfigError::InvalidValue { key: "request_delay", .. })
        ));
    }

    #[test]
    fn test_fractional_interval_kept() {
        let mut v = valid();
        v["check_interval_seconds"] = json!(0.5);
        assert_eq!(
            Settings::from_value(&v).unwrap().poll.interval,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_weekly_channel_defaults_to_match_channel() {
        assert_eq!(Settings::from_value(&valid()).unwrap().weekly_channel_id, 42);

        let mut v = valid();
        v["weekly_channel_id"] = json!("77");
        assert_eq!(Settings::from_value(&v).unwrap().weekly_channel_id, 77);

        v["weekly_channel_id"] = json!(0);
        assert!(matches!(
            Settings::from_value(&v),
            Err(ConfigError::InvalidValue { key: "weekly_channel_id", .. })
        ));
    }

    #[test]
    fn test_placeholders_rejected() {
        let mut v = valid();
        v["pubg_api_key"] = json!(PLACEHOLDER_API_KEY);
        assert!(matches!(
            Settings::from_value(&v),
            Err(ConfigError::InvalidValue { key: "pubg_api_key", .. })
        ));

        let mut v = valid();
        v["discord_channel_id"] = json!(PLACEHOLDER_CHANNEL_ID);
        assert!(matches!(
            Settings::from_value(&v),
            Err(ConfigError::InvalidValue { key: "discord_channel_id", .. })
        ));
    }

    #[test]
    fn test_channel_id_as_string() {
        let mut v = valid();
        v["discord_channel_id"] = json!("998877");
        assert_eq!(Settings::from_value(&v).unwrap().discord_channel_id, 998877);
    }

    #[test]
    fn test_base_url_override() {
        let mut v = valid();
        v["api_base_url"] = json!("http://localhost:9000/");
        assert_eq!(
            Settings::from_value(&v).unwrap().api_base_url,
            "http://localhost:9000"
        );
    }

    #[test]
    fn test_overlap_warning() {
        let poll = PollConfig {
            interval: Duration::from_secs(20),
            request_delay: Duration::from_secs(7),
            max_retries: 3,
        };
        assert!(poll.overlap_warning(2).is_none());
        assert!(poll.overlap_warning(3).is_some());
        // roster sizes beyond u32 saturate instead of wrapping to a small count
        assert!(poll.overlap_warning(u32::MAX as usize + 2).is_some());
    }

    #[test]
    fn test_default_file_config_round_trips_as_placeholder() {
        let json = serde_json::to_value(FileConfig::default()).unwrap();
        assert!(matches!(
            Settings::from_value(&json),
            Err(ConfigError::InvalidValue { key: "pubg_api_key", .. })
        ));
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["pubg-match-notifier"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.run.config, PathBuf::from("config.json"));

        let cli = Cli::parse_from(["pubg-match-notifier", "init", "--players", "squad.txt"]);
        match cli.command {
            Some(Command::Init(args)) => assert_eq!(args.players, PathBuf::from("squad.txt")),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
