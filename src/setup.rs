use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::config::FileConfig;

pub const PLAYERS_TEMPLATE: &str = "\
# Add player names here (one per line)
# Format: PlayerName or PlayerName,platform
# Platforms: steam, psn, xbox, kakao, stadia, console
#
# Examples:
# PlayerName1
# PlayerName2,steam
# ConsolePlayer,xbox
";

pub const NEXT_STEPS: &str = "\
Next steps:
  1. Get a PUBG API key from https://developer.pubg.com/ and set `pubg_api_key`
  2. Create a bot at https://discord.com/developers/applications and set `discord_token`
  3. Invite the bot with the 'Send Messages' and 'Embed Links' permissions
  4. Copy the target channel id (Developer Mode > right click > Copy ID) into `discord_channel_id`
  5. Add the players to track to the players file
  6. Start the tracker with `pubg-match-notifier run`";

#[derive(Debug, Default, PartialEq)]
pub struct InitReport {
    pub created: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
}

/// Write `contents` to `path` unless something already exists there.
fn create_if_absent(path: &Path, contents: &str) -> Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to create {}", path.display())),
    }
}

/// Scaffold the config file and players list. Existing files are never
/// touched, so running this twice is harmless.
pub fn initialize(config_path: &Path, players_path: &Path) -> Result<InitReport> {
    let config_json = serde_json::to_string_pretty(&FileConfig::default())?;
    let mut report = InitReport::default();

    for (path, contents) in [
        (config_path, format!("{}\n", config_json)),
        (players_path, PLAYERS_TEMPLATE.to_string()),
    ] {
        if create_if_absent(path, &contents)? {
            report.created.push(path.to_path_buf());
        } else {
            report.kept.push(path.to_path_buf());
        }
    }
    Ok(report)
}
