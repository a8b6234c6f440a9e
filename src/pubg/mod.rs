pub mod client;
pub mod limiter;
pub mod transport;

pub use client::PubgClient;
pub use transport::{ApiTransport, ReqwestTransport};

use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::MatchRecord;
use crate::roster::TrackedPlayer;

/// Result of asking for a player's latest match.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(MatchRecord),
    /// Unknown player, no recent matches, or the match is gone.
    NotFound,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{context}: gave up after {attempts} attempt(s): {reason}")]
    Transient {
        context: String,
        attempts: u32,
        reason: String,
    },
    #[error("{context}: unreadable response: {reason}")]
    Decode { context: String, reason: String },
}

/// Anything that can report a player's most recent match.
#[async_trait]
pub trait MatchSource: Send + Sync {
    async fn fetch_latest_match(&self, player: &TrackedPlayer) -> Result<FetchOutcome, FetchError>;

    /// Called between cycles after the roster was edited.
    fn roster_changed(&self, _roster: &[TrackedPlayer]) {}
}
