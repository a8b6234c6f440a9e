pub mod card;

use async_trait::async_trait;
use chrono::Utc;
use serenity::all::{ChannelId, CreateEmbed, CreateEmbedFooter, CreateMessage, Timestamp};
use serenity::http::Http;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::models::MatchRecord;
use crate::pubg::client::short_id;
use crate::tracker::weekly::WeeklySummary;

use card::{match_card, weekly_cards, MatchCard};

/// Pause between consecutive posts of a multi-card message.
const MULTI_POST_GAP: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("discord rejected the message: {0}")]
    Discord(#[from] serenity::Error),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers formatted posts to the configured channel. Failures are always
/// returned so the caller can decide whether to mark a match as seen.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, record: &MatchRecord) -> Result<(), DeliveryError>;

    async fn send_weekly(&self, summary: &WeeklySummary) -> Result<(), DeliveryError>;
}

/// Posts embeds to Discord text channels through the REST API.
pub struct DiscordNotifier {
    http: Arc<Http>,
    channel: ChannelId,
    weekly_channel: ChannelId,
    timeout: Duration,
}

impl DiscordNotifier {
    /// Channel ids must be non-zero (checked by config validation).
    pub fn new(token: &str, channel_id: u64, weekly_channel_id: u64) -> Self {
        DiscordNotifier {
            http: Arc::new(Http::new(token)),
            channel: ChannelId::new(channel_id),
            weekly_channel: ChannelId::new(weekly_channel_id),
            timeout: Duration::from_secs(30),
        }
    }

    async fn post(&self, channel: ChannelId, card: &MatchCard) -> Result<(), DeliveryError> {
        let message = CreateMessage::new().embed(to_embed(card));
        let sent = tokio::time::timeout(self.timeout, channel.send_message(&self.http, message))
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))??;
        debug!("Posted message {} to channel {}", sent.id, channel);
        Ok(())
    }
}

pub(crate) fn to_embed(card: &MatchCard) -> CreateEmbed {
    card.fields.iter().fold(
        CreateEmbed::new()
            .title(&card.title)
            .description(&card.description)
            .colour(card.colour)
            .footer(CreateEmbedFooter::new(&card.footer))
            .timestamp(Timestamp::now()),
        |embed, f| embed.field(&f.name, &f.value, f.inline),
    )
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, record: &MatchRecord) -> Result<(), DeliveryError> {
        let card = match_card(record, Utc::now());
        self.post(self.channel, &card).await?;
        info!(
            "Posted match {} ({} tracked player(s))",
            short_id(&record.match_id),
            record.summary.participants.len()
        );
        Ok(())
    }

    async fn send_weekly(&self, summary: &WeeklySummary) -> Result<(), DeliveryError> {
        let cards = weekly_cards(summary);
        for (idx, card) in cards.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(MULTI_POST_GAP).await;
            }
            self.post(self.weekly_channel, card).await?;
        }
        info!("Posted weekly summary ({} card(s))", cards.len());
        Ok(())
    }
}
