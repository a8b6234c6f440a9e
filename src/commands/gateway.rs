use anyhow::Result;
use async_trait::async_trait;
use serenity::all::{Client, Context, CreateMessage, EventHandler, GatewayIntents, Message, Ready};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{parse_command, CommandDesk, Reply};
use crate::notifier::to_embed;

struct Handler {
    desk: Arc<CommandDesk>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let reply = match parse_command(&msg.content) {
            Ok(None) => return,
            Err(usage) => Reply::Text(format!("❌ {}", usage)),
            Ok(Some(command)) => {
                // None outside guilds or when the guild is not cached yet
                let is_admin = msg
                    .author_permissions(&ctx)
                    .is_some_and(|p| p.administrator());
                info!(
                    "Command from {} (admin={}): {:?}",
                    msg.author.name, is_admin, command
                );
                self.desk.execute(command, is_admin).await
            }
        };

        let sent = match reply {
            Reply::Text(text) => msg.channel_id.say(&ctx.http, text).await,
            Reply::Card(card) => {
                msg.channel_id
                    .send_message(&ctx.http, CreateMessage::new().embed(to_embed(&card)))
                    .await
            }
        };
        if let Err(e) = sent {
            error!("Failed to reply in channel {}: {}", msg.channel_id, e);
        }
    }

    async fn ready(&self, _: Context, ready: Ready) {
        info!("Command listener connected as {}", ready.user.name);
        info!("Commands: !addplayer, !removeplayer, !listplayers, !testpost, !weeklynow");
    }
}

/// Connect to the Discord gateway and answer `!` commands until `cancel`
/// fires. Needs the Message Content intent enabled for the bot.
pub async fn run_command_listener(
    token: &str,
    desk: Arc<CommandDesk>,
    cancel: CancellationToken,
) -> Result<()> {
    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(token, intents)
        .event_handler(Handler { desk })
        .await?;
    let shards = client.shard_manager.clone();

    tokio::select! {
        res = client.start() => res?,
        _ = cancel.cancelled() => {
            info!("Stopping command listener");
            shards.shutdown_all().await;
        }
    }
    Ok(())
}
