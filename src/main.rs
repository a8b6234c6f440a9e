use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod commands;
mod config;
mod dashboard;
mod db;
mod notifier;
mod pubg;
mod roster;
mod setup;
mod tracker;

use commands::{gateway::run_command_listener, CommandDesk};
use config::{Cli, Command, InitArgs, RunArgs, Settings};
use dashboard::AppState;
use db::Database;
use notifier::{DiscordNotifier, Notifier};
use pubg::{PubgClient, ReqwestTransport};
use roster::RosterStore;
use tracker::{run_weekly_task, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Init(args) => run_init(&args),
        Command::Run(args) => run_tracker(args).await,
    }
}

fn run_init(args: &InitArgs) -> Result<()> {
    let report = setup::initialize(&args.config, &args.players)?;
    for path in &report.created {
        info!("Created {}", path.display());
    }
    for path in &report.kept {
        info!("{} already exists, leaving it untouched", path.display());
    }
    println!("{}", setup::NEXT_STEPS);
    Ok(())
}

async fn run_tracker(args: RunArgs) -> Result<()> {
    let settings = Settings::load(&args.config)
        .with_context(|| format!("Invalid configuration in {}", args.config.display()))?;
    let roster = roster::load_roster(&args.players)
        .with_context(|| format!("Invalid players file {}", args.players.display()))?;
    if roster.is_empty() {
        if args.no_commands {
            bail!(
                "No players found in {}. Add one player per line and run again.",
                args.players.display()
            );
        }
        warn!(
            "No players found in {}. Add some with !addplayer <name> in Discord.",
            args.players.display()
        );
    }

    info!("Tracking {} player(s)", roster.len());
    for (idx, player) in roster.iter().enumerate() {
        info!("  {}. {}", idx + 1, player);
    }
    info!(
        "Check interval {:?}, request delay {:?}, max retries {}, channel {}, weekly channel {}",
        settings.poll.interval,
        settings.poll.request_delay,
        settings.poll.max_retries,
        settings.discord_channel_id,
        settings.weekly_channel_id
    );
    if let Some(warning) = settings.poll.overlap_warning(roster.len()) {
        warn!("{}", warning);
    }

    // Open database
    let db = Database::open(&args.database_path)?;
    info!("Database opened: {}", args.database_path);

    let transport = Arc::new(ReqwestTransport::new(&settings.pubg_api_key)?);
    let client = PubgClient::new(transport, &settings.api_base_url, &settings.poll, &roster);
    let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::new(
        &settings.discord_token,
        settings.discord_channel_id,
        settings.weekly_channel_id,
    ));
    let roster_store = Arc::new(RosterStore::new(args.players.clone(), roster.clone()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl+C received, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            cancel.cancel();
        });
    }

    let scheduler = Scheduler::new(
        roster,
        Arc::new(client),
        db.clone(),
        notifier.clone(),
        settings.poll.interval,
    )
    .with_roster_updates(roster_store.subscribe());

    if !args.no_commands {
        let desk = Arc::new(CommandDesk::new(roster_store, db.clone(), notifier.clone()));
        let token = settings.discord_token.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_command_listener(&token, desk, cancel).await {
                error!("Command listener stopped: {:#}", e);
            }
        });
    }

    if !args.no_status {
        let addr: SocketAddr = args.status_addr.parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Status API listening on http://{}", addr);
        let app = dashboard::router(AppState {
            db: db.clone(),
            status: scheduler.subscribe(),
        });
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!("Status API stopped: {}", e);
            }
        });
    }

    let weekly = tokio::spawn(run_weekly_task(db, notifier, cancel.clone()));

    // Runs until Ctrl+C
    scheduler.run(cancel).await;
    weekly.await?;

    info!("Tracker stopped");
    Ok(())
}
