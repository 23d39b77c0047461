use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rental_dispatch::api::{start_api_server, ApiState};
use rental_dispatch::config::{Config, ConfigManager, FileConfigManager};
use rental_dispatch::cycle::{CycleOutcome, CycleScheduler, CycleSettings};
use rental_dispatch::notify::NotificationManager;
use rental_dispatch::sources::build_sources;
use rental_dispatch::storage::{ApplicationStore, SqliteApplicationStore};

#[derive(Parser, Debug)]
#[command(
    name = "rental-dispatch",
    about = "Discover rental listings and apply to each one exactly once",
    version
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run cycles on a timer until Ctrl-C (default command)
    Run(RunArgs),
    /// Run a single cycle and print the statistics
    Once,
    /// Show persisted applications and recent events
    Stats(StatsArgs),
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Override the configured interval, e.g. "30m" or "1h 15m"
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Number of recent events to show
    #[arg(long, default_value_t = 20)]
    events: u32,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn load_config(manager: &FileConfigManager) -> anyhow::Result<Config> {
    manager
        .load_config()
        .await
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("Failed to load {}", manager.path().display()))
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteApplicationStore>> {
    let store = SqliteApplicationStore::open(&config.storage.database_url)
        .await
        .map_err(|e| anyhow!(e))
        .context("Failed to open application store")?;
    Ok(Arc::new(store))
}

async fn build_scheduler(config: &Config) -> anyhow::Result<Arc<CycleScheduler>> {
    let store = open_store(config).await?;
    let sources = build_sources(config).map_err(|e| anyhow!(e))?;
    let notifier = NotificationManager::from_config(&config.notifications).map_err(|e| anyhow!(e))?;

    Ok(Arc::new(CycleScheduler::new(
        sources,
        store,
        Arc::new(notifier),
        CycleSettings::from_config(config),
    )))
}

async fn run(config: Config, args: RunArgs) -> anyhow::Result<()> {
    let interval = args.interval.unwrap_or(config.schedule.interval);
    let scheduler = build_scheduler(&config).await?;

    scheduler.start(interval).await;

    if config.api.enabled {
        let state = ApiState {
            scheduler: scheduler.clone(),
            interval,
        };
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = start_api_server(state, port).await {
                error!("API server stopped: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested, waiting for the current cycle to finish");

    scheduler.shutdown().await;
    info!("Stopped");
    Ok(())
}

async fn once(config: Config) -> anyhow::Result<()> {
    let scheduler = build_scheduler(&config).await?;

    let outcome = scheduler.run_cycle().await;
    scheduler.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&scheduler.statistics().await)?);
    if let CycleOutcome::Failed(reason) = outcome {
        bail!("Cycle failed: {}", reason);
    }
    Ok(())
}

async fn stats(config: Config, args: StatsArgs) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    let count = store.application_count().await.map_err(|e| anyhow!(e))?;
    println!("Applications recorded: {}", count);

    let events = store.recent_events(args.events).await.map_err(|e| anyhow!(e))?;
    for event in events {
        println!(
            "{} {:<7} {}{}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.level,
            event.message,
            event.listing_id.map(|id| format!(" [{}]", id)).unwrap_or_default()
        );
    }

    store.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let manager = FileConfigManager::new(cli.config);

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::InitConfig { force } => {
            if manager.path().exists() && !force {
                bail!("{} already exists, pass --force to overwrite", manager.path().display());
            }
            manager.create_default_config().await.map_err(|e| anyhow!(e))?;
            println!("Wrote {}", manager.path().display());
            Ok(())
        }
        Command::Run(args) => run(load_config(&manager).await?, args).await,
        Command::Once => once(load_config(&manager).await?).await,
        Command::Stats(args) => stats(load_config(&manager).await?, args).await,
    }
}
