//! pulsewatch - HTTP uptime checks on a schedule.
//!
//! ```text
//! pulsewatch add https://example.com --interval 60
//! pulsewatch run
//! ```

mod config;
mod database;
mod error;
mod monitoring;
mod pool;
mod targets;
mod validation;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::database::models::TargetUpdate;
use crate::monitoring::{AddressGuard, CheckPipeline, CheckScheduler, DnsAddressGuard, HttpProber};
use crate::targets::TargetService;

#[derive(Parser)]
#[command(name = "pulsewatch", version, about = "Scheduled HTTP uptime checks")]
struct Cli {
    /// Config file to use (created with defaults if missing)
    #[arg(long, short, env = "PULSEWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the check scheduler until interrupted
    Run,
    /// Register a new target
    Add {
        url: String,
        #[arg(long)]
        name: Option<String>,
        /// Seconds between checks
        #[arg(long)]
        interval: Option<u32>,
    },
    /// List all targets
    List,
    /// Show one target
    Show { id: i64 },
    /// Change a target's settings
    Update {
        id: i64,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        interval: Option<u32>,
    },
    /// Check a target now and record the result
    Check { id: i64 },
    /// Show recent checks for a target, newest first
    History {
        id: i64,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Command::Config = cli.command {
        print!("{config}");
        return Ok(());
    }

    let database = database::connect(&config.database).await?;
    let guard: Arc<dyn AddressGuard> = Arc::new(DnsAddressGuard::new());
    let prober = Arc::new(HttpProber::new(&config.probe, guard.clone())?);
    let pipeline = Arc::new(CheckPipeline::new(guard, prober));

    match cli.command {
        Command::Run => {
            let shutdown = CancellationToken::new();
            let scheduler = CheckScheduler::new(database, pipeline, &config.scheduler).spawn(shutdown.clone());

            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            info!("Shutdown signal received, waiting for in-flight checks");
            shutdown.cancel();
            scheduler.await.context("scheduler task failed")?;
            info!("Scheduler stopped");
        }
        command => {
            let service = TargetService::new(database, pipeline);
            run_target_command(&service, command).await?;
        }
    }

    Ok(())
}

async fn run_target_command(service: &TargetService, command: Command) -> Result<()> {
    match command {
        Command::Add { url, name, interval } => {
            print_json(&service.register(&url, name.as_deref(), interval).await?)
        }
        Command::List => print_json(&service.list().await?),
        Command::Show { id } => print_json(&service.get(id).await?),
        Command::Update { id, url, name, active, interval } => {
            let update = TargetUpdate { url, name, is_active: active, check_interval_seconds: interval };
            if update.is_empty() {
                bail!("nothing to update, pass at least one of --url, --name, --active, --interval");
            }
            print_json(&service.update(id, update).await?)
        }
        Command::Check { id } => print_json(&service.check_now(id).await?),
        Command::History { id, limit } => print_json(&service.history(id, limit).await?),
        Command::Run | Command::Config => bail!("not a target command"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
