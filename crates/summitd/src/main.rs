//! summitd — the Summit assignment daemon.
//!
//! Invoked by the scheduler once per cycle to run the trip assignment for a
//! window, and by the signup service for cancellations and FCFS signups.
//!
//! # Usage
//!
//! ```text
//! summitd --config /etc/summit/summit.toml run --start 2025-01-11
//! summitd cancel --trip 12 --participant 345
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use summit_core::{ParticipantId, SummitConfig, TripId, Window};
use summit_runner::{AssignmentRunner, WaitlistManager};
use summit_state::StateStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "summitd", about = "Summit trip assignment daemon")]
struct Cli {
    /// Path to summit.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the store path from the config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assignment for every trip dated inside the window.
    Run {
        /// First trip date (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// Last trip date; defaults to `start`.
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Fixed run seed, for replaying a run.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Promote from a trip's waitlist into a free seat.
    Promote {
        #[arg(long)]
        trip: u64,
    },

    /// Cancel a participant's signup and fill the freed seat.
    Cancel {
        #[arg(long)]
        trip: u64,
        #[arg(long)]
        participant: u64,
    },

    /// Sign up for an open first-come-first-served trip.
    Signup {
        #[arg(long)]
        trip: u64,
        #[arg(long)]
        participant: u64,
    },

    /// Move a waitlisted participant to a new position (0 = head).
    Reorder {
        #[arg(long)]
        trip: u64,
        #[arg(long)]
        participant: u64,
        #[arg(long)]
        rank: usize,
    },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SummitConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SummitConfig::default(),
    };
    if let Some(store) = cli.store {
        config.store.path = store;
    }

    init_tracing(&config, cli.json);

    match cli.command {
        Command::Run { start, end, seed } => {
            if seed.is_some() {
                config.lottery.seed = seed;
            }
            let window = Window::new(start, end.unwrap_or(start));
            anyhow::ensure!(window.start <= window.end, "window ends before it starts: {window}");

            let store = open_store(&config)?;
            let runner = AssignmentRunner::new(Arc::new(store), config.lottery.clone());
            let report = runner.run_assignment(&window).await?;
            println!("{}", report.to_json()?);
            if !report.is_clean() {
                info!(failed = report.failures.len(), "run finished with failed trips");
            }
        }
        Command::Promote { trip } => {
            let manager = manager(&config)?;
            match manager.promote_from_waitlist(TripId(trip)).await? {
                Some(unit) => println!("{}", serde_json::to_string(&unit)?),
                None => println!("null"),
            }
        }
        Command::Cancel { trip, participant } => {
            let manager = manager(&config)?;
            let promoted = manager
                .cancel(TripId(trip), ParticipantId(participant))
                .await?;
            println!("{}", serde_json::to_string(&promoted)?);
        }
        Command::Signup { trip, participant } => {
            let manager = manager(&config)?;
            let placement = manager
                .trip_or_wait(TripId(trip), ParticipantId(participant), epoch_secs())
                .await?;
            println!("{placement:?}");
        }
        Command::Reorder {
            trip,
            participant,
            rank,
        } => {
            let manager = manager(&config)?;
            let position = manager
                .reorder(TripId(trip), ParticipantId(participant), rank, epoch_secs())
                .await?;
            println!("{position}");
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the config's `[log] filter`.
fn init_tracing(config: &SummitConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(config: &SummitConfig) -> anyhow::Result<StateStore> {
    let path = &config.store.path;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let store = StateStore::open(path)?;
    info!(path = ?path, "state store opened");
    Ok(store)
}

fn manager(config: &SummitConfig) -> anyhow::Result<WaitlistManager> {
    Ok(WaitlistManager::new(Arc::new(open_store(config)?)))
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
