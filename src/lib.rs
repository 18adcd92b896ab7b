//! KindSync: an offline-first analytics sync engine for children's learning apps.
//!
//! Behavioral and engagement signals are screened for personal data at the edge,
//! queued durably on the device, grouped into prioritized batches and sent to an
//! ingestion endpoint when network and battery conditions allow.
//!
//! # Pipeline
//!
//! 1. [`plugins::compliance`] admits or rejects raw events. Nothing identifying is stored.
//! 2. [`core::store`] keeps records and batches in SQLite; every transition is a
//!    transaction routed through [`core::broker::DbBroker`].
//! 3. [`plugins::network`] derives a sync strategy from connectivity and battery.
//! 4. [`plugins::planner`] claims pending records into batches sized for that strategy.
//! 5. [`plugins::coordinator`] transmits, and [`plugins::retry`] schedules backoff.
//! 6. [`plugins::health`] summarizes queue state for dashboards.
//!
//! # Examples
//!
//! ```bash
//! kindsync network set --quality high --battery high
//! echo '{"sessionId":"01HZX3V7K2M4N5P6Q7R8S9T0VW","category":"empathy","indicators":{"score":4}}' \
//!   | kindsync submit
//! KINDSYNC_ENDPOINT=https://ingest.example.org/v1/batches kindsync sync
//! kindsync status
//! ```

pub mod core;
pub mod plugins;

use crate::core::error::SyncError;
use crate::core::store::Store;
use crate::core::time::{Clock, SystemClock};
use crate::plugins::compliance::{Admission, RawEvent};
use crate::plugins::coordinator::{CycleReport, SyncContext, SyncCoordinator};
use crate::plugins::health::{HealthReport, HealthStatus};
use crate::plugins::network::{self, FileProbe};
use crate::plugins::transport::{HttpTransport, OfflineTransport, Transport};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable overriding the default data root.
pub const HOME_ENV: &str = "KINDSYNC_HOME";
const DEFAULT_ROOT: &str = ".kindsync";

#[derive(Parser, Debug)]
#[clap(
    name = "kindsync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Privacy-preserving offline analytics sync"
)]
struct Cli {
    /// Data directory (defaults to $KINDSYNC_HOME or ./.kindsync).
    #[clap(long, global = true)]
    root: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Screen and enqueue one JSON event (from a file or stdin).
    Submit {
        #[clap(long)]
        file: Option<PathBuf>,
    },
    /// Run one sync cycle now, ignoring the cycle period.
    Sync {
        #[clap(long)]
        json: bool,
    },
    /// Run the sync loop.
    Run {
        /// Stop after this many cycles.
        #[clap(long)]
        cycles: Option<u64>,
    },
    /// Report queue health.
    Status {
        #[clap(long)]
        json: bool,
    },
    /// Turn analytics collection on.
    Enable,
    /// Turn analytics collection off and delete all local analytics data.
    Disable,
    /// Observed network conditions
    Network(network::NetworkCli),
    /// Recover batches left in flight by a crashed process.
    Recover,
    /// Aggregate rejection counts by reason.
    Counters,
}

fn resolve_root(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(HOME_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT))
}

fn open_coordinator(
    root: &Path,
    clock: Arc<dyn Clock>,
    online: bool,
) -> Result<SyncCoordinator, SyncError> {
    let ctx = SyncContext::open(root, clock)?;
    let transport: Box<dyn Transport> = if online {
        Box::new(HttpTransport::new(&ctx.config.transport)?)
    } else {
        Box::new(OfflineTransport)
    };
    Ok(SyncCoordinator::new(
        ctx,
        Box::new(FileProbe::new(root)),
        transport,
    ))
}

fn read_event(file: Option<PathBuf>) -> Result<RawEvent, SyncError> {
    let content = match file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&content)?)
}

fn print_cycle(report: &CycleReport) {
    println!(
        "{} {} planned={} delivered={} retrying={} failed={} deferred={}",
        "▸".bright_green(),
        report.strategy.as_str().bright_white(),
        report.planned,
        report.succeeded,
        report.failed_retryable,
        report.failed_terminal,
        report.deferred
    );
    if report.recovered > 0 {
        println!("  recovered {} interrupted batch(es)", report.recovered);
    }
    if !report.analytics_enabled {
        println!("  analytics is disabled");
    }
}

fn print_health(report: &HealthReport) {
    let status = report.status.to_string();
    let status = match report.status {
        HealthStatus::Healthy => status.bright_green(),
        HealthStatus::Concerning => status.bright_yellow(),
        HealthStatus::Backlog => status.yellow(),
        HealthStatus::Unhealthy => status.bright_red(),
    };
    println!("status: {}", status.bold());
    println!("  pending batches: {}", report.pending_batches);
    println!("  failed batches:  {}", report.failed_batches);
    if report.terminal_batches > 0 {
        println!("  not retried:     {}", report.terminal_batches);
    }
    println!("  pending events:  {}", report.pending_events);
    for rec in &report.recommendations {
        println!("  {} {}", "•".bright_blue(), rec);
    }
}

pub fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();
    let root = resolve_root(cli.root);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Submit { file } => {
            let raw = read_event(file)?;
            let coordinator = open_coordinator(&root, clock, false)?;
            match coordinator.submit(&raw)? {
                Admission::Admitted(record) => println!("queued {}", record.id),
                Admission::Rejected(reason) => {
                    println!("{} {}", "rejected:".bright_red(), reason);
                }
                Admission::Disabled => println!("analytics is disabled; event dropped"),
            }
        }
        Command::Sync { json } => {
            let coordinator = open_coordinator(&root, clock, true)?;
            coordinator.start()?;
            let result = coordinator.sync_now();
            coordinator.shutdown()?;
            let report = result?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_cycle(&report);
            }
        }
        Command::Run { cycles } => {
            let coordinator = open_coordinator(&root, clock, true)?;
            let ran = coordinator.run(cycles)?;
            println!("ran {} cycle(s)", ran);
        }
        Command::Status { json } => {
            let coordinator = open_coordinator(&root, clock, false)?;
            let report = coordinator.health()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_health(&report);
            }
        }
        Command::Enable => {
            let coordinator = open_coordinator(&root, clock, false)?;
            coordinator.set_analytics_enabled(true)?;
            println!("analytics enabled");
        }
        Command::Disable => {
            let coordinator = open_coordinator(&root, clock, false)?;
            if let Some(purged) = coordinator.set_analytics_enabled(false)? {
                println!(
                    "analytics disabled; removed {} record(s) and {} batch(es)",
                    purged.records, purged.batches
                );
            }
        }
        Command::Network(network_cli) => {
            fs::create_dir_all(&root)?;
            network::run_network_cli(&root, clock.as_ref(), network_cli)?;
        }
        Command::Recover => {
            let coordinator = open_coordinator(&root, clock, false)?;
            let recovered = coordinator.start()?;
            coordinator.shutdown()?;
            println!("recovered {} orphaned batch(es)", recovered);
        }
        Command::Counters => {
            let store = Store::open(&root)?;
            let counts = store.rejection_counts()?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }
    Ok(())
}
