//! fieldsync CLI - node maintenance and diagnostics
//!
//! Usage:
//!   fieldsync validate requests.json --history ledger.json --catalog reasons.json
//!   fieldsync events --data-dir ./node-data --status unreplayed
//!   fieldsync archive --data-dir ./node-data
//!   fieldsync seed --data-dir ./node-data --min 1200
//!   fieldsync simulate --facilities 3 --movements 8

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

mod commands;
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the consistency gate on a batch of stock card requests
    Validate {
        /// JSON array of stock card requests
        requests: PathBuf,

        /// JSON array of already recorded requests forming the ledger history
        #[arg(long)]
        history: Option<PathBuf>,

        /// Reason catalog (JSON, keyed by facility id)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Facility the batch belongs to (defaults to the configured one)
        #[arg(long)]
        facility: Option<Uuid>,
    },

    /// List stored events by status
    Events {
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = StatusFilter::Unreplayed)]
        status: StatusFilter,

        /// Sender facility for `pending` (defaults to the configured one)
        #[arg(long)]
        facility: Option<Uuid>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Run one archival pass
    Archive {
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        #[arg(long, default_value_t = 100)]
        page_size: usize,
    },

    /// Raise the local sequence counter above a peer's sequence
    Seed {
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        #[arg(long)]
        min: u64,
    },

    /// Simulate local machines syncing through an in-process online web
    Simulate {
        #[arg(long, default_value_t = 2)]
        facilities: usize,

        #[arg(long, default_value_t = 5)]
        movements: usize,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    /// Produced here, not yet confirmed by the online web
    Pending,
    /// Not yet applied to the ledger
    Unreplayed,
    /// Fully confirmed, waiting for archival
    Archivable,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();

    println!("{}", "=".repeat(60).bright_blue());
    println!("{}", format!("  {}", fieldsync_core::version_string()).bright_cyan().bold());
    println!("{}", "  Offline Inventory Synchronization".bright_white());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    let config = commands::load_config(args.config.as_deref())?;

    match args.command {
        Command::Validate {
            requests,
            history,
            catalog,
            facility,
        } => {
            let facility = facility.map(fieldsync_core::FacilityId).unwrap_or(config.facility_id);
            commands::validate(&requests, history.as_deref(), catalog.as_deref(), facility)
        }
        Command::Events {
            data_dir,
            status,
            facility,
            json,
        } => {
            let facility = facility.map(fieldsync_core::FacilityId).unwrap_or(config.facility_id);
            commands::events(&commands::data_dir(data_dir, &config), status, facility, json)
        }
        Command::Archive { data_dir, page_size } => {
            commands::archive(&commands::data_dir(data_dir, &config), page_size).await
        }
        Command::Seed { data_dir, min } => commands::seed(&commands::data_dir(data_dir, &config), min),
        Command::Simulate { facilities, movements } => commands::simulate(facilities, movements).await,
    }
}
