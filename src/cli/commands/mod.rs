//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod ingest;
mod init;
mod requeue;
mod serve;
mod status;
mod work;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::models::CardField;

#[derive(Parser)]
#[command(name = "cardscan")]
#[command(about = "Card image field extraction workers and upload gateway")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to ./cardscan.toml when present)
    #[arg(short, long, global = true, env = "CARDSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data, upload and output directories and the database
    Init,

    /// Ingest card images from local files
    Ingest {
        /// Image files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run extraction workers until interrupted
    Work {
        /// Field to extract (repeatable; default: every enabled field)
        #[arg(short, long = "field", value_enum)]
        fields: Vec<CardField>,
        /// Workers per field
        #[arg(short, long, default_value = "1")]
        instances: usize,
        /// Run a single cycle per worker and exit
        #[arg(long)]
        once: bool,
    },

    /// Start the upload gateway
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },

    /// Show extraction progress per field
    Status,

    /// Show a single card
    Show {
        /// Card ID
        card_id: String,
    },

    /// Move failed fields back to pending
    Requeue {
        /// Field to requeue
        #[arg(value_enum)]
        field: CardField,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Ingest { files } => ingest::cmd_ingest(&settings, &files).await,
        Commands::Work {
            fields,
            instances,
            once,
        } => work::cmd_work(&settings, &fields, instances, once).await,
        Commands::Serve { host, port } => serve::cmd_serve(&settings, &host, port).await,
        Commands::Status => status::cmd_status(&settings).await,
        Commands::Show { card_id } => status::cmd_show(&settings, &card_id).await,
        Commands::Requeue { field } => requeue::cmd_requeue(&settings, field).await,
    }
}
