//! kindb CLI
//!
//! Operator tools for kindb stores.
//!
//! # Commands
//!
//! - `inspect` - Display record counts, history depth and flags
//! - `verify` - Cross-check the reference map against the records
//! - `rebuild` - Recompute the reference map
//! - `backlinks` - List the objects referencing a handle
//! - `recover` - Rebuild if the store was not closed cleanly
//! - `compact` - Rewrite the commit log as one snapshot

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use kindb_core::ObjectClass;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// kindb command-line store tools.
#[derive(Parser)]
#[command(name = "kindb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format of reporting commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record counts, history depth and flags
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Cross-check the reference map; exits non-zero on drift
    Verify {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Recompute the reference map from every record
    Rebuild {
        /// Skip records that fail to decode instead of aborting
        #[arg(long)]
        skip_corrupt: bool,

        /// Report progress every N records
        #[arg(long, default_value = "1000")]
        interval: u64,
    },

    /// List the objects referencing a handle
    Backlinks {
        /// Target handle (32 hex digits)
        handle: String,

        /// Only list referencing objects of this class (repeatable)
        #[arg(long = "class")]
        classes: Vec<ObjectClass>,
    },

    /// Rebuild the reference map if the store needs recovery
    Recover,

    /// Rewrite the commit log as a single snapshot batch
    Compact,

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::Version = cli.command {
        println!("kindb CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let path = cli.path.ok_or("store path required (--path)")?;

    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, format)?,
        Commands::Verify { format } => commands::verify::run(&path, format)?,
        Commands::Rebuild {
            skip_corrupt,
            interval,
        } => commands::rebuild::run(&path, skip_corrupt, interval)?,
        Commands::Backlinks { handle, classes } => {
            commands::backlinks::run(&path, &handle, &classes)?
        }
        Commands::Recover => commands::rebuild::recover(&path)?,
        Commands::Compact => commands::compact::run(&path)?,
        Commands::Version => {}
    }
    Ok(())
}
