//! docrestore CLI
//!
//! Command-line tools for restoring directory dumps.
//!
//! # Commands
//!
//! - `restore` - Restore a dump into an in-process destination and report
//! - `plan` - List the units a restore would process
//! - `dump` - Print the records of one dump file
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Restore tools for directory dumps.
#[derive(Parser)]
#[command(name = "docrestore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the dump directory or file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore a dump and print what was restored
    Restore(commands::restore::RestoreArgs),

    /// List the units a restore would process, without writing
    Plan {
        /// Database to restore into
        #[arg(short, long)]
        db: Option<String>,

        /// Collection to restore into (needs --db)
        #[arg(short, long)]
        collection: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the records of one dump file
    Dump {
        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Restore(args) => {
            let path = cli.path.ok_or("Dump path required for restore")?;
            commands::restore::run(&path, &args)?;
        }
        Commands::Plan {
            db,
            collection,
            format,
        } => {
            let path = cli.path.ok_or("Dump path required for plan")?;
            commands::plan::run(&path, db, collection, &format)?;
        }
        Commands::Dump { limit, format } => {
            let path = cli.path.ok_or("Dump file path required for dump")?;
            commands::dump::run(&path, limit, &format)?;
        }
        Commands::Version => {
            println!("docrestore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Minimum server version for oplog replay: {}",
                docrestore_core::MIN_REPLAY_VERSION
            );
        }
    }

    Ok(())
}
