//! rangedb CLI
//!
//! Offline tools for rangedb collection directories.
//!
//! # Commands
//!
//! - `inspect` - Display collection metadata and layout
//! - `verify` - Check every chunk file
//! - `dump-chunk` - Print the entities of one chunk file
//! - `recovery` - List recovery log entries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// rangedb command-line tools.
#[derive(Parser)]
#[command(name = "rangedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display collection metadata and layout
    Inspect {
        /// Collection directory
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every chunk file of a collection and its indexes
    Verify {
        /// Collection directory
        path: PathBuf,
    },

    /// Print the entities stored in one chunk file
    DumpChunk {
        /// Chunk file
        file: PathBuf,

        /// Maximum number of entities to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List recovery log entries
    Recovery {
        /// Collection directory
        path: PathBuf,

        /// Only show entries that were never applied
        #[arg(long)]
        pending: bool,
    },

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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Inspect { path, format } => commands::inspect::run(&path, &format),
        Commands::Verify { path } => commands::verify::run(&path),
        Commands::DumpChunk {
            file,
            limit,
            format,
        } => commands::dump_chunk::run(&file, limit, &format),
        Commands::Recovery { path, pending } => commands::recovery::run(&path, pending),
        Commands::Version => {
            println!("rangedb CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("rangedb core v{}", rangedb_core::VERSION);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
