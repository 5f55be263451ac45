//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod discover;
mod key;
mod retrieve;
mod split;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::helpers::Runtime;
use crate::config::{Config, DriverKind};

#[derive(Parser)]
#[command(name = "audiocrawl")]
#[command(about = "Discover, retrieve and archive audio lessons from a content site")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never wait for a human (challenges and manual login fail instead)
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Page driver to use (overrides config)
    #[arg(long, global = true, value_enum)]
    driver: Option<DriverKind>,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the configured start URLs and save discovered records
    Discover {
        /// Output file (default: timestamped file in the output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Stop after this many records (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Retrieve and publish the records in a discovery file
    Retrieve {
        /// Discovery output (or chunk) to process
        input: PathBuf,
        /// Process at most this many records (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Discover, then retrieve, in one session
    Run {
        /// Stop after this many records (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Split a discovery file into smaller chunk files
    Split {
        /// Discovery output to split
        input: PathBuf,
        /// Records per chunk
        #[arg(short = 'n', long)]
        chunk_size: usize,
        /// Where to write chunks (default: next to the input)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Print the storage key a record would be published under
    Key {
        /// Page the audio was found on
        #[arg(long)]
        page_url: String,
        /// Record title
        #[arg(long)]
        title: String,
        /// 1-based sequence index
        #[arg(short, long, default_value = "1")]
        index: usize,
    },
}

fn limit_opt(limit: usize) -> Option<usize> {
    if limit > 0 {
        Some(limit)
    } else {
        None
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).await?;
    if let Some(driver) = cli.driver {
        config.driver = driver;
    }
    let runtime = Runtime::new(config, !cli.non_interactive);

    match cli.command {
        Commands::Discover { output, limit } => {
            discover::cmd_discover(&runtime, output.as_deref(), limit_opt(limit)).await
        }
        Commands::Retrieve { input, limit } => {
            retrieve::cmd_retrieve(&runtime, &input, limit_opt(limit)).await
        }
        Commands::Run { limit } => retrieve::cmd_run(&runtime, limit_opt(limit)).await,
        Commands::Split {
            input,
            chunk_size,
            output_dir,
        } => split::cmd_split(&input, chunk_size, output_dir.as_deref()).await,
        Commands::Key {
            page_url,
            title,
            index,
        } => key::cmd_key(&runtime, &page_url, &title, index),
    }
}
