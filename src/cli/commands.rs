//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Logstore connector CLI
#[derive(Parser, Debug)]
#[command(name = "logstore-connector")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML or JSON)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Union state file (JSON)
    #[arg(short, long, global = true)]
    pub state: Option<PathBuf>,

    /// Number of workers sharing the logstore
    #[arg(long, global = true, default_value = "1")]
    pub worker_count: u32,

    /// Index of this worker
    #[arg(long, global = true, default_value = "0")]
    pub worker_index: u32,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List shards and their owner
    Shards,

    /// Consume records as JSON lines
    Consume {
        /// Consumer group (overrides the config file)
        #[arg(long)]
        consumer_group: Option<String>,

        /// Stop once this many records were printed; batches are printed whole
        #[arg(long)]
        max_records: Option<usize>,

        /// Interval between checkpoints
        #[arg(long, default_value = "10000")]
        checkpoint_interval_ms: u64,
    },

    /// Print the union state file
    State {
        /// Only entries owned by this worker
        #[arg(long)]
        owned: bool,
    },

    /// Write JSON lines as logs
    Produce {
        /// Input file with one JSON object per line (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Topic of every log group
        #[arg(long)]
        topic: Option<String>,

        /// Source of every log group
        #[arg(long)]
        source: Option<String>,

        /// Field holding the log time (unix seconds)
        #[arg(long)]
        time_field: Option<String>,

        /// Field used as shard hash key
        #[arg(long)]
        hash_field: Option<String>,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}
