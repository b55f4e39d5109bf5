//! Command line for jobrelay, built on clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Submit CSV files for background summing and collect the results.
#[derive(Debug, Parser)]
#[command(name = "jobrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file (default: ./jobrelay.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a CSV file and queue a job for it.
    Submit {
        /// The CSV file to process.
        file: PathBuf,
    },

    /// Print the status of a job.
    Status {
        /// Job id returned by `submit`.
        id: String,
    },

    /// Fetch the result artifact of a finished job.
    Result {
        id: String,

        /// Write the artifact here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Poll a job until it finishes.
    Wait { id: String },

    /// Run the worker pool until interrupted.
    Worker {
        /// Number of worker slots (overrides the config file).
        #[arg(long)]
        workers: Option<usize>,
    },
}
