//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// converge - workload controller manager
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Converges declared LRPs and tasks onto a cluster")]
#[command(
    long_about = "converge watches declared long-running processes and one-shot tasks, \
creates and updates the runtime workloads that realise them, mirrors their status back, \
and cleans finished tasks up after a TTL."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the LRP and Task controllers until Ctrl-C
    Run {
        /// Controller config file (TOML, or JSON with a .json extension)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Manifest file or directory of YAML/JSON records to seed
        #[arg(short, long)]
        manifests: Option<PathBuf>,

        /// Log filter used when RUST_LOG is unset
        #[arg(long, default_value = "info")]
        log_level: String,
    },

    /// Validate a config file and print the effective configuration
    CheckConfig {
        /// Controller config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
