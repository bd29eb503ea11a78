use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Transparent proxy-credential injection for headless agents
#[derive(Parser)]
#[command(name = "authbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate credential configuration and list resolved authorities
    Check {
        /// YAML secrets file to load in addition to the environment
        #[arg(long)]
        file: Option<PathBuf>,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}
