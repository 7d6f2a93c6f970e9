//! CLI argument parsing for rf

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rf")]
#[command(author, version, about = "Poll a Retroframe server for rendered images", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Server host (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Requested image width (overrides config)
    #[arg(long)]
    pub width: Option<u32>,

    /// Requested image height (overrides config)
    #[arg(long)]
    pub height: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a single image and exit
    Once,

    /// Fetch immediately, then keep refreshing until interrupted (default)
    Watch {
        /// Delay between refreshes in milliseconds (overrides config)
        #[arg(short, long)]
        delay_ms: Option<u64>,
    },
}
