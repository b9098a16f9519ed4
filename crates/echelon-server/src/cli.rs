//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

/// Session broker and matchmaking server for the Echelon tank game.
#[derive(Debug, Clone, Parser)]
#[command(name = "echelon-server", version, about)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "echelon.toml")]
    pub config: PathBuf,

    /// Write a default configuration to the config path and exit
    #[arg(short = 'g', long)]
    pub generate_config: bool,

    /// Run the built-in smoke checks and exit
    #[arg(short = 't', long)]
    pub self_test: bool,

    /// Log at debug level regardless of the configured level
    #[arg(short, long)]
    pub debug: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Bind address override (e.g. 0.0.0.0:31337)
    #[arg(short, long, value_name = "ADDRESS")]
    pub bind: Option<String>,

    /// Where to write the process id while running
    #[arg(long, value_name = "FILE", default_value = "echelon.pid")]
    pub pid_file: PathBuf,
}
