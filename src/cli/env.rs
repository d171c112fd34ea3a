use clap::Parser;
use std::path::PathBuf;

use super::commands::Commands;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (overrides the configuration file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Output format
    #[arg(short, long, default_value = "human")]
    pub output: crate::cli::output::OutputFormat,

    /// Metrics server port (overrides the configuration file; 0 disables)
    #[arg(long)]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}
