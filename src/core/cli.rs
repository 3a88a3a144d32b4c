//! Command-line interface

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "faultline", about = "Multi-tenant log analytics backend")]
struct Cli {
    /// Bind address override
    #[arg(long)]
    host: Option<String>,

    /// Port override
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the server (default)
    Start,
}

/// Overrides collected from the command line, applied on top of the
/// environment-derived configuration.
#[derive(Debug, Default, Clone)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    (
        CliConfig {
            host: cli.host,
            port: cli.port,
        },
        cli.command,
    )
}
