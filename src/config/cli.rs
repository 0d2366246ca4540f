//! Command-line argument parsing for the `valkey-groups` binary

use clap::Parser;
use std::path::PathBuf;

/// Bootstrap the configured Valkey groups and check each one
#[derive(Parser, Debug, Clone)]
#[command(name = "valkey-groups")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Groups file (TOML with [[groups]] tables)
    #[arg(short = 'c', long = "config", default_value = "groups.toml")]
    pub config: PathBuf,

    /// Only check these groups (repeatable); defaults to every registered group
    #[arg(short = 'g', long = "group", action = clap::ArgAction::Append)]
    pub groups: Vec<String>,

    /// Print the report as JSON
    #[arg(long = "json")]
    pub json: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Errors only
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,
}

impl CliArgs {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
