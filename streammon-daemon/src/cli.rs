//! CLI argument definitions for streammon-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use streammon_core::config::StreamMonConfig;

/// Real-time brand monitoring daemon.
///
/// Subscribes to a rule-filtered post stream, classifies sentiment
/// and ships enriched records to a telemetry backend.
#[derive(Parser, Debug)]
#[command(name = "streammon-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to streammon.toml configuration file.
    #[arg(short, long, default_value = "streammon.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the rule file path (takes precedence over config file).
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Validate configuration and rule file, then exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply CLI overrides on top of a config that already has env overrides applied.
    pub fn apply_overrides(&self, config: &mut StreamMonConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(rules) = &self.rules {
            config.stream.rules_file = rules.display().to_string();
        }
    }
}
