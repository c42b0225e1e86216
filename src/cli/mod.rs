//! CLI module for cloudnap
//!
//! Provides commands:
//! - `run`: start the scheduling daemon (default)
//! - `check`: validate configuration and manifests, list jobs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::loader::load_config;
use crate::manifest::load_schedules;
use crate::yc::Credentials;

pub mod check;

/// Scheduled start/stop of cloud resources
#[derive(Parser, Debug)]
#[command(name = "cloudnap")]
#[command(about = "Scheduled start/stop of Yandex Cloud resources with drift reconciliation")]
#[command(version)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// OAuth token
    #[arg(short, long, global = true, env = "YC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Service account authorized key file
    #[arg(long, global = true, env = "YC_SERVICE_ACCOUNT_KEY_FILE", value_name = "FILE")]
    pub sa_key: Option<PathBuf>,

    /// Log operations instead of performing them
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Log level for cloudnap crates, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Start the scheduler (default)
    Run,
    /// Validate configuration and schedules, then list jobs
    Check,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn config_path(&self) -> Result<&PathBuf> {
        self.config.as_ref().context("missing --config <FILE>")
    }

    fn load(&self) -> Result<(AppConfig, Vec<cloudnap_core::ScheduleSpec>)> {
        let path = self.config_path()?;
        let config = load_config(path)?;
        let schedules = load_schedules(&config.schedules_dir)?;
        Ok((config, schedules))
    }
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => {
            let (config, schedules) = cli.load()?;
            check::run(&config, &schedules)
        }
        Commands::Run => {
            let (config, schedules) = cli.load()?;
            let credentials = Credentials::resolve(cli.sa_key.as_deref(), cli.token.as_deref())?;
            crate::app::run(config, schedules, credentials, cli.dry_run).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["cloudnap", "-c", "cloudnap.yaml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, Some(PathBuf::from("cloudnap.yaml")));
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cloudnap",
            "check",
            "--config",
            "c.yaml",
            "-n",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Commands::Check));
        assert!(cli.dry_run);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["cloudnap", "--log-format", "xml"]).is_err());
    }

    #[tokio::test]
    async fn test_missing_config_is_an_error() {
        let cli = Cli::try_parse_from(["cloudnap", "check"]).unwrap();
        let err = run(cli).await.unwrap_err();
        assert!(err.to_string().contains("--config"));
    }
}
