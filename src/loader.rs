//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, the config file,
//! and environment.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.yaml");

/// Load configuration from `path` layered over defaults and environment
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if path.is_dir() {
        anyhow::bail!("{} is a directory, expected a config file", path.display());
    }

    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Yaml))
        // 2. The config file given on the command line
        .add_source(File::from(path).format(FileFormat::Yaml).required(true))
        // 3. Environment variables (highest priority), CLOUDNAP_METRICS_PORT=9100
        .add_source(
            Environment::with_prefix("CLOUDNAP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let mut app: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    app.validate().context("Invalid configuration")?;

    if app.schedules_dir.is_relative() {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        app.schedules_dir = base.join(&app.schedules_dir);
    }

    Ok(app)
}
