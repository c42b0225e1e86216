//! Daemon configuration types

use anyhow::{bail, Result};
use regex::Regex;
use serde::{de, Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// IANA timezone for all schedules, empty for system local time
    #[serde(default)]
    pub timezone: String,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_validation_interval", deserialize_with = "deserialize_duration")]
    pub validation_interval: Duration,
    #[serde(default = "default_reload_interval", deserialize_with = "deserialize_duration")]
    pub reload_interval: Duration,
    #[serde(default = "default_shutdown_timeout", deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Manifest directory, relative paths resolve against the config file
    #[serde(default = "default_schedules_dir")]
    pub schedules_dir: PathBuf,
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_validation_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_reload_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_schedules_dir() -> PathBuf {
    PathBuf::from("schedules")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timezone: String::new(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            validation_interval: default_validation_interval(),
            reload_interval: default_reload_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
            schedules_dir: default_schedules_dir(),
        }
    }
}

impl AppConfig {
    /// Check value ranges not expressible in serde
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            bail!("max_concurrent_jobs must be at least 1");
        }
        if self.reload_interval.is_zero() {
            bail!("reload_interval must be greater than zero");
        }
        if self.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than zero");
        }
        if self.metrics_enabled && self.metrics_port == 0 {
            bail!("metrics_port must be set when metrics are enabled");
        }
        Ok(())
    }
}

const DURATION_TOKEN: &str = r"(\d+(?:\.\d+)?)(ms|s|m|h|d|w)";

/// Parse `1h30m`, `1.5h`, `250ms`, `2w` style durations
pub fn parse_duration(input: &str) -> Result<Duration> {
    let text = input.trim();
    if text.is_empty() {
        bail!("empty duration");
    }

    let token = Regex::new(DURATION_TOKEN)?;
    let mut total = 0f64;
    let mut consumed = 0;
    for caps in token.captures_iter(text) {
        let (Some(whole), Some(value), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if whole.start() != consumed {
            break;
        }
        consumed = whole.end();

        let value: f64 = value.as_str().parse()?;
        let unit_secs = match unit.as_str() {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3_600.0,
            "d" => 86_400.0,
            _ => 604_800.0,
        };
        total += value * unit_secs;
    }

    if consumed != text.len() {
        bail!("invalid duration {input:?}, expected e.g. 30s, 10m, 1h30m");
    }
    Ok(Duration::from_secs_f64(total))
}

/// Accepts duration strings, or plain numbers as seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl de::Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration such as \"10m\" or a number of seconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Duration, E> {
            parse_duration(v).map_err(|e| E::custom(format!("{e:#}")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Duration, E> {
            Duration::try_from_secs_f64(v).map_err(|e| E::custom(e.to_string()))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("2w").unwrap(), Duration::from_secs(1_209_600));
    }

    #[test]
    fn test_parse_duration_compound_and_decimal() {
        assert_eq!(parse_duration("2h30m").unwrap(), Duration::from_secs(9_000));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration(" 1m30s ").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for input in ["", "10", "m", "10x", "10m garbage", "-5m", "1h 30m"] {
            assert!(parse_duration(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.validation_interval, Duration::from_secs(600));
        assert_eq!(config.reload_interval, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(300));
        assert!(!config.metrics_enabled);
        assert_eq!(config.metrics_port, 9090);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let config: AppConfig = serde_yaml::from_str(
            "timezone: Europe/Moscow\nvalidation_interval: 1h30m\nshutdown_timeout: 45\nmetrics_enabled: true\n",
        )
        .unwrap();
        assert_eq!(config.timezone, "Europe/Moscow");
        assert_eq!(config.validation_interval, Duration::from_secs(5_400));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(45));
        assert!(config.metrics_enabled);
        assert_eq!(config.reload_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = AppConfig {
            max_concurrent_jobs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
