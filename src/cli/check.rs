//! `cloudnap check`
//!
//! Loads everything the daemon would load, translates every trigger and
//! prints one line per job with its next fire time. No cloud access.

use anyhow::Result;
use chrono::{DateTime, Utc};
use cloudnap_core::{FiringRule, Location, ScheduleSpec};
use std::io::Write;

use crate::config::AppConfig;

/// One line per job: name, resource, trigger kind, next fire
pub fn job_lines(
    schedules: &[ScheduleSpec],
    location: &Location,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for spec in schedules {
        for (action, trigger) in spec.actions() {
            let rule = FiringRule::from_trigger(trigger)?;
            let next = rule
                .next_after(now, location)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            lines.push(format!(
                "{}\t{}/{}\t{}\tnext={}",
                spec.job_name(action),
                spec.resource.kind,
                spec.resource.id,
                trigger.kind_name(),
                next
            ));
        }
    }
    Ok(lines)
}

/// Print the job listing to stdout
pub fn run(config: &AppConfig, schedules: &[ScheduleSpec]) -> Result<()> {
    let location = Location::resolve(&config.timezone);
    let lines = job_lines(schedules, &location, Utc::now())?;

    let mut out = std::io::stdout().lock();
    writeln!(
        out,
        "{} schedules, {} jobs, timezone {}",
        schedules.len(),
        lines.len(),
        location
    )?;
    for line in lines {
        writeln!(out, "{line}")?;
    }
    Ok(())
}
