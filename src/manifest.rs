//! Schedule manifests
//!
//! Multi-document YAML files, one `kind: Schedule` per document:
//!
//! ```yaml
//! apiVersion: cloudnap/v1alpha1
//! kind: Schedule
//! metadata:
//!   name: dev-vm-office-hours
//! spec:
//!   type: daily
//!   resource: { type: vm, id: fhm123, folder_id: b1g456 }
//!   actions:
//!     start: { enabled: true, time: "09:00" }
//!     stop:  { enabled: true, time: "19:30" }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use cloudnap_core::{
    is_manifest_file, validate_schedules, ActionTrigger, ResourceKind, ResourceRef, ScheduleSpec,
    TimeOfDay,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::parse_duration;

/// Manifest API version
pub const API_VERSION: &str = "cloudnap/v1alpha1";

/// Manifest kind
pub const KIND: &str = "Schedule";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleManifest {
    api_version: String,
    kind: String,
    metadata: Metadata,
    spec: ManifestSpec,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ManifestSpec {
    #[serde(rename = "type")]
    schedule_type: String,
    resource: ManifestResource,
    #[serde(default)]
    actions: ManifestActions,
}

#[derive(Debug, Deserialize)]
struct ManifestResource {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    folder_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestActions {
    start: Option<ActionConfig>,
    stop: Option<ActionConfig>,
}

#[derive(Debug, Deserialize)]
struct ActionConfig {
    #[serde(default)]
    enabled: bool,
    time: Option<String>,
    crontab: Option<String>,
    day: Option<i64>,
    every: Option<String>,
    at: Option<String>,
}

impl ActionConfig {
    fn to_trigger(&self, schedule_type: &str) -> Result<ActionTrigger> {
        let time = || -> Result<TimeOfDay> {
            let raw = self.time.as_deref().context("time is required")?;
            Ok(raw.parse()?)
        };
        let day = |default: i64| -> Result<u8> {
            let day = self.day.unwrap_or(default);
            u8::try_from(day).map_err(|_| anyhow!("day {day} out of range"))
        };

        match schedule_type {
            "cron" => {
                let crontab = self.crontab.as_deref().context("crontab is required")?;
                Ok(ActionTrigger::cron(crontab))
            }
            "daily" => Ok(ActionTrigger::daily(time()?)),
            "weekly" => Ok(ActionTrigger::weekly(time()?, day(0)?)),
            "monthly" => Ok(ActionTrigger::monthly(time()?, day(1)?)),
            "interval" => {
                let every = self.every.as_deref().context("every is required")?;
                Ok(ActionTrigger::interval(parse_duration(every)?))
            }
            "once" => {
                let at = self.at.as_deref().context("at is required")?;
                let at = DateTime::parse_from_rfc3339(at)
                    .with_context(|| format!("invalid RFC 3339 time {at:?}"))?;
                Ok(ActionTrigger::once(at.with_timezone(&Utc)))
            }
            other => bail!(
                "unknown schedule type {other:?}, expected cron, daily, weekly, monthly, interval or once"
            ),
        }
    }
}

impl ScheduleManifest {
    fn into_spec(self) -> Result<ScheduleSpec> {
        if self.api_version != API_VERSION {
            bail!("unsupported apiVersion {:?}, expected {API_VERSION}", self.api_version);
        }
        if self.kind != KIND {
            bail!("unsupported kind {:?}, expected {KIND}", self.kind);
        }

        let spec = self.spec;
        let kind: ResourceKind = spec.resource.kind.parse()?;
        let resource = ResourceRef::new(kind, spec.resource.id, spec.resource.folder_id);
        let mut schedule = ScheduleSpec::new(self.metadata.name, resource);

        if let Some(start) = spec.actions.start.filter(|a| a.enabled) {
            let trigger = start
                .to_trigger(&spec.schedule_type)
                .context("start action")?;
            schedule = schedule.with_start(trigger);
        }
        if let Some(stop) = spec.actions.stop.filter(|a| a.enabled) {
            let trigger = stop.to_trigger(&spec.schedule_type).context("stop action")?;
            schedule = schedule.with_stop(trigger);
        }

        schedule.validate()?;
        Ok(schedule)
    }
}

/// Parse every schedule document in `content`
pub fn parse_manifests(content: &str, source: &Path) -> Result<Vec<ScheduleSpec>> {
    let mut specs = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("{}: document {index}: invalid YAML", source.display()))?;
        if value.is_null() {
            continue;
        }

        let spec = serde_yaml::from_value::<ScheduleManifest>(value)
            .map_err(anyhow::Error::from)
            .and_then(ScheduleManifest::into_spec)
            .with_context(|| format!("{}: document {index}", source.display()))?;
        specs.push(spec);
    }
    Ok(specs)
}

fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read schedules directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if is_manifest_file(&path) && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load and validate every manifest in `dir`, in file name order
pub fn load_schedules(dir: &Path) -> Result<Vec<ScheduleSpec>> {
    let files = manifest_files(dir)?;
    if files.is_empty() {
        bail!("no schedule files (*.yaml, *.yml) found in {}", dir.display());
    }

    let mut origins: HashMap<String, PathBuf> = HashMap::new();
    let mut specs = Vec::new();
    for path in &files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parsed = parse_manifests(&content, path)?;
        debug!(file = %path.display(), schedules = parsed.len(), "Manifest file parsed");

        for spec in parsed {
            if let Some(first) = origins.get(&spec.name) {
                bail!(
                    "duplicate schedule name {:?} in {} and {}",
                    spec.name,
                    first.display(),
                    path.display()
                );
            }
            origins.insert(spec.name.clone(), path.clone());
            specs.push(spec);
        }
    }

    if specs.is_empty() {
        bail!("no schedules defined in {}", dir.display());
    }
    validate_schedules(&specs)?;

    info!(files = files.len(), schedules = specs.len(), "Schedules loaded");
    Ok(specs)
}
