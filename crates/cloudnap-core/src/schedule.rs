//! Schedule declarations
//!
//! Pure data describing which resource to start or stop and when:
//! - [`ScheduleSpec`]: one named schedule bound to one resource
//! - [`ActionTrigger`]: the timing rule attached to a start or stop action
//! - [`ResourceRef`]: the cloud resource a schedule manages
//!
//! Translation of triggers into firing rules lives in
//! [`crate::scheduler::FiringRule`].

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scheduler::FiringRule;

/// Kind of managed cloud resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Compute instance
    Vm,
    /// Managed Kubernetes cluster
    K8sCluster,
}

impl ResourceKind {
    /// Label used in lock keys, logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vm => "vm",
            Self::K8sCluster => "k8s_cluster",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vm" => Ok(Self::Vm),
            "k8s_cluster" => Ok(Self::K8sCluster),
            other => Err(Error::InvalidConfig(format!(
                "unknown resource type {other:?}, expected vm or k8s_cluster"
            ))),
        }
    }
}

/// Reference to a cloud resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource kind
    pub kind: ResourceKind,
    /// Provider resource ID
    pub id: String,
    /// Folder (resource group) holding the resource
    pub folder_id: String,
}

impl ResourceRef {
    /// Create a new resource reference
    pub fn new(kind: ResourceKind, id: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            folder_id: folder_id.into(),
        }
    }
}

/// Lifecycle action on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Bring the resource to `Running`
    Start,
    /// Bring the resource to `Stopped`
    Stop,
}

impl Action {
    /// Both actions, start first
    pub const ALL: [Action; 2] = [Action::Start, Action::Stop];

    /// Action label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    /// Parse an action label, `None` for anything but `start`/`stop`
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock time of day, `HH:MM[:SS]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
    second: u32,
}

impl TimeOfDay {
    /// Create a time of day, validating ranges
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(Error::InvalidTrigger(format!(
                "time out of range {hour:02}:{minute:02}:{second:02}"
            )));
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    /// Hour component
    pub fn hour(&self) -> u32 {
        self.hour
    }

    /// Minute component
    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Second component
    pub fn second(&self) -> u32 {
        self.second
    }

    pub(crate) fn naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTrigger(format!("invalid time format {s:?}, expected HH:MM[:SS]"));

        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(invalid());
        }

        let mut fields = [0u32; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Self::new(fields[0], fields[1], fields[2])
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Timing rule for one action of a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionTrigger {
    /// Cron expression, 5 fields or 6 fields with leading seconds
    Cron {
        /// Cron expression, e.g. "0 9 * * 1-5"
        expression: String,
    },
    /// Every day at `time`
    Daily {
        /// Time of day
        time: TimeOfDay,
    },
    /// Every week on `weekday` (0 = Sunday) at `time`
    Weekly {
        /// Time of day
        time: TimeOfDay,
        /// Day of week, 0-6 with 0 = Sunday
        weekday: u8,
    },
    /// Every month on `day` at `time`, clamped to short months
    Monthly {
        /// Time of day
        time: TimeOfDay,
        /// Day of month, 1-31
        day: u8,
    },
    /// Fixed period
    Interval {
        /// Period between fires
        every: Duration,
    },
    /// Single fire at an absolute instant
    Once {
        /// Fire time
        at: DateTime<Utc>,
    },
}

impl ActionTrigger {
    /// Create a cron trigger
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    /// Create a daily trigger
    pub fn daily(time: TimeOfDay) -> Self {
        Self::Daily { time }
    }

    /// Create a weekly trigger
    pub fn weekly(time: TimeOfDay, weekday: u8) -> Self {
        Self::Weekly { time, weekday }
    }

    /// Create a monthly trigger
    pub fn monthly(time: TimeOfDay, day: u8) -> Self {
        Self::Monthly { time, day }
    }

    /// Create an interval trigger
    pub fn interval(every: Duration) -> Self {
        Self::Interval { every }
    }

    /// Create a one-time trigger
    pub fn once(at: DateTime<Utc>) -> Self {
        Self::Once { at }
    }

    /// Short kind name for logs and errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Cron { .. } => "cron",
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Monthly { .. } => "monthly",
            Self::Interval { .. } => "interval",
            Self::Once { .. } => "once",
        }
    }

    /// Whether an expected state can be derived from this trigger
    pub fn is_reconcilable(&self) -> bool {
        !matches!(self, Self::Interval { .. } | Self::Once { .. })
    }
}

/// A named schedule for one resource
///
/// A present trigger means the action is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Unique schedule name
    pub name: String,
    /// Managed resource
    pub resource: ResourceRef,
    /// Start trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<ActionTrigger>,
    /// Stop trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<ActionTrigger>,
}

impl ScheduleSpec {
    /// Create a schedule with no actions
    pub fn new(name: impl Into<String>, resource: ResourceRef) -> Self {
        Self {
            name: name.into(),
            resource,
            start: None,
            stop: None,
        }
    }

    /// Set the start trigger
    pub fn with_start(mut self, trigger: ActionTrigger) -> Self {
        self.start = Some(trigger);
        self
    }

    /// Set the stop trigger
    pub fn with_stop(mut self, trigger: ActionTrigger) -> Self {
        self.stop = Some(trigger);
        self
    }

    /// Trigger configured for `action`
    pub fn trigger(&self, action: Action) -> Option<&ActionTrigger> {
        match action {
            Action::Start => self.start.as_ref(),
            Action::Stop => self.stop.as_ref(),
        }
    }

    /// Enabled actions with their triggers, start first
    pub fn actions(&self) -> impl Iterator<Item = (Action, &ActionTrigger)> + '_ {
        Action::ALL
            .into_iter()
            .filter_map(move |action| self.trigger(action).map(|t| (action, t)))
    }

    /// Name of the scheduler job for `action`
    pub fn job_name(&self, action: Action) -> String {
        format!("{}:{}", self.name, action)
    }

    /// Whether the validator may reconcile this schedule
    pub fn is_reconcilable(&self) -> bool {
        self.actions().all(|(_, trigger)| trigger.is_reconcilable())
    }

    /// Check model invariants, including that every trigger translates
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Error::InvalidSchedule {
            name: self.name.clone(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.resource.id.trim().is_empty() {
            return Err(invalid("resource id must not be empty".to_string()));
        }
        if self.resource.folder_id.trim().is_empty() {
            return Err(invalid("resource folder_id must not be empty".to_string()));
        }
        if self.start.is_none() && self.stop.is_none() {
            return Err(invalid(
                "at least one of start or stop must be enabled".to_string(),
            ));
        }

        for (action, trigger) in self.actions() {
            FiringRule::from_trigger(trigger)
                .map_err(|e| invalid(format!("{action} action: {e}")))?;
        }

        Ok(())
    }
}

/// Validate every spec and reject duplicate names
pub fn validate_schedules(specs: &[ScheduleSpec]) -> Result<()> {
    let mut seen = HashSet::with_capacity(specs.len());
    for spec in specs {
        spec.validate()?;
        if !seen.insert(spec.name.as_str()) {
            return Err(Error::DuplicateSchedule(spec.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
