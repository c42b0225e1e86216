//! Outcome reporting
//!
//! The engine only increments counters through [`MetricsSink`]; the
//! exposition format belongs to the host.

use std::fmt;

use crate::schedule::ResourceKind;

/// Final outcome of one executor invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    /// Cloud operation completed
    Success,
    /// Cloud operation failed, timed out, or the action was unsupported
    Error,
    /// Nothing was done, see [`SkipReason`]
    Skipped,
    /// Dry-run mode, the resource was not contacted
    DryRun,
}

impl OperationStatus {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::DryRun => "dry_run",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an invocation was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Same resource and action already executing
    InFlight,
    /// Resource is between stable states
    TransitionalState,
    /// Resource already in the action's target state
    AlreadyInState,
}

impl SkipReason {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::TransitionalState => "transitional_state",
            Self::AlreadyInState => "already_in_state",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter sink for engine outcomes
pub trait MetricsSink: Send + Sync {
    /// Count one executor outcome
    fn inc_operation(&self, kind: ResourceKind, action: &str, status: OperationStatus);

    /// Count one skip, broken down by reason
    fn inc_skip(&self, kind: ResourceKind, action: &str, reason: SkipReason);

    /// Count one corrective job submitted by the validator
    fn inc_correction(&self, kind: ResourceKind, action: &str);
}
