//! Cloudnap Core - Reconciliation Engine
//!
//! This crate drives scheduled start/stop of cloud resources, including:
//! - Schedule: declarative start/stop triggers bound to one resource
//! - Scheduler: trigger translation and a concurrency-bounded job engine
//! - Executor: in-flight locking, state checks and cloud calls
//! - Validator: periodic drift detection and correction
//! - Reloader: signature-based hot reload of the schedule source
//! - Shutdown: coordinated cancellation of background loops
//!
//! The cloud provider and the metrics backend are traits implemented by
//! the host binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod metrics;
pub mod reloader;
pub mod resource;
pub mod schedule;
pub mod scheduler;
pub mod shutdown;
pub mod validator;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use executor::{Executor, DEFAULT_OPERATION_TIMEOUT};
pub use metrics::{MetricsSink, OperationStatus, SkipReason};
pub use reloader::{
    is_manifest_file, DirectorySignature, ReloadCallback, ReloadOutcome, Reloader, SignatureSource,
    DEFAULT_RELOAD_INTERVAL,
};
pub use resource::{CloudResourceClient, Operator, ResourceState, StateChecker};
pub use schedule::{
    validate_schedules, Action, ActionTrigger, ResourceKind, ResourceRef, ScheduleSpec, TimeOfDay,
};
pub use scheduler::{
    FiringRule, JobDefinition, JobScheduler, JobTask, Location, SchedulerConfig,
};
pub use shutdown::{wait_for_shutdown_signal, ShutdownController, ShutdownPhase};
pub use validator::{expected_state, Validator, DEFAULT_VALIDATION_INTERVAL};
