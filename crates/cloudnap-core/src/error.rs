//! Error types for cloudnap-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Trigger cannot be translated into a firing rule
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Schedule declaration violates a model invariant
    #[error("invalid schedule {name}: {message}")]
    InvalidSchedule {
        /// Schedule name
        name: String,
        /// Detailed message
        message: String,
    },

    /// Two schedules share a name
    #[error("duplicate schedule name: {0}")]
    DuplicateSchedule(String),

    /// Job could not be registered with the scheduler
    #[error("failed to register job {job}: {message}")]
    Registration {
        /// Job name
        job: String,
        /// Detailed message
        message: String,
    },

    /// Scheduler has been shut down
    #[error("scheduler is shut down")]
    SchedulerClosed,

    /// No fire of the rule exists before the requested instant
    #[error("no fire found before {0}")]
    NoPriorFire(chrono::DateTime<chrono::Utc>),

    /// Rule kind has no deterministic last fire time
    #[error("last fire time is undefined for {0} triggers")]
    NotReconcilable(&'static str),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cloud provider call failed
    #[error("cloud api error: {0}")]
    Cloud(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for cloudnap-core
pub type Result<T> = std::result::Result<T, Error>;
