//! Job scheduling for schedule actions
//!
//! Every enabled action of every [`ScheduleSpec`](crate::ScheduleSpec)
//! becomes one managed job whose body is an executor closure:
//!
//! - **Triggers**: `ActionTrigger` → [`FiringRule`] in one [`Location`]
//! - **Engine**: per-job timers, a global concurrency cap, drained shutdown
//! - **Registry**: bulk registration and atomic replacement on reload
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ScheduleSpec   │  Declared start/stop triggers
//! └────────┬────────┘
//!          │ FiringRule::from_trigger
//!          ▼
//! ┌─────────────────┐
//! │  JobScheduler   │  Timers + semaphore + task tracker
//! └────────┬────────┘
//!          │ fire
//!          ▼
//! ┌─────────────────┐
//! │    Executor     │  Lock, state check, start/stop
//! └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cloudnap_core::scheduler::{JobScheduler, SchedulerConfig, Location};
//!
//! let config = SchedulerConfig::new()
//!     .with_max_concurrent(5)
//!     .with_location(Location::resolve("Europe/Moscow"));
//! let scheduler = Arc::new(JobScheduler::new(config));
//!
//! scheduler.register_schedules(&executor, &specs).await?;
//! scheduler.start(shutdown_token).await?;
//! ```

mod engine;
mod registry;
mod triggers;

pub use engine::{
    JobDefinition, JobFuture, JobScheduler, JobTag, JobTask, SchedulerConfig,
};
pub use registry::job_definitions;
pub use triggers::{FiringRule, Location};
