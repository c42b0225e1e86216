//! Scheduler execution engine
//!
//! Owns every registered job and fires it under a global concurrency cap:
//! - Managed jobs: recurring, tagged, bulk-replaced on reload
//! - One-shot jobs: untagged, fire once as soon as the scheduler runs
//! - Executions are tracked apart from job timers, so removing a job never
//!   interrupts an execution already in progress
//!
//! ```text
//!  add_job / add_one_shot_job / replace_managed
//!                  │ (single mutex)
//!                  ▼
//!         ┌────────────────┐  timer per job  ┌───────────┐  permit  ┌─────────────┐
//!         │  job registry  │ ──────────────▶ │ semaphore │ ───────▶ │ TaskTracker │
//!         └────────────────┘                 └───────────┘          └─────────────┘
//! ```

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::triggers::{FiringRule, Location};
use crate::error::{Error, Result};

/// Future returned by a job body
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Zero-argument job body, invoked once per fire
pub type JobTask = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum executions running in parallel
    pub max_concurrent: usize,
    /// Timezone for all firing rules
    pub location: Location,
    /// How long shutdown waits for in-flight executions
    pub drain_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            location: Location::Local,
            drain_timeout: Duration::from_secs(300),
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max concurrent executions (at least one)
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Set the timezone
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Set the shutdown drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Tag controlling reload behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTag {
    /// Owned by the current schedule snapshot, replaced on reload
    Managed,
}

/// A recurring job ready for registration
#[derive(Clone)]
pub struct JobDefinition {
    /// Job name
    pub name: String,
    /// Firing rule
    pub rule: FiringRule,
    /// Job body
    pub task: JobTask,
}

impl JobDefinition {
    /// Create a new job definition
    pub fn new(name: impl Into<String>, rule: FiringRule, task: JobTask) -> Self {
        Self {
            name: name.into(),
            rule,
            task,
        }
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("rule", &self.rule.kind_name())
            .finish()
    }
}

enum Firing {
    Recurring(FiringRule),
    OneShot,
}

struct RegisteredJob {
    name: String,
    tag: Option<JobTag>,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<Uuid, RegisteredJob>>>;

/// Shared state handed to every job timer
#[derive(Clone)]
struct JobContext {
    registry: Registry,
    permits: Arc<Semaphore>,
    executions: TaskTracker,
    started: watch::Receiver<bool>,
    location: Location,
}

/// Concurrency-bounded job scheduler
pub struct JobScheduler {
    config: SchedulerConfig,
    registry: Registry,
    permits: Arc<Semaphore>,
    executions: TaskTracker,
    started: watch::Sender<bool>,
    shutdown: CancellationToken,
}

impl JobScheduler {
    /// Create a new scheduler, not yet firing
    pub fn new(config: SchedulerConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let (started, _) = watch::channel(false);

        info!(
            timezone = %config.location,
            max_concurrent_jobs = max_concurrent,
            "Scheduler initialized"
        );

        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            executions: TaskTracker::new(),
            started,
            shutdown: CancellationToken::new(),
        }
    }

    /// Timezone used for firing rules
    pub fn location(&self) -> Location {
        self.config.location
    }

    /// Whether the event loop has started and not yet shut down
    pub fn is_running(&self) -> bool {
        *self.started.borrow() && !self.shutdown.is_cancelled()
    }

    /// Register a recurring managed job
    pub async fn add_job(
        &self,
        rule: FiringRule,
        name: impl Into<String>,
        task: JobTask,
    ) -> Result<()> {
        self.add_managed(vec![JobDefinition::new(name, rule, task)])
            .await
    }

    /// Register several recurring managed jobs, all or none
    ///
    /// Rules with no future fire time, such as an elapsed one-time
    /// trigger, are skipped rather than rejected.
    pub async fn add_managed(&self, definitions: Vec<JobDefinition>) -> Result<()> {
        let mut registry = self.registry.lock().await;
        for def in &definitions {
            self.check_registration(&def.name)?;
        }
        let definitions = self.drop_exhausted(definitions);

        for def in definitions {
            debug!(job = %def.name, rule = def.rule.kind_name(), "Scheduler job registered");
            self.insert_locked(
                &mut registry,
                def.name,
                Some(JobTag::Managed),
                Firing::Recurring(def.rule),
                def.task,
            );
        }
        Ok(())
    }

    /// Register an untagged job that fires once, immediately once running
    pub async fn add_one_shot_job(&self, name: impl Into<String>, task: JobTask) -> Result<()> {
        let name = name.into();
        let mut registry = self.registry.lock().await;
        self.check_registration(&name)?;

        info!(job = %name, "One-time job registered");
        self.insert_locked(&mut registry, name, None, Firing::OneShot, task);
        Ok(())
    }

    /// Atomically swap every managed job for `definitions`
    ///
    /// Definitions are checked before anything is removed, so a failure
    /// leaves the current set in place. Untagged jobs and executions
    /// already running are not touched.
    pub async fn replace_managed(&self, definitions: Vec<JobDefinition>) -> Result<()> {
        let mut registry = self.registry.lock().await;
        for def in &definitions {
            self.check_registration(&def.name)?;
        }
        let definitions = self.drop_exhausted(definitions);

        let managed: Vec<Uuid> = registry
            .iter()
            .filter(|(_, job)| job.tag == Some(JobTag::Managed))
            .map(|(id, _)| *id)
            .collect();
        let removed = managed.len();
        for id in managed {
            if let Some(job) = registry.remove(&id) {
                job.cancel.cancel();
            }
        }

        for def in definitions {
            self.insert_locked(
                &mut registry,
                def.name,
                Some(JobTag::Managed),
                Firing::Recurring(def.rule),
                def.task,
            );
        }

        info!(removed, jobs = registry.len(), "Scheduler jobs reloaded");
        Ok(())
    }

    /// Sorted names of all registered jobs
    pub async fn job_names(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut names: Vec<String> = registry.values().map(|job| job.name.clone()).collect();
        names.sort();
        names
    }

    /// Start firing and block until `token` is cancelled, then shut down
    ///
    /// Shutdown admits no new executions and waits for in-flight ones up
    /// to the drain timeout.
    pub async fn start(&self, token: CancellationToken) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::SchedulerClosed);
        }

        self.started.send_replace(true);
        let jobs = self.registry.lock().await.len();
        info!(jobs, "Scheduler event loop started");

        tokio::select! {
            _ = token.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }

        self.shutdown_gracefully().await;
        Ok(())
    }

    /// Shut down immediately without waiting for in-flight executions
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.executions.close();
        info!(in_flight = self.executions.len(), "Scheduler stopped");
    }

    async fn shutdown_gracefully(&self) {
        self.shutdown.cancel();
        self.executions.close();

        let in_flight = self.executions.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for running jobs to complete...");
        }

        match tokio::time::timeout(self.config.drain_timeout, self.executions.wait()).await {
            Ok(()) => info!("Scheduler shutdown completed"),
            Err(_) => warn!(
                in_flight = self.executions.len(),
                timeout_secs = self.config.drain_timeout.as_secs(),
                "Scheduler shutdown timed out, abandoning running jobs"
            ),
        }
    }

    fn check_registration(&self, name: &str) -> Result<()> {
        let fail = |message: &str| Error::Registration {
            job: name.to_string(),
            message: message.to_string(),
        };

        if self.shutdown.is_cancelled() {
            return Err(fail("scheduler is shut down"));
        }
        if name.is_empty() {
            return Err(fail("job name must not be empty"));
        }
        Ok(())
    }

    fn drop_exhausted(&self, definitions: Vec<JobDefinition>) -> Vec<JobDefinition> {
        let now = Utc::now();
        definitions
            .into_iter()
            .filter(|def| {
                let live = def.rule.next_after(now, &self.config.location).is_some();
                if !live {
                    info!(job = %def.name, rule = def.rule.kind_name(), "Job has no future fire time, skipping");
                }
                live
            })
            .collect()
    }

    fn insert_locked(
        &self,
        registry: &mut HashMap<Uuid, RegisteredJob>,
        name: String,
        tag: Option<JobTag>,
        firing: Firing,
        task: JobTask,
    ) {
        let id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        registry.insert(
            id,
            RegisteredJob {
                name: name.clone(),
                tag,
                cancel: cancel.clone(),
            },
        );

        let ctx = JobContext {
            registry: self.registry.clone(),
            permits: self.permits.clone(),
            executions: self.executions.clone(),
            started: self.started.subscribe(),
            location: self.config.location,
        };
        tokio::spawn(async move {
            run_job(&ctx, &name, firing, task, &cancel).await;
            ctx.registry.lock().await.remove(&id);
        });
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Timer loop for one job; returns when the job is exhausted or cancelled
async fn run_job(
    ctx: &JobContext,
    name: &str,
    firing: Firing,
    task: JobTask,
    cancel: &CancellationToken,
) {
    let mut started = ctx.started.clone();
    let opened = async move { started.wait_for(|running| *running).await.is_ok() };
    tokio::select! {
        _ = cancel.cancelled() => return,
        ok = opened => {
            if !ok {
                return;
            }
        }
    }

    let rule = match firing {
        Firing::OneShot => {
            fire(ctx, name, &task, cancel).await;
            return;
        }
        Firing::Recurring(rule) => rule,
    };

    let mut last = Utc::now();
    loop {
        let Some(next) = rule.next_after(last, &ctx.location) else {
            debug!(job = %name, "Job has no further fire times");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        last = next;
        if !fire(ctx, name, &task, cancel).await {
            return;
        }
    }
}

/// Wait for a permit and hand the execution to the tracker
///
/// Returns false when the job was cancelled while waiting.
async fn fire(ctx: &JobContext, name: &str, task: &JobTask, cancel: &CancellationToken) -> bool {
    let permit = tokio::select! {
        _ = cancel.cancelled() => return false,
        permit = ctx.permits.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return false,
        },
    };

    if cancel.is_cancelled() {
        return false;
    }

    debug!(job = %name, "Job fired");
    let run = task();
    ctx.executions.spawn(async move {
        run.await;
        drop(permit);
    });
    true
}
