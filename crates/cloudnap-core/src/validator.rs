//! Drift reconciliation
//!
//! Every tick the validator compares each schedule's live resource state
//! with the state the schedule implies at that instant, and submits a
//! one-shot corrective job through the scheduler on mismatch.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use crate::metrics::MetricsSink;
use crate::resource::{ResourceState, StateChecker};
use crate::schedule::{Action, ActionTrigger, ScheduleSpec};
use crate::scheduler::{FiringRule, JobScheduler, Location};

/// Default time between reconciliation passes
pub const DEFAULT_VALIDATION_INTERVAL: Duration = Duration::from_secs(600);

/// State `spec` implies at `now`
///
/// With both actions present the more recent previous fire wins, ties go
/// to stop. A side whose previous fire cannot be computed falls back to
/// that side's own target state.
pub fn expected_state(
    spec: &ScheduleSpec,
    now: DateTime<Utc>,
    location: &Location,
) -> Option<ResourceState> {
    match (&spec.start, &spec.stop) {
        (None, None) => None,
        (Some(_), None) => Some(ResourceState::Running),
        (None, Some(_)) => Some(ResourceState::Stopped),
        (Some(start), Some(stop)) => {
            let last_fire = |trigger: &ActionTrigger| {
                FiringRule::from_trigger(trigger).and_then(|rule| rule.last_fire_before(now, location))
            };

            let last_start = match last_fire(start) {
                Ok(at) => at,
                Err(e) => {
                    debug!(schedule = %spec.name, error = %e, "Cannot compute last start");
                    return Some(ResourceState::Running);
                }
            };
            let last_stop = match last_fire(stop) {
                Ok(at) => at,
                Err(e) => {
                    debug!(schedule = %spec.name, error = %e, "Cannot compute last stop");
                    return Some(ResourceState::Stopped);
                }
            };

            if last_start > last_stop {
                Some(ResourceState::Running)
            } else {
                Some(ResourceState::Stopped)
            }
        }
    }
}

/// Periodic reconciler
pub struct Validator {
    scheduler: Arc<JobScheduler>,
    executor: Executor,
    checker: Arc<dyn StateChecker>,
    metrics: Option<Arc<dyn MetricsSink>>,
    interval: Duration,
    schedules: RwLock<Arc<Vec<ScheduleSpec>>>,
}

impl Validator {
    /// Create a validator with no schedules
    pub fn new(
        scheduler: Arc<JobScheduler>,
        executor: Executor,
        checker: Arc<dyn StateChecker>,
    ) -> Self {
        Self {
            scheduler,
            executor,
            checker,
            metrics: None,
            interval: DEFAULT_VALIDATION_INTERVAL,
            schedules: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Count corrections in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the time between passes
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the initial schedule list
    pub fn with_schedules(mut self, schedules: Vec<ScheduleSpec>) -> Self {
        self.schedules = RwLock::new(Arc::new(schedules));
        self
    }

    /// Replace the schedule list used by subsequent passes
    pub async fn update_schedules(&self, schedules: Vec<ScheduleSpec>) {
        let count = schedules.len();
        *self.schedules.write().await = Arc::new(schedules);
        info!(schedules = count, "Validator schedules updated");
    }

    /// Spawn the reconciliation loop
    ///
    /// The first pass runs immediately, then once per interval until
    /// `token` is cancelled.
    pub fn start(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.interval.is_zero() {
                warn!("Validation interval is zero, validator disabled");
                return;
            }

            info!(interval_secs = self.interval.as_secs(), "Validator started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Validator stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.run_once(Utc::now()).await;
                    }
                }
            }
        })
    }

    /// Run one pass over every schedule, returning the corrections submitted
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let schedules = self.schedules.read().await.clone();
        debug!(schedules = schedules.len(), "Validation pass started");

        let mut corrections = 0;
        for spec in schedules.iter() {
            if self.reconcile(spec, now).await {
                corrections += 1;
            }
        }

        if corrections > 0 {
            info!(corrections, "Validation pass completed");
        } else {
            debug!("Validation pass completed, no drift");
        }
        corrections
    }

    async fn reconcile(&self, spec: &ScheduleSpec, now: DateTime<Utc>) -> bool {
        let resource = &spec.resource;

        if !spec.is_reconcilable() {
            debug!(schedule = %spec.name, "Skipping schedule with interval or one-time trigger");
            return false;
        }

        let actual = match self.checker.get_state(resource).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    schedule = %spec.name,
                    resource_type = %resource.kind,
                    resource_id = %resource.id,
                    error = %e,
                    "Failed to get resource state for validation"
                );
                return false;
            }
        };

        if actual.is_transitional() {
            debug!(
                schedule = %spec.name,
                resource_id = %resource.id,
                state = %actual,
                "Resource in transitional state, deferring validation"
            );
            return false;
        }

        let Some(expected) = expected_state(spec, now, &self.scheduler.location()) else {
            return false;
        };
        if actual == expected {
            return false;
        }
        let Some(action) = expected.reached_by() else {
            return false;
        };

        warn!(
            schedule = %spec.name,
            resource_type = %resource.kind,
            resource_id = %resource.id,
            expected = %expected,
            actual = %actual,
            action = %action,
            "State drift detected, submitting correction"
        );
        self.submit(spec, action).await
    }

    async fn submit(&self, spec: &ScheduleSpec, action: Action) -> bool {
        let job = format!("{}:validator:{}", spec.name, action);
        let task = self.executor.make(spec, action.as_str());

        match self.scheduler.add_one_shot_job(job.clone(), task).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_correction(spec.resource.kind, action.as_str());
                }
                true
            }
            Err(e) => {
                error!(schedule = %spec.name, job = %job, error = %e, "Failed to submit correction");
                false
            }
        }
    }
}
