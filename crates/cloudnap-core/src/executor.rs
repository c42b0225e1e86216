//! Action executor
//!
//! [`Executor::make`] builds the job body for one schedule action. Each
//! invocation goes through the same pipeline:
//!
//! 1. in-flight lock on `resource_type:resource_id:action` (contended → skip)
//! 2. dry-run short circuit
//! 3. best-effort live state check (transitional or already there → skip)
//! 4. cloud start/stop bounded by the operation timeout, no retry
//!
//! Exactly one operation outcome is reported to the metrics sink per
//! invocation.

use dashmap::DashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::metrics::{MetricsSink, OperationStatus, SkipReason};
use crate::resource::{CloudResourceClient, ResourceState};
use crate::schedule::{Action, ResourceKind, ResourceRef, ScheduleSpec};
use crate::scheduler::JobTask;

/// Default bound on a single cloud start/stop call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Keys of (resource, action) pairs currently executing
#[derive(Default)]
struct InFlight {
    keys: DashSet<String>,
}

impl InFlight {
    fn try_acquire(self: &Arc<Self>, key: String) -> Option<InFlightGuard> {
        if self.keys.insert(key.clone()) {
            Some(InFlightGuard {
                set: self.clone(),
                key,
            })
        } else {
            None
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Releases the in-flight key on every exit path
struct InFlightGuard {
    set: Arc<InFlight>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.keys.remove(&self.key);
    }
}

fn lock_key(resource: &ResourceRef, action: &str) -> String {
    format!("{}:{}:{}", resource.kind, resource.id, action)
}

/// Builds and runs start/stop job bodies
///
/// Clones share the in-flight lock set.
#[derive(Clone)]
pub struct Executor {
    client: Arc<dyn CloudResourceClient>,
    metrics: Option<Arc<dyn MetricsSink>>,
    dry_run: bool,
    operation_timeout: Duration,
    in_flight: Arc<InFlight>,
}

impl Executor {
    /// Create an executor
    pub fn new(
        client: Arc<dyn CloudResourceClient>,
        metrics: Option<Arc<dyn MetricsSink>>,
        dry_run: bool,
    ) -> Self {
        Self {
            client,
            metrics,
            dry_run,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Override the cloud operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Whether cloud calls are suppressed
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Whether `action` on `resource` is currently executing
    pub fn is_in_flight(&self, resource: &ResourceRef, action: &str) -> bool {
        self.in_flight.contains(&lock_key(resource, action))
    }

    /// Build the job body for `action` of `spec`
    pub fn make(&self, spec: &ScheduleSpec, action: &str) -> JobTask {
        let executor = self.clone();
        let spec = Arc::new(spec.clone());
        let action: Arc<str> = Arc::from(action);

        Arc::new(move || {
            let executor = executor.clone();
            let spec = spec.clone();
            let action = action.clone();
            Box::pin(async move {
                executor.run(&spec, &action).await;
            })
        })
    }

    /// Run one invocation of `action` for `spec` and report its outcome
    pub async fn run(&self, spec: &ScheduleSpec, action: &str) -> OperationStatus {
        let resource = &spec.resource;

        let Some(_guard) = self.in_flight.try_acquire(lock_key(resource, action)) else {
            info!(
                schedule = %spec.name,
                resource_type = %resource.kind,
                resource_id = %resource.id,
                action,
                "Operation already in flight, skipping"
            );
            self.record_skip(resource.kind, action, SkipReason::InFlight);
            return OperationStatus::Skipped;
        };

        if self.dry_run {
            info!(
                schedule = %spec.name,
                resource_type = %resource.kind,
                resource_id = %resource.id,
                action,
                "Dry run, not contacting resource"
            );
            self.record(resource.kind, action, OperationStatus::DryRun);
            return OperationStatus::DryRun;
        }

        let Some(target) = Action::from_label(action) else {
            error!(
                schedule = %spec.name,
                resource_type = %resource.kind,
                resource_id = %resource.id,
                action,
                "Unsupported action"
            );
            self.record(resource.kind, action, OperationStatus::Error);
            return OperationStatus::Error;
        };

        match self.client.get_state(resource).await {
            Err(e) => warn!(
                schedule = %spec.name,
                resource_type = %resource.kind,
                resource_id = %resource.id,
                action,
                error = %e,
                "Failed to get resource state, proceeding with operation"
            ),
            Ok(state) if state.is_transitional() => {
                info!(
                    schedule = %spec.name,
                    resource_type = %resource.kind,
                    resource_id = %resource.id,
                    action,
                    state = %state,
                    "Resource in transitional state, skipping"
                );
                self.record_skip(resource.kind, action, SkipReason::TransitionalState);
                return OperationStatus::Skipped;
            }
            Ok(state) if state == ResourceState::target_of(target) => {
                info!(
                    schedule = %spec.name,
                    resource_type = %resource.kind,
                    resource_id = %resource.id,
                    action,
                    state = %state,
                    "Resource already in target state, skipping"
                );
                self.record_skip(resource.kind, action, SkipReason::AlreadyInState);
                return OperationStatus::Skipped;
            }
            Ok(_) => {}
        }

        let started = Instant::now();
        let client = &self.client;
        let call = async {
            match target {
                Action::Start => client.start(resource).await,
                Action::Stop => client.stop(resource).await,
            }
        };

        let status = match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(Ok(())) => {
                info!(
                    schedule = %spec.name,
                    resource_type = %resource.kind,
                    resource_id = %resource.id,
                    action,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Operation completed"
                );
                OperationStatus::Success
            }
            Ok(Err(e)) => {
                error!(
                    schedule = %spec.name,
                    resource_type = %resource.kind,
                    resource_id = %resource.id,
                    action,
                    error = %e,
                    "Operation failed"
                );
                OperationStatus::Error
            }
            Err(_) => {
                error!(
                    schedule = %spec.name,
                    resource_type = %resource.kind,
                    resource_id = %resource.id,
                    action,
                    timeout_secs = self.operation_timeout.as_secs(),
                    "Operation timed out"
                );
                OperationStatus::Error
            }
        };

        self.record(resource.kind, action, status);
        status
    }

    fn record(&self, kind: ResourceKind, action: &str, status: OperationStatus) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_operation(kind, action, status);
        }
    }

    fn record_skip(&self, kind: ResourceKind, action: &str, reason: SkipReason) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_operation(kind, action, OperationStatus::Skipped);
            metrics.inc_skip(kind, action, reason);
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("dry_run", &self.dry_run)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}
