//! Test doubles shared by unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::metrics::{MetricsSink, OperationStatus, SkipReason};
use crate::resource::{Operator, ResourceState, StateChecker};
use crate::schedule::{ActionTrigger, ResourceKind, ResourceRef, ScheduleSpec};

/// In-memory resource with configurable latency
pub struct FakeCloud {
    state: Mutex<Option<ResourceState>>,
    delay: Duration,
    fail_ops: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeCloud {
    pub fn new(state: ResourceState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            delay: Duration::ZERO,
            fail_ops: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Every state query fails
    pub fn unreachable() -> Self {
        let fake = Self::new(ResourceState::Stopped);
        *fake.state.lock().unwrap() = None;
        fake
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_ops = true;
        self
    }

    pub fn set_state(&self, state: ResourceState) {
        *self.state.lock().unwrap() = Some(state);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    async fn transition(&self, target: ResourceState) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        if self.fail_ops {
            return Err(Error::Cloud("operation rejected".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if state.is_some() {
            *state = Some(target);
        }
        Ok(())
    }
}

#[async_trait]
impl StateChecker for FakeCloud {
    async fn get_state(&self, _resource: &ResourceRef) -> Result<ResourceState> {
        self.state
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Cloud("connection refused".to_string()))
    }
}

#[async_trait]
impl Operator for FakeCloud {
    async fn start(&self, _resource: &ResourceRef) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.transition(ResourceState::Running).await
    }

    async fn stop(&self, _resource: &ResourceRef) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.transition(ResourceState::Stopped).await
    }
}

/// Sink that records every increment
#[derive(Default)]
pub struct RecordingMetrics {
    pub operations: Mutex<Vec<(ResourceKind, String, OperationStatus)>>,
    pub skips: Mutex<Vec<(ResourceKind, String, SkipReason)>>,
    pub corrections: Mutex<Vec<(ResourceKind, String)>>,
}

impl RecordingMetrics {
    pub fn statuses(&self) -> Vec<OperationStatus> {
        self.operations.lock().unwrap().iter().map(|(_, _, s)| *s).collect()
    }

    pub fn skip_reasons(&self) -> Vec<SkipReason> {
        self.skips.lock().unwrap().iter().map(|(_, _, r)| *r).collect()
    }

    pub fn correction_actions(&self) -> Vec<String> {
        self.corrections.lock().unwrap().iter().map(|(_, a)| a.clone()).collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn inc_operation(&self, kind: ResourceKind, action: &str, status: OperationStatus) {
        self.operations.lock().unwrap().push((kind, action.to_string(), status));
    }

    fn inc_skip(&self, kind: ResourceKind, action: &str, reason: SkipReason) {
        self.skips.lock().unwrap().push((kind, action.to_string(), reason));
    }

    fn inc_correction(&self, kind: ResourceKind, action: &str) {
        self.corrections.lock().unwrap().push((kind, action.to_string()));
    }
}

pub fn vm(id: &str) -> ResourceRef {
    ResourceRef::new(ResourceKind::Vm, id, "b1g-folder")
}

pub fn office_hours(name: &str) -> ScheduleSpec {
    ScheduleSpec::new(name, vm(&format!("{name}-vm")))
        .with_start(ActionTrigger::daily("09:00".parse().unwrap()))
        .with_stop(ActionTrigger::daily("18:00".parse().unwrap()))
}
