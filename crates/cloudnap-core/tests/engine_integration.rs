use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cloudnap_core::{
    ActionTrigger, DirectorySignature, Executor, JobScheduler, MetricsSink, OperationStatus,
    Operator, ReloadCallback, ReloadOutcome, Reloader, ResourceKind, ResourceRef, ResourceState,
    Result, ScheduleSpec, SchedulerConfig, ShutdownController, SkipReason, StateChecker,
    Validator,
};

struct Cloud {
    state: Mutex<ResourceState>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl Cloud {
    fn new(state: ResourceState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl StateChecker for Cloud {
    async fn get_state(&self, _resource: &ResourceRef) -> Result<ResourceState> {
        Ok(self.state.lock().unwrap().clone())
    }
}

#[async_trait]
impl Operator for Cloud {
    async fn start(&self, _resource: &ResourceRef) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = ResourceState::Running;
        Ok(())
    }

    async fn stop(&self, _resource: &ResourceRef) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = ResourceState::Stopped;
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    operations: Mutex<Vec<(String, OperationStatus)>>,
    skips: Mutex<Vec<SkipReason>>,
    corrections: AtomicUsize,
}

impl MetricsSink for Counters {
    fn inc_operation(&self, _kind: ResourceKind, action: &str, status: OperationStatus) {
        self.operations.lock().unwrap().push((action.to_string(), status));
    }

    fn inc_skip(&self, _kind: ResourceKind, _action: &str, reason: SkipReason) {
        self.skips.lock().unwrap().push(reason);
    }

    fn inc_correction(&self, _kind: ResourceKind, _action: &str) {
        self.corrections.fetch_add(1, Ordering::SeqCst);
    }
}

fn vm(id: &str) -> ResourceRef {
    ResourceRef::new(ResourceKind::Vm, id, "b1g-folder")
}

#[tokio::test]
async fn test_interval_job_drives_cloud_once_then_skips() {
    let cloud = Cloud::new(ResourceState::Stopped);
    let counters = Arc::new(Counters::default());
    let executor = Executor::new(cloud.clone(), Some(counters.clone()), false);
    let scheduler = Arc::new(JobScheduler::new(SchedulerConfig::new()));

    let spec = ScheduleSpec::new("burst", vm("fhm-burst"))
        .with_start(ActionTrigger::interval(Duration::from_millis(40)));
    scheduler.register_schedules(&executor, &[spec]).await.unwrap();

    let shutdown = ShutdownController::new(Duration::from_secs(2));
    let run = scheduler.clone();
    let token = shutdown.token();
    shutdown.spawn("scheduler", async move {
        let _ = run.start(token).await;
    });

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(shutdown.shutdown().await);

    assert_eq!(cloud.starts.load(Ordering::SeqCst), 1);
    let operations = counters.operations.lock().unwrap().clone();
    assert!(operations.len() >= 2);
    assert_eq!(operations[0], ("start".to_string(), OperationStatus::Success));
    assert!(counters
        .skips
        .lock()
        .unwrap()
        .iter()
        .all(|reason| *reason == SkipReason::AlreadyInState));
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_reload_and_reconcile_lifecycle() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("schedules.yaml"), "v1").unwrap();

    let cloud = Cloud::new(ResourceState::Running);
    let counters = Arc::new(Counters::default());
    let executor = Executor::new(cloud.clone(), Some(counters.clone()), false);
    let scheduler = Arc::new(JobScheduler::new(SchedulerConfig::new()));

    let initial = vec![ScheduleSpec::new("dev", vm("fhm-dev"))
        .with_start(ActionTrigger::daily("09:00".parse().unwrap()))];
    scheduler.register_schedules(&executor, &initial).await.unwrap();

    let validator = Arc::new(
        Validator::new(scheduler.clone(), executor.clone(), cloud.clone())
            .with_metrics(counters.clone())
            .with_interval(Duration::from_secs(3600))
            .with_schedules(initial),
    );

    // the "manifest" the callback reloads from
    let next = vec![ScheduleSpec::new("dev", vm("fhm-dev"))
        .with_stop(ActionTrigger::cron("0 20 * * *"))];
    let callback: ReloadCallback = {
        let scheduler = scheduler.clone();
        let executor = executor.clone();
        let validator = validator.clone();
        Arc::new(move || {
            let scheduler = scheduler.clone();
            let executor = executor.clone();
            let validator = validator.clone();
            let next = next.clone();
            Box::pin(async move {
                scheduler.replace_schedules(&executor, &next).await?;
                validator.update_schedules(next).await;
                Ok::<(), anyhow::Error>(())
            })
        })
    };
    let reloader = Reloader::new(
        Arc::new(DirectorySignature::new(dir.path())),
        Duration::from_millis(30),
        callback,
    )
    .unwrap();
    reloader.prime().await.unwrap();

    let shutdown = ShutdownController::new(Duration::from_secs(2));
    let run = scheduler.clone();
    let token = shutdown.token();
    shutdown.spawn("scheduler", async move {
        let _ = run.start(token).await;
    });
    shutdown.track("validator", validator.clone().start(shutdown.token()));

    // initial pass: only start, resource running, no drift
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counters.corrections.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.job_names().await, vec!["dev:start"]);

    std::fs::write(dir.path().join("schedules.yaml"), "v2").unwrap();
    assert_eq!(reloader.check().await, ReloadOutcome::Reloaded);
    assert_eq!(scheduler.job_names().await, vec!["dev:stop"]);

    // only stop now, resource running: one correction that runs at once
    assert_eq!(validator.run_once(chrono::Utc::now()).await, 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cloud.stops.load(Ordering::SeqCst), 1);
    assert_eq!(counters.corrections.load(Ordering::SeqCst), 1);

    assert!(shutdown.shutdown().await);
    assert_eq!(shutdown.active_task_count(), 0);
}
