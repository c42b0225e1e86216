//! Daemon lifecycle
//!
//! Wires the cloud client, metrics and engine components together, runs
//! them under one [`ShutdownController`] and tears them down on Ctrl+C or
//! SIGTERM.

use anyhow::{Context, Result};
use cloudnap_core::{
    wait_for_shutdown_signal, DirectorySignature, Executor, JobScheduler, Location, MetricsSink,
    ReloadCallback, Reloader, ScheduleSpec, SchedulerConfig, ShutdownController, Validator,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::manifest;
use crate::metrics::PrometheusMetrics;
use crate::web;
use crate::yc::{Credentials, YcClient};

/// Run the daemon until a shutdown signal arrives
pub async fn run(
    config: AppConfig,
    schedules: Vec<ScheduleSpec>,
    credentials: Credentials,
    dry_run: bool,
) -> Result<()> {
    info!(
        credentials = credentials.kind(),
        schedules = schedules.len(),
        dry_run,
        "Starting cloudnap v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = Arc::new(YcClient::new(credentials).context("Failed to build cloud client")?);
    client
        .validate_credentials()
        .await
        .context("Failed to validate cloud credentials")?;

    let metrics: Option<Arc<dyn MetricsSink>> = if config.metrics_enabled {
        Some(Arc::new(PrometheusMetrics::new()?))
    } else {
        None
    };

    let location = Location::resolve(&config.timezone);
    info!(location = %location, "Schedules evaluated in {}", location);

    let scheduler = Arc::new(JobScheduler::new(
        SchedulerConfig::new()
            .with_max_concurrent(config.max_concurrent_jobs)
            .with_location(location)
            .with_drain_timeout(config.shutdown_timeout),
    ));
    let executor = Executor::new(client.clone(), metrics.clone(), dry_run);

    let mut validator = Validator::new(scheduler.clone(), executor.clone(), client.clone())
        .with_interval(config.validation_interval)
        .with_schedules(schedules.clone());
    if let Some(metrics) = &metrics {
        validator = validator.with_metrics(metrics.clone());
    }
    let validator = Arc::new(validator);

    scheduler
        .register_schedules(&executor, &schedules)
        .await
        .context("Failed to register schedules")?;

    let reloader = Arc::new(Reloader::new(
        Arc::new(DirectorySignature::new(&config.schedules_dir)),
        config.reload_interval,
        reload_callback(&config, scheduler.clone(), executor.clone(), validator.clone()),
    )?);
    if let Err(e) = reloader.prime().await {
        warn!(error = %e, "Failed to fingerprint schedules directory");
    }

    let shutdown = ShutdownController::new(config.shutdown_timeout);

    let scheduler_task = scheduler.clone();
    let scheduler_token = shutdown.token();
    shutdown.spawn("scheduler", async move {
        if let Err(e) = scheduler_task.start(scheduler_token).await {
            error!(error = %e, "Scheduler stopped with error");
        }
    });
    shutdown.track("validator", validator.clone().start(shutdown.token()));
    shutdown.track("reloader", reloader.start(shutdown.token()));

    if config.metrics_enabled {
        let port = config.metrics_port;
        let server_scheduler = scheduler.clone();
        let server_shutdown = shutdown.clone();
        let server_token = shutdown.token();
        shutdown.spawn("http", async move {
            if let Err(e) = web::serve(port, server_scheduler, server_shutdown, server_token).await {
                error!(error = %e, "HTTP server failed");
            }
        });
    }

    info!(
        jobs = scheduler.job_names().await.len(),
        schedules_dir = %config.schedules_dir.display(),
        "cloudnap is running"
    );

    wait_for_shutdown_signal().await;

    if !shutdown.shutdown().await {
        warn!("Some tasks did not finish before the shutdown timeout");
    }
    info!("cloudnap shutdown complete");
    Ok(())
}

/// Reload manifests and swap the managed job set
///
/// A manifest error leaves the running jobs and the validator untouched.
fn reload_callback(
    config: &AppConfig,
    scheduler: Arc<JobScheduler>,
    executor: Executor,
    validator: Arc<Validator>,
) -> ReloadCallback {
    let dir = config.schedules_dir.clone();
    Arc::new(move || {
        let dir = dir.clone();
        let scheduler = scheduler.clone();
        let executor = executor.clone();
        let validator = validator.clone();
        Box::pin(async move {
            let specs = tokio::task::spawn_blocking(move || manifest::load_schedules(&dir))
                .await
                .context("Manifest loader panicked")??;
            scheduler.replace_schedules(&executor, &specs).await?;
            validator.update_schedules(specs).await;
            Ok::<(), anyhow::Error>(())
        })
    })
}
