//! Prometheus metrics
//!
//! Counters live in the default registry and are registered once per
//! process. [`PrometheusMetrics`] is the engine's [`MetricsSink`].

use anyhow::{Context, Result};
use cloudnap_core::{MetricsSink, OperationStatus, ResourceKind, SkipReason};
use prometheus::{register_int_counter_vec, IntCounterVec, TextEncoder};
use std::sync::OnceLock;

pub static OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SKIPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static CORRECTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

static INIT_RESULT: OnceLock<Result<(), String>> = OnceLock::new();

/// Register all counters, safe to call more than once
pub fn init_metrics() -> Result<()> {
    match INIT_RESULT.get_or_init(|| init_metrics_internal().map_err(|e| format!("{e:#}"))) {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Metrics initialization failed: {e}")),
    }
}

fn init_metrics_internal() -> Result<()> {
    OPERATIONS_TOTAL
        .set(
            register_int_counter_vec!(
                "cloudnap_operations_total",
                "Executor outcomes by resource type, action and status",
                &["resource_type", "action", "status"]
            )
            .context("Failed to register OPERATIONS_TOTAL metric")?,
        )
        .map_err(|_| anyhow::anyhow!("OPERATIONS_TOTAL already initialized"))?;

    SKIPS_TOTAL
        .set(
            register_int_counter_vec!(
                "cloudnap_scheduler_skips_total",
                "Skipped executions by reason",
                &["resource_type", "action", "reason"]
            )
            .context("Failed to register SKIPS_TOTAL metric")?,
        )
        .map_err(|_| anyhow::anyhow!("SKIPS_TOTAL already initialized"))?;

    CORRECTIONS_TOTAL
        .set(
            register_int_counter_vec!(
                "cloudnap_validator_corrections_total",
                "Corrective jobs submitted by the validator",
                &["resource_type", "action"]
            )
            .context("Failed to register CORRECTIONS_TOTAL metric")?,
        )
        .map_err(|_| anyhow::anyhow!("CORRECTIONS_TOTAL already initialized"))?;

    Ok(())
}

/// Text exposition of the default registry
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = String::new();
    if encoder.encode_utf8(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    buffer
}

/// [`MetricsSink`] backed by the process-global counters
#[derive(Debug, Clone, Copy)]
pub struct PrometheusMetrics;

impl PrometheusMetrics {
    /// Register counters and return the sink
    pub fn new() -> Result<Self> {
        init_metrics()?;
        Ok(Self)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn inc_operation(&self, kind: ResourceKind, action: &str, status: OperationStatus) {
        if let Some(counter) = OPERATIONS_TOTAL.get() {
            counter
                .with_label_values(&[kind.as_str(), action, status.as_str()])
                .inc();
        }
    }

    fn inc_skip(&self, kind: ResourceKind, action: &str, reason: SkipReason) {
        if let Some(counter) = SKIPS_TOTAL.get() {
            counter
                .with_label_values(&[kind.as_str(), action, reason.as_str()])
                .inc();
        }
    }

    fn inc_correction(&self, kind: ResourceKind, action: &str) {
        if let Some(counter) = CORRECTIONS_TOTAL.get() {
            counter.with_label_values(&[kind.as_str(), action]).inc();
        }
    }
}
