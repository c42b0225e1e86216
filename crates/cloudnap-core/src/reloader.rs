//! Schedule source hot reload
//!
//! Polls a [`SignatureSource`] and invokes the host callback when the
//! signature moves. The baseline only advances on a successful reload,
//! and a rejected signature is not retried until the content changes again.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Default poll interval
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(10);

/// Host callback that re-reads and applies the schedule source
pub type ReloadCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

/// Content fingerprint of a schedule source
#[async_trait]
pub trait SignatureSource: Send + Sync {
    /// Current signature; equal content yields equal signatures
    async fn signature(&self) -> Result<String>;
}

/// SHA-256 over every `*.yaml`/`*.yml` file in a directory
///
/// Files are hashed in name order as `name NUL content NUL`, so renames
/// and edits both change the signature.
#[derive(Debug, Clone)]
pub struct DirectorySignature {
    dir: PathBuf,
}

impl DirectorySignature {
    /// Watch `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Whether `path` has a `.yaml` or `.yml` extension, in any case
pub fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

#[async_trait]
impl SignatureSource for DirectorySignature {
    async fn signature(&self) -> Result<String> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && is_manifest_file(&path) {
                files.push((entry.file_name().to_string_lossy().into_owned(), path));
            }
        }
        files.sort();

        let mut hasher = Sha256::new();
        for (name, path) in &files {
            let content = tokio::fs::read(path).await?;
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(&content);
            hasher.update([0u8]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Signature equals the baseline or the last rejected signature
    Unchanged,
    /// Callback succeeded, baseline advanced
    Reloaded,
    /// Callback failed, previous baseline kept
    Rejected,
    /// Signature could not be read
    SourceError,
}

#[derive(Default)]
struct Baseline {
    applied: Option<String>,
    rejected: Option<String>,
}

/// Polling reloader
pub struct Reloader {
    source: Arc<dyn SignatureSource>,
    interval: Duration,
    callback: ReloadCallback,
    baseline: Mutex<Baseline>,
}

impl Reloader {
    /// Create a reloader; a zero interval is rejected
    pub fn new(
        source: Arc<dyn SignatureSource>,
        interval: Duration,
        callback: ReloadCallback,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::InvalidConfig(
                "reload interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            source,
            interval,
            callback,
            baseline: Mutex::new(Baseline::default()),
        })
    }

    /// Record the current signature as applied without reloading
    ///
    /// Called after the initial load so the first poll does not reload
    /// content that is already running.
    pub async fn prime(&self) -> Result<()> {
        let signature = self.source.signature().await?;
        self.baseline.lock().await.applied = Some(signature);
        Ok(())
    }

    /// Poll once and reload on change
    pub async fn check(&self) -> ReloadOutcome {
        let signature = match self.source.signature().await {
            Ok(signature) => signature,
            Err(e) => {
                warn!(error = %e, "Failed to read schedule signature");
                return ReloadOutcome::SourceError;
            }
        };

        let mut baseline = self.baseline.lock().await;
        if baseline.applied.as_deref() == Some(signature.as_str()) {
            return ReloadOutcome::Unchanged;
        }
        if baseline.rejected.as_deref() == Some(signature.as_str()) {
            debug!("Schedule source still matches rejected content");
            return ReloadOutcome::Unchanged;
        }

        info!("Schedule source changed, reloading");
        match (self.callback)().await {
            Ok(()) => {
                baseline.applied = Some(signature);
                baseline.rejected = None;
                info!("Schedules reloaded");
                ReloadOutcome::Reloaded
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "Reload failed, keeping previous schedules");
                baseline.rejected = Some(signature);
                ReloadOutcome::Rejected
            }
        }
    }

    /// Spawn the polling loop; the first poll happens one interval from now
    pub fn start(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Reloader started");
            let first = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(first, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Reloader stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.check().await;
                    }
                }
            }
        })
    }
}
