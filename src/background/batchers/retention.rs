use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::common::errors::handle_error;
use crate::config::AppConfig;
use crate::staging::parse_preview_name;

/// Deletes previews nobody committed or discarded within the retention
/// window. Only files named like previews are touched.
#[derive(Debug, Clone)]
pub struct RetentionSweepTask {
    preview_dir: PathBuf,
    retention: Duration,
}

impl RetentionSweepTask {
    pub fn new(preview_dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            preview_dir: preview_dir.into(),
            retention,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.preview_dir, config.retention())
    }

    pub async fn run(&self) -> Result<usize> {
        let task = self.clone();
        tokio::task::spawn_blocking(move || task.sweep())
            .await
            .context("retention sweep task panicked")?
    }

    fn sweep(&self) -> Result<usize> {
        if !self.preview_dir.exists() {
            return Ok(0);
        }
        let start_time = Instant::now();
        let cutoff = SystemTime::now()
            .checked_sub(self.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for entry in WalkDir::new(&self.preview_dir).min_depth(1).max_depth(1) {
            let entry = entry.context(format!("failed to scan {:?}", self.preview_dir))?;
            if !entry.file_type().is_file()
                || parse_preview_name(&entry.file_name().to_string_lossy()).is_none()
            {
                continue;
            }
            let modified = entry
                .metadata()
                .context(format!("failed to stat {:?}", entry.path()))?
                .modified()?;
            if modified >= cutoff {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to delete expired preview {:?}: {}", entry.path(), err),
            }
        }

        if removed > 0 {
            info!(
                duration = &*format!("{:?}", start_time.elapsed());
                "Retention sweep removed {} expired previews", removed
            );
        }
        Ok(removed)
    }
}

/// Run the sweep every `every` until `shutdown` fires.
pub fn start_retention_sweep(
    task: RetentionSweepTask,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = task.run().await {
                        handle_error(err.context("Retention sweep failed"));
                    }
                }
            }
        }
    })
}
