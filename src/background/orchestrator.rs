//! Batch orchestrator - one transform at a time over an ordered id list.
//!
//! Deadlines nest as invoker < per-item < batch. The per-item scope is a
//! child of the batch token, so a reset cancels the running item; dropping
//! the item future kills the tool process and removes its partial output.

use futures::FutureExt;
use log::{info, warn};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until, timeout};

use crate::catalog::CatalogProvider;
use crate::common::errors::{CropError, CropResult, TimeoutScope};
use crate::config::AppConfig;
use crate::models::entity::{
    BatchEvent, BatchMode, BatchSummary, ItemOutcome, ResourceId, TerminationCause,
};
use crate::staging::{DirectCropper, PreviewStore};
use crate::supervisor::{GuardTicket, Supervisor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorSettings {
    pub item_timeout: Duration,
    pub master_deadline: Duration,
    pub pacing: Duration,
    pub error_fraction: f64,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            item_timeout: config.item_timeout(),
            master_deadline: config.master_deadline(),
            pacing: config.pacing(),
            error_fraction: config.error_fraction,
        }
    }

    /// Errors at which the batch stops: `ceil(total * fraction)`, at least 1.
    pub fn error_threshold(&self, total: usize) -> usize {
        ((total as f64 * self.error_fraction).ceil() as usize).max(1)
    }
}

#[derive(Default)]
struct Counters {
    completed: usize,
    success: usize,
    error: usize,
}

pub struct BatchOrchestrator {
    previews: PreviewStore,
    direct: DirectCropper,
    catalog: Arc<dyn CatalogProvider>,
    supervisor: Arc<Supervisor>,
    settings: OrchestratorSettings,
}

impl BatchOrchestrator {
    pub fn new(
        previews: PreviewStore,
        direct: DirectCropper,
        catalog: Arc<dyn CatalogProvider>,
        supervisor: Arc<Supervisor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            previews,
            direct,
            catalog,
            supervisor,
            settings,
        }
    }

    async fn run_item(
        &self,
        id: ResourceId,
        parameter: u32,
        mode: BatchMode,
    ) -> CropResult<ItemOutcome> {
        match mode {
            BatchMode::StageOnly => {
                let preview = self.previews.create(id, parameter).await?;
                Ok(ItemOutcome::Success {
                    dimensions: preview.dimensions.unwrap_or_default(),
                    preview_ref: Some(preview.reference()),
                })
            }
            BatchMode::CommitImmediately => {
                let (dimensions, _) = self.direct.crop_in_place(id, parameter).await?;
                match self.catalog.rendered_url(id) {
                    Ok(url) => {
                        self.supervisor.refresh(id, &url);
                    }
                    Err(err) => warn!("No rendered URL for resource {}: {}", id, err),
                }
                Ok(ItemOutcome::Success {
                    dimensions,
                    preview_ref: None,
                })
            }
        }
    }

    /// Process `ids` in order and return the summary, which is also the last
    /// event sent. Never resumes a previous run.
    pub async fn run(
        &self,
        ids: &[ResourceId],
        parameter: u32,
        mode: BatchMode,
        ticket: &GuardTicket,
        events: mpsc::Sender<BatchEvent>,
    ) -> BatchSummary {
        let total = ids.len();
        let threshold = self.settings.error_threshold(total);
        let deadline = Instant::now() + self.settings.master_deadline;
        let batch_token = ticket.token().clone();
        let mut counters = Counters::default();
        let mut cause = TerminationCause::Exhausted;

        info!(
            "Batch started: {} images, parameter {}, {:?}, stops at {} errors",
            total, parameter, mode, threshold
        );

        for (index, &id) in ids.iter().enumerate() {
            if batch_token.is_cancelled() {
                cause = TerminationCause::ManualCancel;
                break;
            }
            if Instant::now() >= deadline {
                cause = TerminationCause::MasterTimeout;
                break;
            }
            ticket.touch();
            emit(&events, BatchEvent::Started { index, total, resource_id: id }).await;

            let item_token = batch_token.child_token();
            let result = tokio::select! {
                biased;
                _ = item_token.cancelled() => {
                    cause = TerminationCause::ManualCancel;
                    Err(CropError::Cancelled)
                }
                _ = sleep_until(deadline) => {
                    cause = TerminationCause::MasterTimeout;
                    Err(CropError::Timeout(TimeoutScope::Master))
                }
                finished = timeout(
                    self.settings.item_timeout,
                    AssertUnwindSafe(self.run_item(id, parameter, mode)).catch_unwind(),
                ) => {
                    match finished {
                        Ok(Ok(result)) => result,
                        // A panicking item ends the batch but still counts as a failed item.
                        Ok(Err(panic)) => {
                            cause = TerminationCause::ManualCancel;
                            Err(self.supervisor.abort(panic))
                        }
                        Err(_) => Err(CropError::Timeout(TimeoutScope::Item)),
                    }
                }
            };

            counters.completed += 1;
            let outcome = match result {
                Ok(outcome) => {
                    counters.success += 1;
                    outcome
                }
                Err(err) => {
                    counters.error += 1;
                    warn!("Item {}/{} (resource {}) failed: {}", index + 1, total, id, err);
                    ItemOutcome::failure(&err)
                }
            };
            emit(
                &events,
                BatchEvent::ItemFinished {
                    index,
                    resource_id: id,
                    outcome,
                },
            )
            .await;

            if cause != TerminationCause::Exhausted {
                break;
            }
            if counters.error >= threshold {
                cause = TerminationCause::ErrorThreshold;
                break;
            }
            if index + 1 < total {
                tokio::select! {
                    biased;
                    _ = batch_token.cancelled() => {
                        cause = TerminationCause::ManualCancel;
                        break;
                    }
                    _ = sleep_until(deadline) => {
                        cause = TerminationCause::MasterTimeout;
                        break;
                    }
                    _ = sleep(self.settings.pacing) => {}
                }
            }
        }

        let summary = BatchSummary {
            total,
            completed: counters.completed,
            success: counters.success,
            error: counters.error,
            cause,
            message: summary_message(&counters, total, threshold, cause, &self.settings),
        };
        info!("Batch finished ({}): {}", cause, summary.message);
        emit(&events, BatchEvent::Finished(summary.clone())).await;
        summary
    }
}

async fn emit(events: &mpsc::Sender<BatchEvent>, event: BatchEvent) {
    // The batch keeps going when the listener went away.
    let _ = events.send(event).await;
}

fn summary_message(
    counters: &Counters,
    total: usize,
    threshold: usize,
    cause: TerminationCause,
    settings: &OrchestratorSettings,
) -> String {
    match cause {
        TerminationCause::Exhausted => format!(
            "Processed {} images: {} succeeded, {} failed",
            total, counters.success, counters.error
        ),
        TerminationCause::ErrorThreshold => format!(
            "Stopped after {} of {} images: {} failures reached the limit of {}",
            counters.completed, total, counters.error, threshold
        ),
        TerminationCause::MasterTimeout => format!(
            "Batch deadline of {:?} reached after {} of {} images; the rest were not processed",
            settings.master_deadline, counters.completed, total
        ),
        TerminationCause::ManualCancel => format!(
            "Cancelled after {} of {} images ({} succeeded)",
            counters.completed, total, counters.success
        ),
    }
}
