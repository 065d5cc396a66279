//! Mutating entry points.
//!
//! Each call checks the anti-forgery token, then the request, then takes
//! the operation guard, in that order, so a rejected call never changes
//! anything.

pub mod nonce;

use anyhow::Result;
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::background::orchestrator::{BatchOrchestrator, OrchestratorSettings};
use crate::background::processors::transformer::Transformer;
use crate::catalog::CatalogProvider;
use crate::common::errors::{CropError, CropResult, TimeoutScope};
use crate::common::{MAX_PAGE_SIZE, PREVIEW_URL_PREFIX};
use crate::config::AppConfig;
use crate::models::dto::{
    BatchRunRequest, IssuedNonce, LeaveOutcome, PreviewCommitted, PreviewCreateRequest,
    PreviewCreated, PreviewDiscarded, ResetOutcome, ResourceRequest, SelectionRequest,
    SnapshotRestored, SnapshotStatus,
};
use crate::models::entity::{
    BatchEvent, BatchSummary, ResourceId, SelectionItem, TerminationCause,
};
use crate::staging::{DirectCropper, PreviewStore, SnapshotStore};
use crate::supervisor::{GuardTicket, ResetReason, Supervisor};
use crate::utils::cache_busted;

pub use nonce::NonceKeeper;

pub struct CropService {
    catalog: Arc<dyn CatalogProvider>,
    previews: PreviewStore,
    snapshots: SnapshotStore,
    orchestrator: Arc<BatchOrchestrator>,
    supervisor: Arc<Supervisor>,
    nonces: NonceKeeper,
    item_timeout: Duration,
    max_batch_ids: usize,
    max_selection_owners: usize,
}

impl CropService {
    pub fn new(
        config: &AppConfig,
        catalog: Arc<dyn CatalogProvider>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        let supervisor = Arc::new(Supervisor::new(config.stale_threshold()));
        let previews = PreviewStore::new(
            &config.preview_dir,
            Arc::clone(&catalog),
            Arc::clone(&transformer),
            config.reencode_timeout(),
        );
        let direct = DirectCropper::new(
            Arc::clone(&catalog),
            transformer,
            config.reencode_timeout(),
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(
            previews.clone(),
            direct,
            Arc::clone(&catalog),
            Arc::clone(&supervisor),
            OrchestratorSettings::from_config(config),
        ));
        Self {
            snapshots: previews.snapshots().clone(),
            catalog,
            previews,
            orchestrator,
            supervisor,
            nonces: NonceKeeper::new(&config.get_jwt_secret_key(), config.nonce_lifetime()),
            item_timeout: config.item_timeout(),
            max_batch_ids: config.max_batch_ids,
            max_selection_owners: config.max_selection_owners,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogProvider> {
        &self.catalog
    }

    pub fn issue_nonce(&self) -> Result<IssuedNonce> {
        self.nonces.issue()
    }

    /// Run a single guarded operation under the per-item deadline, the
    /// guard's cancellation and the panic trap.
    async fn guarded<T, F>(&self, ticket: &GuardTicket, operation: F) -> CropResult<T>
    where
        F: Future<Output = CropResult<T>>,
    {
        let item_timeout = self.item_timeout;
        self.supervisor
            .trap(async move {
                tokio::select! {
                    biased;
                    _ = ticket.token().cancelled() => Err(CropError::Cancelled),
                    finished = timeout(item_timeout, operation) => {
                        finished.unwrap_or(Err(CropError::Timeout(TimeoutScope::Item)))
                    }
                }
            })
            .await
    }

    fn refresh(&self, id: ResourceId) -> String {
        match self.catalog.rendered_url(id) {
            Ok(url) => self.supervisor.refresh(id, &url),
            Err(err) => {
                warn!("No rendered URL for resource {}: {}", id, err);
                String::new()
            }
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Previews
    // ────────────────────────────────────────────────────────────────

    pub async fn preview_create(
        &self,
        token: &str,
        request: PreviewCreateRequest,
    ) -> CropResult<PreviewCreated> {
        self.nonces.validate(token)?;
        let parameter = request.validated_parameter()?;
        let ticket = self.supervisor.try_acquire("preview-create")?;

        let preview = self
            .guarded(&ticket, self.previews.create(request.resource_id, parameter))
            .await?;
        let preview_ref = preview.reference();
        Ok(PreviewCreated {
            resource_id: request.resource_id,
            preview_url: cache_busted(
                &format!("{PREVIEW_URL_PREFIX}/{preview_ref}"),
                preview.created_ms,
            ),
            preview_ref,
            parameter,
            dimensions: preview.dimensions.unwrap_or_default(),
        })
    }

    pub async fn preview_commit(
        &self,
        token: &str,
        request: ResourceRequest,
    ) -> CropResult<PreviewCommitted> {
        self.nonces.validate(token)?;
        let ticket = self.supervisor.try_acquire("preview-commit")?;

        let id = request.resource_id;
        let report = self.guarded(&ticket, self.previews.commit(id)).await?;
        Ok(PreviewCommitted {
            resource_id: id,
            new_dimensions: report.new_dimensions,
            encoding_used: report.promotion.encoding_used,
            raw_copy_fallback: report.promotion.raw_copy_fallback,
            url: self.refresh(id),
        })
    }

    pub async fn preview_discard(
        &self,
        token: &str,
        request: ResourceRequest,
    ) -> CropResult<PreviewDiscarded> {
        self.nonces.validate(token)?;
        let ticket = self.supervisor.try_acquire("preview-discard")?;

        let id = request.resource_id;
        let deleted_count = self
            .guarded(&ticket, async { Ok::<_, CropError>(self.previews.discard(id).await) })
            .await?;
        Ok(PreviewDiscarded {
            resource_id: id,
            deleted_count,
        })
    }

    // ────────────────────────────────────────────────────────────────
    // Snapshots
    // ────────────────────────────────────────────────────────────────

    pub async fn snapshot_restore(
        &self,
        token: &str,
        request: ResourceRequest,
    ) -> CropResult<SnapshotRestored> {
        self.nonces.validate(token)?;
        let ticket = self.supervisor.try_acquire("snapshot-restore")?;

        let id = request.resource_id;
        let dimensions = self.guarded(&ticket, self.snapshots.restore(id)).await?;
        Ok(SnapshotRestored {
            resource_id: id,
            dimensions,
            url: self.refresh(id),
        })
    }

    /// Read-only, so no token and no guard.
    pub async fn snapshot_status(&self, ids: &[ResourceId]) -> CropResult<Vec<SnapshotStatus>> {
        if ids.len() > MAX_PAGE_SIZE {
            return Err(CropError::Validation(format!(
                "at most {MAX_PAGE_SIZE} ids per status query"
            )));
        }
        let mut statuses = Vec::with_capacity(ids.len());
        for &id in ids {
            statuses.push(self.snapshots.status(id).await?);
        }
        Ok(statuses)
    }

    // ────────────────────────────────────────────────────────────────
    // Batches
    // ────────────────────────────────────────────────────────────────

    /// Start a batch in the background. The receiver yields progress and
    /// exactly one `Finished`; the handle resolves to the same summary.
    pub fn batch_run(
        &self,
        token: &str,
        request: BatchRunRequest,
    ) -> CropResult<(mpsc::Receiver<BatchEvent>, JoinHandle<BatchSummary>)> {
        self.nonces.validate(token)?;
        let parameter = request.validate(self.max_batch_ids)?;
        let ticket = self.supervisor.try_acquire("batch-run")?;

        // Room for every event of the largest batch, so a slow reader never
        // stalls the run.
        let (events, receiver) = mpsc::channel(request.resource_ids.len() * 2 + 1);
        let orchestrator = Arc::clone(&self.orchestrator);
        let supervisor = Arc::clone(&self.supervisor);
        let (ids, mode) = (request.resource_ids, request.mode);

        let handle = tokio::spawn(async move {
            let trapped = supervisor
                .trap(async {
                    Ok(orchestrator
                        .run(&ids, parameter, mode, &ticket, events.clone())
                        .await)
                })
                .await;

            let summary = match trapped {
                Ok(summary) => summary,
                Err(err) => {
                    let summary = BatchSummary {
                        total: ids.len(),
                        completed: 0,
                        success: 0,
                        error: 0,
                        cause: TerminationCause::ManualCancel,
                        message: err.user_message(),
                    };
                    let _ = events.send(BatchEvent::Finished(summary.clone())).await;
                    summary
                }
            };
            if summary.cause == TerminationCause::MasterTimeout {
                supervisor.force_reset(ResetReason::MasterTimeout);
            }
            drop(ticket);
            summary
        });
        Ok((receiver, handle))
    }

    // ────────────────────────────────────────────────────────────────
    // Failsafe
    // ────────────────────────────────────────────────────────────────

    /// Idempotent; succeeds whether or not anything was running.
    pub fn reset(&self, token: &str) -> CropResult<ResetOutcome> {
        self.nonces.validate(token)?;
        let was_busy = self.supervisor.force_reset(ResetReason::Manual);
        info!("Manual reset requested (was busy: {})", was_busy);
        Ok(ResetOutcome { was_busy })
    }

    pub fn leave(&self, token: &str) -> CropResult<LeaveOutcome> {
        self.nonces.validate(token)?;
        Ok(self.supervisor.leave())
    }

    // ────────────────────────────────────────────────────────────────
    // Selection
    // ────────────────────────────────────────────────────────────────

    /// Oversized requests are refused before the catalog is consulted.
    pub fn select_resources(&self, request: &SelectionRequest) -> CropResult<Vec<SelectionItem>> {
        request.validate(self.max_selection_owners)?;
        self.catalog
            .list_resource_ids_for_selection(&request.owner_ids)
            .map_err(CropError::catalog)
    }
}
