mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use batch_cropper::catalog::{CatalogProvider, FsCatalog};
use batch_cropper::common::errors::{CropError, CropResult};
use batch_cropper::models::dto::{
    BatchRunRequest, PreviewCreateRequest, ResourceRequest, SelectionRequest,
};
use batch_cropper::models::entity::{
    BatchEvent, BatchMode, Category, Dimensions, ResourceFilter, ResourceId, ResourcePage,
    SelectionItem, TerminationCause,
};
use batch_cropper::service::CropService;
use batch_cropper::supervisor::{Notification, ResetReason};
use common::{ScriptedTransformer, Step, TestLibrary, expected_dimensions};

/// Counts selection lookups so tests can prove a request never reached it.
struct CountingCatalog {
    inner: FsCatalog,
    selections: AtomicUsize,
}

impl CatalogProvider for CountingCatalog {
    fn list_categories(&self) -> Result<Vec<Category>> {
        self.inner.list_categories()
    }

    fn list_resources(
        &self,
        filter: &ResourceFilter,
        page: usize,
        page_size: usize,
    ) -> Result<ResourcePage> {
        self.inner.list_resources(filter, page, page_size)
    }

    fn list_resource_ids_for_selection(&self, owner_ids: &[u64]) -> Result<Vec<SelectionItem>> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        self.inner.list_resource_ids_for_selection(owner_ids)
    }

    fn resource_path(&self, id: ResourceId) -> CropResult<PathBuf> {
        self.inner.resource_path(id)
    }

    fn refresh_derived(&self, id: ResourceId) -> Result<Dimensions> {
        self.inner.refresh_derived(id)
    }

    fn rendered_url(&self, id: ResourceId) -> CropResult<String> {
        self.inner.rendered_url(id)
    }
}

fn token(service: &CropService) -> String {
    service.issue_nonce().unwrap().token
}

fn create(id: u64, parameter: Option<u32>) -> PreviewCreateRequest {
    PreviewCreateRequest {
        resource_id: ResourceId(id),
        parameter,
    }
}

fn resource(id: u64) -> ResourceRequest {
    ResourceRequest {
        resource_id: ResourceId(id),
    }
}

#[tokio::test]
async fn invalid_token_changes_nothing() {
    let library = TestLibrary::new(1);
    let transformer = ScriptedTransformer::succeeding();
    let service = library.service(transformer.clone());
    let original = library.bytes(1);

    let err = service
        .preview_create("not-a-token", create(1, None))
        .await
        .unwrap_err();
    assert!(matches!(err, CropError::InvalidToken(_)));

    let err = service
        .batch_run(
            "",
            BatchRunRequest {
                resource_ids: vec![ResourceId(1)],
                parameter: None,
                mode: BatchMode::CommitImmediately,
            },
        )
        .unwrap_err();
    assert!(matches!(err, CropError::InvalidToken(_)));
    assert!(matches!(
        service.reset("forged").unwrap_err(),
        CropError::InvalidToken(_)
    ));

    assert_eq!(transformer.calls(), 0);
    assert!(!service.supervisor().is_busy());
    assert!(!library.snapshot(1).exists());
    assert!(library.preview_files().is_empty());
    assert_eq!(library.bytes(1), original);
}

#[tokio::test]
async fn preview_round_trip_through_the_service() {
    let library = TestLibrary::new(2);
    let service = library.service(ScriptedTransformer::succeeding());
    let mut notifications = service.supervisor().subscribe();
    let token = token(&service);
    let original = library.bytes(2);

    let created = service.preview_create(&token, create(2, None)).await.unwrap();
    assert_eq!(created.parameter, 40);
    assert_eq!(created.dimensions, expected_dimensions(40));
    assert!(created.preview_url.starts_with("/previews/preview_2_40px_"));
    assert!(created.preview_url.contains(&created.preview_ref));

    let status = service.snapshot_status(&[ResourceId(2)]).await.unwrap();
    assert!(status[0].has_snapshot);

    let committed = service.preview_commit(&token, resource(2)).await.unwrap();
    assert_eq!(committed.new_dimensions, expected_dimensions(40));
    assert!(committed.url.contains("v="));
    assert!(matches!(
        notifications.recv().await.unwrap(),
        Notification::Refresh { resource_id: ResourceId(2), .. }
    ));

    let restored = service.snapshot_restore(&token, resource(2)).await.unwrap();
    assert_eq!(restored.dimensions, Dimensions::new(64, 48));
    assert_eq!(library.bytes(2), original);

    let discarded = service.preview_discard(&token, resource(2)).await.unwrap();
    assert_eq!(discarded.deleted_count, 0);
    assert!(!service.supervisor().is_busy());
}

#[tokio::test]
async fn commit_without_preview_is_not_found_and_releases_the_guard() {
    let library = TestLibrary::new(1);
    let service = library.service(ScriptedTransformer::succeeding());
    let token = token(&service);
    let original = library.bytes(1);

    let err = service.preview_commit(&token, resource(1)).await.unwrap_err();
    assert!(matches!(err, CropError::NotFound(_)));
    assert!(!library.snapshot(1).exists());
    assert_eq!(library.bytes(1), original);
    assert!(!service.supervisor().is_busy());
}

#[tokio::test]
async fn second_operation_is_busy_while_a_batch_runs() {
    let library = TestLibrary::new(2);
    let service = library.service(ScriptedTransformer::new([Step::Hang]));
    let token = token(&service);

    let (mut events, handle) = service
        .batch_run(
            &token,
            BatchRunRequest {
                resource_ids: vec![ResourceId(1), ResourceId(2)],
                parameter: None,
                mode: BatchMode::StageOnly,
            },
        )
        .unwrap();
    assert!(matches!(
        events.recv().await,
        Some(BatchEvent::Started { index: 0, .. })
    ));
    assert!(service.supervisor().is_busy());

    let err = service
        .preview_create(&token, create(2, None))
        .await
        .unwrap_err();
    assert!(matches!(err, CropError::Busy));
    assert!(err.is_retryable());

    assert!(service.reset(&token).unwrap().was_busy);
    let summary = handle.await.unwrap();
    assert_eq!(summary.cause, TerminationCause::ManualCancel);
    assert!(!service.supervisor().is_busy());
}

#[tokio::test]
async fn batch_requests_are_checked_before_anything_starts() {
    let library = TestLibrary::new(1);
    let transformer = ScriptedTransformer::succeeding();
    let service = library.service(transformer.clone());
    let token = token(&service);

    let oversized = BatchRunRequest {
        resource_ids: (1..=51).map(ResourceId).collect(),
        parameter: None,
        mode: BatchMode::StageOnly,
    };
    assert!(matches!(
        service.batch_run(&token, oversized).unwrap_err(),
        CropError::Validation(_)
    ));

    let empty = BatchRunRequest {
        resource_ids: Vec::new(),
        parameter: None,
        mode: BatchMode::StageOnly,
    };
    assert!(matches!(
        service.batch_run(&token, empty).unwrap_err(),
        CropError::Validation(_)
    ));

    let out_of_range = BatchRunRequest {
        resource_ids: vec![ResourceId(1)],
        parameter: Some(101),
        mode: BatchMode::StageOnly,
    };
    assert!(matches!(
        service.batch_run(&token, out_of_range).unwrap_err(),
        CropError::Validation(_)
    ));

    assert_eq!(transformer.calls(), 0);
    assert!(!service.supervisor().is_busy());
}

#[tokio::test]
async fn selection_is_capped_before_the_catalog_is_asked() {
    let library = TestLibrary::new(6);
    let catalog = Arc::new(CountingCatalog {
        inner: FsCatalog::from_config(&library.config),
        selections: AtomicUsize::new(0),
    });
    let service = CropService::new(
        &library.config,
        catalog.clone(),
        ScriptedTransformer::succeeding(),
    );

    let err = service
        .select_resources(&SelectionRequest {
            owner_ids: vec![1, 2, 3, 4, 5, 6],
        })
        .unwrap_err();
    assert!(matches!(err, CropError::Validation(_)));
    assert_eq!(catalog.selections.load(Ordering::SeqCst), 0);

    let items = service
        .select_resources(&SelectionRequest {
            owner_ids: vec![1, 2],
        })
        .unwrap();
    assert_eq!(items.len(), 6);
    assert_eq!(catalog.selections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_queries_are_capped() {
    let library = TestLibrary::new(1);
    let service = library.service(ScriptedTransformer::succeeding());
    let ids: Vec<_> = (1..=101).map(ResourceId).collect();
    assert!(matches!(
        service.snapshot_status(&ids).await.unwrap_err(),
        CropError::Validation(_)
    ));
}

#[tokio::test]
async fn reset_is_idempotent_and_always_restores_controls() {
    let library = TestLibrary::new(1);
    let service = library.service(ScriptedTransformer::succeeding());
    let mut notifications = service.supervisor().subscribe();
    let token = token(&service);

    assert!(!service.reset(&token).unwrap().was_busy);
    assert!(!service.reset(&token).unwrap().was_busy);
    for _ in 0..2 {
        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::ControlsRestored
        );
    }
}

#[tokio::test]
async fn leaving_cancels_a_running_batch_with_a_warning() {
    let library = TestLibrary::new(2);
    let service = library.service(ScriptedTransformer::new([Step::Hang]));
    let token = token(&service);

    let idle = service.leave(&token).unwrap();
    assert!(idle.allowed);
    assert!(idle.warning.is_none());

    let mut notifications = service.supervisor().subscribe();
    let (mut events, handle) = service
        .batch_run(
            &token,
            BatchRunRequest {
                resource_ids: vec![ResourceId(1), ResourceId(2)],
                parameter: None,
                mode: BatchMode::StageOnly,
            },
        )
        .unwrap();
    events.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let busy = service.leave(&token).unwrap();
    assert!(busy.allowed);
    assert!(busy.warning.is_some());
    assert_eq!(handle.await.unwrap().cause, TerminationCause::ManualCancel);
    assert!(library.preview_files().is_empty());

    assert_eq!(
        notifications.recv().await.unwrap(),
        Notification::Reset {
            reason: ResetReason::Navigation
        }
    );
    assert_eq!(
        notifications.recv().await.unwrap(),
        Notification::ControlsRestored
    );
    assert!(matches!(
        notifications.recv().await.unwrap(),
        Notification::LeaveWarning { .. }
    ));
}

#[tokio::test]
async fn a_panicking_tool_is_trapped_and_clears_the_guard() {
    let library = TestLibrary::new(1);
    let service = library.service(ScriptedTransformer::new([Step::Panic]));
    let mut notifications = service.supervisor().subscribe();
    let token = token(&service);

    let err = service
        .preview_create(&token, create(1, Some(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, CropError::Aborted(_)));
    assert!(!service.supervisor().is_busy());
    assert_eq!(
        notifications.recv().await.unwrap(),
        Notification::Reset {
            reason: ResetReason::UncaughtError
        }
    );

    // The next call goes through.
    service
        .preview_create(&token, create(1, Some(10)))
        .await
        .unwrap();
}
