mod common;

use std::sync::Arc;
use std::time::Duration;

use batch_cropper::common::errors::{CropError, ToolFailureKind};
use batch_cropper::models::entity::ResourceId;
use batch_cropper::staging::{DirectCropper, PreviewStore, SnapshotStore};
use common::{ScriptedTransformer, Step, TestLibrary, expected_dimensions};

fn previews(library: &TestLibrary, transformer: Arc<ScriptedTransformer>) -> PreviewStore {
    PreviewStore::new(
        &library.config.preview_dir,
        library.catalog.clone(),
        transformer,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn snapshot_is_taken_once_and_never_overwritten() {
    let library = TestLibrary::new(1);
    let snapshots = SnapshotStore::new(library.catalog.clone());
    let original = library.bytes(1);

    snapshots.ensure_snapshot(ResourceId(1)).await.unwrap();
    assert_eq!(std::fs::read(library.snapshot(1)).unwrap(), original);

    common::write_image(&library.path(1), 10, 10);
    snapshots.ensure_snapshot(ResourceId(1)).await.unwrap();
    assert_eq!(std::fs::read(library.snapshot(1)).unwrap(), original);

    let status = snapshots.status(ResourceId(1)).await.unwrap();
    assert!(status.has_snapshot);
    assert_eq!(status.size, Some(original.len() as u64));
}

#[tokio::test]
async fn discard_leaves_the_original_untouched() {
    let library = TestLibrary::new(2);
    let store = previews(&library, ScriptedTransformer::succeeding());
    let original = library.bytes(2);

    let preview = store.create(ResourceId(2), 30).await.unwrap();
    assert!(preview.path.exists());
    assert_eq!(preview.dimensions, Some(expected_dimensions(30)));

    assert_eq!(store.discard(ResourceId(2)).await, 1);
    assert_eq!(store.discard(ResourceId(2)).await, 0);
    assert_eq!(library.bytes(2), original);
    assert!(library.preview_files().is_empty());
}

#[tokio::test]
async fn commit_promotes_the_latest_preview_and_restore_undoes_it() {
    let library = TestLibrary::new(1);
    let store = previews(&library, ScriptedTransformer::succeeding());
    let id = ResourceId(1);
    let original = library.bytes(1);

    store.create(id, 10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.create(id, 30).await.unwrap();
    assert_eq!(store.list(id).await.unwrap().len(), 2);

    let report = store.commit(id).await.unwrap();
    assert_eq!(report.new_dimensions, expected_dimensions(30));
    // The PNG original keeps its format.
    assert_eq!(report.promotion.encoding_used, "png");
    assert!(!report.promotion.raw_copy_fallback);
    assert_eq!(
        image::ImageFormat::from_path(library.path(1)).unwrap(),
        image::guess_format(&library.bytes(1)).unwrap()
    );
    assert!(store.list(id).await.unwrap().is_empty());
    assert_eq!(store.discard(id).await, 0);

    let restored = store.snapshots().restore(id).await.unwrap();
    assert_eq!(restored.width, 64);
    assert_eq!(library.bytes(1), original);
    // Restoring keeps the snapshot for later restores.
    assert!(library.snapshot(1).exists());
}

#[tokio::test]
async fn back_to_back_previews_keep_creation_order() {
    let library = TestLibrary::new(1);
    let store = previews(&library, ScriptedTransformer::succeeding());
    let id = ResourceId(1);

    for parameter in [10, 50, 30] {
        store.create(id, parameter).await.unwrap();
    }
    let listed = store.list(id).await.unwrap();
    let parameters: Vec<_> = listed.iter().map(|preview| preview.parameter).collect();
    assert_eq!(parameters, vec![10, 50, 30]);
    assert!(listed.windows(2).all(|w| w[0].created_ms < w[1].created_ms));

    let report = store.commit(id).await.unwrap();
    assert_eq!(report.new_dimensions, expected_dimensions(30));
}

#[tokio::test]
async fn commit_without_a_preview_changes_nothing() {
    let library = TestLibrary::new(1);
    let transformer = ScriptedTransformer::succeeding();
    let store = previews(&library, transformer.clone());
    let original = library.bytes(1);

    let err = store.commit(ResourceId(1)).await.unwrap_err();
    assert!(matches!(err, CropError::NotFound(_)));
    assert!(!library.snapshot(1).exists());
    assert_eq!(library.bytes(1), original);
    assert_eq!(transformer.calls(), 0);
}

#[tokio::test]
async fn restore_without_a_snapshot_is_not_found() {
    let library = TestLibrary::new(1);
    let snapshots = SnapshotStore::new(library.catalog.clone());
    let err = snapshots.restore(ResourceId(1)).await.unwrap_err();
    assert!(matches!(err, CropError::NotFound(_)));
}

#[tokio::test]
async fn failed_create_leaves_no_partial_preview() {
    let library = TestLibrary::new(1);
    let store = previews(
        &library,
        ScriptedTransformer::new([Step::Fail(ToolFailureKind::NonZeroExit)]),
    );

    let err = store.create(ResourceId(1), 40).await.unwrap_err();
    assert!(matches!(err, CropError::Tool(_)));
    assert!(err.is_retryable());
    assert!(library.preview_files().is_empty());
    assert!(store.list(ResourceId(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_resource_is_not_found() {
    let library = TestLibrary::new(1);
    let store = previews(&library, ScriptedTransformer::succeeding());
    let err = store.create(ResourceId(99), 40).await.unwrap_err();
    assert!(matches!(err, CropError::NotFound(_)));
}

#[tokio::test]
async fn direct_crop_replaces_the_original_behind_a_snapshot() {
    let library = TestLibrary::new(2);
    let cropper = DirectCropper::new(
        library.catalog.clone(),
        ScriptedTransformer::succeeding(),
        Duration::from_secs(5),
    );
    let original = library.bytes(2);

    let (dimensions, promotion) = cropper.crop_in_place(ResourceId(2), 20).await.unwrap();
    assert_eq!(dimensions, expected_dimensions(20));
    assert_eq!(promotion.encoding_used, "jpg");
    assert_eq!(std::fs::read(library.snapshot(2)).unwrap(), original);
    assert_ne!(library.bytes(2), original);

    let leftovers: Vec<_> = std::fs::read_dir(library.path(2).parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("temp_cropped"))
        .collect();
    assert!(leftovers.is_empty());
}
