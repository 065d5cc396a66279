#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batch_cropper::background::processors::transformer::{
    TransformOutcome, TransformRequest, Transformer,
};
use batch_cropper::catalog::{CatalogProvider, FsCatalog};
use batch_cropper::common::errors::{ToolFailure, ToolFailureKind};
use batch_cropper::config::AppConfig;
use batch_cropper::models::entity::{Dimensions, ResourceId};
use batch_cropper::service::CropService;
use batch_cropper::staging::snapshot::snapshot_path;
use futures::future::BoxFuture;
use image::ImageFormat;
use serde_json::json;
use tempfile::TempDir;

pub fn write_image(path: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let format = ImageFormat::from_path(path).unwrap();
    image::RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 90]))
        .save_with_format(path, format)
        .unwrap();
}

/// A temp library with `count` images (odd ids PNG, even ids JPEG) and
/// a config pointing every directory inside it.
pub struct TestLibrary {
    pub dir: TempDir,
    pub config: AppConfig,
    pub catalog: Arc<FsCatalog>,
}

impl TestLibrary {
    pub fn new(count: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        let mut resources = Vec::new();
        for id in 1..=count {
            let ext = if id % 2 == 1 { "png" } else { "jpg" };
            let file = format!("owner{}/item{}.{}", (id - 1) / 3 + 1, id, ext);
            write_image(&root.join(&file), 64, 48);
            resources.push(json!({
                "id": id,
                "ownerId": (id - 1) / 3 + 1,
                "title": format!("Item {id}"),
                "category": "products",
                "file": file,
            }));
        }
        let manifest = json!({
            "categories": [{"id": "products", "label": "Products"}],
            "resources": resources,
        });
        std::fs::write(root.join("catalog.json"), manifest.to_string()).unwrap();

        let config = AppConfig {
            library_root: root.clone(),
            catalog_manifest: root.join("catalog.json"),
            preview_dir: dir.path().join("previews"),
            derived_dir: dir.path().join("derived"),
            pacing_ms: 1,
            auth_key: Some("test-secret".to_string()),
            ..AppConfig::default()
        };
        let catalog = Arc::new(FsCatalog::from_config(&config));
        Self {
            dir,
            config,
            catalog,
        }
    }

    pub fn path(&self, id: u64) -> PathBuf {
        self.catalog.resource_path(ResourceId(id)).unwrap()
    }

    pub fn bytes(&self, id: u64) -> Vec<u8> {
        std::fs::read(self.path(id)).unwrap()
    }

    pub fn snapshot(&self, id: u64) -> PathBuf {
        snapshot_path(&self.path(id))
    }

    pub fn preview_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.config.preview_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn service(&self, transformer: Arc<ScriptedTransformer>) -> CropService {
        CropService::new(&self.config, self.catalog.clone(), transformer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Succeed,
    Fail(ToolFailureKind),
    /// Never finishes on its own
    Hang,
    Panic,
}

/// Plays back a script of outcomes, one per call, then succeeds.
///
/// A successful call writes a JPEG of `(20 + parameter) x (10 + parameter)`
/// so tests can tell which preview won.
#[derive(Default)]
pub struct ScriptedTransformer {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedTransformer {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new([])
    }

    /// `Fail(TimedOut)` at the given 1-based call numbers.
    pub fn failing_at(total: usize, failing: &[usize]) -> Arc<Self> {
        Self::new((1..=total).map(|call| {
            if failing.contains(&call) {
                Step::Fail(ToolFailureKind::TimedOut)
            } else {
                Step::Succeed
            }
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn expected_dimensions(parameter: u32) -> Dimensions {
    Dimensions::new(20 + parameter, 10 + parameter)
}

impl Transformer for ScriptedTransformer {
    fn transform<'a>(&'a self, request: &'a TransformRequest) -> BoxFuture<'a, TransformOutcome> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Step::Succeed);
            match step {
                Step::Succeed => {
                    assert!(request.source.exists(), "source must exist");
                    let dimensions = expected_dimensions(request.parameter);
                    image::RgbImage::from_pixel(
                        dimensions.width,
                        dimensions.height,
                        image::Rgb([10, 20, 30]),
                    )
                    .save_with_format(&request.destination, ImageFormat::Jpeg)
                    .unwrap();
                    TransformOutcome::Success {
                        path: request.destination.clone(),
                        dimensions,
                    }
                }
                Step::Fail(kind) => {
                    // Leave a partial file behind, like a tool dying mid-write.
                    std::fs::write(&request.destination, b"partial").unwrap();
                    TransformOutcome::Failure(ToolFailure::new(kind, "scripted failure"))
                }
                Step::Hang => {
                    std::fs::write(&request.destination, b"partial").unwrap();
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    TransformOutcome::Failure(ToolFailure::new(
                        ToolFailureKind::TimedOut,
                        "woke up",
                    ))
                }
                Step::Panic => panic!("scripted panic"),
            }
        })
    }
}
