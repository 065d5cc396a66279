use chrono::{DateTime, Utc};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::invalidate_derived;
use crate::catalog::CatalogProvider;
use crate::common::SNAPSHOT_SUFFIX;
use crate::common::errors::{CropError, CropResult};
use crate::models::dto::SnapshotStatus;
use crate::models::entity::{Dimensions, ResourceId};
use crate::utils::{atomic_copy, with_appended_suffix};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub original: PathBuf,
    pub snapshot: PathBuf,
}

/// One immutable pre-mutation copy per resource, at `<original>.backup`.
#[derive(Clone)]
pub struct SnapshotStore {
    catalog: Arc<dyn CatalogProvider>,
}

pub fn snapshot_path(original: &Path) -> PathBuf {
    with_appended_suffix(original, SNAPSHOT_SUFFIX)
}

async fn exists(path: &Path) -> CropResult<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|err| CropError::io(format!("failed to stat {:?}", path), err))
}

impl SnapshotStore {
    pub fn new(catalog: Arc<dyn CatalogProvider>) -> Self {
        Self { catalog }
    }

    pub fn paths(&self, id: ResourceId) -> CropResult<SnapshotPaths> {
        let original = self.catalog.resource_path(id)?;
        let snapshot = snapshot_path(&original);
        Ok(SnapshotPaths { original, snapshot })
    }

    /// Copy the current bytes aside unless a snapshot already exists.
    pub async fn ensure_snapshot(&self, id: ResourceId) -> CropResult<SnapshotPaths> {
        let paths = self.paths(id)?;
        if !exists(&paths.original).await? {
            return Err(CropError::NotFound(format!(
                "image file for resource {id} is missing"
            )));
        }
        if exists(&paths.snapshot).await? {
            return Ok(paths);
        }
        let start_time = Instant::now();
        atomic_copy(&paths.original, &paths.snapshot)
            .await
            .map_err(|err| CropError::io(format!("failed to snapshot resource {id}"), err))?;
        info!(
            duration = &*format!("{:?}", start_time.elapsed());
            "Created snapshot {:?}", paths.snapshot
        );
        Ok(paths)
    }

    /// Put the snapshot's bytes back. The snapshot itself is kept, so this
    /// can be repeated.
    pub async fn restore(&self, id: ResourceId) -> CropResult<Dimensions> {
        let paths = self.paths(id)?;
        if !exists(&paths.snapshot).await? {
            return Err(CropError::NotFound(format!("no snapshot for resource {id}")));
        }
        if !exists(&paths.original).await? {
            return Err(CropError::NotFound(format!(
                "image file for resource {id} is missing"
            )));
        }
        atomic_copy(&paths.snapshot, &paths.original)
            .await
            .map_err(|err| CropError::io(format!("failed to restore resource {id}"), err))?;
        info!("Restored resource {} from {:?}", id, paths.snapshot);
        invalidate_derived(&self.catalog, id, &paths.original).await
    }

    pub async fn status(&self, id: ResourceId) -> CropResult<SnapshotStatus> {
        let paths = self.paths(id)?;
        match tokio::fs::metadata(&paths.snapshot).await {
            Ok(metadata) => Ok(SnapshotStatus {
                resource_id: id,
                has_snapshot: true,
                size: Some(metadata.len()),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(SnapshotStatus {
                resource_id: id,
                has_snapshot: false,
                size: None,
                modified: None,
            }),
            Err(err) => Err(CropError::io(
                format!("failed to stat snapshot for resource {id}"),
                err,
            )),
        }
    }
}
