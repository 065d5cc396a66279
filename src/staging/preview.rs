use log::{info, warn};
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use super::{Promotion, SnapshotStore, invalidate_derived, promote};
use crate::background::processors::transformer::{
    TransformOutcome, TransformRequest, Transformer, read_dimensions,
};
use crate::catalog::CatalogProvider;
use crate::common::PREVIEW_EXTENSION;
use crate::common::errors::{CropError, CropResult};
use crate::models::entity::{Dimensions, Preview, ResourceId};
use crate::utils::{PartialFile, now_ms, remove_if_exists};

static PREVIEW_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^preview_(\d+)_(\d+)px_(\d+)\.jpg$").expect("preview name pattern is valid")
});

pub fn preview_file_name(id: ResourceId, parameter: u32, created_ms: i64) -> String {
    format!("preview_{id}_{parameter}px_{created_ms}.{PREVIEW_EXTENSION}")
}

/// `(resource id, parameter, created ms)` for a well-formed preview name.
pub fn parse_preview_name(name: &str) -> Option<(ResourceId, u32, i64)> {
    let captures = PREVIEW_NAME.captures(name)?;
    Some((
        captures[1].parse().ok()?,
        captures[2].parse().ok()?,
        captures[3].parse().ok()?,
    ))
}

/// Result of promoting the latest preview.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReport {
    pub new_dimensions: Dimensions,
    pub promotion: Promotion,
}

/// Previews are plain files in one directory; the directory listing is the
/// whole state, so nothing can drift out of sync after a crash.
#[derive(Clone)]
pub struct PreviewStore {
    preview_dir: PathBuf,
    catalog: Arc<dyn CatalogProvider>,
    snapshots: SnapshotStore,
    transformer: Arc<dyn Transformer>,
    reencode_timeout: Duration,
}

impl PreviewStore {
    pub fn new(
        preview_dir: impl Into<PathBuf>,
        catalog: Arc<dyn CatalogProvider>,
        transformer: Arc<dyn Transformer>,
        reencode_timeout: Duration,
    ) -> Self {
        Self {
            preview_dir: preview_dir.into(),
            snapshots: SnapshotStore::new(Arc::clone(&catalog)),
            catalog,
            transformer,
            reencode_timeout,
        }
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Fresh destination stamped after every existing preview of `id`, so
    /// the newest preview always sorts last even within one millisecond.
    async fn fresh_destination(
        &self,
        id: ResourceId,
        parameter: u32,
    ) -> CropResult<(PathBuf, i64)> {
        let mut created_ms = match self.list(id).await?.last() {
            Some(latest) => now_ms().max(latest.created_ms + 1),
            None => now_ms(),
        };
        loop {
            let path = self
                .preview_dir
                .join(preview_file_name(id, parameter, created_ms));
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok((path, created_ms));
            }
            created_ms += 1;
        }
    }

    /// Snapshot the resource, then run the transformer into a new preview.
    /// Nothing is registered unless the tool succeeded.
    pub async fn create(&self, id: ResourceId, parameter: u32) -> CropResult<Preview> {
        let paths = self.snapshots.ensure_snapshot(id).await?;
        tokio::fs::create_dir_all(&self.preview_dir)
            .await
            .map_err(|err| CropError::io("failed to create preview directory", err))?;

        let (destination, created_ms) = self.fresh_destination(id, parameter).await?;
        let partial = PartialFile::new(&destination);
        let request = TransformRequest {
            source: paths.original.clone(),
            destination: destination.clone(),
            parameter,
        };

        match self.transformer.transform(&request).await {
            TransformOutcome::Success { dimensions, .. } => {
                partial.disarm();
                info!(
                    "Staged preview {:?} for resource {} ({})",
                    destination.file_name().unwrap_or_default(),
                    id,
                    dimensions
                );
                Ok(Preview {
                    resource_id: id,
                    parameter,
                    created_ms,
                    path: destination,
                    dimensions: Some(dimensions),
                })
            }
            TransformOutcome::Failure(failure) => {
                warn!("Preview for resource {} failed: {}", id, failure);
                drop(partial);
                Err(CropError::Tool(failure))
            }
        }
    }

    /// Previews of `id`, oldest first.
    pub async fn list(&self, id: ResourceId) -> CropResult<Vec<Preview>> {
        let mut previews = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.preview_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(previews),
            Err(err) => return Err(CropError::io("failed to list previews", err)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| CropError::io("failed to list previews", err))?
        {
            let name = entry.file_name();
            let Some((resource_id, parameter, created_ms)) =
                parse_preview_name(&name.to_string_lossy())
            else {
                continue;
            };
            if resource_id != id {
                continue;
            }
            let path = entry.path();
            let dimensions = read_dimensions(&path).await.ok();
            previews.push(Preview {
                resource_id,
                parameter,
                created_ms,
                path,
                dimensions,
            });
        }
        previews.sort_by(|a, b| (a.created_ms, &a.path).cmp(&(b.created_ms, &b.path)));
        Ok(previews)
    }

    /// Promote the latest preview over the original and drop every preview
    /// of the resource, whether or not the replacement succeeded.
    pub async fn commit(&self, id: ResourceId) -> CropResult<CommitReport> {
        let previews = self.list(id).await?;
        let Some(latest) = previews.last() else {
            return Err(CropError::NotFound(format!("no preview staged for resource {id}")));
        };
        let start_time = Instant::now();

        let replaced = async {
            let original = self.catalog.resource_path(id)?;
            let promotion = promote(&latest.path, &original, self.reencode_timeout).await?;
            Ok::<_, CropError>((original, promotion))
        }
        .await;

        let removed = self.discard(id).await;

        let (original, promotion) = replaced?;
        let new_dimensions = invalidate_derived(&self.catalog, id, &original).await?;
        info!(
            duration = &*format!("{:?}", start_time.elapsed());
            "Committed preview for resource {} as {} ({} previews cleared{})",
            id,
            promotion.encoding_used,
            removed,
            if promotion.raw_copy_fallback { ", raw copy" } else { "" }
        );
        Ok(CommitReport {
            new_dimensions,
            promotion,
        })
    }

    /// Delete every preview of `id`. Failures are logged and skipped.
    pub async fn discard(&self, id: ResourceId) -> usize {
        let previews = match self.list(id).await {
            Ok(previews) => previews,
            Err(err) => {
                warn!("Failed to list previews of resource {}: {}", id, err);
                return 0;
            }
        };
        let mut removed = 0;
        for preview in previews {
            match remove_if_exists(&preview.path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => warn!("Failed to delete preview {:?}: {}", preview.path, err),
            }
        }
        if removed > 0 {
            info!("Discarded {} previews of resource {}", removed, id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_names_round_trip() {
        let name = preview_file_name(ResourceId(42), 40, 1_700_000_000_123);
        assert_eq!(name, "preview_42_40px_1700000000123.jpg");
        assert_eq!(
            parse_preview_name(&name),
            Some((ResourceId(42), 40, 1_700_000_000_123))
        );
    }

    #[test]
    fn foreign_files_are_ignored() {
        assert_eq!(parse_preview_name("preview_42_40px.jpg"), None);
        assert_eq!(parse_preview_name("preview_42_40px_1.png"), None);
        assert_eq!(parse_preview_name(".preview_42_40px_1.jpg.copy.tmp"), None);
        assert_eq!(parse_preview_name("notes.txt"), None);
    }
}
