//! Staged mutation of catalog images.
//!
//! Every mutation is reversible: the first touch of a resource snapshots it,
//! previews live beside the library until committed or discarded, and the
//! original is only ever replaced whole.

pub mod direct;
pub mod preview;
pub mod snapshot;

use log::warn;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::background::processors::image::{
    WORKING_FORMAT, declared_format, format_label, reencode,
};
use crate::background::processors::transformer::read_dimensions;
use crate::catalog::CatalogProvider;
use crate::common::errors::{CropError, CropResult};
use crate::models::entity::{Dimensions, ResourceId};
use crate::utils::{atomic_copy, atomic_write};

pub use direct::DirectCropper;
pub use preview::{PreviewStore, parse_preview_name, preview_file_name};
pub use snapshot::{SnapshotPaths, SnapshotStore};

/// How the original's bytes were replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub encoding_used: String,
    pub raw_copy_fallback: bool,
}

/// Replace `original` with the working-format image at `candidate`.
///
/// When the original declares another format the candidate is re-encoded
/// first; if that fails or exceeds `reencode_timeout` the candidate bytes
/// are copied verbatim and the mismatch is reported.
pub async fn promote(
    candidate: &Path,
    original: &Path,
    reencode_timeout: Duration,
) -> CropResult<Promotion> {
    let target_format = declared_format(original).filter(|format| *format != WORKING_FORMAT);

    if let Some(format) = target_format {
        let source = candidate.to_path_buf();
        let encoded = tokio::time::timeout(
            reencode_timeout,
            tokio::task::spawn_blocking(move || reencode(&source, format)),
        )
        .await;
        match encoded {
            Ok(Ok(Ok(bytes))) => {
                atomic_write(original, &bytes)
                    .await
                    .map_err(|err| CropError::io(format!("failed to replace {:?}", original), err))?;
                return Ok(Promotion {
                    encoding_used: format_label(format),
                    raw_copy_fallback: false,
                });
            }
            Ok(Ok(Err(err))) => warn!(
                "Re-encoding {:?} as {:?} failed, copying raw bytes: {:#}",
                candidate, format, err
            ),
            Ok(Err(err)) => warn!("Re-encoding task for {:?} failed: {}", candidate, err),
            Err(_) => warn!(
                "Re-encoding {:?} exceeded {:?}, copying raw bytes",
                candidate, reencode_timeout
            ),
        }
    }

    atomic_copy(candidate, original)
        .await
        .map_err(|err| CropError::io(format!("failed to replace {:?}", original), err))?;
    Ok(Promotion {
        encoding_used: format_label(WORKING_FORMAT),
        raw_copy_fallback: target_format.is_some(),
    })
}

/// Ask the catalog to rebuild derived sizes. A catalog failure is logged and
/// the dimensions are read straight from the new bytes instead.
pub async fn invalidate_derived(
    catalog: &Arc<dyn CatalogProvider>,
    id: ResourceId,
    current: &Path,
) -> CropResult<Dimensions> {
    let provider = Arc::clone(catalog);
    let refreshed = tokio::task::spawn_blocking(move || provider.refresh_derived(id)).await;
    match refreshed {
        Ok(Ok(dimensions)) => return Ok(dimensions),
        Ok(Err(err)) => warn!("Derived refresh for resource {} failed: {:#}", id, err),
        Err(err) => warn!("Derived refresh task for resource {} failed: {}", id, err),
    }
    read_dimensions(current).await.map_err(|err| {
        CropError::io(
            format!("failed to read dimensions of {:?}", current),
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{err:#}")),
        )
    })
}
