use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Promotion, SnapshotStore, invalidate_derived, promote};
use crate::background::processors::transformer::{TransformRequest, Transformer};
use crate::catalog::CatalogProvider;
use crate::common::errors::CropResult;
use crate::models::entity::{Dimensions, ResourceId};
use crate::utils::{PartialFile, with_appended_suffix};

/// Crops straight over the original, without a preview step. The snapshot
/// is still taken first, so `restore` undoes it.
#[derive(Clone)]
pub struct DirectCropper {
    catalog: Arc<dyn CatalogProvider>,
    snapshots: SnapshotStore,
    transformer: Arc<dyn Transformer>,
    reencode_timeout: Duration,
}

impl DirectCropper {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        transformer: Arc<dyn Transformer>,
        reencode_timeout: Duration,
    ) -> Self {
        Self {
            snapshots: SnapshotStore::new(Arc::clone(&catalog)),
            catalog,
            transformer,
            reencode_timeout,
        }
    }

    pub async fn crop_in_place(
        &self,
        id: ResourceId,
        parameter: u32,
    ) -> CropResult<(Dimensions, Promotion)> {
        let start_time = Instant::now();
        let paths = self.snapshots.ensure_snapshot(id).await?;
        let temp = with_appended_suffix(&paths.original, "temp_cropped.jpg");
        let partial = PartialFile::new(&temp);

        let request = TransformRequest {
            source: paths.original.clone(),
            destination: temp.clone(),
            parameter,
        };
        self.transformer.transform(&request).await.into_result()?;
        let promotion = promote(&temp, &paths.original, self.reencode_timeout).await?;
        // Dropping the guard removes the temp file.
        drop(partial);

        let dimensions = invalidate_derived(&self.catalog, id, &paths.original).await?;
        info!(
            duration = &*format!("{:?}", start_time.elapsed());
            "Cropped resource {} in place ({}, parameter {})", id, dimensions, parameter
        );
        Ok((dimensions, promotion))
    }
}
