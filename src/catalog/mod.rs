//! Catalog provider - where resources live and how they are rendered.
//!
//! The engine only needs path resolution, derived-size regeneration and a
//! rendered URL; the listing calls back the selection screens.

pub mod fs_catalog;

use anyhow::Result;
use std::path::PathBuf;

use crate::common::errors::CropResult;
use crate::models::entity::{
    Category, Dimensions, ResourceFilter, ResourceId, ResourcePage, SelectionItem,
};

pub use fs_catalog::FsCatalog;

pub trait CatalogProvider: Send + Sync {
    fn list_categories(&self) -> Result<Vec<Category>>;

    /// `page` is 1-based; `page_size` is clamped to `1..=MAX_PAGE_SIZE`.
    fn list_resources(
        &self,
        filter: &ResourceFilter,
        page: usize,
        page_size: usize,
    ) -> Result<ResourcePage>;

    fn list_resource_ids_for_selection(&self, owner_ids: &[u64]) -> Result<Vec<SelectionItem>>;

    /// Absolute path of the resource's current bytes. Unknown ids are `NotFound`.
    fn resource_path(&self, id: ResourceId) -> CropResult<PathBuf>;

    /// Rebuild derived sizes after the bytes changed; returns the new
    /// dimensions of the full image.
    fn refresh_derived(&self, id: ResourceId) -> Result<Dimensions>;

    /// URL of the rendered form, without cache-busting.
    fn rendered_url(&self, id: ResourceId) -> CropResult<String>;
}
