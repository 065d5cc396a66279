use anyhow::{Context, Result};
use log::info;
use path_clean::PathClean;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};

use super::CatalogProvider;
use crate::background::processors::image::generate_derived;
use crate::common::errors::{CropError, CropResult};
use crate::common::{DERIVED_LONG_SIDE, MAX_PAGE_SIZE, SNAPSHOT_SUFFIX};
use crate::config::AppConfig;
use crate::models::entity::{
    Category, Dimensions, Pagination, ResourceFilter, ResourceId, ResourcePage, ResourceSummary,
    SelectionItem,
};
use crate::utils::{cache_busted, with_appended_suffix};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    categories: Vec<ManifestCategory>,
    #[serde(default)]
    resources: Vec<ManifestResource>,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestCategory {
    id: String,
    label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestResource {
    id: ResourceId,
    owner_id: u64,
    title: String,
    #[serde(default)]
    category: String,
    /// Path relative to the library root
    file: PathBuf,
    #[serde(default = "default_role")]
    role: String,
}

fn default_role() -> String {
    "gallery".to_string()
}

/// Catalog backed by a JSON manifest and a directory of image files.
/// The manifest is re-read on every call so edits show up without restart.
pub struct FsCatalog {
    library_root: PathBuf,
    manifest_path: PathBuf,
    derived_dir: PathBuf,
    public_base_url: String,
}

impl FsCatalog {
    pub fn new(
        library_root: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
        derived_dir: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            library_root: library_root.into().clean(),
            manifest_path: manifest_path.into(),
            derived_dir: derived_dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.library_root,
            &config.catalog_manifest,
            &config.derived_dir,
            config.public_base_url.clone(),
        )
    }

    pub fn derived_path(&self, id: ResourceId) -> PathBuf {
        self.derived_dir.join(format!("{id}.jpg"))
    }

    fn load_manifest(&self) -> Result<Manifest> {
        let raw = std::fs::read_to_string(&self.manifest_path)
            .context(format!("failed to read catalog manifest {:?}", self.manifest_path))?;
        serde_json::from_str(&raw)
            .context(format!("failed to parse catalog manifest {:?}", self.manifest_path))
    }

    fn find(&self, id: ResourceId) -> CropResult<ManifestResource> {
        let manifest = self.load_manifest().map_err(CropError::catalog)?;
        manifest
            .resources
            .into_iter()
            .find(|resource| resource.id == id)
            .ok_or_else(|| CropError::NotFound(format!("resource {id} is not in the catalog")))
    }

    /// Join under the library root, refusing anything that escapes it.
    fn confine(&self, relative: &Path) -> CropResult<PathBuf> {
        let joined = self.library_root.join(relative).clean();
        if !joined.starts_with(&self.library_root) {
            return Err(CropError::Validation(format!(
                "{:?} points outside the library",
                relative
            )));
        }
        Ok(joined)
    }

    fn summary(&self, resource: &ManifestResource) -> ResourceSummary {
        let path = self.confine(&resource.file).ok();
        let modified_ms = path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        let has_snapshot = path
            .as_deref()
            .map(|p| with_appended_suffix(p, SNAPSHOT_SUFFIX).exists())
            .unwrap_or(false);
        ResourceSummary {
            id: resource.id,
            owner_id: resource.owner_id,
            title: resource.title.clone(),
            category: resource.category.clone(),
            url: cache_busted(&self.url_for(&resource.file), modified_ms),
            has_snapshot,
        }
    }

    fn url_for(&self, file: &Path) -> String {
        let relative = file.to_string_lossy().replace('\\', "/");
        format!("{}/{}", self.public_base_url, relative.trim_start_matches('/'))
    }
}

fn size_label(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(metadata) => {
            let bytes = metadata.len() as f64;
            if bytes >= 1024.0 * 1024.0 {
                format!("{:.1} MB", bytes / (1024.0 * 1024.0))
            } else {
                format!("{:.0} KB", (bytes / 1024.0).ceil())
            }
        }
        Err(_) => "missing".to_string(),
    }
}

impl CatalogProvider for FsCatalog {
    fn list_categories(&self) -> Result<Vec<Category>> {
        let manifest = self.load_manifest()?;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for resource in &manifest.resources {
            *counts.entry(resource.category.as_str()).or_default() += 1;
        }
        Ok(manifest
            .categories
            .iter()
            .map(|category| Category {
                id: category.id.clone(),
                label: category.label.clone(),
                count: counts.get(category.id.as_str()).copied().unwrap_or(0),
            })
            .collect())
    }

    fn list_resources(
        &self,
        filter: &ResourceFilter,
        page: usize,
        page_size: usize,
    ) -> Result<ResourcePage> {
        let manifest = self.load_manifest()?;
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let page = page.max(1);
        let search = filter
            .search_term
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let matching: Vec<&ManifestResource> = manifest
            .resources
            .iter()
            .filter(|r| match &filter.category {
                Some(category) if !category.is_empty() => &r.category == category,
                _ => true,
            })
            .filter(|r| match &search {
                Some(term) => r.title.to_lowercase().contains(term),
                None => true,
            })
            .collect();

        let total_items = matching.len();
        let total_pages = total_items.div_ceil(page_size);
        let items = matching
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .map(|r| self.summary(r))
            .collect();

        Ok(ResourcePage {
            items,
            pagination: Pagination {
                page,
                page_size,
                total_items,
                total_pages,
            },
        })
    }

    fn list_resource_ids_for_selection(&self, owner_ids: &[u64]) -> Result<Vec<SelectionItem>> {
        let manifest = self.load_manifest()?;
        Ok(manifest
            .resources
            .iter()
            .filter(|r| owner_ids.contains(&r.owner_id))
            .take(MAX_PAGE_SIZE)
            .map(|r| SelectionItem {
                id: r.id,
                owner_id: r.owner_id,
                title: r.title.clone(),
                size_label: self
                    .confine(&r.file)
                    .map(|p| size_label(&p))
                    .unwrap_or_else(|_| "invalid".to_string()),
                role_badge: r.role.clone(),
            })
            .collect())
    }

    fn resource_path(&self, id: ResourceId) -> CropResult<PathBuf> {
        let resource = self.find(id)?;
        self.confine(&resource.file)
    }

    fn refresh_derived(&self, id: ResourceId) -> Result<Dimensions> {
        let start_time = Instant::now();
        let source = self.resource_path(id)?;
        let destination = self.derived_path(id);
        let dimensions = generate_derived(&source, &destination, DERIVED_LONG_SIDE)
            .context(format!("failed to regenerate derived sizes for resource {id}"))?;
        info!(
            duration = &*format!("{:?}", start_time.elapsed());
            "Regenerated derived sizes for resource {} ({})", id, dimensions
        );
        Ok(dimensions)
    }

    fn rendered_url(&self, id: ResourceId) -> CropResult<String> {
        let resource = self.find(id)?;
        Ok(self.url_for(&resource.file))
    }
}
