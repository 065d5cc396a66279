pub mod errors;

use std::sync::LazyLock;
use tokio::runtime::{Builder, Runtime};

/// Upper bound of the padding parameter accepted by the cropping tool.
pub const MAX_PARAMETER: u32 = 100;

pub const DEFAULT_PARAMETER: u32 = 40;

/// Hard cap on the number of resource ids a single batch may carry.
pub const MAX_BATCH_IDS: usize = 50;

/// Hard cap on owning entities per selection request.
pub const MAX_SELECTION_OWNERS: usize = 5;

pub const MAX_PAGE_SIZE: usize = 100;

pub const MAX_COPY_RETRIES: u32 = 3;

pub const SNAPSHOT_SUFFIX: &str = "backup";

pub const PREVIEW_EXTENSION: &str = "jpg";

/// Mount point of the preview directory.
pub const PREVIEW_URL_PREFIX: &str = "/previews";

/// Longest side of the regenerated derived thumbnail.
pub const DERIVED_LONG_SIDE: u32 = 1280;

/// Substrings in tool output that point at a missing runtime dependency
/// rather than a failed crop.
pub const MISSING_DEPENDENCY_MARKERS: &[&str] = &[
    "ModuleNotFoundError",
    "No module named",
    "ImportError",
    "error while loading shared libraries",
    "cannot open shared object file",
];

// Server runtime. Handles HTTP requests and the supervisor/sweep background loops.
pub static SERVER_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .thread_name("cropper-worker")
        .enable_all()
        .build()
        .expect("Failed to build server Tokio runtime")
});
