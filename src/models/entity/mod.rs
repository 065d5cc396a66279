pub mod batch;
pub mod catalog;
pub mod resource;

pub use batch::{BatchEvent, BatchMode, BatchSummary, ItemOutcome, TerminationCause};
pub use catalog::{Category, Pagination, ResourceFilter, ResourcePage, ResourceSummary, SelectionItem};
pub use resource::{Dimensions, Preview, ResourceId};
