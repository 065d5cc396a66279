pub mod requests;
pub mod responses;

pub use requests::{BatchRunRequest, PreviewCreateRequest, ResourceRequest, SelectionRequest};
pub use responses::{
    IssuedNonce, LeaveOutcome, PreviewCommitted, PreviewCreated, PreviewDiscarded, ResetOutcome,
    SnapshotRestored, SnapshotStatus,
};
