use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::entity::{Dimensions, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewCreated {
    pub resource_id: ResourceId,
    pub preview_ref: String,
    pub parameter: u32,
    pub dimensions: Dimensions,
    pub preview_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewCommitted {
    pub resource_id: ResourceId,
    pub new_dimensions: Dimensions,
    /// Encoding the original's bytes now carry, e.g. `jpeg` or `png`
    pub encoding_used: String,
    /// Re-encoding failed and the preview bytes were copied verbatim
    pub raw_copy_fallback: bool,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewDiscarded {
    pub resource_id: ResourceId,
    pub deleted_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRestored {
    pub resource_id: ResourceId,
    pub dimensions: Dimensions,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    pub resource_id: ResourceId,
    pub has_snapshot: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    /// Whether a flow was actually interrupted
    pub was_busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveOutcome {
    pub allowed: bool,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedNonce {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
