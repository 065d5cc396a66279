use serde::{Deserialize, Serialize};
use std::fmt;

use super::resource::{Dimensions, ResourceId};
use crate::common::errors::{CropError, FailureClass};

/// What a batch does with each transformed result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchMode {
    /// Stage a preview per item; the operator commits or discards later.
    #[default]
    StageOnly,
    /// Snapshot, then overwrite the original in place.
    CommitImmediately,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationCause {
    Exhausted,
    ErrorThreshold,
    MasterTimeout,
    ManualCancel,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationCause::Exhausted => "exhausted",
            TerminationCause::ErrorThreshold => "error-threshold",
            TerminationCause::MasterTimeout => "master-timeout",
            TerminationCause::ManualCancel => "manual-cancel",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "status",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ItemOutcome {
    Success {
        dimensions: Dimensions,
        /// Preview reference for staged items, `None` when committed in place
        preview_ref: Option<String>,
    },
    Failure {
        class: FailureClass,
        message: String,
        retryable: bool,
    },
}

impl ItemOutcome {
    pub fn failure(err: &CropError) -> Self {
        ItemOutcome::Failure {
            class: err.class(),
            message: err.user_message(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub success: usize,
    pub error: usize,
    pub cause: TerminationCause,
    pub message: String,
}

/// Progress stream of a batch run. A run always ends with exactly one
/// `Finished`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum BatchEvent {
    Started {
        index: usize,
        total: usize,
        resource_id: ResourceId,
    },
    ItemFinished {
        index: usize,
        resource_id: ResourceId,
        outcome: ItemOutcome,
    },
    Finished(BatchSummary),
}

impl BatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::Started { .. } => "started",
            BatchEvent::ItemFinished { .. } => "item-finished",
            BatchEvent::Finished(_) => "finished",
        }
    }
}
