use serde::Deserialize;

use crate::common::{DEFAULT_PARAMETER, MAX_PARAMETER, errors::{CropError, CropResult}};
use crate::models::entity::{BatchMode, ResourceId};

fn check_parameter(parameter: u32) -> CropResult<u32> {
    if parameter > MAX_PARAMETER {
        return Err(CropError::Validation(format!(
            "parameter {parameter} is out of range 0..={MAX_PARAMETER}"
        )));
    }
    Ok(parameter)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewCreateRequest {
    pub resource_id: ResourceId,
    pub parameter: Option<u32>,
}

impl PreviewCreateRequest {
    /// Effective parameter after defaulting, or a validation error.
    pub fn validated_parameter(&self) -> CropResult<u32> {
        check_parameter(self.parameter.unwrap_or(DEFAULT_PARAMETER))
    }
}

/// Body of every entry point that only names a resource.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunRequest {
    pub resource_ids: Vec<ResourceId>,
    pub parameter: Option<u32>,
    #[serde(default)]
    pub mode: BatchMode,
}

impl BatchRunRequest {
    /// Reject oversized or empty batches before anything starts.
    pub fn validate(&self, max_ids: usize) -> CropResult<u32> {
        if self.resource_ids.is_empty() {
            return Err(CropError::Validation("no resources selected".to_string()));
        }
        if self.resource_ids.len() > max_ids {
            return Err(CropError::Validation(format!(
                "{} resources selected, at most {max_ids} per batch",
                self.resource_ids.len()
            )));
        }
        check_parameter(self.parameter.unwrap_or(DEFAULT_PARAMETER))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    pub owner_ids: Vec<u64>,
}

impl SelectionRequest {
    pub fn validate(&self, max_owners: usize) -> CropResult<()> {
        if self.owner_ids.is_empty() {
            return Err(CropError::Validation("no owners selected".to_string()));
        }
        if self.owner_ids.len() > max_owners {
            return Err(CropError::Validation(format!(
                "{} owners selected, at most {max_owners} per request",
                self.owner_ids.len()
            )));
        }
        Ok(())
    }
}
