//! The three message bodies that flow between the pipeline stages

use super::source::{DataType, SourceProperties, SourceType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One origin event: "run every model registered for this account
/// against this source".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorRequest {
    pub account_id: String,
    pub source_type: SourceType,
    pub source_properties: SourceProperties,
}

impl OrchestratorRequest {
    pub fn new(account_id: impl Into<String>, source_properties: SourceProperties) -> Self {
        Self {
            account_id: account_id.into(),
            source_type: source_properties.source_type(),
            source_properties,
        }
    }

    /// True when the declared source type agrees with the properties tag.
    pub fn is_consistent(&self) -> bool {
        self.source_type == self.source_properties.source_type()
    }

    /// Expand into one inference request for the given model id.
    pub fn fan_out(&self, inference_id: impl Into<String>, origin_message_id: &str) -> InferenceRequest {
        InferenceRequest {
            account_id: self.account_id.clone(),
            inference_id: inference_id.into(),
            source_properties: self.source_properties.clone(),
            origin_message_id: Some(origin_message_id.to_string()),
        }
    }
}

/// One (origin event, model) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub account_id: String,
    pub inference_id: String,
    pub source_properties: SourceProperties,
    /// Message id of the orchestrator request this was fanned out from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_message_id: Option<String>,
}

/// Name of a blob in the temporary artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A completed model invocation waiting for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub account_id: String,
    pub inference_id: String,
    pub source_properties: SourceProperties,
    pub artifact_reference: ArtifactRef,
    pub output_data_type: DataType,
    /// HTTP status returned by the model endpoint. Recorded, never used
    /// to gate delivery.
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_message_id: Option<String>,
}

impl InferenceResponse {
    pub fn source_type(&self) -> SourceType {
        self.source_properties.source_type()
    }
}
