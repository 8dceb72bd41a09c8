//! UPS-RS source adapter
//!
//! Input and output locations live inside a Unified Procedure Step
//! workitem on a DICOMweb server. The adapter reads the workitem as DICOM
//! JSON, follows the first retrieval URI for input, and stores results at
//! the first STOW-RS storage URL.

use super::multipart;
use super::traits::{Payload, SourceAdapter, SourceError};
use crate::messages::{DataType, SourceProperties, SourceType, UpsRsProperties};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

pub const INPUT_INFORMATION_SEQUENCE: &str = "00404021";
pub const WADO_RETRIEVAL_SEQUENCE: &str = "0040E023";
pub const WADO_RS_RETRIEVAL_SEQUENCE: &str = "0040E025";
pub const RETRIEVE_URI: &str = "0040E010";
pub const OUTPUT_DESTINATION_SEQUENCE: &str = "00404070";
pub const STOW_RS_STORAGE_SEQUENCE: &str = "00404072";
pub const STORAGE_URL: &str = "00404073";

const DICOM_JSON: &str = "application/dicom+json";

pub struct UpsRsAdapter {
    client: reqwest::Client,
}

impl UpsRsAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn properties<'a>(&self, properties: &'a SourceProperties) -> Result<&'a UpsRsProperties, SourceError> {
        match properties {
            SourceProperties::UpsRs(p) => Ok(p),
            other => Err(SourceError::InvalidProperties {
                expected: SourceType::UpsRs,
                found: other.source_type(),
            }),
        }
    }

    async fn fetch_workitem(&self, properties: &UpsRsProperties) -> Result<Value, SourceError> {
        let url = workitem_url(&properties.server_address, &properties.instance_id);
        debug!(url = %url, "fetching workitem");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, DICOM_JSON)
            .send()
            .await
            .map_err(|e| SourceError::UpstreamUnavailable(format!("workitem {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UpstreamUnavailable(format!(
                "workitem {} returned {}",
                url, status
            )));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| SourceError::UpstreamUnavailable(format!("workitem {} body: {}", url, e)))?;

        // Some servers wrap the single dataset in an array.
        match document {
            Value::Array(mut items) if !items.is_empty() => Ok(items.swap_remove(0)),
            Value::Array(_) => Err(SourceError::MissingReference(format!(
                "workitem {} is empty",
                properties.instance_id
            ))),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl SourceAdapter for UpsRsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::UpsRs
    }

    async fn retrieve(&self, properties: &SourceProperties, data_type: DataType) -> Result<Payload, SourceError> {
        let props = self.properties(properties)?;
        let workitem = self.fetch_workitem(props).await?;
        let uri = retrieve_uri(&workitem)?;

        let (url, accept) = match data_type {
            DataType::Dcm => (uri, "multipart/related; type=\"application/dicom\"".to_string()),
            DataType::Jpeg | DataType::Png => (
                format!("{}/rendered", uri.trim_end_matches('/')),
                data_type.content_type().to_string(),
            ),
            DataType::Json => {
                return Err(SourceError::UnsupportedDataType {
                    source_type: SourceType::UpsRs,
                    data_type,
                })
            }
        };

        debug!(url = %url, data_type = %data_type, "retrieving input");
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|e| SourceError::UpstreamUnavailable(format!("retrieve {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UpstreamUnavailable(format!(
                "retrieve {} returned {}",
                url, status
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::UpstreamUnavailable(format!("retrieve {} body: {}", url, e)))?;

        let data = match data_type {
            DataType::Dcm => multipart::first_part(&content_type, &body).ok_or_else(|| {
                SourceError::UpstreamUnavailable(format!("retrieve {}: malformed multipart response", url))
            })?,
            _ => body.to_vec(),
        };

        Ok(Payload::new(data, data_type))
    }

    async fn deliver(&self, properties: &SourceProperties, payload: &Payload) -> Result<(), SourceError> {
        let props = self.properties(properties)?;
        let workitem = self.fetch_workitem(props).await?;
        let url = storage_url(&workitem)?;

        let boundary = format!("pinwheel-{}", uuid::Uuid::new_v4().simple());
        let (content_type, body) =
            multipart::encode_related(&payload.data, payload.data_type.content_type(), &boundary);

        debug!(url = %url, bytes = payload.len(), "storing result");
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT, DICOM_JSON)
            .body(body)
            .send()
            .await
            .map_err(|e| SourceError::UpstreamUnavailable(format!("store {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UpstreamUnavailable(format!(
                "store {} returned {}",
                url, status
            )));
        }
        Ok(())
    }
}

pub fn workitem_url(server_address: &str, instance_id: &str) -> String {
    format!("{}/workitems/{}", server_address.trim_end_matches('/'), instance_id)
}

/// First retrieval URI under the workitem's input information.
pub fn retrieve_uri(workitem: &Value) -> Result<String, SourceError> {
    let input = first_item(workitem, INPUT_INFORMATION_SEQUENCE)
        .ok_or_else(|| SourceError::MissingReference("input information sequence".into()))?;

    [WADO_RS_RETRIEVAL_SEQUENCE, WADO_RETRIEVAL_SEQUENCE]
        .iter()
        .filter_map(|tag| first_item(input, tag))
        .find_map(|item| first_string(item, RETRIEVE_URI))
        .ok_or_else(|| SourceError::MissingReference("retrieve URI".into()))
}

/// First STOW-RS storage URL under the workitem's output destination.
pub fn storage_url(workitem: &Value) -> Result<String, SourceError> {
    first_item(workitem, OUTPUT_DESTINATION_SEQUENCE)
        .and_then(|dest| first_item(dest, STOW_RS_STORAGE_SEQUENCE))
        .and_then(|stow| first_string(stow, STORAGE_URL))
        .ok_or_else(|| SourceError::MissingReference("STOW-RS storage URL".into()))
}

fn values<'a>(dataset: &'a Value, tag: &str) -> Option<&'a Vec<Value>> {
    dataset.get(tag)?.get("Value")?.as_array()
}

fn first_item<'a>(dataset: &'a Value, tag: &str) -> Option<&'a Value> {
    values(dataset, tag)?.first()
}

fn first_string(dataset: &Value, tag: &str) -> Option<String> {
    values(dataset, tag)?
        .iter()
        .find_map(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
