//! Plain HTTP source adapter: GET input from one URI, POST output to another

use super::traits::{Payload, SourceAdapter, SourceError};
use crate::messages::{DataType, HttpProperties, SourceProperties, SourceType};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

pub struct HttpAdapter {
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn properties<'a>(&self, properties: &'a SourceProperties) -> Result<&'a HttpProperties, SourceError> {
        match properties {
            SourceProperties::Http(p) => Ok(p),
            other => Err(SourceError::InvalidProperties {
                expected: SourceType::Http,
                found: other.source_type(),
            }),
        }
    }
}

#[async_trait]
impl SourceAdapter for HttpAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Http
    }

    async fn retrieve(&self, properties: &SourceProperties, data_type: DataType) -> Result<Payload, SourceError> {
        let props = self.properties(properties)?;
        debug!(url = %props.input_uri, data_type = %data_type, "retrieving input");

        let response = self
            .client
            .get(&props.input_uri)
            .header(ACCEPT, data_type.content_type())
            .send()
            .await
            .map_err(|e| SourceError::UpstreamUnavailable(format!("GET {}: {}", props.input_uri, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UpstreamUnavailable(format!(
                "GET {} returned {}",
                props.input_uri, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::UpstreamUnavailable(format!("GET {} body: {}", props.input_uri, e)))?;
        Ok(Payload::new(body.to_vec(), data_type))
    }

    async fn deliver(&self, properties: &SourceProperties, payload: &Payload) -> Result<(), SourceError> {
        let props = self.properties(properties)?;
        debug!(url = %props.output_uri, bytes = payload.len(), "delivering output");

        let response = self
            .client
            .post(&props.output_uri)
            .header(CONTENT_TYPE, payload.data_type.content_type())
            .body(payload.data.clone())
            .send()
            .await
            .map_err(|e| SourceError::UpstreamUnavailable(format!("POST {}: {}", props.output_uri, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UpstreamUnavailable(format!(
                "POST {} returned {}",
                props.output_uri, status
            )));
        }
        Ok(())
    }
}
