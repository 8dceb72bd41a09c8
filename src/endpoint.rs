//! Model endpoint client: invokes inference models over HTTP
//!
//! Defines the client trait and result types for calling a model's
//! endpoint. Two implementations:
//! - `HttpModelClient`: POSTs the input payload to `endpoint_uri` (production)
//! - `MockModelClient`: returns preconfigured outputs (testing)
//!
//! Any HTTP status counts as a model answer; only transport failures are
//! errors. The status travels on to the egress stage in the response.

use crate::catalog::InferenceModel;
use crate::source::Payload;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// What a model endpoint answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOutput {
    pub status_code: u16,
    pub body: Vec<u8>,
}

impl ModelOutput {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model endpoint unreachable: {0}")]
    Transport(String),
    #[error("invalid model endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Client trait for invoking inference models.
///
/// Abstracts over transport so the inference stage does not depend on
/// how a model is reached.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, model: &InferenceModel, input: &Payload) -> Result<ModelOutput, ModelError>;
}

/// Production client. Shares one connection pool across all models.
pub struct HttpModelClient {
    client: reqwest::Client,
}

impl HttpModelClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn invoke(&self, model: &InferenceModel, input: &Payload) -> Result<ModelOutput, ModelError> {
        let url = reqwest::Url::parse(&model.endpoint_uri)
            .map_err(|e| ModelError::InvalidEndpoint(format!("{}: {}", model.endpoint_uri, e)))?;

        debug!(model = %model.id, url = %url, bytes = input.len(), "invoking model");
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, input.data_type.content_type())
            .header(ACCEPT, model.output_data_type.content_type())
            .body(input.data.clone())
            .send()
            .await
            .map_err(|e| ModelError::Transport(format!("{}: {}", model.endpoint_uri, e)))?;

        let status_code = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ModelError::Transport(format!("{} body: {}", model.endpoint_uri, e)))?;

        Ok(ModelOutput::new(status_code, body.to_vec()))
    }
}

/// Mock client for testing. Returns preconfigured outputs per model id.
///
/// Models with nothing registered answer 200 with the input echoed back.
#[derive(Default)]
pub struct MockModelClient {
    responses: HashMap<String, Result<ModelOutput, String>>,
    calls: Mutex<Vec<String>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an output for a specific model id.
    pub fn with_response(mut self, model_id: impl Into<String>, status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        self.responses
            .insert(model_id.into(), Ok(ModelOutput::new(status_code, body)));
        self
    }

    /// Register a transport failure for a specific model id.
    pub fn with_failure(mut self, model_id: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses.insert(model_id.into(), Err(message.into()));
        self
    }

    /// Model ids invoked so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn invoke(&self, model: &InferenceModel, input: &Payload) -> Result<ModelOutput, ModelError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(model.id.clone());
        }
        match self.responses.get(&model.id) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(ModelError::Transport(message.clone())),
            None => Ok(ModelOutput::new(200, input.data.clone())),
        }
    }
}
