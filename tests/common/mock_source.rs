//! Scriptable source adapter that records deliveries

use async_trait::async_trait;
use pinwheel::{DataType, Payload, SourceAdapter, SourceError, SourceProperties, SourceType};
use std::sync::Mutex;

/// Which error a scripted call fails with.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Upstream,
    MissingReference,
}

impl Failure {
    fn into_error(self, what: &str) -> SourceError {
        match self {
            Self::Upstream => SourceError::UpstreamUnavailable(format!("{} refused", what)),
            Self::MissingReference => SourceError::MissingReference(format!("{} target", what)),
        }
    }
}

pub struct MockSourceAdapter {
    tag: SourceType,
    input: Vec<u8>,
    retrieve_failure: Option<Failure>,
    deliver_failure: Option<Failure>,
    retrieved: Mutex<Vec<(SourceProperties, DataType)>>,
    delivered: Mutex<Vec<(SourceProperties, Payload)>>,
}

impl MockSourceAdapter {
    pub fn new(tag: SourceType) -> Self {
        Self {
            tag,
            input: b"input-bytes".to_vec(),
            retrieve_failure: None,
            deliver_failure: None,
            retrieved: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_input(mut self, input: &[u8]) -> Self {
        self.input = input.to_vec();
        self
    }

    pub fn failing_retrieve(mut self, failure: Failure) -> Self {
        self.retrieve_failure = Some(failure);
        self
    }

    pub fn failing_deliver(mut self, failure: Failure) -> Self {
        self.deliver_failure = Some(failure);
        self
    }

    pub fn retrieved(&self) -> Vec<(SourceProperties, DataType)> {
        self.retrieved.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<(SourceProperties, Payload)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for MockSourceAdapter {
    fn source_type(&self) -> SourceType {
        self.tag
    }

    async fn retrieve(&self, properties: &SourceProperties, data_type: DataType) -> Result<Payload, SourceError> {
        self.retrieved
            .lock()
            .unwrap()
            .push((properties.clone(), data_type));
        if let Some(failure) = self.retrieve_failure {
            return Err(failure.into_error("retrieve"));
        }
        Ok(Payload::new(self.input.clone(), data_type))
    }

    async fn deliver(&self, properties: &SourceProperties, payload: &Payload) -> Result<(), SourceError> {
        if let Some(failure) = self.deliver_failure {
            return Err(failure.into_error("deliver"));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((properties.clone(), payload.clone()));
        Ok(())
    }
}
