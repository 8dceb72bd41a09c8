//! SourceAdapter trait, the contract each origin protocol implements
//!
//! An adapter translates the generic `SourceProperties` into its origin's
//! native requests: it fetches model input and delivers model output.
//! Adapters hold no orchestration logic; queueing, retries and
//! dead-lettering belong to the workers.

use crate::messages::{DataType, SourceProperties, SourceType};
use async_trait::async_trait;
use thiserror::Error;

/// Bytes plus the format they are in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: Vec<u8>,
    pub data_type: DataType,
}

impl Payload {
    pub fn new(data: impl Into<Vec<u8>>, data_type: DataType) -> Self {
        Self {
            data: data.into(),
            data_type,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Errors from adapter retrieval or delivery.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The origin system could not be reached or did not answer with success
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The origin's descriptor lacks the reference needed to continue
    #[error("missing reference: {0}")]
    MissingReference(String),

    #[error("{expected} adapter received {found} properties")]
    InvalidProperties {
        expected: SourceType,
        found: SourceType,
    },

    #[error("{source_type} adapter cannot provide {data_type} input")]
    UnsupportedDataType {
        source_type: SourceType,
        data_type: DataType,
    },
}

/// The contract source adapters implement.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The tag this adapter is registered under
    fn source_type(&self) -> SourceType;

    /// Fetch model input in the requested format.
    async fn retrieve(&self, properties: &SourceProperties, data_type: DataType) -> Result<Payload, SourceError>;

    /// Hand a model result back to the origin system.
    async fn deliver(&self, properties: &SourceProperties, payload: &Payload) -> Result<(), SourceError>;
}
