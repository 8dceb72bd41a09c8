//! Metadata catalog trait definitions

use crate::messages::DataType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during catalog lookups
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Inference model not found: {0}")]
    ModelNotFound(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// A stored registration that cannot be interpreted
    #[error("Invalid catalog record: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Catalog file error: {0}")]
    File(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// Whether the lookup target is known to be absent, as opposed to the
    /// catalog itself being unreachable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AccountNotFound(_) | Self::ModelNotFound(_))
    }

    /// Whether retrying the same lookup can only fail the same way.
    pub fn is_permanent(&self) -> bool {
        self.is_not_found() || matches!(self, Self::InvalidRecord(_))
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// An identity owning zero or more inference model registrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A registered model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceModel {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub name: String,
    pub endpoint_uri: String,
    pub input_data_type: DataType,
    pub output_data_type: DataType,
}

impl InferenceModel {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        endpoint_uri: impl Into<String>,
        input_data_type: DataType,
        output_data_type: DataType,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            account_id: account_id.into(),
            endpoint_uri: endpoint_uri.into(),
            input_data_type,
            output_data_type,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Read-only lookup of accounts and their registered models.
///
/// Implementations must be thread-safe; every worker instance shares one
/// catalog handle without client-side locking.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    /// Look up an account by id
    async fn get_account(&self, id: &str) -> CatalogResult<Account>;

    /// Look up a single model registration by id
    async fn get_inference_model(&self, id: &str) -> CatalogResult<InferenceModel>;

    /// All models registered for an account. An empty list is valid data,
    /// not an error. Ordering is not guaranteed.
    async fn list_inference_models(&self, account_id: &str) -> CatalogResult<Vec<InferenceModel>>;
}

/// Extension trait for opening catalogs from paths
pub trait OpenCatalog: MetadataCatalog + Sized {
    /// Open or create a catalog at the given path
    fn open(path: impl AsRef<Path>) -> CatalogResult<Self>;

    /// Create an in-memory catalog (useful for testing)
    fn open_in_memory() -> CatalogResult<Self>;
}
