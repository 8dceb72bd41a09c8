//! Temporary artifact store contract

use crate::messages::{ArtifactRef, DataType};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// The reference is not a name this store could have generated.
    #[error("Malformed artifact reference: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Write-once blob storage addressed by generated names.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes under a freshly generated name. The artifact is
    /// readable as soon as this returns.
    async fn put(&self, data: &[u8], data_type: DataType) -> ArtifactResult<ArtifactRef>;

    async fn get(&self, reference: &ArtifactRef) -> ArtifactResult<Vec<u8>>;

    /// Remove an artifact. Returns false if it was already gone.
    async fn delete(&self, reference: &ArtifactRef) -> ArtifactResult<bool>;
}
