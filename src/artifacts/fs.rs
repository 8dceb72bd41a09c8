//! Directory-backed artifact store

use super::traits::{ArtifactError, ArtifactResult, ArtifactStore};
use crate::messages::{ArtifactRef, DataType};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Stores each artifact as `<dir>/<uuid>.<ext>`.
///
/// Writes go to a hidden temporary file that is renamed into place after
/// `sync_all`, so a reader never observes a partial artifact.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> ArtifactResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference to a path, rejecting anything that is not a
    /// bare `<uuid>.<known extension>` file name.
    fn path_for(&self, reference: &ArtifactRef) -> ArtifactResult<PathBuf> {
        let name = reference.as_str();
        let invalid = || ArtifactError::InvalidName(name.to_string());

        let (stem, ext) = name.rsplit_once('.').ok_or_else(invalid)?;
        Uuid::parse_str(stem).map_err(|_| invalid())?;
        DataType::from_extension(ext).ok_or_else(invalid)?;

        Ok(self.root.join(name))
    }
}

/// Write `data` to `staging`, then rename it to `target`. The staging
/// file is removed if any step fails.
async fn write_staged(staging: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    let result = async {
        let mut file = tokio::fs::File::create(staging).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(staging, target).await
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(staging).await;
    }
    result
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, data: &[u8], data_type: DataType) -> ArtifactResult<ArtifactRef> {
        let id = Uuid::new_v4();
        let name = format!("{}.{}", id, data_type.extension());
        let staging = self.root.join(format!(".{}.partial", id));

        write_staged(&staging, &self.root.join(&name), data).await?;
        Ok(ArtifactRef::new(name))
    }

    async fn get(&self, reference: &ArtifactRef) -> ArtifactResult<Vec<u8>> {
        let path = self.path_for(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, reference: &ArtifactRef) -> ArtifactResult<bool> {
        let path = self.path_for(reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
