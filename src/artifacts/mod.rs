//! Temporary artifact store for results passed between stages

mod fs;
mod janitor;
mod traits;

pub use fs::FsArtifactStore;
pub use janitor::{ArtifactJanitor, DrainReport};
pub use traits::{ArtifactError, ArtifactResult, ArtifactStore};
