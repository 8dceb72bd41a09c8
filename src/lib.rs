//! Pinwheel: queue-mediated inference fan-out
//!
//! Origin events enter as orchestrator requests, fan out to one inference
//! request per model registered for the account, run against each model's
//! endpoint, and flow back to the origin system as delivered results.
//!
//! # Core Concepts
//!
//! - **Stages**: ingest, inference and egress workers, each an independent
//!   polling loop over a durable queue
//! - **Source adapters**: per-protocol retrieval and delivery (UPS-RS, HTTP)
//! - **Artifacts**: model output parked between inference and egress
//!
//! # Example
//!
//! ```
//! use pinwheel::{OrchestratorRequest, SourceProperties, SourceType};
//!
//! let request = OrchestratorRequest::new(
//!     "A1",
//!     SourceProperties::ups_rs("https://pacs.example/dicomweb", "1.2.840.1"),
//! );
//! assert_eq!(request.source_type, SourceType::UpsRs);
//! assert!(request.is_consistent());
//! ```

pub mod artifacts;
pub mod catalog;
pub mod config;
pub mod endpoint;
pub mod messages;
pub mod pipeline;
pub mod queue;
pub mod source;

pub use artifacts::{ArtifactError, ArtifactStore, FsArtifactStore};
pub use catalog::{
    Account, CatalogError, CatalogResult, FileCatalog, InferenceModel, MetadataCatalog, OpenCatalog, SqliteCatalog,
};
pub use config::{Config, ConfigError};
pub use endpoint::{HttpModelClient, MockModelClient, ModelClient, ModelError, ModelOutput};
pub use messages::{
    ArtifactRef, DataType, InferenceRequest, InferenceResponse, OrchestratorRequest, SourceProperties, SourceType,
};
pub use pipeline::{CancellationToken, Pipeline, PipelineError, Stage};
pub use queue::{Message, MessageChannel, QueueError, SqliteBroker};
pub use source::{Payload, SourceAdapter, SourceAdapterRegistry, SourceError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
