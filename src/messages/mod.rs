//! Message bodies carried by the pipeline queues
//!
//! Every body is a plain serde record. The queue layer wraps bodies in a
//! [`Message`](crate::queue::Message) envelope that carries the broker
//! assigned message id, so the bodies themselves stay transport-agnostic.

mod requests;
mod source;

pub use requests::{ArtifactRef, InferenceRequest, InferenceResponse, OrchestratorRequest};
pub use source::{DataType, HttpProperties, SourceProperties, SourceType, UpsRsProperties};
