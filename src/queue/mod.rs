//! Durable at-least-once queues
//!
//! The pipeline talks to its three queues through `MessageChannel<T>`.
//! `SqliteBroker` is the bundled broker: leases, dead-lettering and a
//! delivery-count guard, shared by every worker process on a host.

mod sqlite;
mod traits;

pub use sqlite::{BrokerOptions, DeadLetter, QueueDepth, SqliteBroker, SqliteQueue};
pub use traits::{Message, MessageChannel, QueueError, QueueResult};

/// Queue carrying one message per origin event
pub const ORCHESTRATOR_QUEUE: &str = "orchestrator-requests";
/// Queue carrying one message per (origin event, model) pair
pub const INFERENCE_REQUEST_QUEUE: &str = "inference-requests";
/// Queue carrying completed inference results
pub const INFERENCE_RESPONSE_QUEUE: &str = "inference-responses";

/// All queues the pipeline uses, in flow order.
pub const ALL_QUEUES: [&str; 3] = [ORCHESTRATOR_QUEUE, INFERENCE_REQUEST_QUEUE, INFERENCE_RESPONSE_QUEUE];
