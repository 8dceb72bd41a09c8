//! Durable message channel contract

use crate::pipeline::CancellationToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The lease expired and the message was handed to another consumer
    /// (or already settled) before this consumer acknowledged it.
    #[error("Lease lost for message {0}")]
    LeaseLost(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// A received message: broker metadata plus the decoded body.
///
/// The message is invisible to other consumers until the lease expires.
#[derive(Debug, Clone)]
pub struct Message<T> {
    /// Broker-assigned id, stable across redeliveries
    pub id: String,
    /// Identifies this delivery; settling requires the current lease
    pub lease_id: String,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub body: T,
}

impl<T> Message<T> {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// A durable at-least-once queue carrying bodies of type `T`.
///
/// Send operations return only after the broker has durably accepted the
/// message(s). A message that is neither completed nor dead-lettered
/// before its lease expires is redelivered.
#[async_trait]
pub trait MessageChannel<T: Send + Sync + 'static>: Send + Sync {
    /// Queue name, for logs
    fn name(&self) -> &str;

    /// Wait up to `timeout` for a message. Returns `None` on timeout or
    /// when `cancel` fires; an empty queue is not an error.
    async fn receive(&self, timeout: Duration, cancel: &CancellationToken) -> QueueResult<Option<Message<T>>>;

    /// Durably enqueue one message
    async fn send(&self, body: &T) -> QueueResult<()>;

    /// Durably enqueue a batch. All messages commit or none do.
    async fn send_batch(&self, bodies: &[T]) -> QueueResult<()>;

    /// Acknowledge successful processing; the message is gone for good
    async fn complete(&self, message: &Message<T>) -> QueueResult<()>;

    /// Move the message to the dead-letter side channel
    async fn dead_letter(&self, message: &Message<T>, reason: &str) -> QueueResult<()>;
}
