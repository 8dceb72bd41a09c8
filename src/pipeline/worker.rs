//! Worker trait and the polling loop every stage runs
//!
//! A stage implements `process` for one message. The loop receives,
//! processes and settles; what happens to a failed message is decided in
//! one place, `ProcessError::disposition`.

use super::cancel::CancellationToken;
use crate::artifacts::ArtifactError;
use crate::catalog::CatalogError;
use crate::endpoint::ModelError;
use crate::queue::{Message, MessageChannel, QueueError, QueueResult};
use crate::source::SourceError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why processing a message failed.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Missing model or adapter registration, or a registration that
    /// contradicts the message
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("cancelled")]
    Cancelled,
}

/// What to do with a message whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Park it with the failure as reason; retrying will not help
    DeadLetter,
    /// Leave it leased; lease expiry redelivers it
    Abandon,
}

impl ProcessError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Catalog(e) if e.is_permanent() => Disposition::DeadLetter,
            Self::Catalog(_) | Self::Queue(_) | Self::Cancelled => Disposition::Abandon,
            Self::Configuration(_)
            | Self::Malformed(_)
            | Self::Source(_)
            | Self::Model(_)
            | Self::Artifact(_) => Disposition::DeadLetter,
        }
    }
}

/// How a received message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    DeadLettered,
    Abandoned,
}

/// One pipeline stage.
#[async_trait]
pub trait Worker: Send + Sync {
    type Body: Send + Sync + 'static;

    /// Stage name, for logs
    fn stage(&self) -> &'static str;

    /// The queue this stage consumes
    fn channel(&self) -> &dyn MessageChannel<Self::Body>;

    /// Handle one message. Returning `Ok` completes it.
    async fn process(&self, message: &Message<Self::Body>) -> Result<(), ProcessError>;

    /// Runs after the message has been completed.
    async fn on_completed(&self, _message: &Message<Self::Body>) {}
}

/// Receive and idle timing for a worker loop.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// How long one receive waits for a message
    pub receive_timeout: Duration,
    /// Sleep after an empty receive, a receive error or an abandoned message
    pub idle_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(5),
            idle_backoff: Duration::from_secs(10),
        }
    }
}

/// Counters reported when a loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub dead_lettered: u64,
    pub abandoned: u64,
    pub errors: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
            Outcome::Abandoned => self.abandoned += 1,
        }
    }

    pub fn merge(&mut self, other: WorkerStats) {
        self.completed += other.completed;
        self.dead_lettered += other.dead_lettered;
        self.abandoned += other.abandoned;
        self.errors += other.errors;
    }
}

/// Receive at most one message, process it and settle it.
///
/// `Ok(None)` means nothing arrived within `receive_timeout`. Errors are
/// queue failures while receiving or settling; the message, if any, is
/// then left to lease expiry.
pub async fn run_once<W>(
    worker: &W,
    receive_timeout: Duration,
    cancel: &CancellationToken,
) -> QueueResult<Option<Outcome>>
where
    W: Worker + ?Sized,
{
    let channel = worker.channel();
    let Some(message) = channel.receive(receive_timeout, cancel).await? else {
        return Ok(None);
    };

    let stage = worker.stage();
    debug!(
        stage,
        message_id = %message.id,
        delivery_count = message.delivery_count,
        "message received"
    );

    let result = tokio::select! {
        result = worker.process(&message) => result,
        _ = cancel.cancelled() => Err(ProcessError::Cancelled),
    };

    match result {
        Ok(()) => {
            channel.complete(&message).await?;
            info!(stage, message_id = %message.id, "message completed");
            worker.on_completed(&message).await;
            Ok(Some(Outcome::Completed))
        }
        Err(e) => match e.disposition() {
            Disposition::DeadLetter => {
                warn!(stage, message_id = %message.id, error = %e, "dead-lettering message");
                channel.dead_letter(&message, &e.to_string()).await?;
                Ok(Some(Outcome::DeadLettered))
            }
            Disposition::Abandon => {
                warn!(
                    stage,
                    message_id = %message.id,
                    error = %e,
                    "abandoning message until its lease expires"
                );
                Ok(Some(Outcome::Abandoned))
            }
        },
    }
}

/// Run a stage until `cancel` fires.
///
/// Per-message failures never end the loop.
pub async fn run_worker<W>(worker: &W, policy: &PollPolicy, cancel: &CancellationToken) -> WorkerStats
where
    W: Worker + ?Sized,
{
    let stage = worker.stage();
    let queue = worker.channel().name().to_string();
    info!(stage, queue = %queue, "worker started");

    let mut stats = WorkerStats::default();
    while !cancel.is_cancelled() {
        let idle = match run_once(worker, policy.receive_timeout, cancel).await {
            Ok(Some(outcome)) => {
                stats.record(outcome);
                outcome == Outcome::Abandoned
            }
            Ok(None) => true,
            Err(e) => {
                stats.errors += 1;
                error!(stage, queue = %queue, error = %e, "queue operation failed");
                true
            }
        };

        if idle && !cancel.is_cancelled() {
            tokio::select! {
                _ = tokio::time::sleep(policy.idle_backoff) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    info!(
        stage,
        completed = stats.completed,
        dead_lettered = stats.dead_lettered,
        abandoned = stats.abandoned,
        errors = stats.errors,
        "worker stopped"
    );
    stats
}
