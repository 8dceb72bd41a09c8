//! Wrappers that inject infrastructure failures

use async_trait::async_trait;
use pinwheel::catalog::{Account, CatalogError, CatalogResult, InferenceModel, MetadataCatalog};
use pinwheel::pipeline::CancellationToken;
use pinwheel::queue::{Message, MessageChannel, QueueError, QueueResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A catalog that can be taken offline.
pub struct SwitchableCatalog<C> {
    inner: Arc<C>,
    down: AtomicBool,
}

impl<C: MetadataCatalog> SwitchableCatalog<C> {
    pub fn new(inner: Arc<C>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> CatalogResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("catalog offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<C: MetadataCatalog> MetadataCatalog for SwitchableCatalog<C> {
    async fn get_account(&self, id: &str) -> CatalogResult<Account> {
        self.check()?;
        self.inner.get_account(id).await
    }

    async fn get_inference_model(&self, id: &str) -> CatalogResult<InferenceModel> {
        self.check()?;
        self.inner.get_inference_model(id).await
    }

    async fn list_inference_models(&self, account_id: &str) -> CatalogResult<Vec<InferenceModel>> {
        self.check()?;
        self.inner.list_inference_models(account_id).await
    }
}

/// A channel whose sends always fail; receives and settles pass through.
pub struct FailingSends<T> {
    inner: Arc<dyn MessageChannel<T>>,
}

impl<T> FailingSends<T> {
    pub fn new(inner: Arc<dyn MessageChannel<T>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> MessageChannel<T> for FailingSends<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn receive(&self, timeout: Duration, cancel: &CancellationToken) -> QueueResult<Option<Message<T>>> {
        self.inner.receive(timeout, cancel).await
    }

    async fn send(&self, _body: &T) -> QueueResult<()> {
        Err(QueueError::Unavailable("broker rejected send".into()))
    }

    async fn send_batch(&self, _bodies: &[T]) -> QueueResult<()> {
        Err(QueueError::Unavailable("broker rejected send".into()))
    }

    async fn complete(&self, message: &Message<T>) -> QueueResult<()> {
        self.inner.complete(message).await
    }

    async fn dead_letter(&self, message: &Message<T>, reason: &str) -> QueueResult<()> {
        self.inner.dead_letter(message, reason).await
    }
}

/// A channel whose sends never return; receives and settles pass through.
pub struct StalledSends<T> {
    inner: Arc<dyn MessageChannel<T>>,
}

impl<T> StalledSends<T> {
    pub fn new(inner: Arc<dyn MessageChannel<T>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> MessageChannel<T> for StalledSends<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn receive(&self, timeout: Duration, cancel: &CancellationToken) -> QueueResult<Option<Message<T>>> {
        self.inner.receive(timeout, cancel).await
    }

    async fn send(&self, _body: &T) -> QueueResult<()> {
        std::future::pending().await
    }

    async fn send_batch(&self, _bodies: &[T]) -> QueueResult<()> {
        std::future::pending().await
    }

    async fn complete(&self, message: &Message<T>) -> QueueResult<()> {
        self.inner.complete(message).await
    }

    async fn dead_letter(&self, message: &Message<T>, reason: &str) -> QueueResult<()> {
        self.inner.dead_letter(message, reason).await
    }
}
