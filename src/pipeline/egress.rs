//! Egress stage: deliver stored results back to their origin

use super::worker::{ProcessError, Worker};
use crate::artifacts::{ArtifactError, ArtifactJanitor, ArtifactStore};
use crate::messages::InferenceResponse;
use crate::queue::{Message, MessageChannel};
use crate::source::{Payload, SourceAdapterRegistry, SourceError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct EgressWorker {
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<SourceAdapterRegistry>,
    responses: Arc<dyn MessageChannel<InferenceResponse>>,
    janitor: Option<ArtifactJanitor>,
}

impl EgressWorker {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        registry: Arc<SourceAdapterRegistry>,
        responses: Arc<dyn MessageChannel<InferenceResponse>>,
    ) -> Self {
        Self {
            artifacts,
            registry,
            responses,
            janitor: None,
        }
    }

    /// Remove delivered artifacts, holding at most `capacity` pending deletes.
    pub fn with_cleanup(mut self, capacity: usize) -> Self {
        self.janitor = Some(ArtifactJanitor::new(Arc::clone(&self.artifacts), capacity));
        self
    }
}

#[async_trait]
impl Worker for EgressWorker {
    type Body = InferenceResponse;

    fn stage(&self) -> &'static str {
        "egress"
    }

    fn channel(&self) -> &dyn MessageChannel<InferenceResponse> {
        self.responses.as_ref()
    }

    async fn process(&self, message: &Message<InferenceResponse>) -> Result<(), ProcessError> {
        let response = &message.body;

        let data = match self.artifacts.get(&response.artifact_reference).await {
            Ok(data) => data,
            Err(ArtifactError::NotFound(name)) | Err(ArtifactError::InvalidName(name)) => {
                return Err(SourceError::MissingReference(format!("artifact {}", name)).into())
            }
            Err(e) => return Err(e.into()),
        };

        let source_type = response.source_type();
        let adapter = self.registry.resolve(source_type).ok_or_else(|| {
            ProcessError::Configuration(format!("no source adapter registered for {}", source_type))
        })?;

        let payload = Payload::new(data, response.output_data_type);
        adapter.deliver(&response.source_properties, &payload).await?;

        info!(
            message_id = %message.id,
            account_id = %response.account_id,
            inference_id = %response.inference_id,
            bytes = payload.len(),
            "result delivered"
        );
        Ok(())
    }

    async fn on_completed(&self, message: &Message<InferenceResponse>) {
        let Some(janitor) = &self.janitor else {
            return;
        };
        if !janitor.defer(message.body.artifact_reference.clone()) {
            warn!(artifact = %message.body.artifact_reference, "cleanup list full, artifact left behind");
        }
        let report = janitor.drain().await;
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "some artifacts could not be removed");
        }
    }
}
