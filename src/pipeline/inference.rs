//! Inference stage: fetch input, call the model, stash the result

use super::worker::{ProcessError, Worker};
use crate::artifacts::ArtifactStore;
use crate::catalog::MetadataCatalog;
use crate::endpoint::ModelClient;
use crate::messages::{ArtifactRef, InferenceRequest, InferenceResponse};
use crate::queue::{Message, MessageChannel};
use crate::source::SourceAdapterRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct InferenceWorker {
    catalog: Arc<dyn MetadataCatalog>,
    registry: Arc<SourceAdapterRegistry>,
    models: Arc<dyn ModelClient>,
    artifacts: Arc<dyn ArtifactStore>,
    requests: Arc<dyn MessageChannel<InferenceRequest>>,
    responses: Arc<dyn MessageChannel<InferenceResponse>>,
}

impl InferenceWorker {
    pub fn new(
        catalog: Arc<dyn MetadataCatalog>,
        registry: Arc<SourceAdapterRegistry>,
        models: Arc<dyn ModelClient>,
        artifacts: Arc<dyn ArtifactStore>,
        requests: Arc<dyn MessageChannel<InferenceRequest>>,
        responses: Arc<dyn MessageChannel<InferenceResponse>>,
    ) -> Self {
        Self {
            catalog,
            registry,
            models,
            artifacts,
            requests,
            responses,
        }
    }
}

#[async_trait]
impl Worker for InferenceWorker {
    type Body = InferenceRequest;

    fn stage(&self) -> &'static str {
        "inference"
    }

    fn channel(&self) -> &dyn MessageChannel<InferenceRequest> {
        self.requests.as_ref()
    }

    async fn process(&self, message: &Message<InferenceRequest>) -> Result<(), ProcessError> {
        let request = &message.body;

        let model = self.catalog.get_inference_model(&request.inference_id).await?;
        if model.account_id != request.account_id {
            return Err(ProcessError::Configuration(format!(
                "model {} belongs to account {}, not {}",
                model.id, model.account_id, request.account_id
            )));
        }

        let source_type = request.source_properties.source_type();
        let adapter = self.registry.resolve(source_type).ok_or_else(|| {
            ProcessError::Configuration(format!("no source adapter registered for {}", source_type))
        })?;

        let input = adapter
            .retrieve(&request.source_properties, model.input_data_type)
            .await?;
        debug!(
            message_id = %message.id,
            inference_id = %request.inference_id,
            bytes = input.len(),
            "input retrieved"
        );

        let output = self.models.invoke(&model, &input).await?;
        if !output.is_success() {
            warn!(
                message_id = %message.id,
                inference_id = %request.inference_id,
                status_code = output.status_code,
                "model answered with non-success status"
            );
        }

        let reference = self.artifacts.put(&output.body, model.output_data_type).await?;
        let unsent = UnsentArtifact::new(Arc::clone(&self.artifacts), reference.clone());
        let response = InferenceResponse {
            account_id: request.account_id.clone(),
            inference_id: request.inference_id.clone(),
            source_properties: request.source_properties.clone(),
            artifact_reference: reference.clone(),
            output_data_type: model.output_data_type,
            status_code: output.status_code,
            origin_message_id: request.origin_message_id.clone(),
        };

        if let Err(e) = self.responses.send(&response).await {
            // The redelivered request will produce a fresh artifact.
            unsent.discard().await;
            return Err(e.into());
        }
        unsent.disarm();

        info!(
            message_id = %message.id,
            account_id = %request.account_id,
            inference_id = %request.inference_id,
            artifact = %reference,
            status_code = output.status_code,
            "inference response sent"
        );
        Ok(())
    }
}

/// An artifact no response refers to yet.
///
/// Dropped while still armed, as when cancellation drops `process`
/// between storing and sending, it schedules its own deletion.
struct UnsentArtifact {
    artifacts: Arc<dyn ArtifactStore>,
    reference: Option<ArtifactRef>,
}

impl UnsentArtifact {
    fn new(artifacts: Arc<dyn ArtifactStore>, reference: ArtifactRef) -> Self {
        Self {
            artifacts,
            reference: Some(reference),
        }
    }

    fn disarm(mut self) {
        self.reference = None;
    }

    async fn discard(mut self) {
        if let Some(reference) = self.reference.take() {
            remove_unsent(self.artifacts.as_ref(), &reference).await;
        }
    }
}

impl Drop for UnsentArtifact {
    fn drop(&mut self) {
        let Some(reference) = self.reference.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let artifacts = Arc::clone(&self.artifacts);
                handle.spawn(async move {
                    remove_unsent(artifacts.as_ref(), &reference).await;
                });
            }
            Err(_) => warn!(artifact = %reference, "no runtime to remove unsent artifact"),
        }
    }
}

async fn remove_unsent(artifacts: &dyn ArtifactStore, reference: &ArtifactRef) {
    if let Err(e) = artifacts.delete(reference).await {
        warn!(artifact = %reference, error = %e, "could not remove unsent artifact");
    }
}
