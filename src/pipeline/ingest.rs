//! Ingest stage: one orchestrator request in, one inference request per
//! registered model out

use super::worker::{ProcessError, Worker};
use crate::catalog::MetadataCatalog;
use crate::messages::{InferenceRequest, OrchestratorRequest};
use crate::queue::{Message, MessageChannel};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct IngestWorker {
    catalog: Arc<dyn MetadataCatalog>,
    requests: Arc<dyn MessageChannel<OrchestratorRequest>>,
    inference_requests: Arc<dyn MessageChannel<InferenceRequest>>,
}

impl IngestWorker {
    pub fn new(
        catalog: Arc<dyn MetadataCatalog>,
        requests: Arc<dyn MessageChannel<OrchestratorRequest>>,
        inference_requests: Arc<dyn MessageChannel<InferenceRequest>>,
    ) -> Self {
        Self {
            catalog,
            requests,
            inference_requests,
        }
    }
}

#[async_trait]
impl Worker for IngestWorker {
    type Body = OrchestratorRequest;

    fn stage(&self) -> &'static str {
        "ingest"
    }

    fn channel(&self) -> &dyn MessageChannel<OrchestratorRequest> {
        self.requests.as_ref()
    }

    async fn process(&self, message: &Message<OrchestratorRequest>) -> Result<(), ProcessError> {
        let request = &message.body;
        if !request.is_consistent() {
            return Err(ProcessError::Malformed(format!(
                "sourceType {} does not match {} properties",
                request.source_type,
                request.source_properties.source_type()
            )));
        }

        let models = self.catalog.list_inference_models(&request.account_id).await?;
        if models.is_empty() {
            info!(
                message_id = %message.id,
                account_id = %request.account_id,
                "no inference models registered, nothing to fan out"
            );
            return Ok(());
        }

        let fanned: Vec<InferenceRequest> = models
            .iter()
            .map(|model| request.fan_out(model.id.clone(), &message.id))
            .collect();
        self.inference_requests.send_batch(&fanned).await?;

        info!(
            message_id = %message.id,
            account_id = %request.account_id,
            models = fanned.len(),
            redelivery = message.is_redelivery(),
            "fanned out inference requests"
        );
        Ok(())
    }
}
