//! The three-stage pipeline: ingest, inference, egress
//!
//! Each stage is a `Worker` run by `run_worker`. `Pipeline` owns the
//! shared resources (broker, catalog, artifact store, adapter registry,
//! model client) and spawns the configured number of loops per stage.

mod cancel;
mod egress;
mod inference;
mod ingest;
mod worker;

pub use cancel::CancellationToken;
pub use egress::EgressWorker;
pub use inference::InferenceWorker;
pub use ingest::IngestWorker;
pub use worker::{run_once, run_worker, Disposition, Outcome, PollPolicy, ProcessError, Worker, WorkerStats};

use crate::artifacts::{ArtifactError, ArtifactStore, FsArtifactStore};
use crate::catalog::{CatalogError, FileCatalog, MetadataCatalog, OpenCatalog, SqliteCatalog};
use crate::config::{CatalogConfig, Config};
use crate::endpoint::{HttpModelClient, ModelClient};
use crate::messages::{InferenceRequest, InferenceResponse, OrchestratorRequest};
use crate::queue::{
    MessageChannel, QueueError, SqliteBroker, INFERENCE_REQUEST_QUEUE, INFERENCE_RESPONSE_QUEUE,
    ORCHESTRATOR_QUEUE,
};
use crate::source::{HttpAdapter, RegistryError, SourceAdapterRegistry, UpsRsAdapter};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Errors raised while assembling or driving the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Ingest,
    Inference,
    Egress,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Ingest, Stage::Inference, Stage::Egress];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Inference => "inference",
            Self::Egress => "egress",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Pipeline {
    config: Config,
    broker: Arc<SqliteBroker>,
    catalog: Arc<dyn MetadataCatalog>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<SourceAdapterRegistry>,
    models: Arc<dyn ModelClient>,
}

impl Pipeline {
    /// Open every store named by `config` and register the built-in adapters.
    pub fn from_config(config: Config) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&config.data_dir)?;
        if let Some(parent) = config.queue_path().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let broker = Arc::new(SqliteBroker::open(config.queue_path(), config.broker_options())?);

        let catalog: Arc<dyn MetadataCatalog> = match &config.catalog {
            CatalogConfig::Sqlite { .. } => {
                let path = config.catalog_db_path().unwrap_or_else(|| config.data_dir.join("catalog.db"));
                Arc::new(SqliteCatalog::open(path)?)
            }
            CatalogConfig::File { path } => {
                let path = config.catalog_file_path().unwrap_or_else(|| path.clone());
                Arc::new(FileCatalog::load(path)?)
            }
        };

        let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::open(config.artifact_dir())?);

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| PipelineError::Http(e.to_string()))?;

        let registry = SourceAdapterRegistry::builder()
            .register(Arc::new(UpsRsAdapter::new(client.clone())))
            .register(Arc::new(HttpAdapter::new(client.clone())))
            .build()?;

        let models: Arc<dyn ModelClient> = Arc::new(HttpModelClient::new(client));

        Ok(Self::from_parts(config, broker, catalog, artifacts, registry, models))
    }

    /// Assemble a pipeline from already-built parts.
    pub fn from_parts(
        config: Config,
        broker: Arc<SqliteBroker>,
        catalog: Arc<dyn MetadataCatalog>,
        artifacts: Arc<dyn ArtifactStore>,
        registry: SourceAdapterRegistry,
        models: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            config,
            broker,
            catalog,
            artifacts,
            registry: Arc::new(registry),
            models,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &Arc<SqliteBroker> {
        &self.broker
    }

    fn orchestrator_queue(&self) -> Arc<dyn MessageChannel<OrchestratorRequest>> {
        Arc::new(self.broker.queue::<OrchestratorRequest>(ORCHESTRATOR_QUEUE))
    }

    fn inference_request_queue(&self) -> Arc<dyn MessageChannel<InferenceRequest>> {
        Arc::new(self.broker.queue::<InferenceRequest>(INFERENCE_REQUEST_QUEUE))
    }

    fn inference_response_queue(&self) -> Arc<dyn MessageChannel<InferenceResponse>> {
        Arc::new(self.broker.queue::<InferenceResponse>(INFERENCE_RESPONSE_QUEUE))
    }

    pub fn ingest_worker(&self) -> IngestWorker {
        IngestWorker::new(
            Arc::clone(&self.catalog),
            self.orchestrator_queue(),
            self.inference_request_queue(),
        )
    }

    pub fn inference_worker(&self) -> InferenceWorker {
        InferenceWorker::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.registry),
            Arc::clone(&self.models),
            Arc::clone(&self.artifacts),
            self.inference_request_queue(),
            self.inference_response_queue(),
        )
    }

    pub fn egress_worker(&self) -> EgressWorker {
        let worker = EgressWorker::new(
            Arc::clone(&self.artifacts),
            Arc::clone(&self.registry),
            self.inference_response_queue(),
        );
        if self.config.artifacts.delete_after_delivery {
            worker.with_cleanup(self.config.artifacts.cleanup_capacity)
        } else {
            worker
        }
    }

    /// Enqueue one origin event.
    pub async fn submit(&self, request: &OrchestratorRequest) -> Result<(), PipelineError> {
        submit(self.orchestrator_queue().as_ref(), request).await
    }

    fn instances(&self, stage: Stage) -> usize {
        let workers = &self.config.workers;
        match stage {
            Stage::Ingest => workers.ingest_instances,
            Stage::Inference => workers.inference_instances,
            Stage::Egress => workers.egress_instances,
        }
    }

    /// Start the configured number of loops for each stage.
    pub fn spawn(&self, stages: &[Stage], cancel: &CancellationToken) -> Vec<JoinHandle<WorkerStats>> {
        let policy = self.config.poll_policy();
        let mut handles = Vec::new();

        for &stage in stages {
            let count = self.instances(stage);
            info!(stage = %stage, instances = count, "starting stage");
            for _ in 0..count {
                let cancel = cancel.clone();
                let policy = policy.clone();
                let handle = match stage {
                    Stage::Ingest => {
                        let worker = self.ingest_worker();
                        tokio::spawn(async move { run_worker(&worker, &policy, &cancel).await })
                    }
                    Stage::Inference => {
                        let worker = self.inference_worker();
                        tokio::spawn(async move { run_worker(&worker, &policy, &cancel).await })
                    }
                    Stage::Egress => {
                        let worker = self.egress_worker();
                        tokio::spawn(async move { run_worker(&worker, &policy, &cancel).await })
                    }
                };
                handles.push(handle);
            }
        }
        handles
    }

    /// Run the given stages until `cancel` fires, then wait for every loop.
    pub async fn run(&self, stages: &[Stage], cancel: &CancellationToken) -> WorkerStats {
        let mut total = WorkerStats::default();
        for handle in self.spawn(stages, cancel) {
            match handle.await {
                Ok(stats) => total.merge(stats),
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }
        total
    }
}

/// Validate and enqueue an orchestrator request on `channel`.
pub async fn submit(
    channel: &dyn MessageChannel<OrchestratorRequest>,
    request: &OrchestratorRequest,
) -> Result<(), PipelineError> {
    if !request.is_consistent() {
        return Err(PipelineError::InvalidRequest(format!(
            "sourceType {} does not match {} properties",
            request.source_type,
            request.source_properties.source_type()
        )));
    }
    channel.send(request).await?;
    info!(account_id = %request.account_id, source_type = %request.source_type, "request submitted");
    Ok(())
}
