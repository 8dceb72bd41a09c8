//! Common test utilities for pipeline scenarios
//!
//! `Harness` wires a pipeline over an in-memory broker, an in-memory
//! catalog, a temporary artifact directory, a scripted source adapter and
//! a mock model client.

#![allow(dead_code)]

pub mod faults;
pub mod mock_source;

pub use faults::{FailingSends, StalledSends, SwitchableCatalog};
pub use mock_source::{Failure, MockSourceAdapter};

use pinwheel::catalog::{Account, FileCatalog, InferenceModel, MetadataCatalog};
use pinwheel::config::Config;
use pinwheel::queue::{
    BrokerOptions, SqliteBroker, SqliteQueue, INFERENCE_REQUEST_QUEUE, INFERENCE_RESPONSE_QUEUE, ORCHESTRATOR_QUEUE,
};
use pinwheel::{
    ArtifactStore, DataType, FsArtifactStore, InferenceRequest, InferenceResponse, MockModelClient,
    OrchestratorRequest, Pipeline, SourceAdapterRegistry, SourceProperties, SourceType,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Receive wait used by single-step tests
pub const WAIT: Duration = Duration::from_millis(50);

pub fn http_props() -> SourceProperties {
    SourceProperties::http("https://origin.example/in/42", "https://origin.example/out/42")
}

/// Accounts A1 (models M1, M2) and A2 (no models).
pub fn seeded_catalog() -> FileCatalog {
    let catalog = FileCatalog::new();
    catalog.insert_account(Account::new("A1", "Radiology"));
    catalog.insert_account(Account::new("A2", "Pathology"));
    catalog.insert_model(InferenceModel::new(
        "M1",
        "A1",
        "http://models.local/m1",
        DataType::Dcm,
        DataType::Png,
    ));
    catalog.insert_model(InferenceModel::new(
        "M2",
        "A1",
        "http://models.local/m2",
        DataType::Jpeg,
        DataType::Json,
    ));
    catalog
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.queue.receive_timeout_ms = 20;
    config.workers.idle_backoff_ms = 10;
    config.artifacts.delete_after_delivery = true;
    config.artifacts.cleanup_capacity = 8;
    config
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub broker: Arc<SqliteBroker>,
    pub catalog: Arc<SwitchableCatalog<FileCatalog>>,
    pub artifacts: Arc<FsArtifactStore>,
    pub adapter: Arc<MockSourceAdapter>,
    pub models: Arc<MockModelClient>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(MockSourceAdapter::new(SourceType::Http), MockModelClient::new(), Duration::from_secs(30))
    }

    pub fn with_adapter(adapter: MockSourceAdapter) -> Self {
        Self::build(adapter, MockModelClient::new(), Duration::from_secs(30))
    }

    pub fn with_models(models: MockModelClient) -> Self {
        Self::build(MockSourceAdapter::new(SourceType::Http), models, Duration::from_secs(30))
    }

    /// Short leases, for redelivery scenarios.
    pub fn with_lease(lease: Duration) -> Self {
        Self::build(MockSourceAdapter::new(SourceType::Http), MockModelClient::new(), lease)
    }

    fn build(adapter: MockSourceAdapter, models: MockModelClient, lease: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let broker = Arc::new(
            SqliteBroker::open_in_memory(BrokerOptions {
                lease,
                max_deliveries: 5,
                receive_poll: Duration::from_millis(5),
            })
            .unwrap(),
        );
        let catalog = Arc::new(SwitchableCatalog::new(Arc::new(seeded_catalog())));
        let artifacts = Arc::new(FsArtifactStore::open(dir.path().join("artifacts")).unwrap());
        let adapter = Arc::new(adapter);
        let models = Arc::new(models);

        let registry = SourceAdapterRegistry::builder()
            .register(adapter.clone())
            .build()
            .unwrap();

        let pipeline = Pipeline::from_parts(
            test_config(),
            broker.clone(),
            catalog.clone(),
            artifacts.clone(),
            registry,
            models.clone(),
        );

        Self {
            pipeline,
            broker,
            catalog,
            artifacts,
            adapter,
            models,
            _dir: dir,
        }
    }

    pub fn orchestrator_queue(&self) -> SqliteQueue<OrchestratorRequest> {
        self.broker.queue(ORCHESTRATOR_QUEUE)
    }

    pub fn request_queue(&self) -> SqliteQueue<InferenceRequest> {
        self.broker.queue(INFERENCE_REQUEST_QUEUE)
    }

    pub fn response_queue(&self) -> SqliteQueue<InferenceResponse> {
        self.broker.queue(INFERENCE_RESPONSE_QUEUE)
    }

    pub fn active(&self, queue: &str) -> usize {
        self.broker.depth(queue).unwrap().active
    }

    pub fn dead_lettered(&self, queue: &str) -> usize {
        self.broker.depth(queue).unwrap().dead_lettered
    }

    /// Number of files in the artifact directory.
    pub fn artifact_count(&self) -> usize {
        std::fs::read_dir(self.artifacts.root()).unwrap().count()
    }

    pub fn catalog_handle(&self) -> Arc<dyn MetadataCatalog> {
        self.catalog.clone()
    }

    pub fn artifact_handle(&self) -> Arc<dyn ArtifactStore> {
        self.artifacts.clone()
    }
}
