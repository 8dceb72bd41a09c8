//! YAML-file catalog held in memory

use super::traits::{Account, CatalogError, CatalogResult, InferenceModel, MetadataCatalog};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    models: Vec<InferenceModel>,
}

/// Catalog loaded once from a YAML document.
///
/// ```yaml
/// accounts:
///   - id: A1
///     name: Radiology
/// models:
///   - id: M1
///     accountId: A1
///     endpointUri: http://models.local/m1
///     inputDataType: DCM
///     outputDataType: PNG
/// ```
#[derive(Debug, Default)]
pub struct FileCatalog {
    accounts: DashMap<String, Account>,
    models: DashMap<String, InferenceModel>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog document. Models must reference a declared account.
    pub fn from_yaml(yaml: &str) -> CatalogResult<Self> {
        let file: CatalogFile =
            serde_yaml::from_str(yaml).map_err(|e| CatalogError::File(e.to_string()))?;
        let catalog = Self::new();
        for account in file.accounts {
            catalog.insert_account(account);
        }
        for model in file.models {
            if !catalog.accounts.contains_key(&model.account_id) {
                return Err(CatalogError::File(format!(
                    "model '{}' references unknown account '{}'",
                    model.id, model.account_id
                )));
            }
            catalog.insert_model(model);
        }
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn insert_account(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn insert_model(&self, model: InferenceModel) {
        self.models.insert(model.id.clone(), model);
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}

#[async_trait]
impl MetadataCatalog for FileCatalog {
    async fn get_account(&self, id: &str) -> CatalogResult<Account> {
        self.accounts
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| CatalogError::AccountNotFound(id.to_string()))
    }

    async fn get_inference_model(&self, id: &str) -> CatalogResult<InferenceModel> {
        self.models
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| CatalogError::ModelNotFound(id.to_string()))
    }

    async fn list_inference_models(&self, account_id: &str) -> CatalogResult<Vec<InferenceModel>> {
        Ok(self
            .models
            .iter()
            .filter(|r| r.account_id == account_id)
            .map(|r| r.value().clone())
            .collect())
    }
}
