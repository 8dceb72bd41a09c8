//! Source adapter registry: resolves a source tag to its adapter
//!
//! Built once at startup. Registration of two adapters under the same
//! tag fails the build instead of surfacing on the first message.

use super::traits::SourceAdapter;
use crate::messages::SourceType;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate source adapter registered for {0}")]
    DuplicateSourceType(SourceType),
}

/// Immutable map from source tag to adapter.
#[derive(Clone, Default)]
pub struct SourceAdapterRegistry {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl SourceAdapterRegistry {
    pub fn builder() -> SourceAdapterRegistryBuilder {
        SourceAdapterRegistryBuilder::default()
    }

    pub fn resolve(&self, source_type: SourceType) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source_type).cloned()
    }

    pub fn source_types(&self) -> Vec<SourceType> {
        let mut types: Vec<SourceType> = self.adapters.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

impl std::fmt::Debug for SourceAdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAdapterRegistry")
            .field("source_types", &self.source_types())
            .finish()
    }
}

/// Collects adapters and validates them into a registry.
#[derive(Default)]
pub struct SourceAdapterRegistryBuilder {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceAdapterRegistryBuilder {
    pub fn register(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn build(self) -> Result<SourceAdapterRegistry, RegistryError> {
        let mut adapters = HashMap::new();
        for adapter in self.adapters {
            let tag = adapter.source_type();
            if adapters.insert(tag, adapter).is_some() {
                return Err(RegistryError::DuplicateSourceType(tag));
            }
        }
        Ok(SourceAdapterRegistry { adapters })
    }
}
