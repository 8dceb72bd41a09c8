//! Metadata catalog: accounts and their registered inference models
//!
//! Workers only read through the `MetadataCatalog` trait. `SqliteCatalog`
//! is the persistent backend; `FileCatalog` serves small deployments from
//! a YAML document.

mod file;
mod sqlite;
mod traits;

pub use file::FileCatalog;
pub use sqlite::SqliteCatalog;
pub use traits::{Account, CatalogError, CatalogResult, InferenceModel, MetadataCatalog, OpenCatalog};
