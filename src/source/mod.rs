//! Source adapters: protocol-specific input retrieval and output delivery

mod http;
pub mod multipart;
mod registry;
#[cfg(test)]
mod stub_server;
mod traits;
mod ups_rs;

pub use http::HttpAdapter;
pub use registry::{RegistryError, SourceAdapterRegistry, SourceAdapterRegistryBuilder};
pub use traits::{Payload, SourceAdapter, SourceError};
pub use ups_rs::UpsRsAdapter;
