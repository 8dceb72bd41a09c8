//! Source tags, source properties and payload data types

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of origin protocols the pipeline can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "UPS-RS")]
    UpsRs,
    #[serde(rename = "HTTP")]
    Http,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpsRs => "UPS-RS",
            Self::Http => "HTTP",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locates a UPS-RS workitem on a DICOMweb server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsRsProperties {
    pub server_address: String,
    pub instance_id: String,
}

/// Plain HTTP pull/push locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProperties {
    pub input_uri: String,
    pub output_uri: String,
}

/// Origin-specific properties, tagged by source type.
///
/// Serialized with an inline `sourceType` tag so the variant survives a
/// JSON round trip through any broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sourceType")]
pub enum SourceProperties {
    #[serde(rename = "UPS-RS")]
    UpsRs(UpsRsProperties),
    #[serde(rename = "HTTP")]
    Http(HttpProperties),
}

impl SourceProperties {
    pub fn ups_rs(server_address: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::UpsRs(UpsRsProperties {
            server_address: server_address.into(),
            instance_id: instance_id.into(),
        })
    }

    pub fn http(input_uri: impl Into<String>, output_uri: impl Into<String>) -> Self {
        Self::Http(HttpProperties {
            input_uri: input_uri.into(),
            output_uri: output_uri.into(),
        })
    }

    /// The discriminant used to resolve a source adapter.
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::UpsRs(_) => SourceType::UpsRs,
            Self::Http(_) => SourceType::Http,
        }
    }
}

/// Payload formats a model can consume or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Dcm,
    Jpeg,
    Png,
    Json,
}

impl DataType {
    /// Name as written on the wire and in catalog files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dcm => "DCM",
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Json => "JSON",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Dcm => "application/dicom",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Dcm => "dcm",
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Json => "json",
        }
    }

    /// Inverse of [`DataType::extension`], used to recover the type of a
    /// stored artifact from its name.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "dcm" => Some(Self::Dcm),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unknown data type '{}'", s))
    }
}
