use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key/value pair from the legacy (XML) metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyMetadataEntry {
    pub key: String,
    pub value: String,
    /// Set by the system on objects that inherit metadata from a parent.
    pub inherited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetadataType {
    String,
    Number,
    Boolean,
}

impl MetadataType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataType::String => "String",
            MetadataType::Number => "Number",
            MetadataType::Boolean => "Boolean",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "String" | "MetadataStringValue" => Some(MetadataType::String),
            "Number" | "MetadataNumberValue" => Some(MetadataType::Number),
            "Boolean" | "MetadataBooleanValue" => Some(MetadataType::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetadataDomain {
    Tenant,
    Provider,
}

impl MetadataDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataDomain::Tenant => "TENANT",
            MetadataDomain::Provider => "PROVIDER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "TENANT" => Some(MetadataDomain::Tenant),
            "PROVIDER" => Some(MetadataDomain::Provider),
            _ => None,
        }
    }
}

/// Typed metadata entry from the OpenAPI endpoint.
///
/// `value` is JSON-typed: numbers come back as floating point, booleans as JSON
/// booleans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub id: Option<String>,
    pub etag: Option<String>,
    pub namespace: String,
    pub key: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub ty: MetadataType,
    pub domain: MetadataDomain,
    pub readonly: bool,
    pub persistent: bool,
}
