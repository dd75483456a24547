use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::PropValue;

/// A declarative document: named resource declarations plus parameters and
/// outputs. Parsed from YAML (JSON is a YAML subset and parses too).
///
/// Resource ids are map keys, so they are unique by construction. Document
/// position carries no ordering semantics; execution order comes from the
/// dependency graph alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document identity; keys the persisted state snapshot.
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDecl>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, PropValue>,
}

/// One resource declaration inside a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Explicit dependencies; implicit ones come from `$ref` values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropValue>,
}

impl Document {
    pub fn from_str(text: &str) -> Result<Self, ValidationError> {
        let document: Document = serde_yaml::from_str(text)?;
        document.validate_name()?;
        Ok(document)
    }

    pub fn from_path(path: &Path) -> Result<Self, ValidationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// The name keys a state file on disk, so restrict it to path-safe
    /// characters.
    fn validate_name(&self) -> Result<(), ValidationError> {
        let ok = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !self.name.starts_with('.');
        if ok {
            Ok(())
        } else {
            Err(ValidationError::InvalidName(self.name.clone()))
        }
    }
}
