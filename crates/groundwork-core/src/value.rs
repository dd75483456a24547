use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// A pointer from one resource's property to another resource.
///
/// Without an attribute the reference resolves to the target's physical id;
/// with one it resolves to that named attribute of the created resource.
/// Document shape: `{"$ref": "node"}` or `{"$ref": "node.attribute"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RefRepr", into = "RefRepr")]
pub struct Reference {
    pub node: String,
    pub attribute: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefRepr {
    #[serde(rename = "$ref")]
    target: String,
}

impl From<RefRepr> for Reference {
    fn from(repr: RefRepr) -> Self {
        match repr.target.split_once('.') {
            Some((node, attr)) => Reference {
                node: node.to_string(),
                attribute: Some(attr.to_string()),
            },
            None => Reference {
                node: repr.target,
                attribute: None,
            },
        }
    }
}

impl From<Reference> for RefRepr {
    fn from(r: Reference) -> Self {
        RefRepr { target: r.target() }
    }
}

impl Reference {
    /// The document-form target string, `node` or `node.attribute`.
    pub fn target(&self) -> String {
        match &self.attribute {
            Some(attr) => format!("{}.{attr}", self.node),
            None => self.node.clone(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.target())
    }
}

/// A property value: a tagged variant tree rather than free-form JSON, so
/// references are first-class and resolution is an explicit step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Ref(Reference),
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<PropValue>),
    Map(BTreeMap<String, PropValue>),
}

/// Source of resolved attributes for reference substitution.
///
/// Implemented by the executor over the resources created so far; a
/// reference is only resolvable once its target has been created.
pub trait AttrSource {
    fn physical_id(&self, node: &str) -> Option<String>;
    fn attribute(&self, node: &str, attr: &str) -> Option<Value>;
}

impl PropValue {
    /// Collect every reference in this value tree.
    pub fn references(&self, out: &mut Vec<Reference>) {
        match self {
            PropValue::Ref(r) => out.push(r.clone()),
            PropValue::List(items) => {
                for item in items {
                    item.references(out);
                }
            }
            PropValue::Map(entries) => {
                for value in entries.values() {
                    value.references(out);
                }
            }
            _ => {}
        }
    }

    /// Substitute every reference with its resolved value.
    pub fn resolve(&self, attrs: &dyn AttrSource) -> Result<Value, ValidationError> {
        match self {
            PropValue::Ref(r) => match &r.attribute {
                None => attrs
                    .physical_id(&r.node)
                    .map(Value::String)
                    .ok_or_else(|| ValidationError::Unresolvable {
                        target: r.target(),
                        reason: "resource has not been created".to_string(),
                    }),
                Some(attr) => {
                    attrs
                        .attribute(&r.node, attr)
                        .ok_or_else(|| ValidationError::Unresolvable {
                            target: r.target(),
                            reason: format!("resource reports no attribute {attr:?}"),
                        })
                }
            },
            PropValue::Null => Ok(Value::Null),
            PropValue::Bool(b) => Ok(Value::Bool(*b)),
            PropValue::Number(n) => Ok(Value::Number(n.clone())),
            PropValue::String(s) => Ok(Value::String(s.clone())),
            PropValue::List(items) => {
                let resolved = items
                    .iter()
                    .map(|item| item.resolve(attrs))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(resolved))
            }
            PropValue::Map(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), value.resolve(attrs)?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

/// Resolve a whole property bag into the JSON object handed to providers.
pub fn resolve_properties(
    properties: &BTreeMap<String, PropValue>,
    attrs: &dyn AttrSource,
) -> Result<Value, ValidationError> {
    let mut map = serde_json::Map::with_capacity(properties.len());
    for (key, value) in properties {
        map.insert(key.clone(), value.resolve(attrs)?);
    }
    Ok(Value::Object(map))
}
