//! Simulated provisioning target.
//!
//! Backs the CLI and integration tests: resources live in an in-memory
//! table, physical ids are deterministic, and attributes echo the resolved
//! properties plus the assigned id. No real API calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::provider::{BoxFuture, Provider, ProviderError, ProviderOutput};

pub struct SimProvider {
    resource_type: String,
    replace_on_change: Vec<&'static str>,
    resources: Mutex<HashMap<String, Value>>,
    counter: AtomicU64,
}

impl SimProvider {
    pub fn new(resource_type: impl Into<String>) -> Self {
        SimProvider {
            resource_type: resource_type.into(),
            replace_on_change: Vec::new(),
            resources: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Mark top-level properties as not updatable in place.
    pub fn with_replace_on_change(mut self, fields: Vec<&'static str>) -> Self {
        self.replace_on_change = fields;
        self
    }

    fn next_physical_id(&self, resource_id: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{resource_id}-{n:04}", self.resource_type)
    }

    fn attributes(physical_id: &str, properties: &Value) -> Value {
        let mut attrs = match properties {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        attrs.insert("id".to_string(), json!(physical_id));
        Value::Object(attrs)
    }
}

impl Provider for SimProvider {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn replace_on_change(&self) -> &[&str] {
        &self.replace_on_change
    }

    fn describe<'a>(
        &'a self,
        physical_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>, ProviderError>> {
        Box::pin(async move {
            let resources = self
                .resources
                .lock()
                .map_err(|_| ProviderError::Fatal("sim table poisoned".into()))?;
            Ok(resources.get(physical_id).cloned())
        })
    }

    fn create<'a>(
        &'a self,
        resource_id: &'a str,
        properties: &'a Value,
    ) -> BoxFuture<'a, Result<ProviderOutput, ProviderError>> {
        Box::pin(async move {
            let physical_id = self.next_physical_id(resource_id);
            let attributes = Self::attributes(&physical_id, properties);
            self.resources
                .lock()
                .map_err(|_| ProviderError::Fatal("sim table poisoned".into()))?
                .insert(physical_id.clone(), attributes.clone());
            tracing::debug!(
                resource_type = %self.resource_type,
                physical_id = %physical_id,
                "sim resource created"
            );
            Ok(ProviderOutput {
                physical_id,
                attributes,
            })
        })
    }

    fn update<'a>(
        &'a self,
        _resource_id: &'a str,
        physical_id: &'a str,
        properties: &'a Value,
    ) -> BoxFuture<'a, Result<ProviderOutput, ProviderError>> {
        Box::pin(async move {
            let attributes = Self::attributes(physical_id, properties);
            let mut resources = self
                .resources
                .lock()
                .map_err(|_| ProviderError::Fatal("sim table poisoned".into()))?;
            if !resources.contains_key(physical_id) {
                return Err(ProviderError::Fatal(format!(
                    "no such resource: {physical_id}"
                )));
            }
            resources.insert(physical_id.to_string(), attributes.clone());
            Ok(ProviderOutput {
                physical_id: physical_id.to_string(),
                attributes,
            })
        })
    }

    fn delete<'a>(
        &'a self,
        _resource_id: &'a str,
        physical_id: &'a str,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            self.resources
                .lock()
                .map_err(|_| ProviderError::Fatal("sim table poisoned".into()))?
                .remove(physical_id);
            tracing::debug!(
                resource_type = %self.resource_type,
                physical_id = %physical_id,
                "sim resource deleted"
            );
            Ok(())
        })
    }
}
