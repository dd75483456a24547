use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::error::EngineError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error from a provisioning target, split by retry classification.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Worth retrying with backoff (rate limits, flaky network).
    #[error("transient target error: {0}")]
    Transient(String),
    /// Retries cannot help; fails the action immediately.
    #[error("{0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// What a provider reports back after create/update: the target-assigned
/// identifier plus the attributes other resources may reference.
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub physical_id: String,
    pub attributes: serde_json::Value,
}

/// One impl per resource type.
///
/// Futures resolve when the target reports a terminal state for the
/// operation; the executor bounds each call with a timeout and handles
/// retries, so impls stay straight-line. Methods return boxed futures for
/// dyn compatibility.
pub trait Provider: Send + Sync {
    /// The type tag this provider handles (e.g. "security_group").
    fn resource_type(&self) -> &str;

    /// Top-level property names that cannot change in place; a diff on one
    /// of these forces replacement instead of update.
    fn replace_on_change(&self) -> &[&str] {
        &[]
    }

    /// Query the target. `Ok(None)` means the resource no longer exists.
    fn describe<'a>(
        &'a self,
        physical_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>, ProviderError>>;

    fn create<'a>(
        &'a self,
        resource_id: &'a str,
        properties: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<ProviderOutput, ProviderError>>;

    fn update<'a>(
        &'a self,
        resource_id: &'a str,
        physical_id: &'a str,
        properties: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<ProviderOutput, ProviderError>>;

    fn delete<'a>(
        &'a self,
        resource_id: &'a str,
        physical_id: &'a str,
    ) -> BoxFuture<'a, Result<(), ProviderError>>;
}

/// Type tag -> provider lookup, shared across workers.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.resource_type().to_string(), provider);
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(resource_type).cloned()
    }

    /// Lookup that turns a missing provider into the validation-class error.
    pub fn require(
        &self,
        resource_id: &str,
        resource_type: &str,
    ) -> Result<Arc<dyn Provider>, EngineError> {
        self.get(resource_type)
            .ok_or_else(|| EngineError::UnknownResourceType {
                resource_id: resource_id.to_string(),
                resource_type: resource_type.to_string(),
            })
    }
}
