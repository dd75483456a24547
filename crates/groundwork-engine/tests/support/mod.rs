//! Scripted provider for engine tests: records every call and fails on
//! demand, per resource id.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use groundwork_engine::provider::BoxFuture;
use groundwork_engine::{Provider, ProviderError, ProviderOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(String),
    Update(String),
    Delete(String),
}

#[derive(Debug)]
pub enum FailPlan {
    Fatal,
    /// Fail transiently this many times, then succeed.
    Transient(u32),
    /// Never reach a terminal state.
    Hang,
}

#[derive(Default)]
pub struct ScriptedProvider {
    resource_type: String,
    replace_on_change: Vec<&'static str>,
    events: Arc<Mutex<Vec<Event>>>,
    create_failures: Mutex<HashMap<String, FailPlan>>,
    update_failures: Mutex<HashMap<String, FailPlan>>,
    delete_failures: Mutex<HashMap<String, FailPlan>>,
    counter: AtomicU64,
}

impl ScriptedProvider {
    pub fn new(resource_type: &str, events: Arc<Mutex<Vec<Event>>>) -> Self {
        ScriptedProvider {
            resource_type: resource_type.to_string(),
            events,
            ..ScriptedProvider::default()
        }
    }

    pub fn with_replace_on_change(mut self, fields: Vec<&'static str>) -> Self {
        self.replace_on_change = fields;
        self
    }

    pub fn fail_create(self, resource_id: &str, plan: FailPlan) -> Self {
        self.create_failures
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), plan);
        self
    }

    pub fn fail_update(self, resource_id: &str, plan: FailPlan) -> Self {
        self.update_failures
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), plan);
        self
    }

    pub fn fail_delete(self, resource_id: &str, plan: FailPlan) -> Self {
        self.delete_failures
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), plan);
        self
    }

    async fn check(
        failures: &Mutex<HashMap<String, FailPlan>>,
        resource_id: &str,
    ) -> Result<(), ProviderError> {
        enum Verdict {
            Ok,
            Fatal,
            Transient,
            Hang,
        }
        let verdict = {
            let mut failures = failures.lock().unwrap();
            match failures.get_mut(resource_id) {
                None => Verdict::Ok,
                Some(FailPlan::Fatal) => Verdict::Fatal,
                Some(FailPlan::Hang) => Verdict::Hang,
                Some(FailPlan::Transient(remaining)) => {
                    if *remaining == 0 {
                        Verdict::Ok
                    } else {
                        *remaining -= 1;
                        Verdict::Transient
                    }
                }
            }
        };
        match verdict {
            Verdict::Ok => Ok(()),
            Verdict::Fatal => Err(ProviderError::Fatal(format!(
                "scripted fatal error for {resource_id}"
            ))),
            Verdict::Transient => Err(ProviderError::Transient(format!(
                "scripted transient error for {resource_id}"
            ))),
            Verdict::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hang plan never completes")
            }
        }
    }

    fn output(&self, resource_id: &str, properties: &Value) -> ProviderOutput {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let physical_id = format!("{}-{resource_id}-{n}", self.resource_type);
        let mut attrs = match properties {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        attrs.insert("id".to_string(), json!(physical_id));
        ProviderOutput {
            physical_id,
            attributes: Value::Object(attrs),
        }
    }
}

impl Provider for ScriptedProvider {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn replace_on_change(&self) -> &[&str] {
        &self.replace_on_change
    }

    fn describe<'a>(
        &'a self,
        _physical_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>, ProviderError>> {
        Box::pin(async { Ok(None) })
    }

    fn create<'a>(
        &'a self,
        resource_id: &'a str,
        properties: &'a Value,
    ) -> BoxFuture<'a, Result<ProviderOutput, ProviderError>> {
        Box::pin(async move {
            self.events
                .lock()
                .unwrap()
                .push(Event::Create(resource_id.to_string()));
            Self::check(&self.create_failures, resource_id).await?;
            Ok(self.output(resource_id, properties))
        })
    }

    fn update<'a>(
        &'a self,
        resource_id: &'a str,
        physical_id: &'a str,
        properties: &'a Value,
    ) -> BoxFuture<'a, Result<ProviderOutput, ProviderError>> {
        Box::pin(async move {
            self.events
                .lock()
                .unwrap()
                .push(Event::Update(resource_id.to_string()));
            Self::check(&self.update_failures, resource_id).await?;
            let mut attrs = match properties {
                Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            attrs.insert("id".to_string(), json!(physical_id));
            Ok(ProviderOutput {
                physical_id: physical_id.to_string(),
                attributes: Value::Object(attrs),
            })
        })
    }

    fn delete<'a>(
        &'a self,
        resource_id: &'a str,
        _physical_id: &'a str,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            self.events
                .lock()
                .unwrap()
                .push(Event::Delete(resource_id.to_string()));
            Self::check(&self.delete_failures, resource_id).await
        })
    }
}
