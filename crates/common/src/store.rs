//! Persistence seams consumed by the execution engine

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Execution, Scenario, Step};
use crate::{Error, Result};

/// Read access to scenarios plus the one write the engine performs:
/// replacing a scenario's step list after metadata learning.
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn get_scenario(&self, id: &str) -> Result<Option<Scenario>>;

    async fn update_steps(&self, id: &str, steps: &[Step]) -> Result<()>;
}

/// Sink for finished execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, execution: &Execution) -> Result<()>;
}

/// Process-local store, used for tests and embedded runs
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    scenarios: HashMap<String, Scenario>,
    executions: Vec<Execution>,
    step_updates: HashMap<String, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_scenario(&self, scenario: Scenario) {
        self.inner.write().scenarios.insert(scenario.id.clone(), scenario);
    }

    pub fn scenario(&self, id: &str) -> Option<Scenario> {
        self.inner.read().scenarios.get(id).cloned()
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.inner.read().executions.clone()
    }

    /// Number of times `update_steps` has been applied to a scenario
    pub fn step_update_count(&self, id: &str) -> usize {
        self.inner.read().step_updates.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ScenarioStore for MemoryStore {
    async fn get_scenario(&self, id: &str) -> Result<Option<Scenario>> {
        Ok(self.scenario(id))
    }

    async fn update_steps(&self, id: &str, steps: &[Step]) -> Result<()> {
        let mut inner = self.inner.write();
        let scenario = inner
            .scenarios
            .get_mut(id)
            .ok_or_else(|| Error::not_found("scenario", id))?;
        scenario.steps = steps.to_vec();
        *inner.step_updates.entry(id.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        self.inner.write().executions.push(execution.clone());
        Ok(())
    }
}
