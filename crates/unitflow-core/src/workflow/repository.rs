//! Live workflow state and its persistence.
//!
//! `WorkflowRepository` owns every workflow aggregate and the active set.
//! `StatePersister` writes the whole repository as one blob
//! (`{workflows, active_workflows}`) under a single key of a `KvStore`,
//! overwriting it on every mutation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use unitflow_types::workflow::{Workflow, WorkflowStatus};
use uuid::Uuid;

use super::definition::EngineError;
use super::scheduler::reset_interrupted;
use crate::storage::KvStore;

/// Serialized form of the engine state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub active_workflows: Vec<Uuid>,
}

/// All workflows known to one engine, plus the ids eligible for scheduling.
///
/// Keyed by UUID v7, so iteration follows creation order.
#[derive(Debug, Default)]
pub struct WorkflowRepository {
    workflows: BTreeMap<Uuid, Workflow>,
    active: BTreeSet<Uuid>,
}

impl WorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, workflow: Workflow) {
        self.workflows.insert(workflow.id, workflow);
    }

    pub fn get(&self, id: Uuid) -> Option<&Workflow> {
        self.workflows.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Workflow> {
        self.workflows.get_mut(&id)
    }

    /// Lookup that fails with `WorkflowNotFound`.
    pub fn require_mut(&mut self, id: Uuid) -> Result<&mut Workflow, EngineError> {
        self.workflows
            .get_mut(&id)
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    pub fn all(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn activate(&mut self, id: Uuid) {
        self.active.insert(id);
    }

    pub fn deactivate(&mut self, id: Uuid) {
        self.active.remove(&id);
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.active.contains(&id)
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.active.iter().copied().collect()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            workflows: self.workflows.values().cloned().collect(),
            active_workflows: self.active_ids(),
        }
    }

    /// Rebuild from a snapshot. Active ids without a workflow are dropped.
    pub fn from_snapshot(snapshot: EngineSnapshot) -> Self {
        let workflows: BTreeMap<Uuid, Workflow> = snapshot
            .workflows
            .into_iter()
            .map(|w| (w.id, w))
            .collect();
        let active = snapshot
            .active_workflows
            .into_iter()
            .filter(|id| workflows.contains_key(id))
            .collect();
        Self { workflows, active }
    }

    /// Prepare restored state for scheduling after a restart.
    ///
    /// Tasks left `running` by the previous process lost their executor and
    /// go back to `pending`, in paused workflows too. Returns the active
    /// workflows that are `running` and should re-enter the scheduler.
    pub fn recover(&mut self) -> Vec<Uuid> {
        let mut resumable = Vec::new();
        for (id, workflow) in self.workflows.iter_mut() {
            let reset = reset_interrupted(workflow);
            if reset > 0 {
                tracing::info!(workflow_id = %id, tasks = reset, "reset interrupted tasks to pending");
            }
            if workflow.status == WorkflowStatus::Running && self.active.contains(id) {
                resumable.push(*id);
            }
        }
        resumable
    }
}

/// Reads and writes the engine snapshot through a `KvStore`.
pub struct StatePersister<S> {
    store: S,
    key: String,
}

impl<S: KvStore> StatePersister<S> {
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the persisted snapshot, `None` when nothing was saved yet.
    pub async fn load(&self) -> Result<Option<EngineSnapshot>, EngineError> {
        let value = self
            .store
            .get(&self.key)
            .await
            .map_err(|e| EngineError::PersistenceLoad(e.to_string()))?;
        match value {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| EngineError::PersistenceLoad(e.to_string())),
        }
    }

    /// Overwrite the persisted snapshot.
    pub async fn save(&self, repository: &WorkflowRepository) -> Result<(), EngineError> {
        let value = serde_json::to_value(repository.snapshot())
            .map_err(|e| EngineError::PersistenceSave(e.to_string()))?;
        self.store
            .set(&self.key, &value)
            .await
            .map_err(|e| EngineError::PersistenceSave(e.to_string()))?;
        tracing::debug!(key = %self.key, workflows = repository.len(), "saved engine state");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
