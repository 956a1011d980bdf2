//! Workflow domain types for unitflow.
//!
//! Three families of types live here:
//! - **Blueprints:** `TaskBlueprint`, `WorkflowTemplate`, `TemplateBlueprint`,
//!   `TemplateUpdate`, `WorkflowSpec` -- shapes without runtime state.
//! - **Live instances:** `Workflow` and `WorkflowTask`, the aggregates the
//!   scheduler mutates and the engine persists.
//! - **Execution I/O:** `TaskCondition`, `TaskExecutionResult`,
//!   `WorkflowExecutionOptions`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::WorkflowContext;

/// Metadata key on a retry attempt pointing at the attempt it replaces.
pub const META_ORIGINAL_TASK_ID: &str = "original_task_id";

/// Metadata key on a retry attempt holding its 1-based retry counter.
pub const META_RETRY_COUNT: &str = "retry_count";

/// Metadata key on a failed attempt pointing at the retry spawned for it.
pub const META_RETRIED_BY: &str = "retried_by";

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Once terminal, the scheduler never dispatches another task.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A gate on task execution. All conditions of a task must hold for it to run.
///
/// Internally tagged by `type`:
/// ```json
/// { "type": "task_success", "task_id": "fetch" }
/// { "type": "expression", "expression": "context.score > 5" }
/// { "type": "state_condition", "path": "review.approved", "value": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskCondition {
    /// Referenced task completed successfully.
    TaskSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    /// Referenced task failed.
    TaskFailure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    /// Referenced task finished, successfully or not.
    TaskCompletion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    /// JEXL expression over `context`, `task` and `workflow`.
    Expression { expression: String },
    /// Dot-separated path into the workflow context, optionally compared to `value`.
    StateCondition {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// Always true.
    Always,
}

impl TaskCondition {
    /// The task this condition refers to, for the task-status kinds.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskCondition::TaskSuccess { task_id }
            | TaskCondition::TaskFailure { task_id }
            | TaskCondition::TaskCompletion { task_id } => task_id.as_deref(),
            _ => None,
        }
    }

    /// Mutable access to the referenced task id (used for id remapping).
    pub fn task_id_mut(&mut self) -> Option<&mut String> {
        match self {
            TaskCondition::TaskSuccess { task_id }
            | TaskCondition::TaskFailure { task_id }
            | TaskCondition::TaskCompletion { task_id } => task_id.as_mut(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Task blueprint and live task
// ---------------------------------------------------------------------------

/// A task without runtime fields, as stored in templates and workflow specs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBlueprint {
    /// Template-local (or caller-chosen) id. Assigned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human-readable name; executors see dependency results keyed by it.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Organizational unit responsible for the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    /// Executor registry key.
    pub action: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<TaskCondition>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Remaining retry budget.
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl TaskBlueprint {
    /// Minimal blueprint: a named task bound to an action.
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            unit_id: None,
            action: action.into(),
            parameters: Map::new(),
            dependencies: Vec::new(),
            conditions: Vec::new(),
            timeout_ms: None,
            retries: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }

    pub fn with_condition(mut self, condition: TaskCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// A unit of work inside a live workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Unique within the owning workflow.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<TaskCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Context keys this task wrote on success, besides its result key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Dependency tasks keyed by task name, filled in just before execution.
    /// Never persisted.
    #[serde(skip)]
    pub dependency_results: HashMap<String, WorkflowTask>,
}

impl WorkflowTask {
    /// Instantiate a pending task from a blueprint under the given id.
    pub fn from_blueprint(blueprint: &TaskBlueprint, id: String) -> Self {
        Self {
            id,
            name: blueprint.name.clone(),
            description: blueprint.description.clone(),
            unit_id: blueprint.unit_id.clone(),
            action: blueprint.action.clone(),
            parameters: blueprint.parameters.clone(),
            dependencies: blueprint.dependencies.clone(),
            conditions: blueprint.conditions.clone(),
            timeout_ms: blueprint.timeout_ms,
            retries: blueprint.retries,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            output: None,
            start_time: None,
            end_time: None,
            metadata: blueprint.metadata.clone(),
            dependency_results: HashMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Id of the attempt this task retries, if it is a retry.
    pub fn original_task_id(&self) -> Option<&str> {
        self.metadata.get(META_ORIGINAL_TASK_ID).and_then(Value::as_str)
    }

    /// Id of the retry spawned for this task, if any.
    pub fn retried_by(&self) -> Option<&str> {
        self.metadata.get(META_RETRIED_BY).and_then(Value::as_str)
    }

    /// How many retries precede this attempt (0 for a first attempt).
    pub fn retry_count(&self) -> u64 {
        self.metadata
            .get(META_RETRY_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// An executable workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    pub status: WorkflowStatus,
    pub tasks: Vec<WorkflowTask>,
    /// Shared key/value state visible to every task and condition.
    #[serde(default)]
    pub context: WorkflowContext,
    /// Template this workflow was instantiated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn task(&self, task_id: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut WorkflowTask> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Look up a task by its human-readable name (first match).
    pub fn task_by_name(&self, name: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Count tasks per status, for summaries.
    pub fn task_counts(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for task in &self.tasks {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A reusable, versioned workflow blueprint.
///
/// Changing `version` through the engine never mutates an existing template:
/// it produces a new template under a fresh id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    pub tasks: Vec<TaskBlueprint>,
    /// Default workflow context.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Input for creating a template: everything except the id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateBlueprint {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    pub tasks: Vec<TaskBlueprint>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Partial update for a template. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskBlueprint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TemplateUpdate {
    /// Copy every provided field onto `template`.
    pub fn apply_to(&self, template: &mut WorkflowTemplate) {
        if let Some(name) = &self.name {
            template.name = name.clone();
        }
        if let Some(description) = &self.description {
            template.description = Some(description.clone());
        }
        if let Some(version) = &self.version {
            template.version = version.clone();
        }
        if let Some(tasks) = &self.tasks {
            template.tasks = tasks.clone();
        }
        if let Some(variables) = &self.variables {
            template.variables = variables.clone();
        }
        if let Some(author) = &self.author {
            template.author = Some(author.clone());
        }
        if let Some(metadata) = &self.metadata {
            template.metadata = metadata.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow creation inputs
// ---------------------------------------------------------------------------

/// A workflow supplied directly rather than sourced from a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    pub tasks: Vec<TaskBlueprint>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>, tasks: Vec<TaskBlueprint>) -> Self {
        Self {
            name: name.into(),
            description: None,
            version: "1.0.0".to_string(),
            tasks,
            context: Map::new(),
            template_id: None,
            owner: None,
            metadata: Map::new(),
        }
    }
}

/// Options applied when a workflow is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionOptions {
    /// Start the workflow immediately after creation.
    #[serde(default)]
    pub auto_start: bool,
    /// Merged over template variables / spec context; these win on conflict.
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl WorkflowExecutionOptions {
    pub fn auto_start() -> Self {
        Self {
            auto_start: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Task execution result
// ---------------------------------------------------------------------------

/// What an executor reports back for a single task attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extra keys merged into the workflow context when the task succeeds.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context_updates: Map<String, Value>,
}

impl TaskExecutionResult {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            ..Self::default()
        }
    }

    /// Successful attempt with no result payload.
    pub fn done() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_context_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());

        assert!(!WorkflowStatus::Paused.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
    }

    #[test]
    fn condition_json_shape() {
        let cond: TaskCondition =
            serde_json::from_value(json!({ "type": "task_success", "task_id": "fetch" })).unwrap();
        assert_eq!(cond.task_id(), Some("fetch"));

        let cond: TaskCondition = serde_json::from_value(json!({ "type": "always" })).unwrap();
        assert_eq!(cond, TaskCondition::Always);

        let cond: TaskCondition = serde_json::from_value(
            json!({ "type": "state_condition", "path": "review.approved", "value": true }),
        )
        .unwrap();
        assert!(matches!(
            cond,
            TaskCondition::StateCondition { value: Some(Value::Bool(true)), .. }
        ));

        let cond: TaskCondition = serde_json::from_value(json!({ "type": "task_failure" })).unwrap();
        assert_eq!(cond.task_id(), None);
    }

    #[test]
    fn task_id_mut_only_for_status_conditions() {
        let mut cond = TaskCondition::TaskCompletion {
            task_id: Some("a".to_string()),
        };
        *cond.task_id_mut().unwrap() = "b".to_string();
        assert_eq!(cond.task_id(), Some("b"));

        let mut expr = TaskCondition::Expression {
            expression: "true".to_string(),
        };
        assert!(expr.task_id_mut().is_none());
    }

    #[test]
    fn task_from_blueprint_is_pending() {
        let bp = TaskBlueprint::new("Fetch", "http.get")
            .with_id("fetch")
            .with_retries(2)
            .with_timeout_ms(500);
        let task = WorkflowTask::from_blueprint(&bp, "new-id".to_string());
        assert_eq!(task.id, "new-id");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retries, 2);
        assert_eq!(task.timeout_ms, Some(500));
        assert!(task.start_time.is_none());
        assert_eq!(task.retry_count(), 0);
    }

    #[test]
    fn dependency_results_are_not_persisted() {
        let bp = TaskBlueprint::new("B", "noop");
        let mut task = WorkflowTask::from_blueprint(&bp, "b".to_string());
        let dep = WorkflowTask::from_blueprint(&TaskBlueprint::new("A", "noop"), "a".to_string());
        task.dependency_results.insert("A".to_string(), dep);

        let value = serde_json::to_value(&task).unwrap();
        assert!(value.get("dependency_results").is_none());
        let back: WorkflowTask = serde_json::from_value(value).unwrap();
        assert!(back.dependency_results.is_empty());
    }

    #[test]
    fn template_update_applies_only_present_fields() {
        let mut template = WorkflowTemplate {
            id: Uuid::now_v7(),
            name: "review".to_string(),
            description: None,
            version: "1.0".to_string(),
            tasks: vec![],
            variables: Map::new(),
            author: None,
            metadata: Map::new(),
            created_at: Utc::now(),
            updated_at: None,
        };
        let update = TemplateUpdate {
            description: Some("x".to_string()),
            ..TemplateUpdate::default()
        };
        update.apply_to(&mut template);
        assert_eq!(template.description.as_deref(), Some("x"));
        assert_eq!(template.name, "review");
        assert_eq!(template.version, "1.0");
    }

    #[test]
    fn execution_result_constructors() {
        let ok = TaskExecutionResult::success(json!({"rows": 3}))
            .with_context_update("rows", json!(3));
        assert!(ok.success);
        assert_eq!(ok.context_updates.get("rows"), Some(&json!(3)));

        let err = TaskExecutionResult::failure("boom");
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }

    #[test]
    fn status_display_is_snake_case() {
        assert_eq!(TaskStatus::Skipped.to_string(), "skipped");
        assert_eq!(WorkflowStatus::Paused.to_string(), "paused");
        assert_eq!(
            serde_json::to_value(WorkflowStatus::Completed).unwrap(),
            json!("completed")
        );
    }
}
