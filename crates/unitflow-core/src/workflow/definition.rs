//! Engine error taxonomy and structural validation of task sets.
//!
//! Validation runs before a workflow or template is accepted: task ids must
//! be unique, every dependency and every task-status condition must name a
//! task of the same set, and the dependency graph must be acyclic.

use std::collections::HashSet;

use thiserror::Error;
use unitflow_types::workflow::{TaskBlueprint, TaskCondition, WorkflowStatus, WorkflowTask};
use uuid::Uuid;

use super::dag;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by the workflow engine.
///
/// Task-level variants (`NoExecutorRegistered`, `TaskTimeout`,
/// `TaskExecution`) never escape the engine: they are recorded on the failed
/// task. `ConditionEvaluation` and the persistence variants are logged and
/// degraded. Lookup, validation and transition errors are returned to the
/// caller of the public API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("no executor registered for action '{0}'")]
    NoExecutorRegistered(String),

    #[error("Task timed out after {timeout_ms}ms")]
    TaskTimeout { timeout_ms: u64 },

    #[error("{0}")]
    TaskExecution(String),

    #[error("condition evaluation failed: {0}")]
    ConditionEvaluation(String),

    #[error("failed to load engine state: {0}")]
    PersistenceLoad(String),

    #[error("failed to save engine state: {0}")]
    PersistenceSave(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("cannot {operation} workflow {workflow_id} in status {status}")]
    InvalidTransition {
        workflow_id: Uuid,
        status: WorkflowStatus,
        operation: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// The shape validation needs from a task, regardless of where it lives.
#[derive(Debug, Clone, Copy)]
pub struct TaskShape<'a> {
    pub id: &'a str,
    pub dependencies: &'a [String],
    pub conditions: &'a [TaskCondition],
}

impl<'a> TaskShape<'a> {
    pub fn of_task(task: &'a WorkflowTask) -> Self {
        Self {
            id: &task.id,
            dependencies: &task.dependencies,
            conditions: &task.conditions,
        }
    }

    /// Shape of a blueprint. Blueprints must have been assigned ids first.
    pub fn of_blueprint(blueprint: &'a TaskBlueprint) -> Result<Self, EngineError> {
        let id = blueprint.id.as_deref().ok_or_else(|| {
            EngineError::Validation(format!("task '{}' has no id", blueprint.name))
        })?;
        Ok(Self {
            id,
            dependencies: &blueprint.dependencies,
            conditions: &blueprint.conditions,
        })
    }
}

/// Validate structural constraints on a set of tasks.
///
/// Checks:
/// - No task id is empty
/// - All task ids are unique
/// - Every dependency references a task of the set, and no task depends on itself
/// - Every task-status condition with a `task_id` references a task of the set
/// - The dependency graph has no cycle
pub fn validate_tasks(tasks: &[TaskShape<'_>]) -> Result<(), EngineError> {
    let mut seen_ids = HashSet::new();
    for task in tasks {
        if task.id.is_empty() {
            return Err(EngineError::Validation("task id must not be empty".to_string()));
        }
        if !seen_ids.insert(task.id) {
            return Err(EngineError::Validation(format!(
                "duplicate task ID: '{}'",
                task.id
            )));
        }
    }

    for task in tasks {
        for dep in task.dependencies {
            if dep == task.id {
                return Err(EngineError::Validation(format!(
                    "task '{}' depends on itself",
                    task.id
                )));
            }
            if !seen_ids.contains(dep.as_str()) {
                return Err(EngineError::Validation(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                )));
            }
        }
        for condition in task.conditions {
            if let Some(referenced) = condition.task_id() {
                if !seen_ids.contains(referenced) {
                    return Err(EngineError::Validation(format!(
                        "task '{}' has a condition on unknown task '{}'",
                        task.id, referenced
                    )));
                }
            }
        }
    }

    dag::validate_dag(tasks)
}

/// Validate the tasks of a live workflow.
pub fn validate_workflow_tasks(tasks: &[WorkflowTask]) -> Result<(), EngineError> {
    let shapes: Vec<TaskShape<'_>> = tasks.iter().map(TaskShape::of_task).collect();
    validate_tasks(&shapes)
}

/// Validate template blueprints (ids already assigned).
pub fn validate_blueprints(blueprints: &[TaskBlueprint]) -> Result<(), EngineError> {
    let shapes = blueprints
        .iter()
        .map(TaskShape::of_blueprint)
        .collect::<Result<Vec<_>, _>>()?;
    validate_tasks(&shapes)
}

/// Reject blank workflow/template names.
pub fn validate_name(kind: &str, name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(format!(
            "{kind} name must not be empty"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bp(id: &str, deps: &[&str]) -> TaskBlueprint {
        let mut b = TaskBlueprint::new(id.to_uppercase(), "noop").with_id(id);
        for d in deps {
            b = b.depends_on(*d);
        }
        b
    }

    #[test]
    fn test_valid_diamond() {
        let tasks = vec![
            bp("a", &[]),
            bp("b", &["a"]),
            bp("c", &["a"]),
            bp("d", &["b", "c"]),
        ];
        assert!(validate_blueprints(&tasks).is_ok());
    }

    #[test]
    fn test_empty_set_is_valid() {
        assert!(validate_blueprints(&[]).is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let tasks = vec![bp("a", &[]), bp("a", &[])];
        let err = validate_blueprints(&tasks).unwrap_err();
        assert!(err.to_string().contains("duplicate task ID"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let tasks = vec![bp("a", &["ghost"])];
        let err = validate_blueprints(&tasks).unwrap_err();
        assert!(err.to_string().contains("unknown task 'ghost'"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let tasks = vec![bp("a", &["a"])];
        let err = validate_blueprints(&tasks).unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn test_unknown_condition_reference_rejected() {
        let tasks = vec![bp("a", &[]).with_condition(TaskCondition::TaskSuccess {
            task_id: Some("ghost".to_string()),
        })];
        let err = validate_blueprints(&tasks).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(err.to_string().contains("condition on unknown task"));
    }

    #[test]
    fn test_condition_without_task_id_accepted() {
        let tasks = vec![bp("a", &[]).with_condition(TaskCondition::TaskFailure { task_id: None })];
        assert!(validate_blueprints(&tasks).is_ok());
    }

    #[test]
    fn test_cycle_rejected() {
        let tasks = vec![bp("a", &["c"]), bp("b", &["a"]), bp("c", &["b"])];
        let err = validate_blueprints(&tasks).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_blueprint_without_id_rejected() {
        let tasks = vec![TaskBlueprint::new("Unnamed", "noop")];
        let err = validate_blueprints(&tasks).unwrap_err();
        assert!(err.to_string().contains("has no id"));
    }

    #[test]
    fn test_blank_name_rejected() {
        assert!(validate_name("workflow", "  ").is_err());
        assert!(validate_name("workflow", "review").is_ok());
    }

    #[test]
    fn test_timeout_error_text() {
        let err = EngineError::TaskTimeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "Task timed out after 250ms");
    }
}
