//! Task condition evaluation.
//!
//! `ConditionEvaluator` decides whether a single `TaskCondition` holds for a
//! task of a workflow. Expression conditions run through `jexl_eval` with a
//! fixed set of transforms and only `context`, `task` and `workflow` bound:
//! the grammar has property access, comparisons, arithmetic and boolean
//! combinators, and nothing that reaches back into the engine.
//!
//! Evaluation never fails from the caller's point of view. Expression errors
//! are logged and count as `false`.

use serde_json::{Value, json};
use unitflow_types::config::RetryLinkage;
use unitflow_types::workflow::{TaskCondition, TaskStatus, Workflow, WorkflowTask};

use super::definition::EngineError;
use super::retry::RetryHandler;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

impl From<ExpressionError> for EngineError {
    fn from(err: ExpressionError) -> Self {
        EngineError::ConditionEvaluation(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// Evaluates task conditions, with a JEXL evaluator for `expression` kinds.
///
/// Not shared across tasks: build one per scheduling pass.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
    linkage: RetryLinkage,
}

impl ConditionEvaluator {
    /// Create an evaluator with all standard transforms registered.
    pub fn new(linkage: RetryLinkage) -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(subject)), Some(Value::String(search))) => {
                        subject.contains(search.as_str())
                    }
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    (Some(Value::Object(map)), Some(Value::String(key))) => map.contains_key(key),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("defined", |args: &[Value]| {
                Ok(json!(!matches!(args.first(), None | Some(Value::Null))))
            });

        Self { evaluator, linkage }
    }

    /// Whether `condition` holds for `task` in `workflow`.
    ///
    /// Expression failures are logged and evaluate to `false`.
    pub fn evaluate(&self, condition: &TaskCondition, task: &WorkflowTask, workflow: &Workflow) -> bool {
        match self.try_evaluate(condition, task, workflow) {
            Ok(holds) => holds,
            Err(e) => {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    task_id = %task.id,
                    error = %e,
                    "condition evaluation failed, treating as false"
                );
                false
            }
        }
    }

    /// Whether every condition of `task` holds. An empty list holds.
    pub fn all_hold(&self, task: &WorkflowTask, workflow: &Workflow) -> bool {
        task.conditions
            .iter()
            .all(|condition| self.evaluate(condition, task, workflow))
    }

    /// Evaluate a condition, surfacing expression errors.
    pub fn try_evaluate(
        &self,
        condition: &TaskCondition,
        task: &WorkflowTask,
        workflow: &Workflow,
    ) -> Result<bool, EngineError> {
        match condition {
            TaskCondition::TaskSuccess { task_id } => {
                Ok(self.referenced_status_is(workflow, task_id.as_deref(), |s| {
                    s == TaskStatus::Completed
                }))
            }
            TaskCondition::TaskFailure { task_id } => {
                Ok(self.referenced_status_is(workflow, task_id.as_deref(), |s| {
                    s == TaskStatus::Failed
                }))
            }
            TaskCondition::TaskCompletion { task_id } => {
                Ok(self.referenced_status_is(workflow, task_id.as_deref(), |s| {
                    matches!(s, TaskStatus::Completed | TaskStatus::Failed)
                }))
            }
            TaskCondition::Expression { expression } => {
                let scope = json!({
                    "context": workflow.context,
                    "task": task,
                    "workflow": workflow,
                });
                Ok(self.evaluate_bool(expression, &scope)?)
            }
            TaskCondition::StateCondition { path, value } => {
                let resolved = workflow.context.resolve_path(path);
                Ok(match (resolved, value) {
                    (None, _) => false,
                    (Some(found), None) => !found.is_null(),
                    (Some(found), Some(expected)) => strict_equals(found, expected),
                })
            }
            TaskCondition::Always => Ok(true),
        }
    }

    /// Evaluate an expression to a boolean using JavaScript-like truthiness.
    ///
    /// The `scope` must be a JSON object.
    pub fn evaluate_bool(&self, expression: &str, scope: &Value) -> Result<bool, ExpressionError> {
        if !scope.is_object() {
            return Err(ExpressionError::InvalidContext(
                "scope must be a JSON object".to_string(),
            ));
        }
        let result = self
            .evaluator
            .eval_in_context(expression, scope)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;
        Ok(truthy(&result))
    }

    /// A missing `task_id` holds; an id that does not resolve does not.
    fn referenced_status_is(
        &self,
        workflow: &Workflow,
        task_id: Option<&str>,
        matches: impl Fn(TaskStatus) -> bool,
    ) -> bool {
        let Some(task_id) = task_id else {
            return true;
        };
        RetryHandler::resolve(workflow, task_id, self.linkage)
            .map(|t| matches(t.status))
            .unwrap_or(false)
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new(RetryLinkage::default())
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Equality without type coercion; `1` and `1.0` are the same number.
fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
