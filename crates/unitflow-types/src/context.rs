//! Shared per-workflow state.
//!
//! `WorkflowContext` wraps a JSON object. Every task and condition of a
//! workflow sees the same context; concurrent writers are expected to use
//! disjoint keys (the engine writes each result under `task_<id>_result`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value bag shared by all tasks of one workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowContext(Map<String, Value>);

impl WorkflowContext {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Insert every entry of `other`; entries of `other` win on conflict.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (key, value) in other {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Resolve a dot-separated path such as `review.approved` or `items.0.id`.
    ///
    /// Returns `None` as soon as a segment is missing or the current value
    /// cannot be descended into. Numeric segments index into arrays.
    pub fn resolve_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Record a task's result under its well-known key.
    pub fn set_task_result(&mut self, task_id: &str, result: Value) {
        self.0.insert(task_result_key(task_id), result);
    }

    pub fn task_result(&self, task_id: &str) -> Option<&Value> {
        self.0.get(&task_result_key(task_id))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for WorkflowContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Context key under which a completed task's result is stored.
pub fn task_result_key(task_id: &str) -> String {
    format!("task_{task_id}_result")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> WorkflowContext {
        match value {
            Value::Object(map) => WorkflowContext::from(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn resolve_nested_path() {
        let c = ctx(json!({ "review": { "approved": true, "score": 7 } }));
        assert_eq!(c.resolve_path("review.approved"), Some(&json!(true)));
        assert_eq!(c.resolve_path("review.score"), Some(&json!(7)));
        assert_eq!(c.resolve_path("review"), Some(&json!({ "approved": true, "score": 7 })));
    }

    #[test]
    fn resolve_missing_or_non_object_segment() {
        let c = ctx(json!({ "a": { "b": 1 }, "s": "text" }));
        assert_eq!(c.resolve_path("missing"), None);
        assert_eq!(c.resolve_path("a.c"), None);
        assert_eq!(c.resolve_path("a.b.c"), None);
        assert_eq!(c.resolve_path("s.len"), None);
    }

    #[test]
    fn resolve_array_index() {
        let c = ctx(json!({ "items": [{ "id": "x" }, { "id": "y" }] }));
        assert_eq!(c.resolve_path("items.1.id"), Some(&json!("y")));
        assert_eq!(c.resolve_path("items.5.id"), None);
        assert_eq!(c.resolve_path("items.first"), None);
    }

    #[test]
    fn merge_overrides_existing_keys() {
        let mut c = ctx(json!({ "a": 1, "b": 2 }));
        let other = match json!({ "b": 3, "c": 4 }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        c.merge(&other);
        assert_eq!(c.get("a"), Some(&json!(1)));
        assert_eq!(c.get("b"), Some(&json!(3)));
        assert_eq!(c.get("c"), Some(&json!(4)));
    }

    #[test]
    fn task_result_key_convention() {
        let mut c = WorkflowContext::new();
        c.set_task_result("abc", json!({ "ok": true }));
        assert!(c.contains_key("task_abc_result"));
        assert_eq!(c.task_result("abc"), Some(&json!({ "ok": true })));
    }

    #[test]
    fn serializes_as_plain_object() {
        let c = ctx(json!({ "k": "v" }));
        assert_eq!(serde_json::to_value(&c).unwrap(), json!({ "k": "v" }));
    }
}
