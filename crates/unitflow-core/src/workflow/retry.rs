//! Retry spawning and retry-chain resolution.
//!
//! A failed task with a remaining budget is never re-run in place. Instead a
//! fresh attempt is appended to the workflow, linked to the failed one in
//! both directions through task metadata:
//! - the new attempt carries `original_task_id` and `retry_count`
//! - the failed attempt carries `retried_by`
//!
//! Under `RetryLinkage::LatestAttempt`, references to a task id follow the
//! `retried_by` links to the newest attempt.

use serde_json::Value;
use unitflow_types::config::RetryLinkage;
use unitflow_types::workflow::{
    META_ORIGINAL_TASK_ID, META_RETRIED_BY, META_RETRY_COUNT, TaskStatus, Workflow, WorkflowTask,
};
use uuid::Uuid;

/// Stateless retry logic for task failures.
pub struct RetryHandler;

impl RetryHandler {
    /// A failed task is retried while it still has budget.
    pub fn should_retry(task: &WorkflowTask) -> bool {
        task.retries > 0
    }

    /// Build the next attempt for `failed`.
    ///
    /// The attempt gets a fresh id, one less retry, and a pending status.
    /// Action, parameters, dependencies, conditions and timeout are copied.
    pub fn build_retry(failed: &WorkflowTask) -> WorkflowTask {
        let mut metadata = failed.metadata.clone();
        metadata.remove(META_RETRIED_BY);
        metadata.insert(
            META_ORIGINAL_TASK_ID.to_string(),
            Value::String(failed.id.clone()),
        );
        metadata.insert(
            META_RETRY_COUNT.to_string(),
            Value::from(failed.retry_count() + 1),
        );

        WorkflowTask {
            id: Uuid::now_v7().to_string(),
            name: format!("{} (Retry)", failed.name),
            description: failed.description.clone(),
            unit_id: failed.unit_id.clone(),
            action: failed.action.clone(),
            parameters: failed.parameters.clone(),
            dependencies: failed.dependencies.clone(),
            conditions: failed.conditions.clone(),
            timeout_ms: failed.timeout_ms,
            retries: failed.retries.saturating_sub(1),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            output: None,
            start_time: None,
            end_time: None,
            metadata,
            dependency_results: Default::default(),
        }
    }

    /// Record on `failed` which attempt replaced it.
    pub fn link(failed: &mut WorkflowTask, retry_id: &str) {
        failed.metadata.insert(
            META_RETRIED_BY.to_string(),
            Value::String(retry_id.to_string()),
        );
    }

    /// Whether a newer attempt exists for this task.
    pub fn is_superseded(task: &WorkflowTask) -> bool {
        task.retried_by().is_some()
    }

    /// Resolve a task reference according to the linkage policy.
    ///
    /// With `LatestAttempt` the `retried_by` chain is followed to its end.
    /// A broken link stops at the last attempt that exists.
    pub fn resolve<'a>(
        workflow: &'a Workflow,
        task_id: &str,
        linkage: RetryLinkage,
    ) -> Option<&'a WorkflowTask> {
        let mut current = workflow.task(task_id)?;
        if linkage == RetryLinkage::OriginalOnly {
            return Some(current);
        }
        // Each hop lands on a distinct, newer task; the bound only guards
        // against hand-edited state with a loop in it.
        for _ in 0..workflow.tasks.len() {
            match current.retried_by().and_then(|next| workflow.task(next)) {
                Some(next) => current = next,
                None => break,
            }
        }
        Some(current)
    }

    /// Id of the first attempt in `task_id`'s retry chain, following
    /// `original_task_id` backwards.
    pub fn root_id<'a>(workflow: &'a Workflow, task_id: &'a str) -> &'a str {
        let mut current = task_id;
        for _ in 0..workflow.tasks.len() {
            match workflow
                .task(current)
                .and_then(|t| t.original_task_id())
                .filter(|prev| workflow.task(prev).is_some())
            {
                Some(prev) => current = prev,
                None => break,
            }
        }
        current
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use unitflow_types::context::WorkflowContext;
    use unitflow_types::workflow::{TaskBlueprint, WorkflowStatus};

    fn failed_task(retries: u32) -> WorkflowTask {
        let bp = TaskBlueprint::new("Fetch", "http.get")
            .with_retries(retries)
            .with_timeout_ms(100)
            .depends_on("root");
        let mut task = WorkflowTask::from_blueprint(&bp, "fetch".to_string());
        task.status = TaskStatus::Failed;
        task.error = Some("boom".to_string());
        task.start_time = Some(Utc::now());
        task.end_time = Some(Utc::now());
        task
    }

    fn workflow(tasks: Vec<WorkflowTask>) -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            name: "wf".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            status: WorkflowStatus::Running,
            tasks,
            context: WorkflowContext::new(),
            template_id: None,
            owner: None,
            metadata: Default::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_should_retry_uses_budget() {
        assert!(RetryHandler::should_retry(&failed_task(1)));
        assert!(!RetryHandler::should_retry(&failed_task(0)));
    }

    #[test]
    fn test_build_retry_copies_work_and_resets_runtime() {
        let original = failed_task(2);
        let retry = RetryHandler::build_retry(&original);

        assert_ne!(retry.id, original.id);
        assert_eq!(retry.name, "Fetch (Retry)");
        assert_eq!(retry.action, "http.get");
        assert_eq!(retry.dependencies, vec!["root".to_string()]);
        assert_eq!(retry.timeout_ms, Some(100));
        assert_eq!(retry.retries, 1);
        assert_eq!(retry.status, TaskStatus::Pending);
        assert!(retry.error.is_none());
        assert!(retry.start_time.is_none());
        assert_eq!(retry.original_task_id(), Some("fetch"));
        assert_eq!(retry.retry_count(), 1);
    }

    #[test]
    fn test_retry_count_increments_along_chain() {
        let first = failed_task(2);
        let mut second = RetryHandler::build_retry(&first);
        second.status = TaskStatus::Failed;
        RetryHandler::link(&mut second, "later");
        let third = RetryHandler::build_retry(&second);
        assert_eq!(third.retry_count(), 2);
        assert_eq!(third.original_task_id(), Some(second.id.as_str()));
        assert!(third.retried_by().is_none());
    }

    #[test]
    fn test_resolve_follows_chain_only_for_latest_attempt() {
        let mut original = failed_task(1);
        let retry = RetryHandler::build_retry(&original);
        RetryHandler::link(&mut original, &retry.id);
        let retry_id = retry.id.clone();
        let wf = workflow(vec![original, retry]);

        let latest = RetryHandler::resolve(&wf, "fetch", RetryLinkage::LatestAttempt).unwrap();
        assert_eq!(latest.id, retry_id);

        let original = RetryHandler::resolve(&wf, "fetch", RetryLinkage::OriginalOnly).unwrap();
        assert_eq!(original.id, "fetch");
        assert!(RetryHandler::is_superseded(original));

        assert!(RetryHandler::resolve(&wf, "missing", RetryLinkage::LatestAttempt).is_none());
    }

    #[test]
    fn test_root_id_walks_back_to_first_attempt() {
        let mut first = failed_task(2);
        let mut second = RetryHandler::build_retry(&first);
        RetryHandler::link(&mut first, &second.id);
        second.status = TaskStatus::Failed;
        let third = RetryHandler::build_retry(&second);
        RetryHandler::link(&mut second, &third.id);
        let (second_id, third_id) = (second.id.clone(), third.id.clone());
        let wf = workflow(vec![first, second, third]);

        assert_eq!(RetryHandler::root_id(&wf, &third_id), "fetch");
        assert_eq!(RetryHandler::root_id(&wf, &second_id), "fetch");
        assert_eq!(RetryHandler::root_id(&wf, "fetch"), "fetch");
    }

    #[test]
    fn test_resolve_tolerates_loops() {
        let mut a = failed_task(0);
        a.id = "a".to_string();
        RetryHandler::link(&mut a, "b");
        let mut b = failed_task(0);
        b.id = "b".to_string();
        RetryHandler::link(&mut b, "a");
        let wf = workflow(vec![a, b]);
        assert!(RetryHandler::resolve(&wf, "a", RetryLinkage::LatestAttempt).is_some());
    }
}
