//! Scheduling decisions for a single workflow.
//!
//! `Scheduler` holds no state of its own. Every time a task settles (and on
//! start/resume) the engine calls `tick`, which inspects the workflow,
//! applies skips, marks the ready set running and, once nothing is left to
//! run, settles the workflow verdict. `apply_result` records an executor
//! outcome on its task. Both mutate the workflow in place; the engine takes
//! care of persistence, events and spawning.

use std::collections::HashMap;

use chrono::Utc;
use unitflow_types::config::{BlockedDependencyPolicy, EngineConfig, RetryLinkage};
use unitflow_types::context::WorkflowContext;
use unitflow_types::event::SkipReason;
use unitflow_types::workflow::{
    TaskExecutionResult, TaskStatus, Workflow, WorkflowStatus, WorkflowTask,
};

use super::condition::ConditionEvaluator;
use super::definition::EngineError;
use super::retry::RetryHandler;

/// What one scheduling pass decided.
#[derive(Debug, Default, PartialEq)]
pub struct Tick {
    /// Tasks moved to `skipped` during this pass, in workflow order.
    pub skipped: Vec<(String, SkipReason)>,
    /// Tasks moved to `running` during this pass, in workflow order.
    pub started: Vec<String>,
    /// Set when the pass settled the workflow as `completed` or `failed`.
    pub finished: Option<WorkflowStatus>,
}

impl Tick {
    /// Nothing changed, nothing to persist or announce.
    pub fn is_noop(&self) -> bool {
        self.skipped.is_empty() && self.started.is_empty() && self.finished.is_none()
    }
}

/// How an executor outcome was recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Workflow terminal or task no longer running; outcome dropped.
    Discarded,
    Completed,
    Failed {
        error: String,
        /// Id of the retry attempt appended for this failure.
        retry_id: Option<String>,
    },
}

/// Where a dependency stands from the dependent's point of view.
enum DependencyState {
    Satisfied,
    Waiting,
    Blocked,
}

/// Stateless scheduling rules, parameterized by the configured policies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    blocked_policy: BlockedDependencyPolicy,
    linkage: RetryLinkage,
}

impl Scheduler {
    pub fn new(blocked_policy: BlockedDependencyPolicy, linkage: RetryLinkage) -> Self {
        Self {
            blocked_policy,
            linkage,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.blocked_dependency_policy, config.retry_linkage)
    }

    /// Run one scheduling pass over `workflow`.
    ///
    /// Does nothing unless the workflow is `running`. A pending task becomes
    /// ready once every dependency is `completed` and all its conditions
    /// hold; a failing condition skips it for good. Blocked dependents are
    /// skipped under `BlockedDependencyPolicy::Skip`, cascading to a fixed
    /// point. When no task could be started and every task is terminal, the
    /// workflow is finalized.
    pub fn tick(&self, workflow: &mut Workflow) -> Tick {
        let mut tick = Tick::default();
        if workflow.status != WorkflowStatus::Running {
            return tick;
        }

        let evaluator = ConditionEvaluator::new(self.linkage);
        let mut ready = Vec::new();

        loop {
            let mut newly_skipped = Vec::new();
            for task in workflow.tasks.iter() {
                if task.status != TaskStatus::Pending || ready.contains(&task.id) {
                    continue;
                }
                match self.dependency_state(workflow, task) {
                    DependencyState::Waiting => {}
                    DependencyState::Blocked => {
                        newly_skipped.push((task.id.clone(), SkipReason::DependencyNotCompleted));
                    }
                    DependencyState::Satisfied => {
                        if evaluator.all_hold(task, workflow) {
                            ready.push(task.id.clone());
                        } else {
                            newly_skipped.push((task.id.clone(), SkipReason::ConditionNotMet));
                        }
                    }
                }
            }

            if newly_skipped.is_empty() {
                break;
            }
            for (task_id, reason) in &newly_skipped {
                if let Some(task) = workflow.task_mut(task_id) {
                    task.status = TaskStatus::Skipped;
                    tracing::debug!(
                        workflow_id = %workflow.id,
                        task_id = %task_id,
                        reason = ?reason,
                        "task skipped"
                    );
                }
            }
            tick.skipped.extend(newly_skipped);
            // Skips can unblock nothing but can block more dependents.
            if self.blocked_policy == BlockedDependencyPolicy::Wait {
                break;
            }
        }

        if ready.is_empty() {
            if workflow.tasks.iter().all(WorkflowTask::is_terminal) {
                let status = self.verdict(workflow);
                workflow.status = status;
                workflow.completed_at = Some(Utc::now());
                tick.finished = Some(status);
            }
            return tick;
        }

        let now = Utc::now();
        for task_id in &ready {
            if let Some(task) = workflow.task_mut(task_id) {
                task.status = TaskStatus::Running;
                task.start_time = Some(now);
            }
        }
        tick.started = ready;
        tick
    }

    /// `completed` unless a task counts as failed. With `LatestAttempt`, a
    /// failure superseded by a retry does not count.
    pub fn verdict(&self, workflow: &Workflow) -> WorkflowStatus {
        let any_failed = workflow.tasks.iter().any(|t| {
            t.status == TaskStatus::Failed
                && (self.linkage == RetryLinkage::OriginalOnly || !RetryHandler::is_superseded(t))
        });
        if any_failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        }
    }

    fn dependency_state(&self, workflow: &Workflow, task: &WorkflowTask) -> DependencyState {
        let mut waiting = false;
        for dep_id in &task.dependencies {
            match RetryHandler::resolve(workflow, dep_id, self.linkage) {
                Some(dep) if dep.status == TaskStatus::Completed => {}
                Some(dep) if !dep.is_terminal() => waiting = true,
                Some(_) => {
                    if self.blocked_policy == BlockedDependencyPolicy::Skip {
                        return DependencyState::Blocked;
                    }
                    waiting = true;
                }
                None => {
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        task_id = %task.id,
                        dependency = %dep_id,
                        "task depends on non-existent task"
                    );
                    if self.blocked_policy == BlockedDependencyPolicy::Skip {
                        return DependencyState::Blocked;
                    }
                    waiting = true;
                }
            }
        }
        if waiting {
            DependencyState::Waiting
        } else {
            DependencyState::Satisfied
        }
    }

    /// Snapshot of a task ready to hand to its executor.
    ///
    /// The copy carries `dependency_results` keyed by the declared
    /// dependency's name. Each value is the attempt the linkage policy
    /// resolves to, so after a retry the name still finds the latest result.
    pub fn prepare(&self, workflow: &Workflow, task_id: &str) -> Option<(WorkflowTask, WorkflowContext)> {
        let mut task = workflow.task(task_id)?.clone();
        let mut dependency_results = HashMap::new();
        for dep_id in &task.dependencies {
            let Some(declared) = workflow.task(dep_id) else {
                continue;
            };
            if let Some(dep) = RetryHandler::resolve(workflow, dep_id, self.linkage) {
                let mut dep = dep.clone();
                dep.dependency_results.clear();
                dependency_results.insert(declared.name.clone(), dep);
            }
        }
        task.dependency_results = dependency_results;
        Some((task, workflow.context.clone()))
    }

    /// Record an executor outcome on `task_id`.
    ///
    /// Dropped when the workflow is already terminal or the task is no longer
    /// `running`, so a late result never revives a cancelled workflow.
    pub fn apply_result(
        &self,
        workflow: &mut Workflow,
        task_id: &str,
        outcome: Result<TaskExecutionResult, EngineError>,
    ) -> Applied {
        if workflow.is_terminal() {
            return Applied::Discarded;
        }
        let Some(index) = workflow.tasks.iter().position(|t| t.id == task_id) else {
            return Applied::Discarded;
        };
        if workflow.tasks[index].status != TaskStatus::Running {
            return Applied::Discarded;
        }

        let now = Utc::now();
        let failure = match outcome {
            Ok(result) if result.success => {
                let task = &mut workflow.tasks[index];
                task.status = TaskStatus::Completed;
                task.result = result.result.clone();
                task.end_time = Some(now);
                if !result.context_updates.is_empty() {
                    task.output = Some(result.context_updates.clone());
                }
                if let Some(value) = result.result {
                    // A successful retry also answers for the first attempt's id.
                    if self.linkage == RetryLinkage::LatestAttempt {
                        let root_id = RetryHandler::root_id(workflow, task_id).to_string();
                        if root_id != task_id {
                            workflow.context.set_task_result(&root_id, value.clone());
                        }
                    }
                    workflow.context.set_task_result(task_id, value);
                }
                workflow.context.merge(&result.context_updates);
                return Applied::Completed;
            }
            Ok(result) => result
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "task reported failure".to_string()),
            Err(e) => e.to_string(),
        };

        let task = &mut workflow.tasks[index];
        task.status = TaskStatus::Failed;
        task.error = Some(failure.clone());
        task.end_time = Some(now);

        let retry_id = if RetryHandler::should_retry(task) {
            let retry = RetryHandler::build_retry(task);
            let retry_id = retry.id.clone();
            RetryHandler::link(task, &retry_id);
            workflow.tasks.push(retry);
            Some(retry_id)
        } else {
            None
        };

        Applied::Failed {
            error: failure,
            retry_id,
        }
    }
}

/// Cancel side effects: running tasks become `cancelled`, pending ones
/// `skipped`. Returns the ids skipped.
pub fn cancel_tasks(workflow: &mut Workflow) -> Vec<String> {
    let now = Utc::now();
    let mut skipped = Vec::new();
    for task in workflow.tasks.iter_mut() {
        match task.status {
            TaskStatus::Running => {
                task.status = TaskStatus::Cancelled;
                task.end_time = Some(now);
            }
            TaskStatus::Pending => {
                task.status = TaskStatus::Skipped;
                skipped.push(task.id.clone());
            }
            _ => {}
        }
    }
    skipped
}

/// Reset tasks whose execution was lost with the previous process.
///
/// Only meaningful for workflows that were running; returns how many tasks
/// went back to `pending`.
pub fn reset_interrupted(workflow: &mut Workflow) -> usize {
    if workflow.status != WorkflowStatus::Running && workflow.status != WorkflowStatus::Paused {
        return 0;
    }
    let mut reset = 0;
    for task in workflow
        .tasks
        .iter_mut()
        .filter(|t| t.status == TaskStatus::Running)
    {
        task.status = TaskStatus::Pending;
        task.start_time = None;
        reset += 1;
    }
    reset
}

/// Terminal, or paused with nothing still executing.
pub fn is_settled(workflow: &Workflow) -> bool {
    workflow.is_terminal()
        || (workflow.status == WorkflowStatus::Paused
            && !workflow.tasks.iter().any(|t| t.status == TaskStatus::Running))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use unitflow_types::workflow::{TaskBlueprint, TaskCondition};
    use uuid::Uuid;

    fn task(id: &str, deps: &[&str]) -> WorkflowTask {
        let mut bp = TaskBlueprint::new(id.to_uppercase(), "noop");
        for d in deps {
            bp = bp.depends_on(*d);
        }
        WorkflowTask::from_blueprint(&bp, id.to_string())
    }

    fn running(tasks: Vec<WorkflowTask>) -> Workflow {
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
            metadata: Map::new(),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    fn status(wf: &Workflow, id: &str) -> TaskStatus {
        wf.task(id).unwrap().status
    }

    fn complete(s: &Scheduler, wf: &mut Workflow, id: &str) {
        let applied = s.apply_result(wf, id, Ok(TaskExecutionResult::success(json!(id))));
        assert_eq!(applied, Applied::Completed);
    }

    #[test]
    fn test_not_running_is_noop() {
        let mut wf = running(vec![task("a", &[])]);
        wf.status = WorkflowStatus::Paused;
        let tick = Scheduler::default().tick(&mut wf);
        assert!(tick.is_noop());
        assert_eq!(status(&wf, "a"), TaskStatus::Pending);
    }

    #[test]
    fn test_empty_workflow_completes() {
        let mut wf = running(vec![]);
        let tick = Scheduler::default().tick(&mut wf);
        assert_eq!(tick.finished, Some(WorkflowStatus::Completed));
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(wf.completed_at.is_some());
    }

    #[test]
    fn test_ready_set_respects_dependencies() {
        let s = Scheduler::default();
        let mut wf = running(vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ]);

        assert_eq!(s.tick(&mut wf).started, vec!["a"]);
        assert_eq!(status(&wf, "a"), TaskStatus::Running);
        assert!(wf.task("a").unwrap().start_time.is_some());
        assert!(s.tick(&mut wf).is_noop());

        complete(&s, &mut wf, "a");
        assert_eq!(s.tick(&mut wf).started, vec!["b", "c"]);

        complete(&s, &mut wf, "b");
        assert!(s.tick(&mut wf).started.is_empty());
        complete(&s, &mut wf, "c");
        assert_eq!(s.tick(&mut wf).started, vec!["d"]);

        complete(&s, &mut wf, "d");
        let tick = s.tick(&mut wf);
        assert_eq!(tick.finished, Some(WorkflowStatus::Completed));
    }

    #[test]
    fn test_false_condition_skips_once_dependencies_complete() {
        let s = Scheduler::default();
        let mut gated = task("b", &["a"]);
        gated.conditions = vec![TaskCondition::Expression {
            expression: "context.go == true".to_string(),
        }];
        let mut wf = running(vec![task("a", &[]), gated, task("c", &[])]);

        let tick = s.tick(&mut wf);
        assert_eq!(tick.started, vec!["a", "c"]);
        assert_eq!(status(&wf, "b"), TaskStatus::Pending);

        complete(&s, &mut wf, "a");
        let tick = s.tick(&mut wf);
        assert_eq!(tick.skipped, vec![("b".to_string(), SkipReason::ConditionNotMet)]);
        assert_eq!(status(&wf, "b"), TaskStatus::Skipped);
        assert!(tick.finished.is_none(), "c is still running");

        wf.context.set("go", json!(true));
        complete(&s, &mut wf, "c");
        let tick = s.tick(&mut wf);
        assert!(tick.skipped.is_empty());
        assert_eq!(status(&wf, "b"), TaskStatus::Skipped);
        assert_eq!(tick.finished, Some(WorkflowStatus::Completed));
    }

    #[test]
    fn test_failed_dependency_cascades_skip() {
        let s = Scheduler::default();
        let mut wf = running(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
        s.tick(&mut wf);
        let applied = s.apply_result(&mut wf, "a", Ok(TaskExecutionResult::failure("x")));
        assert!(matches!(applied, Applied::Failed { retry_id: None, .. }));

        let tick = s.tick(&mut wf);
        assert_eq!(
            tick.skipped,
            vec![
                ("b".to_string(), SkipReason::DependencyNotCompleted),
                ("c".to_string(), SkipReason::DependencyNotCompleted),
            ]
        );
        assert_eq!(tick.finished, Some(WorkflowStatus::Failed));
    }

    #[test]
    fn test_wait_policy_strands_dependents() {
        let s = Scheduler::new(BlockedDependencyPolicy::Wait, RetryLinkage::LatestAttempt);
        let mut wf = running(vec![task("a", &[]), task("b", &["a"])]);
        s.tick(&mut wf);
        s.apply_result(&mut wf, "a", Ok(TaskExecutionResult::failure("x")));

        let tick = s.tick(&mut wf);
        assert!(tick.is_noop());
        assert_eq!(status(&wf, "b"), TaskStatus::Pending);
        assert_eq!(wf.status, WorkflowStatus::Running);
    }

    #[test]
    fn test_failure_with_budget_appends_retry() {
        let s = Scheduler::default();
        let mut t = task("a", &[]);
        t.retries = 2;
        let mut wf = running(vec![t]);
        s.tick(&mut wf);

        let applied = s.apply_result(&mut wf, "a", Ok(TaskExecutionResult::failure("x")));
        let Applied::Failed { error, retry_id: Some(retry_id) } = applied else {
            panic!("expected a retry");
        };
        assert_eq!(error, "x");
        assert_eq!(wf.tasks.len(), 2);
        let original = wf.task("a").unwrap();
        assert_eq!(original.status, TaskStatus::Failed);
        assert_eq!(original.error.as_deref(), Some("x"));
        let retry = wf.task(&retry_id).unwrap();
        assert_eq!(retry.status, TaskStatus::Pending);
        assert_eq!(retry.retries, 1);
    }

    #[test]
    fn test_latest_attempt_lets_dependents_follow_retry() {
        let s = Scheduler::default();
        let mut a = task("a", &[]);
        a.retries = 1;
        let mut wf = running(vec![a, task("b", &["a"])]);
        s.tick(&mut wf);
        let Applied::Failed { retry_id: Some(retry_id), .. } =
            s.apply_result(&mut wf, "a", Err(EngineError::TaskExecution("boom".into())))
        else {
            panic!("expected a retry");
        };

        let tick = s.tick(&mut wf);
        assert_eq!(tick.started, vec![retry_id.clone()]);
        assert_eq!(status(&wf, "b"), TaskStatus::Pending);

        complete(&s, &mut wf, &retry_id);
        assert_eq!(s.tick(&mut wf).started, vec!["b"]);
        let (prepared, context) = s.prepare(&wf, "b").unwrap();
        assert_eq!(prepared.dependency_results.len(), 1);
        let dep = &prepared.dependency_results["A"];
        assert_eq!(dep.id, retry_id);
        assert_eq!(dep.status, TaskStatus::Completed);
        assert_eq!(context.task_result("a"), Some(&json!(retry_id)));
        assert_eq!(context.task_result(&retry_id), Some(&json!(retry_id)));

        complete(&s, &mut wf, "b");
        assert_eq!(s.tick(&mut wf).finished, Some(WorkflowStatus::Completed));
    }

    #[test]
    fn test_original_only_keeps_failed_edge() {
        let s = Scheduler::new(BlockedDependencyPolicy::Skip, RetryLinkage::OriginalOnly);
        let mut a = task("a", &[]);
        a.retries = 1;
        let mut wf = running(vec![a, task("b", &["a"])]);
        s.tick(&mut wf);
        s.apply_result(&mut wf, "a", Ok(TaskExecutionResult::failure("x")));

        let tick = s.tick(&mut wf);
        assert_eq!(status(&wf, "b"), TaskStatus::Skipped);
        assert_eq!(tick.started.len(), 1);
        let retry_id = tick.started[0].clone();
        complete(&s, &mut wf, &retry_id);
        assert_eq!(s.tick(&mut wf).finished, Some(WorkflowStatus::Failed));
    }

    #[test]
    fn test_success_writes_result_and_updates_context() {
        let s = Scheduler::default();
        let mut wf = running(vec![task("a", &[])]);
        s.tick(&mut wf);
        let result = TaskExecutionResult::success(json!({"rows": 3}))
            .with_context_update("summary", json!("ok"));
        assert_eq!(s.apply_result(&mut wf, "a", Ok(result)), Applied::Completed);

        assert_eq!(wf.context.get("task_a_result"), Some(&json!({"rows": 3})));
        assert_eq!(wf.context.get("summary"), Some(&json!("ok")));
        let a = wf.task("a").unwrap();
        assert!(a.end_time.is_some());
        assert_eq!(a.output.as_ref().unwrap().get("summary"), Some(&json!("ok")));
    }

    #[test]
    fn test_results_for_cancelled_workflow_are_discarded() {
        let s = Scheduler::default();
        let mut wf = running(vec![task("a", &[]), task("b", &[])]);
        s.tick(&mut wf);
        wf.status = WorkflowStatus::Cancelled;
        cancel_tasks(&mut wf);

        let applied = s.apply_result(&mut wf, "a", Ok(TaskExecutionResult::done()));
        assert_eq!(applied, Applied::Discarded);
        assert_eq!(status(&wf, "a"), TaskStatus::Cancelled);
        assert_eq!(wf.status, WorkflowStatus::Cancelled);
    }

    #[test]
    fn test_paused_workflow_still_records_results() {
        let s = Scheduler::default();
        let mut wf = running(vec![task("a", &[]), task("b", &["a"])]);
        s.tick(&mut wf);
        wf.status = WorkflowStatus::Paused;
        assert!(!is_settled(&wf));

        complete(&s, &mut wf, "a");
        assert!(s.tick(&mut wf).is_noop());
        assert_eq!(status(&wf, "b"), TaskStatus::Pending);
        assert!(is_settled(&wf));
    }

    #[test]
    fn test_cancel_tasks() {
        let mut wf = running(vec![task("a", &[]), task("b", &["a"])]);
        Scheduler::default().tick(&mut wf);
        let skipped = cancel_tasks(&mut wf);
        assert_eq!(skipped, vec!["b"]);
        assert_eq!(status(&wf, "a"), TaskStatus::Cancelled);
        assert_eq!(status(&wf, "b"), TaskStatus::Skipped);
    }

    #[test]
    fn test_reset_interrupted() {
        let mut wf = running(vec![task("a", &[]), task("b", &[])]);
        Scheduler::default().tick(&mut wf);
        assert_eq!(reset_interrupted(&mut wf), 2);
        assert_eq!(status(&wf, "a"), TaskStatus::Pending);
        assert!(wf.task("a").unwrap().start_time.is_none());

        let mut done = running(vec![]);
        done.status = WorkflowStatus::Completed;
        assert_eq!(reset_interrupted(&mut done), 0);
    }

    #[test]
    fn test_prepare_maps_dependencies_by_name() {
        let s = Scheduler::default();
        let mut wf = running(vec![task("a", &[]), task("b", &["a"])]);
        s.tick(&mut wf);
        complete(&s, &mut wf, "a");
        wf.context.set("k", json!(1));

        let (prepared, context) = s.prepare(&wf, "b").unwrap();
        assert_eq!(prepared.dependency_results.len(), 1);
        assert_eq!(prepared.dependency_results["A"].result, Some(json!("a")));
        assert_eq!(context.get("k"), Some(&json!(1)));
        assert!(s.prepare(&wf, "missing").is_none());
    }
}
