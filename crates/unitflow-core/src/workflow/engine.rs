//! The workflow engine service.
//!
//! `WorkflowEngine` ties the pieces together: templates, live workflows and
//! their persistence, the executor registry, the scheduler and the lifecycle
//! notifier. It is an explicitly constructed, cheaply cloneable handle; all
//! collaborators are injected, so several engines can coexist in one
//! process.
//!
//! Scheduling is re-entrant. `start`/`resume` run one scheduling pass, and
//! every task that settles runs another for its workflow. Ready tasks are
//! spawned onto the tokio runtime without waiting for their siblings, so
//! independent tasks execute concurrently. Each state change is persisted
//! while the state lock is held and before the affected executor runs.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, broadcast};
use tracing::{Instrument, info_span};
use unitflow_types::config::EngineConfig;
use unitflow_types::context::WorkflowContext;
use unitflow_types::event::{SkipReason, WorkflowEvent};
use unitflow_types::workflow::{
    TaskExecutionResult, TemplateBlueprint, TemplateUpdate, Workflow, WorkflowExecutionOptions,
    WorkflowSpec, WorkflowStatus, WorkflowTask, WorkflowTemplate,
};
use uuid::Uuid;

use super::definition::EngineError;
use super::instantiate;
use super::notifier::LifecycleNotifier;
use super::registry::{ExecutorRegistry, TaskExecutor};
use super::repository::{StatePersister, WorkflowRepository};
use super::scheduler::{Applied, Scheduler, cancel_tasks, is_settled};
use super::template::{TemplateChange, TemplateRegistry};
use crate::event::EventBus;
use crate::service::fs::FileSystem;
use crate::storage::KvStore;

/// Handle to a workflow engine. Clones share the same engine.
pub struct WorkflowEngine<S, F> {
    inner: Arc<EngineInner<S, F>>,
}

impl<S, F> Clone for WorkflowEngine<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<S, F> {
    config: EngineConfig,
    state: Mutex<WorkflowRepository>,
    persister: StatePersister<S>,
    templates: TemplateRegistry<F>,
    executors: ExecutorRegistry,
    notifier: LifecycleNotifier,
    scheduler: Scheduler,
}

impl<S, F> WorkflowEngine<S, F>
where
    S: KvStore + 'static,
    F: FileSystem + 'static,
{
    /// Build an engine from its collaborators.
    ///
    /// Loads templates from the configured directory and the persisted
    /// engine state (an unreadable state blob is logged and replaced by an
    /// empty state). With `resume_on_start`, tasks interrupted by a previous
    /// shutdown go back to `pending` and every active running workflow
    /// re-enters the scheduler.
    pub async fn new(
        config: EngineConfig,
        store: S,
        fs: F,
        events: EventBus,
        executors: ExecutorRegistry,
    ) -> Self {
        let templates = TemplateRegistry::new(fs, config.template_directory.clone());
        templates.load_from_disk().await;

        let persister = StatePersister::new(store, config.state_key.clone());
        let mut state = match persister.load().await {
            Ok(Some(snapshot)) => WorkflowRepository::from_snapshot(snapshot),
            Ok(None) => WorkflowRepository::new(),
            Err(e) => {
                tracing::warn!(error = %e, "starting with empty engine state");
                WorkflowRepository::new()
            }
        };

        let resumable = if config.resume_on_start {
            state.recover()
        } else {
            Vec::new()
        };

        tracing::info!(
            workflows = state.len(),
            active = state.active_ids().len(),
            templates = templates.len(),
            "workflow engine initialized"
        );

        let engine = Self {
            inner: Arc::new(EngineInner {
                scheduler: Scheduler::from_config(&config),
                config,
                state: Mutex::new(state),
                persister,
                templates,
                executors,
                notifier: LifecycleNotifier::new(events),
            }),
        };

        for workflow_id in resumable {
            tracing::info!(workflow_id = %workflow_id, "resuming workflow");
            Arc::clone(&engine.inner).schedule(workflow_id).await;
        }
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Receive every lifecycle event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.inner.notifier.bus().subscribe()
    }

    // -----------------------------------------------------------------------
    // Executors
    // -----------------------------------------------------------------------

    pub fn register_task_executor<E: TaskExecutor>(&self, action: impl Into<String>, executor: E) {
        self.inner.executors.register(action, executor);
    }

    /// Register an async closure over owned `(task, context)` inputs.
    pub fn register_task_fn<Func, Fut>(&self, action: impl Into<String>, func: Func)
    where
        Func: Fn(WorkflowTask, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TaskExecutionResult>> + Send + 'static,
    {
        self.inner.executors.register_fn(action, func);
    }

    pub fn unregister_task_executor(&self, action: &str) -> bool {
        self.inner.executors.unregister(action)
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    pub async fn create_template(&self, blueprint: TemplateBlueprint) -> Result<WorkflowTemplate, EngineError> {
        let template = self.inner.templates.create(blueprint).await?;
        self.inner.notifier.template_created(&template);
        Ok(template)
    }

    /// Update a template. A version change returns a new template with a new
    /// id and leaves the original untouched.
    pub async fn update_template(
        &self,
        template_id: Uuid,
        update: TemplateUpdate,
    ) -> Result<WorkflowTemplate, EngineError> {
        let change = self.inner.templates.update(template_id, update).await?;
        match &change {
            TemplateChange::Updated(template) => self.inner.notifier.template_updated(template.id),
            TemplateChange::Versioned {
                original_id,
                template,
            } => self.inner.notifier.template_versioned(*original_id, template),
        }
        Ok(change.into_template())
    }

    pub async fn delete_template(&self, template_id: Uuid) -> Result<WorkflowTemplate, EngineError> {
        let removed = self.inner.templates.delete(template_id).await?;
        self.inner.notifier.template_deleted(template_id);
        Ok(removed)
    }

    /// Look up a template by id, then by name.
    pub fn get_template(&self, id_or_name: &str) -> Option<WorkflowTemplate> {
        self.inner.templates.get(id_or_name)
    }

    pub fn get_template_by_id(&self, template_id: Uuid) -> Option<WorkflowTemplate> {
        self.inner.templates.get_by_id(template_id)
    }

    pub fn get_all_templates(&self) -> Vec<WorkflowTemplate> {
        self.inner.templates.all()
    }

    // -----------------------------------------------------------------------
    // Workflow creation and queries
    // -----------------------------------------------------------------------

    /// Instantiate a template (by id or name) as a new workflow.
    pub async fn create_workflow_from_template(
        &self,
        id_or_name: &str,
        options: WorkflowExecutionOptions,
    ) -> Result<Workflow, EngineError> {
        let template = self
            .inner
            .templates
            .get(id_or_name)
            .ok_or_else(|| EngineError::TemplateNotFound(id_or_name.to_string()))?;
        let workflow = instantiate::from_template(&template, &options)?;
        self.admit(workflow, options.auto_start).await
    }

    /// Create a workflow from directly supplied tasks.
    pub async fn create_workflow(
        &self,
        spec: WorkflowSpec,
        options: WorkflowExecutionOptions,
    ) -> Result<Workflow, EngineError> {
        let workflow = instantiate::from_spec(spec, &options)?;
        self.admit(workflow, options.auto_start).await
    }

    async fn admit(&self, workflow: Workflow, auto_start: bool) -> Result<Workflow, EngineError> {
        let workflow_id = workflow.id;
        {
            let mut state = self.inner.state.lock().await;
            state.insert(workflow.clone());
            self.inner.persist(&state).await;
            self.inner.notifier.workflow_created(&workflow);
        }

        if auto_start {
            self.start_workflow(workflow_id).await
        } else {
            Ok(workflow)
        }
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.inner.state.lock().await.get(workflow_id).cloned()
    }

    /// All workflows, oldest first.
    pub async fn get_all_workflows(&self) -> Vec<Workflow> {
        self.inner.state.lock().await.all().cloned().collect()
    }

    /// Ids of the workflows currently eligible for scheduling.
    pub async fn list_active_workflows(&self) -> Vec<Uuid> {
        self.inner.state.lock().await.active_ids()
    }

    async fn require_workflow(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        self.get_workflow(workflow_id)
            .await
            .ok_or(EngineError::WorkflowNotFound(workflow_id))
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Start a pending (or paused) workflow.
    ///
    /// Starting a running workflow is a no-op; starting a terminal one is an
    /// `InvalidTransition`. Returns the workflow after its first scheduling
    /// pass, so a workflow without tasks comes back `completed`.
    pub async fn start_workflow(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        {
            let mut state = self.inner.state.lock().await;
            let workflow = state.require_mut(workflow_id)?;
            match workflow.status {
                WorkflowStatus::Running => return Ok(workflow.clone()),
                status if status.is_terminal() => {
                    return Err(EngineError::InvalidTransition {
                        workflow_id,
                        status,
                        operation: "start",
                    });
                }
                _ => {}
            }
            workflow.status = WorkflowStatus::Running;
            workflow.started_at.get_or_insert_with(Utc::now);
            state.activate(workflow_id);
            self.inner.persist(&state).await;
            self.inner.notifier.workflow_started(workflow_id);
        }

        Arc::clone(&self.inner).schedule(workflow_id).await;
        self.require_workflow(workflow_id).await
    }

    /// Pause a running workflow. Tasks already executing run to completion
    /// and their results are recorded, but nothing new is dispatched.
    ///
    /// From any other status the workflow is returned unchanged.
    pub async fn pause_workflow(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        let workflow = {
            let mut state = self.inner.state.lock().await;
            let workflow = state.require_mut(workflow_id)?;
            if workflow.status != WorkflowStatus::Running {
                return Ok(workflow.clone());
            }
            workflow.status = WorkflowStatus::Paused;
            let snapshot = workflow.clone();
            state.deactivate(workflow_id);
            self.inner.persist(&state).await;
            self.inner.notifier.workflow_paused(workflow_id);
            snapshot
        };
        Ok(workflow)
    }

    /// Resume a paused workflow. From any other status the workflow is
    /// returned unchanged.
    pub async fn resume_workflow(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        {
            let mut state = self.inner.state.lock().await;
            let workflow = state.require_mut(workflow_id)?;
            if workflow.status != WorkflowStatus::Paused {
                return Ok(workflow.clone());
            }
            workflow.status = WorkflowStatus::Running;
            state.activate(workflow_id);
            self.inner.persist(&state).await;
            self.inner.notifier.workflow_resumed(workflow_id);
        }

        Arc::clone(&self.inner).schedule(workflow_id).await;
        self.require_workflow(workflow_id).await
    }

    /// Cancel a non-terminal workflow: running tasks become `cancelled`,
    /// pending tasks `skipped`. Executors already in flight are not
    /// interrupted; their results are discarded when they settle.
    ///
    /// A terminal workflow is returned unchanged.
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        let mut state = self.inner.state.lock().await;
        let workflow = state.require_mut(workflow_id)?;
        if workflow.is_terminal() {
            return Ok(workflow.clone());
        }
        workflow.status = WorkflowStatus::Cancelled;
        workflow.completed_at = Some(Utc::now());
        let skipped = cancel_tasks(workflow);
        let snapshot = workflow.clone();
        state.deactivate(workflow_id);
        self.inner.persist(&state).await;

        for task_id in &skipped {
            self.inner
                .notifier
                .task_skipped(workflow_id, task_id, SkipReason::WorkflowCancelled);
        }
        self.inner.notifier.workflow_cancelled(workflow_id);
        Ok(snapshot)
    }

    /// Wait until the workflow is terminal, or paused with no task still
    /// executing, and return it.
    pub async fn wait_for_completion(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        let mut events = self.subscribe();
        loop {
            let workflow = self.require_workflow(workflow_id).await?;
            if is_settled(&workflow) {
                return Ok(workflow);
            }
            loop {
                match events.recv().await {
                    Ok(event) if event.workflow_id() == Some(workflow_id) => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return Ok(workflow),
                }
            }
        }
    }
}

impl<S, F> EngineInner<S, F>
where
    S: KvStore + 'static,
    F: FileSystem + 'static,
{
    /// Write the whole state. Failures are logged; memory stays authoritative.
    async fn persist(&self, state: &WorkflowRepository) {
        if let Err(e) = self.persister.save(state).await {
            tracing::warn!(error = %e, "engine state not persisted");
        }
    }

    /// One scheduling pass for `workflow_id`, spawning every task it starts.
    fn schedule(self: Arc<Self>, workflow_id: Uuid) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(workflow) = state.get_mut(workflow_id) else {
                return;
            };
            let tick = self.scheduler.tick(workflow);
            if tick.is_noop() {
                return;
            }
            let dispatches: Vec<(WorkflowTask, WorkflowContext)> = tick
                .started
                .iter()
                .filter_map(|task_id| self.scheduler.prepare(workflow, task_id))
                .collect();
            if tick.finished.is_some() {
                state.deactivate(workflow_id);
            }
            self.persist(&state).await;

            // Events go out under the lock so no other pass can publish a
            // later transition of this workflow first.
            for (task_id, reason) in &tick.skipped {
                self.notifier.task_skipped(workflow_id, task_id, *reason);
            }
            if let Some(status) = tick.finished {
                self.notifier.workflow_finished(workflow_id, status);
            }
            for (task, context) in dispatches {
                self.notifier.task_started(workflow_id, &task.id, &task.action);
                let span = info_span!(
                    "workflow.task",
                    workflow_id = %workflow_id,
                    task_id = %task.id,
                    action = %task.action,
                );
                tokio::spawn(Arc::clone(&self).run_task(workflow_id, task, context).instrument(span));
            }
        })
    }

    /// Execute one task, record the outcome and re-enter the scheduler.
    async fn run_task(self: Arc<Self>, workflow_id: Uuid, task: WorkflowTask, context: WorkflowContext) {
        let outcome = self.execute(&task, &context).await;

        {
            let mut state = self.state.lock().await;
            let Some(workflow) = state.get_mut(workflow_id) else {
                return;
            };
            match self.scheduler.apply_result(workflow, &task.id, outcome) {
                Applied::Discarded => {
                    tracing::debug!(
                        workflow_id = %workflow_id,
                        task_id = %task.id,
                        "discarding result of task that is no longer running"
                    );
                    return;
                }
                Applied::Completed => {
                    self.persist(&state).await;
                    self.notifier.task_completed(workflow_id, &task.id);
                }
                Applied::Failed { error, retry_id } => {
                    self.persist(&state).await;
                    self.notifier
                        .task_failed(workflow_id, &task.id, &error, retry_id.is_some());
                }
            }
        }

        self.schedule(workflow_id).await;
    }

    /// Invoke the executor for `task` on its own tokio task, bounded by its
    /// timeout. A timed-out invocation is aborted.
    ///
    /// Every failure mode (missing executor, `Err`, panic, timeout) comes
    /// back as an `EngineError` for the task; none escapes the engine.
    async fn execute(
        &self,
        task: &WorkflowTask,
        context: &WorkflowContext,
    ) -> Result<TaskExecutionResult, EngineError> {
        let executor = self
            .executors
            .get(&task.action)
            .ok_or_else(|| EngineError::NoExecutorRegistered(task.action.clone()))?;

        let timeout_ms = task.timeout_ms.or(self.config.default_task_timeout_ms);
        let (task, context) = (task.clone(), context.clone());
        let mut handle = tokio::spawn(async move { executor.execute_boxed(&task, &context).await });

        let joined = match timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        return Err(EngineError::TaskTimeout { timeout_ms });
                    }
                }
            }
            None => handle.await,
        };

        match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(EngineError::TaskExecution(format!("{e:#}"))),
            Err(e) if e.is_panic() => Err(EngineError::TaskExecution(panic_message(e.into_panic().as_ref()))),
            Err(e) => Err(EngineError::TaskExecution(format!("task join error: {e}"))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(detail) => format!("executor panicked: {detail}"),
        None => "executor panicked".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
