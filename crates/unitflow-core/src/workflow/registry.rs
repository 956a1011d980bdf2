//! Task executor registry.
//!
//! Executors are the externally supplied work behind each task `action`.
//! The registry maps action names to executors; it has no logic beyond
//! lookup and registration.
//!
//! Follows the blanket-impl pattern for object safety:
//! 1. `TaskExecutor` uses native async fn (RPITIT)
//! 2. `TaskExecutorDyn` is the object-safe variant with boxed futures
//! 3. Every `T: TaskExecutor` gets `TaskExecutorDyn` for free

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use unitflow_types::context::WorkflowContext;
use unitflow_types::workflow::{TaskExecutionResult, WorkflowTask};

/// Executes one task attempt.
///
/// The task carries its parameters and a `dependency_results` map keyed by
/// dependency name. Returning `Err` fails the task exactly like returning
/// `TaskExecutionResult::failure`.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        task: &WorkflowTask,
        context: &WorkflowContext,
    ) -> impl Future<Output = anyhow::Result<TaskExecutionResult>> + Send;
}

/// Object-safe version of [`TaskExecutor`] with boxed futures.
pub trait TaskExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        task: &'a WorkflowTask,
        context: &'a WorkflowContext,
    ) -> BoxFuture<'a, anyhow::Result<TaskExecutionResult>>;
}

/// Blanket implementation: any `TaskExecutor` automatically implements `TaskExecutorDyn`.
impl<T: TaskExecutor> TaskExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        task: &'a WorkflowTask,
        context: &'a WorkflowContext,
    ) -> BoxFuture<'a, anyhow::Result<TaskExecutionResult>> {
        Box::pin(self.execute(task, context))
    }
}

/// Shared, type-erased executor handle.
pub type SharedTaskExecutor = Arc<dyn TaskExecutorDyn>;

/// Adapter turning an async closure over owned inputs into a `TaskExecutor`.
pub struct FnExecutor<F> {
    func: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(WorkflowTask, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TaskExecutionResult>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(WorkflowTask, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TaskExecutionResult>> + Send + 'static,
{
    fn execute(
        &self,
        task: &WorkflowTask,
        context: &WorkflowContext,
    ) -> impl Future<Output = anyhow::Result<TaskExecutionResult>> + Send {
        (self.func)(task.clone(), context.clone())
    }
}

/// Action name -> executor mapping, global to one engine instance.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: Arc<DashMap<String, SharedTaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for `action`.
    pub fn register<E: TaskExecutor>(&self, action: impl Into<String>, executor: E) {
        let action = action.into();
        if self
            .executors
            .insert(action.clone(), Arc::new(executor))
            .is_some()
        {
            tracing::debug!(action = %action, "replaced task executor");
        } else {
            tracing::debug!(action = %action, "registered task executor");
        }
    }

    /// Register an async closure as the executor for `action`.
    pub fn register_fn<F, Fut>(&self, action: impl Into<String>, func: F)
    where
        F: Fn(WorkflowTask, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TaskExecutionResult>> + Send + 'static,
    {
        self.register(action, FnExecutor::new(func));
    }

    /// Remove the executor for `action`. Returns whether one was registered.
    pub fn unregister(&self, action: &str) -> bool {
        self.executors.remove(action).is_some()
    }

    pub fn get(&self, action: &str) -> Option<SharedTaskExecutor> {
        self.executors.get(action).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, action: &str) -> bool {
        self.executors.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.executors.iter().map(|e| e.key().clone()).collect();
        actions.sort();
        actions
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
