//! Lifecycle events broadcast by the workflow engine.
//!
//! `WorkflowEvent` is fire-and-forget: the engine publishes one per state
//! transition and never waits on consumers. All variants are Clone + Send +
//! Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{TaskStatus, WorkflowStatus};

/// Why a task was moved to `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// One of the task's conditions evaluated false.
    ConditionNotMet,
    /// A dependency finished in a terminal status other than `completed`.
    DependencyNotCompleted,
    /// The owning workflow was cancelled while the task was pending.
    WorkflowCancelled,
}

/// Events emitted by the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Created {
        workflow_id: Uuid,
        name: String,
        template_id: Option<Uuid>,
    },
    Started {
        workflow_id: Uuid,
    },
    Paused {
        workflow_id: Uuid,
    },
    Resumed {
        workflow_id: Uuid,
    },
    Cancelled {
        workflow_id: Uuid,
    },
    /// The workflow reached `completed` (success) or `failed`.
    Completed {
        workflow_id: Uuid,
        success: bool,
        status: WorkflowStatus,
    },

    TaskStarted {
        workflow_id: Uuid,
        task_id: String,
        action: String,
    },
    TaskCompleted {
        workflow_id: Uuid,
        task_id: String,
        success: bool,
    },
    TaskFailed {
        workflow_id: Uuid,
        task_id: String,
        error: String,
        /// A retry attempt was appended for this failure.
        will_retry: bool,
    },
    TaskSkipped {
        workflow_id: Uuid,
        task_id: String,
        reason: SkipReason,
    },

    TemplateCreated {
        template_id: Uuid,
        name: String,
    },
    TemplateUpdated {
        template_id: Uuid,
    },
    /// A version change produced a new template; the original is untouched.
    TemplateVersioned {
        original_template_id: Uuid,
        new_template_id: Uuid,
        version: String,
    },
    TemplateDeleted {
        template_id: Uuid,
    },
}

impl WorkflowEvent {
    /// Wire name of the event, e.g. `workflow:task:started`.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::Created { .. } => "workflow:created",
            WorkflowEvent::Started { .. } => "workflow:started",
            WorkflowEvent::Paused { .. } => "workflow:paused",
            WorkflowEvent::Resumed { .. } => "workflow:resumed",
            WorkflowEvent::Cancelled { .. } => "workflow:cancelled",
            WorkflowEvent::Completed { .. } => "workflow:completed",
            WorkflowEvent::TaskStarted { .. } => "workflow:task:started",
            WorkflowEvent::TaskCompleted { .. } => "workflow:task:completed",
            WorkflowEvent::TaskFailed { .. } => "workflow:task:failed",
            WorkflowEvent::TaskSkipped { .. } => "workflow:task:skipped",
            WorkflowEvent::TemplateCreated { .. } => "workflow:template:created",
            WorkflowEvent::TemplateUpdated { .. } => "workflow:template:updated",
            WorkflowEvent::TemplateVersioned { .. } => "workflow:template:versioned",
            WorkflowEvent::TemplateDeleted { .. } => "workflow:template:deleted",
        }
    }

    /// The workflow this event concerns, if it is not a template event.
    pub fn workflow_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::Created { workflow_id, .. }
            | WorkflowEvent::Started { workflow_id }
            | WorkflowEvent::Paused { workflow_id }
            | WorkflowEvent::Resumed { workflow_id }
            | WorkflowEvent::Cancelled { workflow_id }
            | WorkflowEvent::Completed { workflow_id, .. }
            | WorkflowEvent::TaskStarted { workflow_id, .. }
            | WorkflowEvent::TaskCompleted { workflow_id, .. }
            | WorkflowEvent::TaskFailed { workflow_id, .. }
            | WorkflowEvent::TaskSkipped { workflow_id, .. } => Some(*workflow_id),
            _ => None,
        }
    }

    /// The task status this event reports, for task events.
    pub fn task_status(&self) -> Option<TaskStatus> {
        match self {
            WorkflowEvent::TaskStarted { .. } => Some(TaskStatus::Running),
            WorkflowEvent::TaskCompleted { .. } => Some(TaskStatus::Completed),
            WorkflowEvent::TaskFailed { .. } => Some(TaskStatus::Failed),
            WorkflowEvent::TaskSkipped { .. } => Some(TaskStatus::Skipped),
            _ => None,
        }
    }
}
