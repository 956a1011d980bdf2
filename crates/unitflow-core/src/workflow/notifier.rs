//! Lifecycle notifier: one method per engine event.
//!
//! A thin fan-out over `EventBus` that also logs each transition. It keeps
//! no state; publishing never blocks and never fails.

use unitflow_types::event::{SkipReason, WorkflowEvent};
use unitflow_types::workflow::{Workflow, WorkflowStatus, WorkflowTemplate};
use uuid::Uuid;

use crate::event::EventBus;

#[derive(Debug, Clone)]
pub struct LifecycleNotifier {
    bus: EventBus,
}

impl LifecycleNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn emit(&self, event: WorkflowEvent) {
        tracing::trace!(event = event.name(), "publishing workflow event");
        self.bus.publish(event);
    }

    pub fn workflow_created(&self, workflow: &Workflow) {
        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, tasks = workflow.tasks.len(), "workflow created");
        self.emit(WorkflowEvent::Created {
            workflow_id: workflow.id,
            name: workflow.name.clone(),
            template_id: workflow.template_id,
        });
    }

    pub fn workflow_started(&self, workflow_id: Uuid) {
        tracing::info!(workflow_id = %workflow_id, "workflow started");
        self.emit(WorkflowEvent::Started { workflow_id });
    }

    pub fn workflow_paused(&self, workflow_id: Uuid) {
        tracing::info!(workflow_id = %workflow_id, "workflow paused");
        self.emit(WorkflowEvent::Paused { workflow_id });
    }

    pub fn workflow_resumed(&self, workflow_id: Uuid) {
        tracing::info!(workflow_id = %workflow_id, "workflow resumed");
        self.emit(WorkflowEvent::Resumed { workflow_id });
    }

    pub fn workflow_cancelled(&self, workflow_id: Uuid) {
        tracing::info!(workflow_id = %workflow_id, "workflow cancelled");
        self.emit(WorkflowEvent::Cancelled { workflow_id });
    }

    pub fn workflow_finished(&self, workflow_id: Uuid, status: WorkflowStatus) {
        let success = status == WorkflowStatus::Completed;
        tracing::info!(workflow_id = %workflow_id, status = %status, "workflow finished");
        self.emit(WorkflowEvent::Completed {
            workflow_id,
            success,
            status,
        });
    }

    pub fn task_started(&self, workflow_id: Uuid, task_id: &str, action: &str) {
        tracing::debug!(workflow_id = %workflow_id, task_id, action, "task started");
        self.emit(WorkflowEvent::TaskStarted {
            workflow_id,
            task_id: task_id.to_string(),
            action: action.to_string(),
        });
    }

    pub fn task_completed(&self, workflow_id: Uuid, task_id: &str) {
        tracing::debug!(workflow_id = %workflow_id, task_id, "task completed");
        self.emit(WorkflowEvent::TaskCompleted {
            workflow_id,
            task_id: task_id.to_string(),
            success: true,
        });
    }

    pub fn task_failed(&self, workflow_id: Uuid, task_id: &str, error: &str, will_retry: bool) {
        tracing::info!(workflow_id = %workflow_id, task_id, error, will_retry, "task failed");
        self.emit(WorkflowEvent::TaskFailed {
            workflow_id,
            task_id: task_id.to_string(),
            error: error.to_string(),
            will_retry,
        });
    }

    pub fn task_skipped(&self, workflow_id: Uuid, task_id: &str, reason: SkipReason) {
        self.emit(WorkflowEvent::TaskSkipped {
            workflow_id,
            task_id: task_id.to_string(),
            reason,
        });
    }

    pub fn template_created(&self, template: &WorkflowTemplate) {
        self.emit(WorkflowEvent::TemplateCreated {
            template_id: template.id,
            name: template.name.clone(),
        });
    }

    pub fn template_updated(&self, template_id: Uuid) {
        self.emit(WorkflowEvent::TemplateUpdated { template_id });
    }

    pub fn template_versioned(&self, original_template_id: Uuid, template: &WorkflowTemplate) {
        self.emit(WorkflowEvent::TemplateVersioned {
            original_template_id,
            new_template_id: template.id,
            version: template.version.clone(),
        });
    }

    pub fn template_deleted(&self, template_id: Uuid) {
        self.emit(WorkflowEvent::TemplateDeleted { template_id });
    }
}
