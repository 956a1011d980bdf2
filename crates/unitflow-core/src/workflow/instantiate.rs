//! Turning blueprints into live workflows.
//!
//! Template instantiation gives every task a fresh id and rewrites each
//! dependency and task-status condition through a translation table built
//! while copying, so no template-local id survives into the workflow.

use std::collections::HashMap;

use chrono::Utc;
use unitflow_types::context::WorkflowContext;
use unitflow_types::workflow::{
    Workflow, WorkflowExecutionOptions, WorkflowSpec, WorkflowStatus, WorkflowTask,
    WorkflowTemplate,
};
use uuid::Uuid;

use super::definition::{EngineError, validate_name, validate_workflow_tasks};

/// Instantiate `template` as a pending workflow.
///
/// Context is the template variables overlaid with `options.context`.
pub fn from_template(
    template: &WorkflowTemplate,
    options: &WorkflowExecutionOptions,
) -> Result<Workflow, EngineError> {
    let mut id_map: HashMap<&str, String> = HashMap::new();
    let mut tasks: Vec<WorkflowTask> = Vec::with_capacity(template.tasks.len());

    for blueprint in &template.tasks {
        let new_id = Uuid::now_v7().to_string();
        if let Some(old_id) = blueprint.id.as_deref() {
            id_map.insert(old_id, new_id.clone());
        }
        tasks.push(WorkflowTask::from_blueprint(blueprint, new_id));
    }

    for task in tasks.iter_mut() {
        for dep in task.dependencies.iter_mut() {
            if let Some(new_id) = id_map.get(dep.as_str()) {
                *dep = new_id.clone();
            }
        }
        for condition in task.conditions.iter_mut() {
            if let Some(task_id) = condition.task_id_mut() {
                if let Some(new_id) = id_map.get(task_id.as_str()) {
                    *task_id = new_id.clone();
                }
            }
        }
    }

    validate_workflow_tasks(&tasks)?;

    let mut context = WorkflowContext::from(template.variables.clone());
    context.merge(&options.context);

    Ok(Workflow {
        id: Uuid::now_v7(),
        name: template.name.clone(),
        description: template.description.clone(),
        version: template.version.clone(),
        status: WorkflowStatus::Pending,
        tasks,
        context,
        template_id: Some(template.id),
        owner: options.owner.clone(),
        metadata: options.metadata.clone(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    })
}

/// Instantiate a directly supplied workflow. Ids are kept; missing ones are
/// generated. No remapping happens.
pub fn from_spec(spec: WorkflowSpec, options: &WorkflowExecutionOptions) -> Result<Workflow, EngineError> {
    validate_name("workflow", &spec.name)?;

    let tasks: Vec<WorkflowTask> = spec
        .tasks
        .iter()
        .map(|blueprint| {
            let id = blueprint
                .id
                .clone()
                .unwrap_or_else(|| Uuid::now_v7().to_string());
            WorkflowTask::from_blueprint(blueprint, id)
        })
        .collect();
    validate_workflow_tasks(&tasks)?;

    let mut context = WorkflowContext::from(spec.context);
    context.merge(&options.context);

    let mut metadata = spec.metadata;
    metadata.extend(options.metadata.clone());

    Ok(Workflow {
        id: Uuid::now_v7(),
        name: spec.name,
        description: spec.description,
        version: spec.version,
        status: WorkflowStatus::Pending,
        tasks,
        context,
        template_id: spec.template_id,
        owner: options.owner.clone().or(spec.owner),
        metadata,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
