//! CLI workflow subcommands.
//!
//! Provides list, show, create, pause and cancel for workflows in the
//! persisted engine state. The CLI has no executors, so created workflows
//! stay pending until an engine process with executors starts them.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use unitflow_core::workflow::dag::execution_stages;
use unitflow_core::workflow::definition::TaskShape;
use unitflow_types::workflow::{TaskStatus, Workflow, WorkflowExecutionOptions, WorkflowStatus};
use uuid::Uuid;

use super::{task_status_cell, workflow_status_cell};
use crate::state::AppState;

/// Workflow subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// List workflows.
    #[command(alias = "ls")]
    List {
        /// Only show workflows currently eligible for scheduling.
        #[arg(long)]
        active: bool,
    },

    /// Show a workflow and the state of its tasks.
    Show {
        /// Workflow UUID.
        id: String,
    },

    /// Instantiate a workflow from a template.
    Create {
        /// Template id or name.
        template: String,

        /// Initial context as a JSON object, merged over the template variables.
        #[arg(long)]
        context: Option<String>,

        /// Owner recorded on the workflow.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Pause a running workflow.
    Pause {
        /// Workflow UUID.
        id: String,
    },

    /// Cancel a workflow.
    Cancel {
        /// Workflow UUID.
        id: String,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::List { active } => handle_list(active, state, json).await,
        WorkflowCommand::Show { id } => handle_show(&id, state, json).await,
        WorkflowCommand::Create {
            template,
            context,
            owner,
        } => handle_create(&template, context.as_deref(), owner, state, json).await,
        WorkflowCommand::Pause { id } => handle_pause(&id, state, json).await,
        WorkflowCommand::Cancel { id } => handle_cancel(&id, state, json).await,
    }
}

fn parse_workflow_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid workflow id '{id}'"))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(active_only: bool, state: &AppState, json: bool) -> Result<()> {
    let mut workflows = state.engine.get_all_workflows().await;
    if active_only {
        let active = state.engine.list_active_workflows().await;
        workflows.retain(|w| active.contains(&w.id));
    }

    if json {
        let out: Vec<_> = workflows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "id": w.id.to_string(),
                    "name": w.name,
                    "version": w.version,
                    "status": w.status,
                    "tasks": w.tasks.len(),
                    "template_id": w.template_id,
                    "created_at": w.created_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows found.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID"),
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Progress"),
            Cell::new("Created"),
        ]);

    for w in &workflows {
        table.add_row(vec![
            Cell::new(w.id),
            Cell::new(&w.name),
            workflow_status_cell(w.status),
            Cell::new(progress(w)),
            Cell::new(w.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// `done/total`, counting every terminal task as done.
fn progress(workflow: &Workflow) -> String {
    let done = workflow.tasks.iter().filter(|t| t.is_terminal()).count();
    format!("{done}/{}", workflow.tasks.len())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

async fn handle_show(id: &str, state: &AppState, json: bool) -> Result<()> {
    let workflow_id = parse_workflow_id(id)?;
    let workflow = state
        .engine
        .get_workflow(workflow_id)
        .await
        .with_context(|| format!("Workflow '{id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }

    let shapes: Vec<TaskShape<'_>> = workflow.tasks.iter().map(TaskShape::of_task).collect();
    let stage_of: HashMap<&str, usize> = execution_stages(&shapes)?
        .into_iter()
        .enumerate()
        .flat_map(|(stage, ids)| ids.into_iter().map(move |id| (id, stage + 1)))
        .collect();

    println!();
    println!(
        "  {} {} v{}",
        style("Workflow").bold(),
        style(&workflow.name).cyan(),
        workflow.version
    );
    println!("  ID: {}", workflow.id);
    println!("  Status: {}", workflow.status);
    if let Some(template_id) = workflow.template_id {
        println!("  Template: {template_id}");
    }
    if let Some(owner) = &workflow.owner {
        println!("  Owner: {owner}");
    }
    println!("  Created: {}", workflow.created_at.to_rfc3339());
    if let Some(started) = workflow.started_at {
        println!("  Started: {}", started.to_rfc3339());
    }
    if let Some(completed) = workflow.completed_at {
        println!("  Finished: {}", completed.to_rfc3339());
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Stage"),
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Action"),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for task in &workflow.tasks {
        let duration = match (task.start_time, task.end_time) {
            (Some(start), Some(end)) => format!("{}ms", (end - start).num_milliseconds()),
            _ => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(stage_of.get(task.id.as_str()).copied().unwrap_or_default()),
            Cell::new(&task.name),
            Cell::new(&task.action),
            task_status_cell(task.status),
            Cell::new(duration),
            Cell::new(task.error.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");

    let counts = workflow.task_counts();
    let failed = counts.get(&TaskStatus::Failed).copied().unwrap_or(0);
    if failed > 0 {
        println!("  {} {failed} failed attempt(s)", style("!").red().bold());
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

async fn handle_create(
    template: &str,
    context: Option<&str>,
    owner: Option<String>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let mut options = WorkflowExecutionOptions {
        owner,
        ..WorkflowExecutionOptions::default()
    };
    if let Some(raw) = context {
        let value: serde_json::Value = serde_json::from_str(raw).context("Invalid --context JSON")?;
        let serde_json::Value::Object(map) = value else {
            bail!("--context must be a JSON object");
        };
        options.context = map;
    }

    let workflow = state
        .engine
        .create_workflow_from_template(template, options)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        println!();
        println!(
            "  {} Created workflow '{}' from template",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!("  ID: {}", workflow.id);
        println!("  Tasks: {}", workflow.tasks.len());
        println!("  Status: {}", workflow.status);
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pause / Cancel
// ---------------------------------------------------------------------------

async fn handle_pause(id: &str, state: &AppState, json: bool) -> Result<()> {
    let workflow_id = parse_workflow_id(id)?;
    let before = state
        .engine
        .get_workflow(workflow_id)
        .await
        .with_context(|| format!("Workflow '{id}' not found"))?;
    if before.status != WorkflowStatus::Running {
        bail!(
            "Workflow is not running (current status: {}). Only running workflows can be paused.",
            before.status
        );
    }

    let workflow = state.engine.pause_workflow(workflow_id).await?;
    report_transition(&workflow, "Paused", json)
}

async fn handle_cancel(id: &str, state: &AppState, json: bool) -> Result<()> {
    let workflow_id = parse_workflow_id(id)?;
    let before = state
        .engine
        .get_workflow(workflow_id)
        .await
        .with_context(|| format!("Workflow '{id}' not found"))?;
    if before.is_terminal() {
        bail!(
            "Workflow has already finished (status: {}). Cannot cancel.",
            before.status
        );
    }

    let workflow = state.engine.cancel_workflow(workflow_id).await?;
    report_transition(&workflow, "Cancelled", json)
}

fn report_transition(workflow: &Workflow, verb: &str, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "id": workflow.id.to_string(),
            "status": workflow.status,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "  {} {verb} workflow '{}' ({}), status: {}",
            style("*").green().bold(),
            workflow.name,
            workflow.id,
            workflow.status
        );
    }
    Ok(())
}
