//! CLI template management subcommands.
//!
//! Provides list, show, import, bump and delete for workflow templates
//! stored under the data directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use unitflow_core::workflow::dag::execution_stages;
use unitflow_core::workflow::definition::TaskShape;
use unitflow_types::workflow::{TemplateBlueprint, TemplateUpdate, WorkflowTemplate};

use crate::state::AppState;

/// Template management subcommands.
#[derive(Subcommand)]
pub enum TemplateCommand {
    /// List all templates.
    #[command(alias = "ls")]
    List,

    /// Show a template and its execution stages.
    Show {
        /// Template id or name.
        template: String,
    },

    /// Register a template from a JSON file.
    Import {
        /// Path to the template JSON file.
        file: PathBuf,
    },

    /// Publish a new version of a template under a new id.
    Bump {
        /// Template id or name.
        template: String,

        /// The new version string.
        version: String,
    },

    /// Delete a template.
    #[command(alias = "rm")]
    Delete {
        /// Template id or name.
        template: String,
    },
}

/// Handle a template subcommand.
pub async fn handle_template_command(cmd: TemplateCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        TemplateCommand::List => handle_list(state, json),
        TemplateCommand::Show { template } => handle_show(&template, state, json),
        TemplateCommand::Import { file } => handle_import(&file, state, json).await,
        TemplateCommand::Bump { template, version } => handle_bump(&template, version, state, json).await,
        TemplateCommand::Delete { template } => handle_delete(&template, state, json).await,
    }
}

fn find_template(state: &AppState, id_or_name: &str) -> Result<WorkflowTemplate> {
    state
        .engine
        .get_template(id_or_name)
        .with_context(|| format!("Template '{id_or_name}' not found"))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let templates = state.engine.get_all_templates();

    if json {
        println!("{}", serde_json::to_string_pretty(&templates)?);
        return Ok(());
    }

    if templates.is_empty() {
        println!();
        println!("  No templates registered.");
        println!(
            "  Import one with: {}",
            style("unitflow template import <file.json>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Tasks"),
            Cell::new("ID"),
            Cell::new("Created"),
        ]);

    for t in &templates {
        table.add_row(vec![
            Cell::new(&t.name),
            Cell::new(&t.version),
            Cell::new(t.tasks.len()),
            Cell::new(t.id),
            Cell::new(t.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

fn handle_show(id_or_name: &str, state: &AppState, json: bool) -> Result<()> {
    let template = find_template(state, id_or_name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&template)?);
        return Ok(());
    }

    let shapes = template
        .tasks
        .iter()
        .map(TaskShape::of_blueprint)
        .collect::<Result<Vec<_>, _>>()?;
    let stage_of: HashMap<&str, usize> = execution_stages(&shapes)?
        .into_iter()
        .enumerate()
        .flat_map(|(stage, ids)| ids.into_iter().map(move |id| (id, stage + 1)))
        .collect();

    println!();
    println!(
        "  {} {} v{}",
        style("Template").bold(),
        style(&template.name).cyan(),
        template.version
    );
    println!("  ID: {}", template.id);
    if let Some(description) = &template.description {
        println!("  Description: {description}");
    }
    if let Some(author) = &template.author {
        println!("  Author: {author}");
    }
    if !template.variables.is_empty() {
        println!("  Variables: {}", serde_json::Value::Object(template.variables.clone()));
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
            Cell::new("Depends on"),
            Cell::new("Conditions"),
            Cell::new("Retries"),
        ]);

    let names: HashMap<&str, &str> = template
        .tasks
        .iter()
        .filter_map(|t| t.id.as_deref().map(|id| (id, t.name.as_str())))
        .collect();

    for task in &template.tasks {
        let id = task.id.as_deref().unwrap_or_default();
        let deps: Vec<&str> = task
            .dependencies
            .iter()
            .map(|d| names.get(d.as_str()).copied().unwrap_or(d.as_str()))
            .collect();
        table.add_row(vec![
            Cell::new(stage_of.get(id).copied().unwrap_or_default()),
            Cell::new(&task.name),
            Cell::new(&task.action),
            Cell::new(deps.join(", ")),
            Cell::new(task.conditions.len()),
            Cell::new(task.retries),
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

async fn handle_import(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let blueprint: TemplateBlueprint = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse template JSON in {}", file.display()))?;

    let template = state
        .engine
        .create_template(blueprint)
        .await
        .context("Template validation failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&template)?);
    } else {
        println!();
        println!(
            "  {} Imported template '{}'",
            style("*").green().bold(),
            style(&template.name).cyan()
        );
        println!("  ID: {}", template.id);
        println!("  Version: {}", template.version);
        println!("  Tasks: {}", template.tasks.len());
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bump
// ---------------------------------------------------------------------------

async fn handle_bump(id_or_name: &str, version: String, state: &AppState, json: bool) -> Result<()> {
    let original = find_template(state, id_or_name)?;
    let update = TemplateUpdate {
        version: Some(version),
        ..TemplateUpdate::default()
    };
    let template = state.engine.update_template(original.id, update).await?;

    if json {
        let out = serde_json::json!({
            "original_id": original.id.to_string(),
            "id": template.id.to_string(),
            "version": template.version,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} '{}' v{} -> v{}",
            style("*").green().bold(),
            style(&template.name).cyan(),
            original.version,
            template.version
        );
        println!("  New ID: {}", template.id);
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(id_or_name: &str, state: &AppState, json: bool) -> Result<()> {
    let template = find_template(state, id_or_name)?;
    state.engine.delete_template(template.id).await?;

    if json {
        println!("{}", serde_json::json!({"deleted": template.id.to_string()}));
    } else {
        println!(
            "  {} Deleted template '{}' ({})",
            style("*").green().bold(),
            template.name,
            template.id
        );
    }
    Ok(())
}
