//! Engine status overview command.

use anyhow::Result;
use console::style;
use unitflow_types::workflow::WorkflowStatus;

use crate::state::AppState;

const STATUSES: [WorkflowStatus; 6] = [
    WorkflowStatus::Pending,
    WorkflowStatus::Running,
    WorkflowStatus::Paused,
    WorkflowStatus::Completed,
    WorkflowStatus::Failed,
    WorkflowStatus::Cancelled,
];

/// Display workflow counts by status, templates and storage locations.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let workflows = state.engine.get_all_workflows().await;
    let active = state.engine.list_active_workflows().await;
    let templates = state.engine.get_all_templates();
    let counts: Vec<(WorkflowStatus, usize)> = STATUSES
        .iter()
        .map(|s| (*s, workflows.iter().filter(|w| w.status == *s).count()))
        .collect();
    let template_dir = state
        .engine
        .config()
        .template_directory
        .as_ref()
        .map(|p| p.display().to_string());

    if json {
        let by_status: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(s, n)| (s.to_string(), serde_json::json!(n)))
            .collect();
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "template_directory": template_dir,
            "templates": templates.len(),
            "workflows": {
                "total": workflows.len(),
                "active": active.len(),
                "by_status": by_status,
            },
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} unitflow v{}", style("~").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Workflows ──").dim());
    println!("  Total:  {}", style(workflows.len()).bold());
    println!("  Active: {}", style(active.len()).green());
    for (status, n) in counts.iter().filter(|(_, n)| *n > 0) {
        println!("  {:<10} {n}", format!("{status}:"));
    }
    println!();

    println!("  {}", style("── Templates ──").dim());
    println!("  Registered: {}", style(templates.len()).bold());
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir:  {}", style(state.data_dir.display()).dim());
    if let Some(dir) = template_dir {
        println!("  Templates: {}", style(dir).dim());
    }
    println!("  Database:  {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
