//! CLI command definitions for the `unitflow` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a
//! noun-verb pattern (e.g., `unitflow template list`, `unitflow workflow show`).

pub mod status;
pub mod template;
pub mod workflow;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Color};
use unitflow_types::workflow::{TaskStatus, WorkflowStatus};

/// Inspect and steer unitflow workflow state.
#[derive(Parser)]
#[command(name = "unitflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for verbose, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow templates.
    Template {
        #[command(subcommand)]
        command: template::TemplateCommand,
    },

    /// Inspect and control workflows.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        command: workflow::WorkflowCommand,
    },

    /// Show engine status overview.
    Status,
}

pub(crate) fn workflow_status_cell(status: WorkflowStatus) -> Cell {
    let color = match status {
        WorkflowStatus::Pending => Color::Yellow,
        WorkflowStatus::Running => Color::Blue,
        WorkflowStatus::Paused => Color::Magenta,
        WorkflowStatus::Completed => Color::Green,
        WorkflowStatus::Failed => Color::Red,
        WorkflowStatus::Cancelled => Color::DarkYellow,
    };
    Cell::new(status).fg(color)
}

pub(crate) fn task_status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Pending => Color::Yellow,
        TaskStatus::Running => Color::Blue,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Skipped => Color::DarkGrey,
        TaskStatus::Cancelled => Color::DarkYellow,
    };
    Cell::new(status).fg(color)
}
