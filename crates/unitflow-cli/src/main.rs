//! unitflow operator CLI entry point.
//!
//! Binary name: `unitflow`
//!
//! Parses CLI arguments, opens the persisted engine state under the data
//! directory, then dispatches to the appropriate command handler.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,unitflow_core=debug",
        _ => "trace",
    };
    unitflow_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    unitflow_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;

    match cli.command {
        Commands::Template { command } => {
            cli::template::handle_template_command(command, &state, cli.json).await
        }
        Commands::Workflow { command } => {
            cli::workflow::handle_workflow_command(command, &state, cli.json).await
        }
        Commands::Status => cli::status::status(&state, cli.json).await,
    }
}
