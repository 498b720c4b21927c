//! conductor CLI entry point.
//!
//! Binary name: `conductor`
//!
//! Parses CLI arguments, initializes tracing and, for commands that need it,
//! the database, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands, parse_bindings, parse_json_arg};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,conductor=debug",
        _ => "trace",
    };
    conductor_observe::tracing_setup::init_tracing_with_filter(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    conductor_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let json = cli.json;

    // Offline commands don't need app state
    let command = match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "conductor", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { files } => return cli::workflow::handle_validate(&files, json).await,
        Commands::Convert { file, to, output } => {
            return cli::workflow::handle_convert(&file, to.into(), output.as_deref()).await;
        }
        Commands::Eval {
            text,
            work_item,
            vars,
            condition,
        } => {
            let work_item = parse_json_arg(work_item.as_deref(), "work item")?;
            return cli::eval::handle_eval(&text, work_item, parse_bindings(&vars)?, condition, json);
        }
        other => other,
    };

    let state = AppState::init().await?;

    match command {
        Commands::Import { path } => cli::workflow::handle_import(&path, &state, json).await,
        Commands::Workflows { action } => {
            cli::workflow::handle_workflow_command(action, &state, json).await
        }
        Commands::Resolve {
            id,
            params,
            work_item,
            format,
        } => {
            let work_item = parse_json_arg(work_item.as_deref(), "work item")?;
            let params = parse_bindings(&params)?;
            cli::workflow::handle_resolve(&id, &params, work_item, format.into(), &state, json).await
        }
        Commands::Executions { action } => {
            cli::execution::handle_execution_command(action, &state, json).await
        }
        Commands::Replay { id } => cli::execution::handle_replay(&id, &state, json).await,
        Commands::Sweep { watch } => cli::execution::handle_sweep(&state, watch, json).await,
        Commands::Completions { .. }
        | Commands::Validate { .. }
        | Commands::Convert { .. }
        | Commands::Eval { .. } => Ok(()),
    }
}
