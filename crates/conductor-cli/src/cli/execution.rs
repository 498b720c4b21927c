//! CLI execution subcommands: list, show, events, delete, replay, sweep.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use conductor_core::execution::{StaleExecutionSweeper, replay};
use conductor_core::repository::execution::ExecutionRepository;
use conductor_types::execution::{ExecutionStatus, StepStatus, WorkflowExecution};

use crate::state::AppState;

/// Execution subcommands.
#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// List recent executions, most recently updated first.
    #[command(alias = "ls")]
    List {
        /// Only executions with this status.
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one execution with its step results.
    Show {
        /// Execution UUID.
        id: String,
    },

    /// Print the event log of an execution.
    Events {
        /// Execution UUID.
        id: String,
    },

    /// Delete an execution and its events.
    #[command(alias = "rm")]
    Delete {
        /// Execution UUID.
        id: String,
    },
}

/// Handle an `executions` subcommand.
pub async fn handle_execution_command(cmd: ExecutionCommand, state: &AppState, json: bool) -> Result<()> {
    let repo = state.executions.as_ref();
    match cmd {
        ExecutionCommand::List { status, limit } => handle_list(repo, status.as_deref(), limit, json).await,
        ExecutionCommand::Show { id } => handle_show(repo, &parse_id(&id)?, json).await,
        ExecutionCommand::Events { id } => handle_events(repo, &parse_id(&id)?, json).await,
        ExecutionCommand::Delete { id } => handle_delete(repo, &parse_id(&id)?, json).await,
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Invalid execution ID: '{raw}'"))
}

fn short(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn format_status(status: ExecutionStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        ExecutionStatus::Pending => cell.fg(Color::Yellow),
        ExecutionStatus::Running => cell.fg(Color::Blue),
        ExecutionStatus::Paused => cell.fg(Color::Magenta),
        ExecutionStatus::Completed => cell.fg(Color::Green),
        ExecutionStatus::Failed => cell.fg(Color::Red),
    }
}

fn format_step_status(status: StepStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        StepStatus::Completed => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::Running => cell.fg(Color::Blue),
        _ => cell,
    }
}

// ---------------------------------------------------------------------------
// List / Show / Events / Delete
// ---------------------------------------------------------------------------

async fn handle_list(repo: &impl ExecutionRepository, status: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let status = status
        .map(|s| s.parse::<ExecutionStatus>().map_err(anyhow::Error::msg))
        .transpose()?;
    let executions = repo
        .list_executions(status, limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Work item"),
            Cell::new("Status"),
            Cell::new("Step"),
            Cell::new("Updated"),
        ]);

    for e in &executions {
        table.add_row(vec![
            Cell::new(short(&e.id)),
            Cell::new(&e.workflow_id),
            Cell::new(&e.work_item_id),
            format_status(e.status),
            Cell::new(e.current_step_id.as_deref().unwrap_or("-")),
            Cell::new(e.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn load(repo: &impl ExecutionRepository, id: &Uuid) -> Result<WorkflowExecution> {
    repo.get_execution(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get execution: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Execution '{id}' not found"))
}

async fn handle_show(repo: &impl ExecutionRepository, id: &Uuid, json: bool) -> Result<()> {
    let execution = load(repo, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Execution").bold(), style(execution.id).cyan());
    println!("  Workflow: {}", style(&execution.workflow_id).cyan());
    println!("  Work item: {}", execution.work_item_id);
    if let Some(job) = &execution.job_id {
        println!("  Job: {job}");
    }
    println!("  Status: {}", execution.status);
    if let Some(branch) = &execution.branch_name {
        println!("  Branch: {branch}");
    }
    println!("  Started: {}", execution.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", execution.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = execution.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(err) = &execution.error {
        println!("  Error: {}", style(err).red());
    }

    if !execution.step_results.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("Status"),
                Cell::new("Started"),
                Cell::new("Duration"),
                Cell::new("Error"),
            ]);
        for r in &execution.step_results {
            table.add_row(vec![
                Cell::new(&r.step_id),
                format_step_status(r.status),
                Cell::new(r.started_at.format("%H:%M:%S").to_string()),
                Cell::new(r.duration_ms.map(|ms| format!("{ms} ms")).unwrap_or_else(|| "-".into())),
                Cell::new(
                    r.error
                        .as_ref()
                        .map(|e| e.chars().take(40).collect::<String>())
                        .unwrap_or_else(|| "-".into()),
                ),
            ]);
        }
        println!();
        println!("{table}");
    }
    println!();
    Ok(())
}

async fn handle_events(repo: &impl ExecutionRepository, id: &Uuid, json: bool) -> Result<()> {
    let events = repo
        .list_events(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list events: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!();
        println!("  No events for execution '{}'.", short(id));
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Time"),
            Cell::new("Data"),
        ]);
    for e in &events {
        let data = e.data.payload().map(|v| v.to_string()).unwrap_or_default();
        table.add_row(vec![
            Cell::new(e.sequence_number),
            Cell::new(e.event_type()),
            Cell::new(e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
            Cell::new(data.chars().take(80).collect::<String>()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_delete(repo: &impl ExecutionRepository, id: &Uuid, json: bool) -> Result<()> {
    let deleted = repo
        .delete_execution(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to delete execution: {e}"))?;
    if !deleted {
        bail!("Execution '{id}' not found");
    }

    if json {
        println!("{}", serde_json::json!({"deleted": id.to_string()}));
    } else {
        println!();
        println!("  {} Deleted execution '{}'", style("*").green().bold(), style(short(id)).cyan());
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

pub async fn handle_replay(raw_id: &str, state: &AppState, json: bool) -> Result<()> {
    let id = parse_id(raw_id)?;
    let events = state
        .executions
        .list_events(&id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list events: {e}"))?;
    if events.is_empty() {
        bail!("Execution '{id}' has no events");
    }

    let summary = replay(&events);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let dash = || "-".to_string();
    println!();
    println!(
        "  {} {}",
        style("Replay of").bold(),
        style(summary.execution_id.map(|id| id.to_string()).unwrap_or_else(dash)).cyan()
    );
    println!("  Workflow: {}", style(summary.workflow_id.clone().unwrap_or_else(dash)).cyan());
    println!("  Work item: {}", summary.work_item_id.clone().unwrap_or_else(dash));
    println!("  Status: {}", summary.status);
    println!("  Completed steps: {}", summary.completed_steps);
    if summary.failed_steps > 0 {
        println!("  Failed steps: {}", style(summary.failed_steps).red());
    }
    if let Some(seq) = summary.last_sequence {
        println!("  Last sequence: {seq}");
    }
    println!();
    for line in &summary.timeline {
        println!("  {}", style(line).dim());
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

pub async fn handle_sweep(state: &AppState, watch: bool, json: bool) -> Result<()> {
    let sweeper = StaleExecutionSweeper::new(Arc::clone(&state.executions), &state.config);

    if !watch {
        let recovered = sweeper
            .sweep_once()
            .await
            .map_err(|e| anyhow::anyhow!("Stale sweep failed: {e}"))?;
        if json {
            let ids: Vec<String> = recovered.iter().map(Uuid::to_string).collect();
            println!("{}", serde_json::json!({"recovered": ids}));
        } else {
            println!();
            println!(
                "  {} Marked {} stale execution(s) failed",
                style("*").green().bold(),
                recovered.len()
            );
            for id in &recovered {
                println!("    {}", style(id).cyan());
            }
            println!();
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    if !json {
        println!(
            "  {} Sweeping every {}s (stale after {} min)",
            style("⚡").bold(),
            state.config.sweep_interval().as_secs(),
            state.config.stale_threshold_minutes
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    sweeper.run(cancel).await;
    signal.abort();
    Ok(())
}
