//! CLI workflow document subcommands.
//!
//! Offline: validate, convert. Against the store: import, list, show,
//! delete, resolve.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use conductor_core::repository::workflow::WorkflowRepository;
use conductor_core::workflow::catalog::{discover_workflow_files, load_workflow_file};
use conductor_core::workflow::{DocumentFormat, WorkflowPreparer, convert, serialize};
use conductor_types::workflow::Workflow;

use crate::state::AppState;

/// Stored workflow subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// List stored workflows.
    #[command(alias = "ls")]
    List,

    /// Show a workflow as stored (before inheritance is resolved).
    Show {
        /// Workflow id.
        id: String,

        /// Output document format.
        #[arg(long, value_enum, default_value = "yaml")]
        format: super::FormatArg,
    },

    /// Delete a stored workflow.
    #[command(alias = "rm")]
    Delete {
        /// Workflow id.
        id: String,
    },
}

/// Handle a `workflows` subcommand.
pub async fn handle_workflow_command(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::List => handle_list(state, json).await,
        WorkflowCommand::Show { id, format } => handle_show(&id, format.into(), state, json).await,
        WorkflowCommand::Delete { id } => handle_delete(&id, state, json).await,
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Parse every file; report all failures before erroring.
pub async fn handle_validate(files: &[PathBuf], json: bool) -> Result<()> {
    let mut results = Vec::with_capacity(files.len());
    for file in files {
        results.push((file, load_workflow_file(file).await));
    }

    let failures = results.iter().filter(|(_, r)| r.is_err()).count();

    if json {
        let out: Vec<_> = results
            .iter()
            .map(|(file, r)| match r {
                Ok(wf) => serde_json::json!({
                    "file": file.display().to_string(),
                    "valid": true,
                    "id": wf.id,
                    "steps": wf.steps.len(),
                }),
                Err(e) => serde_json::json!({
                    "file": file.display().to_string(),
                    "valid": false,
                    "error": e.to_string(),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        for (file, r) in &results {
            match r {
                Ok(wf) => println!(
                    "  {} {} ({}, {} steps)",
                    style("✓").green(),
                    file.display(),
                    style(&wf.id).cyan(),
                    wf.steps.len()
                ),
                Err(e) => println!("  {} {}: {}", style("✗").red(), file.display(), style(e).red()),
            }
        }
        println!();
    }

    if failures > 0 {
        bail!("{failures} of {} workflow documents are invalid", results.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Convert
// ---------------------------------------------------------------------------

pub async fn handle_convert(file: &Path, to: DocumentFormat, output: Option<&Path>) -> Result<()> {
    let from = DocumentFormat::from_path(file)
        .with_context(|| format!("Cannot tell the format of '{}' from its extension", file.display()))?;
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read '{}'", file.display()))?;

    let converted = convert(&text, from, to).map_err(|e| anyhow::anyhow!("Conversion failed: {e}"))?;

    match output {
        Some(path) => {
            tokio::fs::write(path, converted)
                .await
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            tracing::info!(from = %file.display(), to = %path.display(), "workflow converted");
        }
        None => print!("{converted}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

pub async fn handle_import(path: &Path, state: &AppState, json: bool) -> Result<()> {
    let files = if tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Cannot access '{}'", path.display()))?
        .is_dir()
    {
        discover_workflow_files(path).await?
    } else {
        vec![path.to_path_buf()]
    };

    let mut imported: Vec<Workflow> = Vec::new();
    for file in &files {
        let workflow = load_workflow_file(file)
            .await
            .with_context(|| format!("Failed to load '{}'", file.display()))?;
        state
            .catalog
            .publish(&workflow)
            .await
            .with_context(|| format!("Failed to save workflow '{}'", workflow.id))?;
        imported.push(workflow);
    }

    if json {
        let out: Vec<_> = imported
            .iter()
            .map(|w| serde_json::json!({"id": w.id, "name": w.name, "steps": w.steps.len()}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        for w in &imported {
            println!(
                "  {} Imported '{}' ({} steps)",
                style("*").green().bold(),
                style(&w.id).cyan(),
                w.steps.len()
            );
        }
        if imported.is_empty() {
            println!("  No workflow documents found under '{}'.", path.display());
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List / Show / Delete
// ---------------------------------------------------------------------------

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let store = state
        .catalog
        .store()
        .context("No workflow store configured")?;
    let workflows = store
        .list_workflows()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;

    if json {
        let out: Vec<_> = workflows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "id": w.id,
                    "name": w.name,
                    "extends": w.extends,
                    "abstract": w.is_abstract,
                    "steps": w.steps.len(),
                    "updated_at": w.updated_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!("  Import some with: {}", style("conductor import <dir-or-file>").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Extends"),
            Cell::new("Steps"),
            Cell::new("Updated"),
        ]);

    for w in &workflows {
        let id_cell = if w.is_abstract {
            Cell::new(format!("{} (abstract)", w.id)).fg(Color::DarkGrey)
        } else {
            Cell::new(&w.id)
        };
        table.add_row(vec![
            id_cell,
            Cell::new(&w.name),
            Cell::new(w.extends.as_deref().unwrap_or("-")),
            Cell::new(w.steps.len()),
            Cell::new(w.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(id: &str, format: DocumentFormat, state: &AppState, json: bool) -> Result<()> {
    let workflow = state
        .catalog
        .find(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Workflow '{id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        print!("{}", serialize(&workflow, format)?);
    }
    Ok(())
}

async fn handle_delete(id: &str, state: &AppState, json: bool) -> Result<()> {
    if !state.catalog.remove(id).await? {
        bail!("Workflow '{id}' not found");
    }

    if json {
        println!("{}", serde_json::json!({"deleted": id}));
    } else {
        println!();
        println!("  {} Deleted workflow '{}'", style("*").green().bold(), style(id).cyan());
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

pub async fn handle_resolve(
    id: &str,
    params: &BTreeMap<String, Value>,
    work_item: Option<Value>,
    format: DocumentFormat,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let preparer = WorkflowPreparer::new(&state.catalog, &state.config);
    let prepared = preparer.prepare(id, params, work_item).await?;

    if json {
        let out = serde_json::json!({
            "workflow": prepared.workflow,
            "variables": prepared.variables,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if !prepared.variables.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![Cell::new("Variable").fg(Color::Cyan), Cell::new("Value")]);
        for (name, value) in &prepared.variables {
            table.add_row(vec![Cell::new(name), Cell::new(value.to_string())]);
        }
        eprintln!("{table}");
    }
    print!("{}", serialize(&prepared.workflow, format)?);
    Ok(())
}
