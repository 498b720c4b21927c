//! CLI command definitions for the `conductor` binary.
//!
//! Uses clap derive macros for argument parsing. Document commands
//! (`validate`, `convert`, `eval`) work offline; the rest open the data
//! directory's database.

pub mod eval;
pub mod execution;
pub mod workflow;

use std::collections::BTreeMap;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use conductor_core::workflow::DocumentFormat;
use serde_json::Value;

/// Define, resolve and track workflow executions.
#[derive(Parser)]
#[command(name = "conductor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "CONDUCTOR_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate workflow documents.
    Validate {
        /// Workflow files (.yaml, .yml or .json).
        #[arg(required = true)]
        files: Vec<std::path::PathBuf>,
    },

    /// Convert a workflow document between the structured and legacy forms.
    Convert {
        /// Source document.
        file: std::path::PathBuf,

        /// Target format.
        #[arg(long, value_enum, default_value = "yaml")]
        to: FormatArg,

        /// Write to this path instead of stdout.
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },

    /// Evaluate a template or expression against a context.
    Eval {
        /// Template text, e.g. `fix/${workItem.id}` or `${length(variables.files)}`.
        text: String,

        /// Work item as JSON.
        #[arg(long)]
        work_item: Option<String>,

        /// Variable binding (`name=value`, value parsed as JSON when possible).
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Treat the text as a condition and print its truthiness.
        #[arg(long)]
        condition: bool,
    },

    /// Import workflow documents into the database.
    Import {
        /// A workflow file, or a directory scanned recursively.
        path: std::path::PathBuf,
    },

    /// Manage stored workflows.
    #[command(alias = "wf")]
    Workflows {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Resolve inheritance and parameters for a workflow and print the result.
    Resolve {
        /// Workflow id.
        id: String,

        /// Parameter value (`name=value`, value parsed as JSON when possible).
        #[arg(long = "param", short = 'p', value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Work item as JSON.
        #[arg(long)]
        work_item: Option<String>,

        /// Output document format.
        #[arg(long, value_enum, default_value = "yaml")]
        format: FormatArg,
    },

    /// Inspect and clean up executions.
    #[command(alias = "exec")]
    Executions {
        #[command(subcommand)]
        action: execution::ExecutionCommand,
    },

    /// Rebuild an execution's summary from its event log.
    Replay {
        /// Execution UUID.
        id: String,
    },

    /// Fail running executions that stopped reporting progress.
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl+C.
        #[arg(long)]
        watch: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Workflow document format selector.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FormatArg {
    /// Structured YAML form.
    Yaml,
    /// Legacy flat JSON form.
    Json,
}

impl From<FormatArg> for DocumentFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Yaml => DocumentFormat::Structured,
            FormatArg::Json => DocumentFormat::Legacy,
        }
    }
}

/// Parse `name=value` pairs. Values that parse as JSON keep their type,
/// anything else is a string.
pub fn parse_bindings(pairs: &[String]) -> anyhow::Result<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected NAME=VALUE, got '{pair}'"))?;
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("empty name in '{pair}'");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        out.insert(name.to_string(), value);
    }
    Ok(out)
}

/// Parse an optional JSON argument.
pub fn parse_json_arg(raw: Option<&str>, what: &str) -> anyhow::Result<Option<Value>> {
    raw.map(|s| {
        serde_json::from_str(s).map_err(|e| anyhow::anyhow!("invalid {what} JSON: {e}"))
    })
    .transpose()
}
