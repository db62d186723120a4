//! CLI definitions for flowchain.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// flowchain CLI.
#[derive(Parser)]
#[command(name = "flowchain")]
#[command(about = "Workflow execution engine with suspend/resume and live event streaming")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: config/flowchain.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a workflow to completion or suspension
    Run {
        /// Workflow ID
        workflow: String,

        /// Input as JSON
        #[arg(short, long, default_value = "{}")]
        input: String,

        /// User the run is attributed to
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Run a workflow and print its events as they happen
    Stream {
        /// Workflow ID
        workflow: String,

        /// Input as JSON
        #[arg(short, long, default_value = "{}")]
        input: String,

        /// User the run is attributed to
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Resume a suspended execution
    Resume {
        /// Execution ID
        execution_id: String,

        /// Resume data as JSON
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Cancel a suspended execution
    Cancel {
        /// Execution ID
        execution_id: String,

        /// Cancellation reason
        #[arg(short, long, default_value = "cancelled from the command line")]
        reason: String,
    },

    /// List workflows, or the executions of one workflow
    List {
        /// Workflow ID
        workflow: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show a stored execution record
    Show {
        /// Execution ID
        execution_id: String,
    },
}
