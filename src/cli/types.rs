//! CLI type definitions: clap command structures defining the interface
//! (spec §6). Grounded on the teacher's `cli/types.rs` subcommand layout.

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "aichestrator")]
#[command(about = "Orchestrates a fleet of isolated LLM worker processes against a task", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a new task and run it to completion
    Run {
        /// Natural-language description of the task
        description: String,

        /// Path to the project the task operates on
        #[arg(short, long)]
        project_path: String,

        /// Task category
        #[arg(short = 't', long)]
        task_type: Option<String>,

        /// Maximum concurrent agents (1-10)
        #[arg(long)]
        max_agents: Option<u8>,

        /// Overall task timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Resume a previously interrupted task
    Resume {
        /// The task id to resume
        task_id: Uuid,
    },

    /// Show a task's current status
    Status {
        /// The task id to inspect
        task_id: Uuid,
    },

    /// List registered agents and their liveness
    Agents,

    /// Run one health-check pass over the agent fleet and report results
    Health,

    /// Check connectivity to the configured LLM backend
    Ping,

    /// Remove a task's agents and transient state (does not delete results)
    Clear {
        /// The task id to clear
        task_id: Uuid,
    },
}
