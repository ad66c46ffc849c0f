//! CLI: wires the infrastructure layer together and dispatches subcommands
//! (spec §6). Grounded on the teacher's `cli/command_dispatcher.rs`.

pub mod output;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::domain::models::TaskInput;
use crate::domain::ports::{LlmClient, Store};
use crate::infrastructure::llm::AnthropicLlmClient;
use crate::infrastructure::store::InMemoryStore;
use crate::services::decomposer::Decomposer;
use crate::services::event_bus::EventBus;
use crate::services::remediator::Remediator;
use crate::services::worker_pool::WorkerPool;
use crate::services::{Orchestrator, ProcessTransportFactory};
use output::{print_output, CommandOutput};
use types::Commands;

const WORKER_BINARY: &str = "aichestrator-worker";

/// All the wiring a single CLI invocation needs. Freshly built per
/// process: the shipped `Store` is in-memory, so state does not survive
/// across invocations (spec §1's KV backend is an out-of-scope, external
/// collaborator — a real deployment points `store_url` at one; see
/// DESIGN.md).
struct Context {
    store: Arc<dyn Store>,
    event_bus: Arc<EventBus>,
    orchestrator: Orchestrator,
}

fn build_context(config: &crate::domain::models::OrchestratorConfig) -> Context {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let event_bus = Arc::new(EventBus::new(store.clone()));
    let pool = Arc::new(WorkerPool::bounded(config.max_workers as usize));
    let llm: Arc<dyn LlmClient> = Arc::new(AnthropicLlmClient::new(
        config.api_key.clone(),
        config.model.clone(),
    ));
    let decomposer = Arc::new(Decomposer::new(llm.clone()));
    let remediator = Arc::new(Remediator::new(llm));
    let transport_factory = Arc::new(ProcessTransportFactory::new(WORKER_BINARY));

    let orchestrator = Orchestrator::new(
        store.clone(),
        event_bus.clone(),
        pool,
        decomposer,
        remediator,
        transport_factory,
        config.clone(),
    );

    Context {
        store,
        event_bus: event_bus.clone(),
        orchestrator,
    }
}

/// Runs one CLI command to completion, returning the process exit code
/// (spec §6: 0 on success, 1 on failure).
pub async fn dispatch(cli: types::Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run {
            description,
            project_path,
            task_type,
            max_agents,
            timeout_ms,
        } => {
            let config = crate::infrastructure::config::load(Path::new(&project_path))
                .context("loading orchestrator config")?;
            let ctx = build_context(&config);

            let input = TaskInput {
                description,
                project_path,
                task_type: task_type.as_deref().and_then(crate::domain::models::TaskType::from_str),
                max_agents,
                timeout_ms,
            };

            match ctx.orchestrator.run(input).await {
                Ok(report) => {
                    let failed = report.summary.failed > 0;
                    print_output(&report, cli.json);
                    Ok(if failed { 1 } else { 0 })
                }
                Err(e) => {
                    eprintln!("task run failed: {e}");
                    Ok(1)
                }
            }
        }

        Commands::Resume { task_id } => {
            let config = crate::domain::models::OrchestratorConfig::default();
            let ctx = build_context(&config);
            match ctx.orchestrator.resume(task_id).await {
                Ok(report) => {
                    print_output(&report, cli.json);
                    Ok(if report.summary.failed > 0 { 1 } else { 0 })
                }
                Err(e) => {
                    eprintln!("resume failed: {e}");
                    Ok(1)
                }
            }
        }

        Commands::Status { task_id } => {
            let config = crate::domain::models::OrchestratorConfig::default();
            let ctx = build_context(&config);
            match ctx.orchestrator.get_task_status(task_id).await {
                Ok(report) => {
                    if cli.json {
                        print_output(&report, true);
                    } else {
                        println!("{}", output::format_subtasks_table(&report));
                        println!("{}", crate::services::aggregator::one_line_summary(&report));
                    }
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("status lookup failed: {e}");
                    Ok(1)
                }
            }
        }

        Commands::Agents => {
            let config = crate::domain::models::OrchestratorConfig::default();
            let ctx = build_context(&config);
            let agents = ctx.store.get_all_agents().await?;
            let stats = ctx.orchestrator.get_worker_stats().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&agents)?);
            } else {
                println!("{}", output::format_agents_table(&agents));
                println!(
                    "pool: {} total, {} idle, {} busy, {} pending",
                    stats.total, stats.idle, stats.busy, stats.pending
                );
            }
            Ok(0)
        }

        Commands::Health => {
            let config = crate::domain::models::OrchestratorConfig::default();
            let ctx = build_context(&config);
            ctx.orchestrator.get_health_report().await?;
            println!("health check complete");
            Ok(0)
        }

        Commands::Ping => {
            let config = crate::domain::models::OrchestratorConfig::default();
            let llm = AnthropicLlmClient::new(config.api_key.clone(), config.model.clone());
            match llm
                .complete(crate::domain::ports::LlmRequest::new("ping", "respond with pong"))
                .await
            {
                Ok(_) => {
                    println!("ok");
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("ping failed: {e}");
                    Ok(1)
                }
            }
        }

        Commands::Clear { task_id } => {
            let config = crate::domain::models::OrchestratorConfig::default();
            let ctx = build_context(&config);
            let task = ctx.store.get_task(task_id).await?;
            if !task.status.is_terminal() {
                eprintln!("refusing to clear a non-terminal task ({})", task.status.as_str());
                return Ok(1);
            }
            for agent in ctx.store.get_all_agents().await? {
                ctx.store.remove_agent(&agent.id).await?;
            }
            println!("cleared");
            Ok(0)
        }
    }
}
