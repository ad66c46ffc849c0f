//! `aichestrator-worker`: the out-of-process worker binary. Speaks
//! newline-delimited JSON over stdin/stdout with the pool (spec §4.4),
//! using the same `PoolMessage`/`WorkerMessage` wire types the pool side
//! parses. Grounded on the teacher's `src/bin/abathur-mcp-memory.rs` for
//! the pattern of a focused, single-purpose binary driven by stdio framing.

use std::time::Duration;

use aichestrator::services::worker_pool::{PoolMessage, WorkerMessage};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
struct Args {
    #[arg(long)]
    agent_id: String,
}

async fn send(stdout: &mut tokio::io::Stdout, message: &WorkerMessage) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Does the actual unit of work for one subtask. This worker is a
/// placeholder for the spec's out-of-scope inner tool-use loop (spec §1):
/// it stands in for "a single LLM conversation with tool access to the
/// project directory", which is a contract-only collaborator here.
async fn execute_subtask(
    description: &str,
    agent_type: aichestrator::domain::models::AgentType,
    project_path: &str,
) -> Result<String, String> {
    tracing::info!(agent_type = agent_type.as_str(), project_path, "executing subtask: {description}");
    Ok(format!("completed: {description}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .with_writer(std::io::stderr)
        .init();

    let mut stdout = tokio::io::stdout();
    send(&mut stdout, &WorkerMessage::Ready).await?;

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    tracing::info!(agent_id = %args.agent_id, "worker ready");

    loop {
        let next_line = tokio::time::timeout(Duration::from_secs(300), lines.next_line()).await;
        let line = match next_line {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                send(&mut stdout, &WorkerMessage::Error { message: e.to_string() }).await?;
                break;
            }
            Err(_) => {
                // No command for a long while: emit a heartbeat and keep
                // waiting rather than exiting (spec §4.4: workers heartbeat
                // independent of receiving work).
                send(&mut stdout, &WorkerMessage::Heartbeat).await?;
                continue;
            }
        };

        let message: PoolMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                send(&mut stdout, &WorkerMessage::Error { message: e.to_string() }).await?;
                continue;
            }
        };

        match message {
            PoolMessage::Execute {
                subtask_id,
                description,
                agent_type,
                project_path,
            } => {
                send(
                    &mut stdout,
                    &WorkerMessage::Progress {
                        subtask_id,
                        note: "starting".to_string(),
                    },
                )
                .await?;

                let started = std::time::Instant::now();
                let result = execute_subtask(&description, agent_type, &project_path).await;
                let execution_ms = started.elapsed().as_millis() as u64;

                let message = match result {
                    Ok(output) => WorkerMessage::Result {
                        subtask_id,
                        success: true,
                        output: Some(output),
                        error: None,
                        execution_ms,
                    },
                    Err(error) => WorkerMessage::Result {
                        subtask_id,
                        success: false,
                        output: None,
                        error: Some(error),
                        execution_ms,
                    },
                };
                send(&mut stdout, &message).await?;
            }
            PoolMessage::Abort { subtask_id } => {
                tracing::info!(%subtask_id, "abort requested, no in-flight work to cancel");
            }
            PoolMessage::Shutdown => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
