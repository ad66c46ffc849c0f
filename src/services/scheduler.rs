//! Orchestrator: the task state machine, wave-based subtask scheduling,
//! and the glue between the Decomposer, Worker Pool, and Remediator.
//! Grounded on the teacher's `services/swarm_orchestrator/` (lifecycle)
//! and `services/dag_executor.rs::execute_wave` (batch construction and
//! bounded concurrency via `Semaphore`).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::error::{OrchestratorError, TaskError};
use crate::domain::models::{
    AgentEntry, AgentStatus, ContextEntry, ContextEntryType, EventType, OrchestratorConfig,
    RemediationAction, ResumeContext, ResumeWorkItem, Subtask, SubtaskResult, SubtaskStatus, Task,
    TaskInput, TaskStatus,
};
use crate::domain::ports::Store;
use crate::services::aggregator::{self, TaskReport};
use crate::services::decomposer::{self, Decomposer};
use crate::services::event_bus::EventBus;
use crate::services::health_monitor::HealthMonitor;
use crate::services::remediator::Remediator;
use crate::services::worker_pool::{
    PoolMessage, WorkerMessage, WorkerPool, WorkerPoolStats, WorkerSlot, WorkerTransport,
};

/// Spawns a fresh transport for one subtask's worker. The real binary path
/// goes through `ProcessTransport::spawn`; tests substitute a factory that
/// hands back `MockTransport`s.
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync {
    async fn spawn(&self, agent_id: &str) -> Result<Arc<dyn WorkerTransport>, crate::domain::error::AgentError>;
}

/// Drives a single `Task` from creation through aggregation.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    event_bus: Arc<EventBus>,
    pool: Arc<WorkerPool>,
    decomposer: Arc<Decomposer>,
    remediator: Arc<Remediator>,
    transport_factory: Arc<dyn TransportFactory>,
    config: OrchestratorConfig,
    worker_sequence: AtomicU32,
    health_monitor: Arc<HealthMonitor>,
    /// One shared shutdown signal: the Health Monitor's background task
    /// (spawned by `initialize`) subscribes to it, and `shutdown` fires it.
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    initialized: AtomicBool,
    /// Checked at each wave boundary in `execute_task` for cooperative
    /// cancellation (spec §4.7/§5); set by `shutdown`.
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        event_bus: Arc<EventBus>,
        pool: Arc<WorkerPool>,
        decomposer: Arc<Decomposer>,
        remediator: Arc<Remediator>,
        transport_factory: Arc<dyn TransportFactory>,
        config: OrchestratorConfig,
    ) -> Self {
        let health_monitor = Arc::new(HealthMonitor::new(
            store.clone(),
            pool.clone(),
            event_bus.clone(),
            config.heartbeat_interval_ms,
            config.heartbeat_timeout_ms,
        ));
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(4);
        Self {
            store,
            event_bus,
            pool,
            decomposer,
            remediator,
            transport_factory,
            config,
            worker_sequence: AtomicU32::new(0),
            health_monitor,
            shutdown_tx,
            initialized: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn next_agent_id(&self) -> String {
        let n = self.worker_sequence.fetch_add(1, Ordering::SeqCst);
        format!("worker-{n}")
    }

    /// Idempotently spawns the Health Monitor's periodic background task
    /// (spec §5: a concurrent dimension independent of the wave loop).
    /// `run`/`resume` call this automatically; exposed publicly too, per
    /// spec §6's programmatic entry points, for callers that want the
    /// monitor running before the first `run`/`resume` (e.g. a long-lived
    /// host process managing several tasks against the same Orchestrator).
    pub async fn initialize(&self) -> Result<(), OrchestratorError> {
        self.config.validate()?;
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let health_monitor = self.health_monitor.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            health_monitor.run(shutdown_rx).await;
        });
        Ok(())
    }

    /// Spec §6: fetch a task's current report without driving it further.
    pub async fn get_task_status(&self, task_id: Uuid) -> Result<TaskReport, OrchestratorError> {
        Ok(aggregator::build_report(self.store.as_ref(), task_id).await?)
    }

    /// Spec §6/§4.4: current worker pool occupancy.
    pub async fn get_worker_stats(&self) -> WorkerPoolStats {
        self.pool.get_stats().await
    }

    /// Spec §6: runs one Health Monitor grading pass on demand, independent
    /// of the periodic background task `initialize` spawns.
    pub async fn get_health_report(&self) -> Result<(), OrchestratorError> {
        self.health_monitor.check_once().await.map_err(Into::into)
    }

    /// Spec §6: stops the Health Monitor's background task, cancels any
    /// task whose wave loop is still running (observed at the next wave
    /// boundary), and shuts down every live worker.
    pub async fn shutdown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        self.pool.shutdown_all().await;
    }

    /// Validates input, creates a `Task`, and drives it to completion.
    pub async fn run(&self, input: TaskInput) -> Result<TaskReport, OrchestratorError> {
        self.initialize().await?;
        input.validate()?;
        let now = chrono::Utc::now();
        let task = Task::from_input(&input, now);
        self.store.create_task(task.clone()).await?;
        self.store
            .init_context(task.id, task.project_path.clone())
            .await?;
        self.event_bus
            .publish_task_event(task.id, EventType::TaskCreated, now, serde_json::json!({}))
            .await?;

        self.decompose_and_persist(&task, None).await?;
        self.execute_task(task.id).await
    }

    /// Reconstructs a `ResumeContext` from already-persisted subtasks and
    /// re-enters the execution loop (spec §4.7's resume protocol).
    pub async fn resume(&self, task_id: Uuid) -> Result<TaskReport, OrchestratorError> {
        self.initialize().await?;
        let task = self.store.get_task(task_id).await?;
        if task.status.is_terminal() {
            return Ok(aggregator::build_report(self.store.as_ref(), task_id).await?);
        }

        let subtasks = self.store.get_subtasks_for_task(task_id).await?;
        if subtasks.is_empty() {
            self.decompose_and_persist(&task, None).await?;
        } else {
            let mut completed_work = Vec::new();
            let mut failed_work = Vec::new();
            for subtask in &subtasks {
                match subtask.status {
                    SubtaskStatus::Completed => completed_work.push(ResumeWorkItem {
                        subtask_id: subtask.id,
                        description: subtask.description.clone(),
                        agent_type: subtask.agent_type,
                        error: None,
                    }),
                    SubtaskStatus::Failed => failed_work.push(ResumeWorkItem {
                        subtask_id: subtask.id,
                        description: subtask.description.clone(),
                        agent_type: subtask.agent_type,
                        error: subtask.error.clone(),
                    }),
                    _ => {}
                }
            }
            let resume_context = ResumeContext {
                completed_work,
                failed_work,
            };
            // Only decompose further if there is remaining, unscheduled work:
            // a resume with every subtask already terminal just re-enters
            // the wave loop to pick up stragglers.
            if subtasks
                .iter()
                .all(|s| s.status == SubtaskStatus::Completed || s.status == SubtaskStatus::Failed)
                && !resume_context.failed_work.is_empty()
            {
                self.decompose_and_persist(&task, Some(&resume_context)).await?;
            }
        }

        self.execute_task(task_id).await
    }

    async fn decompose_and_persist(
        &self,
        task: &Task,
        resume_context: Option<&ResumeContext>,
    ) -> Result<(), OrchestratorError> {
        self.store
            .update_task_status(task.id, TaskStatus::Decomposing, None)
            .await?;

        let plan = self
            .decomposer
            .decompose(
                task,
                self.config.decomposition_strategy,
                resume_context,
                self.config.max_decomposition_depth,
            )
            .await
            .map_err(|e| OrchestratorError::Fatal(e.to_string()))?;

        if plan.is_empty() && resume_context.is_none() {
            self.store
                .update_task_status(task.id, TaskStatus::Failed, Some("empty decomposition".to_string()))
                .await?;
            return Err(TaskError::NoSubtasks(task.id).into());
        }

        let now = chrono::Utc::now();
        let subtasks = decomposer::materialize(
            task.id,
            &plan,
            self.config.max_attempts_per_subtask(),
            now,
        );

        if has_cycle(&subtasks) {
            self.store
                .update_task_status(task.id, TaskStatus::Failed, Some("unsatisfiable dependency graph".to_string()))
                .await?;
            return Err(TaskError::UnsatisfiableGraph(task.id).into());
        }

        for subtask in subtasks {
            self.store.create_subtask(subtask.clone()).await?;
            self.event_bus
                .publish_task_event(
                    task.id,
                    EventType::SubtaskCreated,
                    now,
                    serde_json::json!({ "subtask_id": subtask.id }),
                )
                .await?;
        }

        Ok(())
    }

    /// The core wave loop: while unterminated subtasks remain, compute the
    /// next ready batch (dependencies satisfied, attempts remaining),
    /// execute it bounded by `max_agents` concurrency, then repeat.
    async fn execute_task(&self, task_id: Uuid) -> Result<TaskReport, OrchestratorError> {
        let task = self.store.get_task(task_id).await?;
        self.store
            .update_task_status(task_id, TaskStatus::Executing, None)
            .await?;
        self.event_bus
            .publish_task_event(task_id, EventType::TaskStarted, chrono::Utc::now(), serde_json::json!({}))
            .await?;

        let semaphore = Arc::new(Semaphore::new(task.constraints.max_agents as usize));
        let mut fatal: Option<String> = None;

        loop {
            let subtasks = self.store.get_subtasks_for_task(task_id).await?;

            if self.cancelled.load(Ordering::SeqCst) {
                for subtask in subtasks
                    .iter()
                    .filter(|s| matches!(s.status, SubtaskStatus::Executing | SubtaskStatus::Assigned))
                {
                    if let Some(agent_id) = &subtask.assigned_agent_id {
                        self.pool.cancel_worker(agent_id, subtask.id).await;
                    }
                }
                self.store
                    .update_task_status(task_id, TaskStatus::Cancelled, Some("shutdown requested".to_string()))
                    .await?;
                self.event_bus
                    .publish_task_event(task_id, EventType::TaskCancelled, chrono::Utc::now(), serde_json::json!({}))
                    .await?;
                return Ok(aggregator::build_report(self.store.as_ref(), task_id).await?);
            }

            let completed: HashSet<Uuid> = subtasks
                .iter()
                .filter(|s| s.status == SubtaskStatus::Completed)
                .map(|s| s.id)
                .collect();

            if subtasks.iter().all(|s| s.status.is_terminal()) {
                break;
            }

            let ready: Vec<Subtask> = subtasks
                .iter()
                .filter(|s| {
                    !s.status.is_terminal()
                        && s.status != SubtaskStatus::Executing
                        && s.status != SubtaskStatus::Assigned
                        && s.dependencies_satisfied(&completed)
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                // Nothing ready and nothing terminal: either subtasks are
                // in flight (handled by `join_all` below before we loop
                // back) or the graph is stuck on a never-completing
                // dependency — surface as unsatisfiable.
                let in_flight = subtasks
                    .iter()
                    .any(|s| matches!(s.status, SubtaskStatus::Executing | SubtaskStatus::Assigned));
                if !in_flight {
                    self.store
                        .update_task_status(task_id, TaskStatus::Failed, Some("unsatisfiable dependency graph".to_string()))
                        .await?;
                    return Err(TaskError::UnsatisfiableGraph(task_id).into());
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }

            let handles: Vec<_> = ready
                .into_iter()
                .map(|subtask| {
                    let semaphore = semaphore.clone();
                    let this = self.clone_handles();
                    tokio::spawn(async move {
                        let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                        this.run_one_subtask(subtask).await
                    })
                })
                .collect();

            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(error = %e, "subtask execution returned an error");
                        fatal = Some(e.to_string());
                    }
                    Err(e) => {
                        error!(error = %e, "subtask task panicked");
                        fatal = Some(e.to_string());
                    }
                }
            }

            if let Some(reason) = fatal {
                self.store
                    .update_task_status(task_id, TaskStatus::Failed, Some(reason.clone()))
                    .await?;
                return Err(OrchestratorError::Fatal(reason));
            }
        }

        self.store
            .update_task_status(task_id, TaskStatus::Aggregating, None)
            .await?;
        let report = aggregator::build_report(self.store.as_ref(), task_id).await?;
        let final_status = if report.summary.failed > 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        self.store
            .update_task_status(task_id, final_status, None)
            .await?;
        self.event_bus
            .publish_task_event(
                task_id,
                if final_status == TaskStatus::Completed {
                    EventType::TaskCompleted
                } else {
                    EventType::TaskFailed
                },
                chrono::Utc::now(),
                serde_json::json!({}),
            )
            .await?;

        Ok(report)
    }

    /// A cheap clone of the handles `run_one_subtask` needs, so each wave
    /// entry can own its own copy across the `tokio::spawn` boundary.
    fn clone_handles(&self) -> OrchestratorHandles {
        OrchestratorHandles {
            store: self.store.clone(),
            event_bus: self.event_bus.clone(),
            pool: self.pool.clone(),
            remediator: self.remediator.clone(),
            transport_factory: self.transport_factory.clone(),
            config: self.config.clone(),
            agent_id: self.next_agent_id(),
        }
    }

}

/// The subset of `Orchestrator` state that must be moved into a spawned
/// per-subtask task. Kept as a separate struct so `Orchestrator` itself
/// need not be `Clone`.
#[derive(Clone)]
struct OrchestratorHandles {
    store: Arc<dyn Store>,
    event_bus: Arc<EventBus>,
    pool: Arc<WorkerPool>,
    remediator: Arc<Remediator>,
    transport_factory: Arc<dyn TransportFactory>,
    config: OrchestratorConfig,
    agent_id: String,
}

impl OrchestratorHandles {
    /// Drives one subtask through a pool worker. Reuses an idle slot of
    /// the matching role when the pool has one (spec §4.4's persistent,
    /// bounded `maxWorkers` set); otherwise spawns a fresh worker through
    /// `transport_factory` and registers it, up to `pool.acquire_permit`'s
    /// bound.
    async fn run_one_subtask(self, subtask: Subtask) -> Result<(), OrchestratorError> {
        let _permit = self.pool.acquire_permit().await;

        let (agent_id, transport, reused) = match self.pool.acquire_idle(subtask.agent_type).await {
            Some((pooled_id, transport)) => (pooled_id, transport, true),
            None => {
                let transport = match self.transport_factory.spawn(&self.agent_id).await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(subtask_id = %subtask.id, error = %e, "failed to spawn worker, marking subtask failed");
                        return self.fail_subtask(&subtask, &e.to_string()).await;
                    }
                };
                (self.agent_id.clone(), transport, false)
            }
        };

        self.store
            .update_subtask_status(subtask.id, SubtaskStatus::Assigned, Some(agent_id.clone()), None, None)
            .await?;

        if reused {
            self.store
                .update_heartbeat(&agent_id, self.config.heartbeat_timeout_ms)
                .await
                .ok();
        } else {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let agent = AgentEntry::new(agent_id.clone(), subtask.agent_type, transport.pid(), now_ms);
            self.store.register_agent(agent).await?;
            self.store
                .update_heartbeat(&agent_id, self.config.heartbeat_timeout_ms)
                .await?;

            if let Err(e) = crate::services::worker_pool::wait_for_ready(
                transport.as_ref(),
                &agent_id,
                Duration::from_millis(self.config.default_timeout_ms),
            )
            .await
            {
                warn!(subtask_id = %subtask.id, error = %e, "worker never became ready");
                self.store.remove_agent(&agent_id).await?;
                return self.fail_subtask(&subtask, &e.to_string()).await;
            }

            self.pool
                .insert(WorkerSlot {
                    agent_id: agent_id.clone(),
                    agent_type: subtask.agent_type,
                    transport: transport.clone(),
                })
                .await;
        }

        self.store
            .update_agent_status(&agent_id, AgentStatus::Busy, Some(subtask.id))
            .await?;

        self.store
            .update_subtask_status(subtask.id, SubtaskStatus::Executing, None, None, None)
            .await?;
        self.event_bus
            .publish_task_event(
                subtask.parent_task_id,
                EventType::SubtaskStarted,
                chrono::Utc::now(),
                serde_json::json!({ "subtask_id": subtask.id }),
            )
            .await?;

        let started = std::time::Instant::now();
        transport
            .send(PoolMessage::Execute {
                subtask_id: subtask.id,
                description: subtask.description.clone(),
                agent_type: subtask.agent_type,
                project_path: String::new(),
            })
            .await
            .map_err(|e| OrchestratorError::Fatal(e.to_string()))?;

        let outcome = self.drive_until_result(&subtask, transport.as_ref(), &agent_id).await;

        match outcome {
            Ok(result) => {
                let execution_ms = started.elapsed().as_millis() as u64;
                let mut result = result;
                result.execution_ms = execution_ms;
                self.store
                    .record_agent_result(&agent_id, result.success, execution_ms)
                    .await
                    .ok();
                // A successful worker goes back to Idle and stays in the
                // pool for reuse, rather than being torn down (spec §4.4).
                self.store
                    .update_agent_status(&agent_id, AgentStatus::Idle, None)
                    .await
                    .ok();
                self.pool.release(&agent_id).await;
                self.finish_subtask(&subtask, result).await
            }
            Err(e) => {
                let execution_ms = started.elapsed().as_millis() as u64;
                self.store
                    .record_agent_result(&agent_id, false, execution_ms)
                    .await
                    .ok();
                let _ = transport.send(PoolMessage::Shutdown).await;
                self.pool.remove(&agent_id).await;
                self.store.remove_agent(&agent_id).await?;
                self.handle_failure(&subtask, &e.to_string()).await
            }
        }
    }

    /// Reads messages from the worker until a terminal `Result` arrives,
    /// refreshing the heartbeat on every message (spec §4.4: any traffic
    /// counts as liveness, not only dedicated heartbeat frames) and
    /// recording `Discovery` entries into the shared context.
    async fn drive_until_result(
        &self,
        subtask: &Subtask,
        transport: &dyn WorkerTransport,
        agent_id: &str,
    ) -> anyhow::Result<SubtaskResult> {
        loop {
            let message = tokio::time::timeout(
                Duration::from_millis(self.config.default_timeout_ms),
                transport.recv(),
            )
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for worker response"))?
            .ok_or_else(|| anyhow::anyhow!("worker closed its output stream without a result"))?;

            self.store
                .update_heartbeat(agent_id, self.config.heartbeat_timeout_ms)
                .await
                .ok();

            match message {
                WorkerMessage::Ready => continue,
                WorkerMessage::Heartbeat => continue,
                WorkerMessage::Progress { .. } => continue,
                WorkerMessage::Discovery { data, .. } => {
                    self.store
                        .append_context(
                            subtask.parent_task_id,
                            ContextEntry::new(
                                agent_id.to_string(),
                                ContextEntryType::Discovery,
                                data,
                                chrono::Utc::now(),
                            ),
                        )
                        .await
                        .ok();
                }
                WorkerMessage::Result {
                    success,
                    output,
                    error,
                    ..
                } => {
                    return Ok(if success {
                        SubtaskResult {
                            subtask_id: subtask.id,
                            success: true,
                            output,
                            error: None,
                            execution_ms: 0,
                        }
                    } else {
                        SubtaskResult {
                            subtask_id: subtask.id,
                            success: false,
                            output: None,
                            error: Some(error.unwrap_or_else(|| "unspecified worker error".to_string())),
                            execution_ms: 0,
                        }
                    });
                }
                WorkerMessage::Error { message } => {
                    anyhow::bail!(message);
                }
            }
        }
    }

    async fn finish_subtask(&self, subtask: &Subtask, result: SubtaskResult) -> Result<(), OrchestratorError> {
        if result.success {
            self.store.store_result(subtask.parent_task_id, result.clone()).await?;
            self.store
                .update_subtask_status(subtask.id, SubtaskStatus::Completed, None, None, Some(result))
                .await?;
            self.event_bus
                .publish_task_event(
                    subtask.parent_task_id,
                    EventType::SubtaskCompleted,
                    chrono::Utc::now(),
                    serde_json::json!({ "subtask_id": subtask.id }),
                )
                .await?;
            Ok(())
        } else {
            let error = result.error.clone().unwrap_or_default();
            self.store
                .update_subtask_status(subtask.id, SubtaskStatus::Failed, None, Some(error.clone()), Some(result))
                .await?;
            self.handle_failure(subtask, &error).await
        }
    }

    async fn fail_subtask(&self, subtask: &Subtask, error: &str) -> Result<(), OrchestratorError> {
        let result = SubtaskResult::failure(subtask.id, error, 0);
        self.store
            .update_subtask_status(subtask.id, SubtaskStatus::Failed, None, Some(error.to_string()), Some(result.clone()))
            .await?;
        self.store.store_result(subtask.parent_task_id, result).await?;
        self.handle_failure(subtask, error).await
    }

    /// Invokes the Remediator and acts on its decision (spec §4.6).
    async fn handle_failure(&self, subtask: &Subtask, error: &str) -> Result<(), OrchestratorError> {
        self.event_bus
            .publish_task_event(
                subtask.parent_task_id,
                EventType::SubtaskFailed,
                chrono::Utc::now(),
                serde_json::json!({ "subtask_id": subtask.id, "error": error }),
            )
            .await?;

        let mut current = self.store.get_subtask(subtask.id).await?;
        current.error = Some(error.to_string());

        if current.attempts >= current.max_attempts {
            warn!(subtask_id = %subtask.id, "max attempts exceeded, leaving subtask failed");
            return Ok(());
        }

        let decision = self.remediator.remediate(&current).await;
        match decision.action {
            RemediationAction::Retry => {
                self.store
                    .update_subtask_status(subtask.id, SubtaskStatus::Pending, None, None, None)
                    .await?;
                self.event_bus
                    .publish_task_event(
                        subtask.parent_task_id,
                        EventType::SubtaskRetrying,
                        chrono::Utc::now(),
                        serde_json::json!({ "subtask_id": subtask.id, "reason": decision.reason }),
                    )
                    .await?;
                Ok(())
            }
            RemediationAction::Skip => {
                let result = SubtaskResult::skipped(subtask.id);
                self.store.store_result(subtask.parent_task_id, result.clone()).await?;
                self.store
                    .update_subtask_status(subtask.id, SubtaskStatus::Completed, None, None, Some(result))
                    .await?;
                Ok(())
            }
            RemediationAction::Decompose => {
                let now = chrono::Utc::now();
                let max_attempts = current.max_attempts;
                let children = decomposer::materialize(
                    subtask.parent_task_id,
                    &decision.new_subtasks,
                    max_attempts,
                    now,
                );
                let child_ids: Vec<Uuid> = children.iter().map(|c| c.id).collect();
                for child in children {
                    self.store.create_subtask(child).await?;
                }
                let result = SubtaskResult::decomposed(subtask.id);
                self.store.store_result(subtask.parent_task_id, result.clone()).await?;
                // Open Question 1 (DESIGN.md): mark the original Completed
                // with `decomposed_into` populated, rather than inventing a
                // new status.
                self.store
                    .update_subtask_status(subtask.id, SubtaskStatus::Completed, None, None, Some(result))
                    .await?;
                self.store.set_decomposed_into(subtask.id, child_ids).await?;
                Ok(())
            }
            RemediationAction::Fail => {
                self.store
                    .update_task_status(
                        subtask.parent_task_id,
                        TaskStatus::Failed,
                        Some(decision.reason.clone()),
                    )
                    .await?;
                Err(OrchestratorError::Fatal(decision.reason))
            }
        }
    }
}

fn has_cycle(subtasks: &[Subtask]) -> bool {
    let id_to_index: std::collections::HashMap<Uuid, usize> =
        subtasks.iter().enumerate().map(|(i, s)| (s.id, i)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }
    let mut marks = vec![Mark::Unvisited; subtasks.len()];

    fn visit(
        index: usize,
        subtasks: &[Subtask],
        id_to_index: &std::collections::HashMap<Uuid, usize>,
        marks: &mut Vec<Mark>,
    ) -> bool {
        match marks[index] {
            Mark::Done => return false,
            Mark::InProgress => return true,
            Mark::Unvisited => {}
        }
        marks[index] = Mark::InProgress;
        for dep in &subtasks[index].dependencies {
            if let Some(&dep_index) = id_to_index.get(dep) {
                if visit(dep_index, subtasks, id_to_index, marks) {
                    return true;
                }
            }
        }
        marks[index] = Mark::Done;
        false
    }

    for index in 0..subtasks.len() {
        if visit(index, subtasks, &id_to_index, &mut marks) {
            return true;
        }
    }
    false
}

/// Spawns the real `aichestrator-worker` binary per subtask.
pub struct ProcessTransportFactory {
    worker_binary: String,
}

impl ProcessTransportFactory {
    pub fn new(worker_binary: impl Into<String>) -> Self {
        Self {
            worker_binary: worker_binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl TransportFactory for ProcessTransportFactory {
    async fn spawn(&self, agent_id: &str) -> Result<Arc<dyn WorkerTransport>, crate::domain::error::AgentError> {
        let transport = crate::services::worker_pool::ProcessTransport::spawn(&self.worker_binary, agent_id).await?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockTransportFactory;
    use super::*;
    use crate::domain::models::AgentType;
    use crate::infrastructure::llm::MockLlmClient;
    use crate::infrastructure::store::InMemoryStore;
    use crate::services::worker_pool::WorkerMessage;

    fn test_config() -> OrchestratorConfig {
        let mut cfg = OrchestratorConfig::default();
        cfg.max_workers = 3;
        cfg.default_timeout_ms = 2_000;
        cfg.heartbeat_interval_ms = 1_000;
        cfg.heartbeat_timeout_ms = 5_000;
        cfg
    }

    fn build_orchestrator(
        plan_json: &str,
    ) -> (Orchestrator, Arc<InMemoryStore>, Arc<MockTransportFactory>) {
        let store = Arc::new(InMemoryStore::new());
        let store_dyn: Arc<dyn Store> = store.clone();
        let event_bus = Arc::new(EventBus::new(store_dyn.clone()));
        let pool = Arc::new(WorkerPool::new());
        let decomposer_llm = Arc::new(MockLlmClient::single(plan_json.to_string()));
        let decomposer = Arc::new(Decomposer::new(decomposer_llm));
        let remediator_llm = Arc::new(MockLlmClient::single(
            r#"{"action": "retry", "reason": "transient"}"#,
        ));
        let remediator = Arc::new(Remediator::new(remediator_llm));
        let factory = Arc::new(MockTransportFactory::new(true));

        let orchestrator = Orchestrator::new(
            store_dyn,
            event_bus,
            pool,
            decomposer,
            remediator,
            factory.clone(),
            test_config(),
        );
        (orchestrator, store, factory)
    }

    /// Auto-replies `Result { success: true }` to every `Execute` message
    /// sent to any worker the factory spawns, by polling the factory's
    /// `spawned` list.
    fn spawn_auto_success_responder(factory: Arc<MockTransportFactory>) {
        tokio::spawn(async move {
            let mut seen = 0usize;
            loop {
                let transports = factory.spawned.lock().await.clone();
                for transport in transports.iter().skip(seen) {
                    let transport = transport.clone();
                    tokio::spawn(async move {
                        if let Some(PoolMessage::Execute { subtask_id, .. }) = transport.next_sent().await {
                            transport
                                .push(WorkerMessage::Result {
                                    subtask_id,
                                    success: true,
                                    output: Some("done".to_string()),
                                    error: None,
                                    execution_ms: 1,
                                })
                                .await;
                        }
                    });
                }
                seen = transports.len();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
    }

    #[tokio::test]
    async fn run_completes_a_single_subtask_task() {
        let plan = r#"[{"description": "do the thing", "agent_type": "implementer", "dependencies": []}]"#;
        let (orchestrator, _store, factory) = build_orchestrator(plan);
        spawn_auto_success_responder(factory);

        let input = TaskInput {
            description: "ship it".to_string(),
            project_path: "/tmp/proj".to_string(),
            task_type: None,
            max_agents: Some(2),
            timeout_ms: None,
        };

        let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(input))
            .await
            .expect("orchestrator run timed out")
            .expect("orchestrator run failed");

        assert_eq!(report.summary.completed, 1);
        assert_eq!(report.summary.failed, 0);
    }

    #[tokio::test]
    async fn run_executes_a_linear_dependency_chain_in_order() {
        let plan = r#"[
            {"description": "first", "agent_type": "researcher", "dependencies": []},
            {"description": "second", "agent_type": "implementer", "dependencies": [0]},
            {"description": "third", "agent_type": "tester", "dependencies": [1]}
        ]"#;
        let (orchestrator, store, factory) = build_orchestrator(plan);
        spawn_auto_success_responder(factory);

        let input = TaskInput {
            description: "chain".to_string(),
            project_path: "/tmp/proj".to_string(),
            task_type: None,
            max_agents: Some(3),
            timeout_ms: None,
        };

        let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(input))
            .await
            .expect("orchestrator run timed out")
            .expect("orchestrator run failed");

        assert_eq!(report.summary.completed, 3);
        let subtasks = store.get_subtasks_for_task(report.task_id).await.unwrap();
        assert!(subtasks.iter().all(|s| s.status == SubtaskStatus::Completed));
    }

    #[tokio::test]
    async fn get_task_status_matches_run_s_own_report() {
        let plan = r#"[{"description": "do the thing", "agent_type": "implementer", "dependencies": []}]"#;
        let (orchestrator, _store, factory) = build_orchestrator(plan);
        spawn_auto_success_responder(factory);

        let input = TaskInput {
            description: "ship it".to_string(),
            project_path: "/tmp/proj".to_string(),
            task_type: None,
            max_agents: Some(2),
            timeout_ms: None,
        };
        let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(input))
            .await
            .expect("orchestrator run timed out")
            .expect("orchestrator run failed");

        let fetched = orchestrator.get_task_status(report.task_id).await.unwrap();
        assert_eq!(fetched.summary.completed, report.summary.completed);
        assert_eq!(fetched.task_status, report.task_status);
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_spawns_the_health_monitor_once() {
        let plan = r#"[{"description": "do the thing", "agent_type": "implementer", "dependencies": []}]"#;
        let (orchestrator, _store, _factory) = build_orchestrator(plan);

        orchestrator.initialize().await.unwrap();
        orchestrator.initialize().await.unwrap();
        assert!(orchestrator.initialized.load(Ordering::SeqCst));

        // A health report can be produced without error once initialized.
        orchestrator.get_health_report().await.unwrap();
    }

    #[tokio::test]
    async fn get_worker_stats_reflects_pool_occupancy() {
        let plan = r#"[{"description": "do the thing", "agent_type": "implementer", "dependencies": []}]"#;
        let (orchestrator, _store, _factory) = build_orchestrator(plan);
        let stats = orchestrator.get_worker_stats().await;
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_a_task_still_in_its_wave_loop() {
        let plan = r#"[{"description": "slow step", "agent_type": "implementer", "dependencies": []}]"#;
        let (orchestrator, store, factory) = build_orchestrator(plan);
        let orchestrator = Arc::new(orchestrator);

        // The worker receives Execute but never answers: the wave loop
        // stays in flight until `shutdown` flips the cancellation flag.
        tokio::spawn({
            let factory = factory.clone();
            async move {
                let mut seen = 0usize;
                loop {
                    let transports = factory.spawned.lock().await.clone();
                    for transport in transports.iter().skip(seen) {
                        let transport = transport.clone();
                        tokio::spawn(async move {
                            let _ = transport.next_sent().await;
                        });
                    }
                    seen = transports.len();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });

        let input = TaskInput {
            description: "cancel me".to_string(),
            project_path: "/tmp/proj".to_string(),
            task_type: None,
            max_agents: Some(1),
            timeout_ms: None,
        };

        let run_orchestrator = orchestrator.clone();
        let handle = tokio::spawn(async move { run_orchestrator.run(input).await });

        // Give the wave loop time to assign and start the one subtask.
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator.shutdown().await;

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run did not observe shutdown in time")
            .expect("task panicked")
            .expect("run should return a report, not an error, on cancellation");

        assert_eq!(report.task_status, TaskStatus::Cancelled);
        let subtasks = store.get_subtasks_for_task(report.task_id).await.unwrap();
        assert!(!subtasks.is_empty());
    }

    #[test]
    fn has_cycle_detects_a_two_node_cycle() {
        let task_id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let mut a = Subtask::new(task_id, "a".to_string(), AgentType::Implementer, vec![], 3, now);
        let mut b = Subtask::new(task_id, "b".to_string(), AgentType::Implementer, vec![], 3, now);
        a.dependencies = vec![b.id];
        b.dependencies = vec![a.id];
        assert!(has_cycle(&[a, b]));
    }
}

/// Test doubles for `TransportFactory`, exposed unconditionally so the
/// crate's `tests/` integration suite can exercise the `Orchestrator`
/// without a real subprocess, mirroring `worker_pool::mock`.
pub mod test_support {
    use super::*;
    use crate::services::worker_pool::mock::MockTransport;
    use tokio::sync::Mutex;

    /// Hands back a fresh `MockTransport` per spawn, immediately primed
    /// with a `Ready` message and, once told, a scripted `Result`. Tests
    /// drive the returned `MockTransport` handles directly.
    pub struct MockTransportFactory {
        pub spawned: Mutex<Vec<Arc<MockTransport>>>,
        auto_ready: bool,
    }

    impl MockTransportFactory {
        pub fn new(auto_ready: bool) -> Self {
            Self {
                spawned: Mutex::new(Vec::new()),
                auto_ready,
            }
        }
    }

    #[async_trait::async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn spawn(&self, _agent_id: &str) -> Result<Arc<dyn WorkerTransport>, crate::domain::error::AgentError> {
            let transport = MockTransport::new();
            if self.auto_ready {
                transport.push(WorkerMessage::Ready).await;
            }
            self.spawned.lock().await.push(transport.clone());
            Ok(transport)
        }
    }
}
