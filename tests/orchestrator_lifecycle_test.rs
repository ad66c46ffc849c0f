//! Integration tests for the Orchestrator's wave loop, driven entirely
//! through the public `Orchestrator` API with an `InMemoryStore`, a scripted
//! `MockLlmClient` standing in for both the Decomposer's and Remediator's
//! LLM calls, and `MockTransportFactory` standing in for real worker
//! processes. No subprocess or network access is exercised here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use aichestrator::domain::models::{
    AgentType, OrchestratorConfig, Subtask, SubtaskStatus, Task, TaskInput, TaskStatus,
};
use aichestrator::domain::ports::Store;
use aichestrator::infrastructure::llm::MockLlmClient;
use aichestrator::infrastructure::store::InMemoryStore;
use aichestrator::services::decomposer::Decomposer;
use aichestrator::services::event_bus::EventBus;
use aichestrator::services::remediator::Remediator;
use aichestrator::services::scheduler::test_support::MockTransportFactory;
use aichestrator::services::worker_pool::{PoolMessage, WorkerMessage, WorkerPool};
use aichestrator::services::Orchestrator;

fn test_config() -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::default();
    cfg.max_workers = 4;
    cfg.default_timeout_ms = 300;
    cfg.heartbeat_interval_ms = 1_000;
    cfg.heartbeat_timeout_ms = 5_000;
    cfg
}

/// Wires up an `Orchestrator` against an in-memory store and mock
/// collaborators. `decomposer_plan` scripts the Decomposer's one LLM call;
/// `remediator_response` scripts every Remediator call.
fn build_orchestrator(
    decomposer_plan: &str,
    remediator_response: &str,
    auto_ready: bool,
) -> (Orchestrator, Arc<InMemoryStore>, Arc<MockTransportFactory>) {
    let store = Arc::new(InMemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let event_bus = Arc::new(EventBus::new(store_dyn.clone()));
    let pool = Arc::new(WorkerPool::new());
    let decomposer = Arc::new(Decomposer::new(Arc::new(MockLlmClient::single(
        decomposer_plan.to_string(),
    ))));
    let remediator = Arc::new(Remediator::new(Arc::new(MockLlmClient::single(
        remediator_response.to_string(),
    ))));
    let factory = Arc::new(MockTransportFactory::new(auto_ready));

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

fn task_input(description: &str, max_agents: u8) -> TaskInput {
    TaskInput {
        description: description.to_string(),
        project_path: "/tmp/proj".to_string(),
        task_type: None,
        max_agents: Some(max_agents),
        timeout_ms: None,
    }
}

// ============================================================================
// Linear dependency chain
// ============================================================================

/// Auto-replies success to every `Execute` a spawned transport receives, and
/// records the subtask description at the moment each reply is sent, so
/// tests can assert on execution order.
fn spawn_ordered_success_responder(
    factory: Arc<MockTransportFactory>,
    order: Arc<Mutex<Vec<String>>>,
) {
    tokio::spawn(async move {
        let mut seen = 0usize;
        loop {
            let transports = factory.spawned.lock().await.clone();
            for transport in transports.iter().skip(seen) {
                let transport = transport.clone();
                let order = order.clone();
                tokio::spawn(async move {
                    if let Some(PoolMessage::Execute {
                        subtask_id,
                        description,
                        ..
                    }) = transport.next_sent().await
                    {
                        order.lock().await.push(description);
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
async fn linear_chain_executes_strictly_in_dependency_order() {
    let plan = r#"[
        {"description": "research", "agent_type": "researcher", "dependencies": []},
        {"description": "implement", "agent_type": "implementer", "dependencies": [0]},
        {"description": "test", "agent_type": "tester", "dependencies": [1]}
    ]"#;
    let (orchestrator, store, factory) =
        build_orchestrator(plan, r#"{"action": "retry", "reason": "n/a"}"#, true);

    let order = Arc::new(Mutex::new(Vec::new()));
    spawn_ordered_success_responder(factory, order.clone());

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(task_input("ship the feature", 3)),
    )
    .await
    .expect("run timed out")
    .expect("run failed");

    assert_eq!(report.summary.completed, 3);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(
        *order.lock().await,
        vec![
            "research".to_string(),
            "implement".to_string(),
            "test".to_string()
        ]
    );

    let subtasks = store.get_subtasks_for_task(report.task_id).await.unwrap();
    assert!(subtasks.iter().all(|s| s.status == SubtaskStatus::Completed));
}

// ============================================================================
// Parallel fan-out, bounded by max_agents
// ============================================================================

#[tokio::test]
async fn parallel_fan_out_never_exceeds_max_agents_concurrency() {
    let plan = r#"[
        {"description": "a", "agent_type": "implementer", "dependencies": []},
        {"description": "b", "agent_type": "implementer", "dependencies": []},
        {"description": "c", "agent_type": "implementer", "dependencies": []},
        {"description": "d", "agent_type": "implementer", "dependencies": []}
    ]"#;
    let (orchestrator, _store, factory) =
        build_orchestrator(plan, r#"{"action": "retry", "reason": "n/a"}"#, true);

    let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let max_observed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    {
        let factory = factory.clone();
        let in_flight = in_flight.clone();
        let max_observed = max_observed.clone();
        tokio::spawn(async move {
            let mut seen = 0usize;
            loop {
                let transports = factory.spawned.lock().await.clone();
                for transport in transports.iter().skip(seen) {
                    let transport = transport.clone();
                    let in_flight = in_flight.clone();
                    let max_observed = max_observed.clone();
                    tokio::spawn(async move {
                        if let Some(PoolMessage::Execute { subtask_id, .. }) =
                            transport.next_sent().await
                        {
                            let now = in_flight.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                            max_observed.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                            // Hold the slot open briefly so overlapping
                            // dispatches are actually observed concurrently.
                            tokio::time::sleep(Duration::from_millis(40)).await;
                            in_flight.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
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

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(task_input("four independent chores", 2)),
    )
    .await
    .expect("run timed out")
    .expect("run failed");

    assert_eq!(report.summary.completed, 4);
    assert!(
        max_observed.load(std::sync::atomic::Ordering::SeqCst) <= 2,
        "observed more than max_agents subtasks executing at once"
    );
}

// ============================================================================
// Worker timeout, then a retry remediation recovers the subtask
// ============================================================================

#[tokio::test]
async fn unresponsive_worker_is_retried_and_the_retry_succeeds() {
    let plan = r#"[{"description": "flaky step", "agent_type": "implementer", "dependencies": []}]"#;
    let (orchestrator, _store, factory) =
        build_orchestrator(plan, r#"{"action": "retry", "reason": "transient"}"#, true);

    // The first spawned transport never answers its Execute, so
    // `drive_until_result`'s timeout fires; the second one answers
    // immediately with success.
    tokio::spawn({
        let factory = factory.clone();
        async move {
            let mut seen = 0usize;
            let mut spawn_index = 0usize;
            loop {
                let transports = factory.spawned.lock().await.clone();
                for transport in transports.iter().skip(seen) {
                    let index = spawn_index;
                    spawn_index += 1;
                    let transport = transport.clone();
                    tokio::spawn(async move {
                        if let Some(PoolMessage::Execute { subtask_id, .. }) =
                            transport.next_sent().await
                        {
                            if index == 0 {
                                // Simulate a hung worker: never reply.
                                return;
                            }
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
        }
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.run(task_input("retry me", 1)),
    )
    .await
    .expect("run timed out")
    .expect("run failed");

    assert_eq!(report.summary.completed, 1);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(
        factory.spawned.lock().await.len(),
        2,
        "expected exactly one retry spawn after the hung worker"
    );
}

// ============================================================================
// Remediator decompose: a failed subtask is replaced by its children
// ============================================================================

#[tokio::test]
async fn decompose_remediation_replaces_the_failed_subtask_with_children() {
    let plan = r#"[{"description": "too big", "agent_type": "implementer", "dependencies": []}]"#;
    let remediation = r#"{
        "action": "decompose",
        "reason": "too complex for one subtask",
        "new_subtasks": [
            {"description": "part one", "agent_type": "implementer", "dependencies": []},
            {"description": "part two", "agent_type": "tester", "dependencies": [0]}
        ]
    }"#;
    let (orchestrator, store, factory) = build_orchestrator(plan, remediation, true);

    // Every worker succeeds, except the very first one (the original
    // oversized subtask), which fails and triggers remediation.
    tokio::spawn({
        let factory = factory.clone();
        async move {
            let mut seen = 0usize;
            let mut spawn_index = 0usize;
            loop {
                let transports = factory.spawned.lock().await.clone();
                for transport in transports.iter().skip(seen) {
                    let index = spawn_index;
                    spawn_index += 1;
                    let transport = transport.clone();
                    tokio::spawn(async move {
                        if let Some(PoolMessage::Execute { subtask_id, .. }) =
                            transport.next_sent().await
                        {
                            let success = index != 0;
                            transport
                                .push(WorkerMessage::Result {
                                    subtask_id,
                                    success,
                                    output: success.then(|| "done".to_string()),
                                    error: (!success).then(|| "blew up".to_string()),
                                    execution_ms: 1,
                                })
                                .await;
                        }
                    });
                }
                seen = transports.len();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(task_input("an oversized change", 2)),
    )
    .await
    .expect("run timed out")
    .expect("run failed");

    // The original subtask (now satisfied-by-decomposition) plus its two
    // children are all terminal and count as completed.
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.completed, 3);
    assert_eq!(report.summary.failed, 0);

    let subtasks = store.get_subtasks_for_task(report.task_id).await.unwrap();
    let original = subtasks
        .iter()
        .find(|s| s.description == "too big")
        .expect("original subtask should remain in the ordered list");
    assert_eq!(original.status, SubtaskStatus::Completed);
    assert_eq!(original.decomposed_into.len(), 2);
}

// ============================================================================
// Unsatisfiable dependency graph at runtime
// ============================================================================

#[tokio::test]
async fn a_dependent_of_a_permanently_failed_subtask_is_reported_unsatisfiable() {
    let plan = r#"[
        {"description": "doomed", "agent_type": "implementer", "dependencies": []},
        {"description": "depends on doomed", "agent_type": "implementer", "dependencies": [0]}
    ]"#;
    let factory = Arc::new(MockTransportFactory::new(true));

    // `max_retries = 0` means a single failure exhausts attempts, so the
    // scheduler leaves the subtask Failed without ever consulting the
    // Remediator; its dependent can never become ready.
    let mut cfg = test_config();
    cfg.max_retries = 0;
    let store = Arc::new(InMemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let event_bus = Arc::new(EventBus::new(store_dyn.clone()));
    let pool = Arc::new(WorkerPool::new());
    let decomposer = Arc::new(Decomposer::new(Arc::new(MockLlmClient::single(
        plan.to_string(),
    ))));
    let remediator = Arc::new(Remediator::new(Arc::new(MockLlmClient::single(
        r#"{"action": "retry", "reason": "n/a"}"#.to_string(),
    ))));
    let orchestrator = Orchestrator::new(
        store_dyn,
        event_bus,
        pool,
        decomposer,
        remediator,
        factory.clone(),
        cfg,
    );

    tokio::spawn({
        let factory = factory.clone();
        async move {
            let mut seen = 0usize;
            loop {
                let transports = factory.spawned.lock().await.clone();
                for transport in transports.iter().skip(seen) {
                    let transport = transport.clone();
                    tokio::spawn(async move {
                        if let Some(PoolMessage::Execute { subtask_id, .. }) =
                            transport.next_sent().await
                        {
                            transport
                                .push(WorkerMessage::Result {
                                    subtask_id,
                                    success: false,
                                    output: None,
                                    error: Some("always fails".to_string()),
                                    execution_ms: 1,
                                })
                                .await;
                        }
                    });
                }
                seen = transports.len();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(task_input("a blocked chain", 2)),
    )
    .await
    .expect("run timed out");

    assert!(result.is_err(), "expected the run to fail as unsatisfiable");
    let message = result.err().unwrap().to_string();
    assert!(
        message.contains("unsatisfiable"),
        "unexpected error: {message}"
    );
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn resume_finishes_remaining_pending_subtasks_without_redecomposing() {
    let (orchestrator, store, factory) = build_orchestrator(
        "[]", // the decomposer must never be called on this resume path
        r#"{"action": "retry", "reason": "n/a"}"#,
        true,
    );

    let input = task_input("half-finished work", 2);
    let now = chrono::Utc::now();
    let task = Task::from_input(&input, now);
    let task_id = task.id;
    store.create_task(task).await.unwrap();
    store
        .update_task_status(task_id, TaskStatus::Executing, None)
        .await
        .unwrap();
    store.init_context(task_id, input.project_path.clone()).await.unwrap();

    let mut already_done = Subtask::new(
        task_id,
        "already finished".to_string(),
        AgentType::Researcher,
        vec![],
        3,
        now,
    );
    already_done.status = SubtaskStatus::Completed;
    already_done.result = Some(aichestrator::domain::models::SubtaskResult::success(
        already_done.id,
        "done earlier",
        5,
    ));
    store.create_subtask(already_done).await.unwrap();

    let still_pending = Subtask::new(
        task_id,
        "still needs doing".to_string(),
        AgentType::Implementer,
        vec![],
        3,
        now,
    );
    store.create_subtask(still_pending).await.unwrap();

    tokio::spawn({
        let factory = factory.clone();
        async move {
            let mut seen = 0usize;
            loop {
                let transports = factory.spawned.lock().await.clone();
                for transport in transports.iter().skip(seen) {
                    let transport = transport.clone();
                    tokio::spawn(async move {
                        if let Some(PoolMessage::Execute { subtask_id, .. }) =
                            transport.next_sent().await
                        {
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
        }
    });

    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.resume(task_id))
        .await
        .expect("resume timed out")
        .expect("resume failed");

    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.completed, 2);
    assert_eq!(factory.spawned.lock().await.len(), 1);
}
