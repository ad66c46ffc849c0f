//! Worker Pool: manages a persistent, bounded set of out-of-process workers
//! over a newline-delimited JSON IPC protocol (spec §4.4), grounded on the
//! teacher's `application/mcp_process_manager.rs` for process lifecycle and
//! `services/dag_executor.rs::execute_wave` for wave dispatch.
//!
//! Workers are spawned lazily up to `max_workers` and returned to an idle
//! queue for reuse across subtasks, rather than spawned fresh per subtask.
//! The `WorkerTransport` trait is the seam that lets the pool and the
//! scheduler be tested without spawning real child processes, mirroring
//! the teacher's `Substrate` port split between a real and mock backend.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::warn;
use uuid::Uuid;

use crate::domain::error::AgentError;
use crate::domain::models::AgentType;

/// How long `cancel_worker` waits for a graceful `Abort` acknowledgment
/// before escalating to a hard kill (spec §4.4).
const CANCEL_GRACE: Duration = Duration::from_secs(3);

/// A message sent from the pool to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolMessage {
    Execute {
        subtask_id: Uuid,
        description: String,
        agent_type: AgentType,
        project_path: String,
    },
    Abort {
        subtask_id: Uuid,
    },
    Shutdown,
}

/// A message sent from a worker to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Heartbeat,
    Progress {
        subtask_id: Uuid,
        note: String,
    },
    Discovery {
        subtask_id: Uuid,
        data: serde_json::Value,
    },
    Result {
        subtask_id: Uuid,
        success: bool,
        output: Option<String>,
        error: Option<String>,
        execution_ms: u64,
    },
    Error {
        message: String,
    },
}

/// Abstraction over "a running worker process I can send messages to and
/// receive messages from". `ProcessTransport` is the real implementation;
/// `MockTransport` (in `tests`) drives the pool/scheduler without spawning
/// anything.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn send(&self, message: PoolMessage) -> Result<(), AgentError>;
    /// Blocks until the next message arrives, or `None` once the worker's
    /// output stream has closed.
    async fn recv(&self) -> Option<WorkerMessage>;
    fn pid(&self) -> Option<u32>;
    /// Hard-kills the underlying process immediately. Used by
    /// `WorkerPool::cancel_worker` once the grace period elapses without a
    /// natural exit (spec §4.4's "grace then hard kill" escalation).
    async fn kill(&self);
}

/// Spawns `aichestrator-worker` as a child process and speaks
/// newline-delimited JSON over its stdin/stdout.
pub struct ProcessTransport {
    child: Mutex<Child>,
    stdin_tx: mpsc::Sender<PoolMessage>,
    stdout_rx: Mutex<mpsc::Receiver<WorkerMessage>>,
    pid: Option<u32>,
}

impl ProcessTransport {
    pub async fn spawn(worker_binary: &str, agent_id: &str) -> Result<Self, AgentError> {
        let mut child = Command::new(worker_binary)
            .arg("--agent-id")
            .arg(agent_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Crashed(agent_id.to_string(), e.to_string()))?;

        let pid = child.id();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Ipc(agent_id.to_string(), "no stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Ipc(agent_id.to_string(), "no stdout handle".to_string()))?;

        let (in_tx, mut in_rx) = mpsc::channel::<PoolMessage>(32);
        tokio::spawn(async move {
            while let Some(message) = in_rx.recv().await {
                let Ok(mut line) = serde_json::to_string(&message) else {
                    continue;
                };
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let (out_tx, out_rx) = mpsc::channel::<WorkerMessage>(32);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(message) = serde_json::from_str::<WorkerMessage>(&line) {
                    if out_tx.send(message).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin_tx: in_tx,
            stdout_rx: Mutex::new(out_rx),
            pid,
        })
    }
}

#[async_trait]
impl WorkerTransport for ProcessTransport {
    async fn send(&self, message: PoolMessage) -> Result<(), AgentError> {
        self.stdin_tx
            .send(message)
            .await
            .map_err(|e| AgentError::Ipc("worker".to_string(), e.to_string()))
    }

    async fn recv(&self) -> Option<WorkerMessage> {
        self.stdout_rx.lock().await.recv().await
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }
}

/// Waits up to `timeout` for the worker's first `Ready` message.
pub async fn wait_for_ready(
    transport: &dyn WorkerTransport,
    agent_id: &str,
    timeout: Duration,
) -> Result<(), AgentError> {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match transport.recv().await {
                Some(WorkerMessage::Ready) => return Ok(()),
                Some(_) => continue,
                None => return Err(AgentError::Crashed(agent_id.to_string(), "stream closed before ready".to_string())),
            }
        }
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(AgentError::ReadyTimeout(agent_id.to_string())),
    }
}

/// One pool slot: an agent id, its transport, and its declared role.
pub struct WorkerSlot {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub transport: Arc<dyn WorkerTransport>,
}

/// Snapshot of pool occupancy (spec §4.4 `getStats()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WorkerPoolStats {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub pending: usize,
}

/// Owns a bounded set of live worker slots, keyed by agent id, reused
/// across subtasks via an idle/busy split. Does not itself track each
/// slot's declared role against the Store's `AgentEntry::status` — that
/// remains the single source of truth the Health Monitor reads; this
/// pool's own busy/idle bookkeeping exists only to serve `get_stats` and
/// `cancel_worker` without a round trip through the Store.
pub struct WorkerPool {
    max_workers: Option<usize>,
    slots: Mutex<HashMap<String, WorkerSlot>>,
    idle: Mutex<VecDeque<String>>,
    busy: Mutex<std::collections::HashSet<String>>,
    permits: Option<Arc<Semaphore>>,
    pending: AtomicUsize,
}

impl WorkerPool {
    /// An unbounded pool: used by tests and by the `Health` CLI path, which
    /// never schedules work through it and only needs a `WorkerPool` to
    /// satisfy `HealthMonitor::new`'s signature.
    pub fn new() -> Self {
        Self {
            max_workers: None,
            slots: Mutex::new(HashMap::new()),
            idle: Mutex::new(VecDeque::new()),
            busy: Mutex::new(std::collections::HashSet::new()),
            permits: None,
            pending: AtomicUsize::new(0),
        }
    }

    /// A pool bounded to `max_workers` concurrently busy slots (spec
    /// §4.4's "persistent bounded set of maxWorkers"). Used by the
    /// Orchestrator's production wiring.
    pub fn bounded(max_workers: usize) -> Self {
        Self {
            max_workers: Some(max_workers),
            slots: Mutex::new(HashMap::new()),
            idle: Mutex::new(VecDeque::new()),
            busy: Mutex::new(std::collections::HashSet::new()),
            permits: Some(Arc::new(Semaphore::new(max_workers.max(1)))),
            pending: AtomicUsize::new(0),
        }
    }

    pub async fn insert(&self, slot: WorkerSlot) {
        let id = slot.agent_id.clone();
        self.slots.lock().await.insert(id.clone(), slot);
        self.busy.lock().await.insert(id);
    }

    pub async fn remove(&self, agent_id: &str) -> Option<WorkerSlot> {
        self.busy.lock().await.remove(agent_id);
        self.idle.lock().await.retain(|id| id != agent_id);
        self.slots.lock().await.remove(agent_id)
    }

    pub async fn transport(&self, agent_id: &str) -> Option<Arc<dyn WorkerTransport>> {
        self.slots.lock().await.get(agent_id).map(|s| s.transport.clone())
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        self.slots.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns an idle slot matching `agent_type` to the pool for reuse,
    /// rather than tearing it down. Called once a subtask finishes and the
    /// worker remains alive and responsive.
    pub async fn release(&self, agent_id: &str) {
        if self.busy.lock().await.remove(agent_id) {
            self.idle.lock().await.push_back(agent_id.to_string());
        }
    }

    /// Marks an idle slot of the given role busy and hands back its agent
    /// id and transport for reuse. Returns `None` when the pool should
    /// spawn a fresh worker. The slot stays registered in `slots` the
    /// whole time — only `idle`/`busy` membership changes — since
    /// `transport`/`get_stats` key off `slots` regardless of busy state.
    pub async fn acquire_idle(&self, agent_type: AgentType) -> Option<(String, Arc<dyn WorkerTransport>)> {
        // An unbounded pool (`WorkerPool::new()`) has no capacity pressure
        // to justify reuse, and exists mainly as a test convenience; only
        // the bounded production pool reuses idle slots.
        self.max_workers?;
        let mut idle = self.idle.lock().await;
        let mut scanned = Vec::new();
        let mut found = None;
        while let Some(id) = idle.pop_front() {
            let slots = self.slots.lock().await;
            let matches = slots.get(&id).map(|s| s.agent_type == agent_type).unwrap_or(false);
            drop(slots);
            if matches {
                found = Some(id);
                break;
            }
            scanned.push(id);
        }
        for id in scanned {
            idle.push_back(id);
        }
        drop(idle);

        let id = found?;
        self.busy.lock().await.insert(id.clone());
        let transport = self.slots.lock().await.get(&id).map(|s| s.transport.clone())?;
        Some((id, transport))
    }

    /// Current occupancy (spec §4.4 `getStats()`). `pending` counts
    /// callers currently waiting on `acquire_permit` for a free slot.
    pub async fn get_stats(&self) -> WorkerPoolStats {
        let total = self.slots.lock().await.len();
        let busy = self.busy.lock().await.len();
        WorkerPoolStats {
            total,
            idle: total.saturating_sub(busy),
            busy,
            pending: self.pending.load(Ordering::SeqCst),
        }
    }

    /// Acquires a concurrency permit, blocking if the bounded pool is
    /// already running `max_workers` busy slots. Unbounded pools
    /// (`WorkerPool::new()`) always return immediately.
    pub async fn acquire_permit(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let Some(permits) = &self.permits else { return None };
        self.pending.fetch_add(1, Ordering::SeqCst);
        let permit = permits.clone().acquire_owned().await.expect("semaphore closed");
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(permit)
    }

    /// Sends `Abort` for the worker's current subtask and waits up to
    /// `CANCEL_GRACE` for it to leave the busy set on its own (the normal
    /// path: the worker replies with a `Result` and the caller releases
    /// or removes the slot). If it is still busy once the grace period
    /// elapses, escalates to a hard `kill` (spec §4.4). Returns `true` if
    /// the worker was known to the pool at all.
    pub async fn cancel_worker(&self, agent_id: &str, subtask_id: Uuid) -> bool {
        let Some(transport) = self.transport(agent_id).await else {
            return false;
        };

        let _ = transport.send(PoolMessage::Abort { subtask_id }).await;

        let agent_id_owned = agent_id.to_string();
        let deadline = tokio::time::Instant::now() + CANCEL_GRACE;
        while tokio::time::Instant::now() < deadline {
            if !self.busy.lock().await.contains(&agent_id_owned) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if self.busy.lock().await.contains(&agent_id_owned) {
            warn!(agent_id = %agent_id_owned, "worker did not abort within grace period, killing");
            transport.kill().await;
            self.remove(agent_id).await;
        }
        true
    }

    pub async fn shutdown_all(&self) {
        let ids = self.agent_ids().await;
        for id in ids {
            if let Some(transport) = self.transport(&id).await {
                let _ = transport.send(PoolMessage::Shutdown).await;
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process fake transport for tests, exposed unconditionally so both
/// unit tests and the crate's `tests/` integration suite can drive the
/// pool and scheduler without a real subprocess.
pub mod mock {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    /// In-process fake transport: feeds a scripted queue of `WorkerMessage`s
    /// and records every `PoolMessage` sent to it, so the pool/scheduler can
    /// be exercised without a real subprocess.
    pub struct MockTransport {
        sent: Mutex<Vec<PoolMessage>>,
        sent_tx: mpsc::Sender<PoolMessage>,
        sent_rx: Mutex<mpsc::Receiver<PoolMessage>>,
        inbox_tx: mpsc::Sender<WorkerMessage>,
        inbox_rx: Mutex<mpsc::Receiver<WorkerMessage>>,
        killed: AtomicBool,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            let (tx, rx) = mpsc::channel(32);
            let (sent_tx, sent_rx) = mpsc::channel(32);
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                sent_tx,
                sent_rx: Mutex::new(sent_rx),
                inbox_tx: tx,
                inbox_rx: Mutex::new(rx),
                killed: AtomicBool::new(false),
            })
        }

        pub async fn push(&self, message: WorkerMessage) {
            let _ = self.inbox_tx.send(message).await;
        }

        /// Awaits the next message the pool/scheduler sends to this
        /// worker, useful for scripting a reply once an `Execute` arrives.
        pub async fn next_sent(&self) -> Option<PoolMessage> {
            self.sent_rx.lock().await.recv().await
        }

        pub async fn sent_messages(&self) -> Vec<PoolMessage> {
            self.sent.lock().await.clone()
        }

        pub fn was_killed(&self) -> bool {
            self.killed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorkerTransport for MockTransport {
        async fn send(&self, message: PoolMessage) -> Result<(), AgentError> {
            self.sent.lock().await.push(message.clone());
            let _ = self.sent_tx.send(message).await;
            Ok(())
        }

        async fn recv(&self) -> Option<WorkerMessage> {
            self.inbox_rx.lock().await.recv().await
        }

        fn pid(&self) -> Option<u32> {
            None
        }

        async fn kill(&self) {
            self.killed.store(true, Ordering::SeqCst);
        }
    }
}
