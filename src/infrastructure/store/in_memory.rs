//! `InMemoryStore` — the shipped implementation of the `Store` port.
//!
//! Grounded on `services/event_store.rs::InMemoryEventStore`: RwLock-guarded
//! maps plus one `broadcast::Sender` per channel family. The real backend
//! (spec §1) is out of scope; this gives the rest of the system a working,
//! testable façade with the same namespaced-key shape spec §4.1 describes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    AgentEntry, AgentStatus, ContextEntry, Event, SharedContext, Subtask, SubtaskResult,
    SubtaskStatus, Task, TaskStatus,
};
use crate::domain::ports::store::Store;

const BROADCAST_CAPACITY: usize = 1024;

struct HeartbeatPresence {
    set_at_ms: i64,
    ttl_ms: u64,
}

impl HeartbeatPresence {
    fn is_live(&self, now_ms: i64) -> bool {
        now_ms - self.set_at_ms < self.ttl_ms as i64
    }
}

#[derive(Default)]
struct Tables {
    tasks: HashMap<Uuid, Task>,
    /// `task:{id}:subtasks` — ordered list of subtask ids per task.
    task_subtask_order: HashMap<Uuid, Vec<Uuid>>,
    subtasks: HashMap<Uuid, Subtask>,
    agents: HashMap<String, AgentEntry>,
    heartbeats: HashMap<String, HeartbeatPresence>,
    contexts: HashMap<Uuid, SharedContext>,
    results: HashMap<Uuid, HashMap<Uuid, SubtaskResult>>,
}

/// In-memory, single-process implementation of the `Store` port.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    // A plain std mutex: never held across an `.await`, so it can also
    // back the synchronous `subscribe` method the `Store` trait requires.
    channels: std::sync::Mutex<HashMap<String, broadcast::Sender<Event>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            channels: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Event> {
        let mut channels = self.channels.lock().expect("channels mutex poisoned");
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_task(&self, task: Task) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.task_subtask_order.entry(task.id).or_default();
        tables.results.entry(task.id).or_default();
        tables.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError> {
        self.tables
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task:{id}:meta")))
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let task = tables
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task:{id}:meta")))?;
        if !task.status.can_transition_to(status) && task.status != status {
            tracing::warn!(
                task_id = %id,
                from = task.status.as_str(),
                to = status.as_str(),
                "status transition outside the declared lattice; accepted by the store, enforcement is at the scheduler"
            );
        }
        task.status = status;
        task.error = error;
        task.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn create_subtask(&self, subtask: Subtask) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .task_subtask_order
            .entry(subtask.parent_task_id)
            .or_default()
            .push(subtask.id);
        tables.subtasks.insert(subtask.id, subtask);
        Ok(())
    }

    async fn get_subtask(&self, id: Uuid) -> Result<Subtask, StoreError> {
        self.tables
            .read()
            .await
            .subtasks
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("subtask:{id}")))
    }

    async fn get_subtasks_for_task(&self, task_id: Uuid) -> Result<Vec<Subtask>, StoreError> {
        let tables = self.tables.read().await;
        let order = tables
            .task_subtask_order
            .get(&task_id)
            .cloned()
            .unwrap_or_default();
        Ok(order
            .into_iter()
            .filter_map(|id| tables.subtasks.get(&id).cloned())
            .collect())
    }

    async fn update_subtask_status(
        &self,
        id: Uuid,
        new_status: SubtaskStatus,
        assigned_agent_id: Option<String>,
        error: Option<String>,
        result: Option<SubtaskResult>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let subtask = tables
            .subtasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("subtask:{id}")))?;
        if new_status == SubtaskStatus::Executing {
            subtask.attempts += 1;
        }
        subtask.status = new_status;
        if assigned_agent_id.is_some() || new_status == SubtaskStatus::Pending {
            subtask.assigned_agent_id = assigned_agent_id;
        }
        if error.is_some() {
            subtask.error = error;
        }
        if let Some(r) = result {
            subtask.result = Some(r);
        }
        subtask.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn set_decomposed_into(&self, id: Uuid, children: Vec<Uuid>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let subtask = tables
            .subtasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("subtask:{id}")))?;
        subtask.decomposed_into = children;
        subtask.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn register_agent(&self, agent: AgentEntry) -> Result<(), StoreError> {
        self.tables.write().await.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<AgentEntry, StoreError> {
        self.tables
            .read()
            .await
            .agents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("agents:registry:{id}")))
    }

    async fn get_all_agents(&self) -> Result<Vec<AgentEntry>, StoreError> {
        Ok(self.tables.read().await.agents.values().cloned().collect())
    }

    async fn update_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        current_subtask_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let agent = tables
            .agents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("agents:registry:{id}")))?;
        agent.status = status;
        agent.current_subtask_id = current_subtask_id;
        Ok(())
    }

    async fn update_heartbeat(&self, id: &str, heartbeat_timeout_ms: u64) -> Result<(), StoreError> {
        let now = Self::now_ms();
        let mut tables = self.tables.write().await;
        tables.heartbeats.insert(
            id.to_string(),
            HeartbeatPresence {
                set_at_ms: now,
                ttl_ms: heartbeat_timeout_ms,
            },
        );
        if let Some(agent) = tables.agents.get_mut(id) {
            agent.last_heartbeat = now;
        }
        Ok(())
    }

    async fn record_agent_result(
        &self,
        id: &str,
        success: bool,
        execution_ms: u64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let agent = tables
            .agents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("agents:registry:{id}")))?;
        if success {
            agent.metrics.record_success(execution_ms);
        } else {
            agent.metrics.record_failure(execution_ms);
        }
        Ok(())
    }

    async fn is_agent_alive(&self, id: &str) -> Result<bool, StoreError> {
        let now = Self::now_ms();
        Ok(self
            .tables
            .read()
            .await
            .heartbeats
            .get(id)
            .map(|p| p.is_live(now))
            .unwrap_or(false))
    }

    async fn remove_agent(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.agents.remove(id);
        tables.heartbeats.remove(id);
        Ok(())
    }

    async fn init_context(&self, task_id: Uuid, project_path: String) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .contexts
            .insert(task_id, SharedContext::new(task_id, project_path));
        Ok(())
    }

    async fn get_context(&self, task_id: Uuid) -> Result<SharedContext, StoreError> {
        self.tables
            .read()
            .await
            .contexts
            .get(&task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task:{task_id}:context")))
    }

    async fn append_context(&self, task_id: Uuid, entry: ContextEntry) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let ctx = tables
            .contexts
            .entry(task_id)
            .or_insert_with(|| SharedContext::new(task_id, String::new()));
        ctx.append(entry);
        Ok(())
    }

    async fn store_result(&self, task_id: Uuid, result: SubtaskResult) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .results
            .entry(task_id)
            .or_default()
            .insert(result.subtask_id, result);
        Ok(())
    }

    async fn get_results(&self, task_id: Uuid) -> Result<Vec<SubtaskResult>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .results
            .get(&task_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, event: Event) -> Result<(), StoreError> {
        let tx = self.channel(channel);
        // A channel with no current subscribers is not an error: delivery
        // is at-most-once (spec §4.2).
        let _ = tx.send(event);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Event> {
        self.channel(channel).subscribe()
    }
}

/// Convenience constructor for sharing one store across components.
pub fn shared_in_memory_store() -> Arc<dyn Store> {
    Arc::new(InMemoryStore::new())
}
