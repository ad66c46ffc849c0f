//! `Store` port — the typed façade over the key-value + pub/sub backend
//! (spec §4.1). The backend itself is an external, contract-only
//! collaborator (spec §1); this trait is the contract.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    AgentEntry, ContextEntry, Event, SharedContext, Subtask, SubtaskResult, Task, TaskStatus,
};

/// Typed CRUD + pub/sub over a key-value backend with string values, hash
/// fields, lists, key TTL, and channel pub/sub (spec §4.1).
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_task(&self, task: Task) -> Result<(), StoreError>;
    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError>;
    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    async fn create_subtask(&self, subtask: Subtask) -> Result<(), StoreError>;
    async fn get_subtask(&self, id: Uuid) -> Result<Subtask, StoreError>;
    /// Preserves insertion order (spec §4.1).
    async fn get_subtasks_for_task(&self, task_id: Uuid) -> Result<Vec<Subtask>, StoreError>;
    async fn update_subtask_status(
        &self,
        id: Uuid,
        new_status: crate::domain::models::SubtaskStatus,
        assigned_agent_id: Option<String>,
        error: Option<String>,
        result: Option<SubtaskResult>,
    ) -> Result<(), StoreError>;
    /// Records the ids of the replacement subtasks a `decompose`
    /// remediation produced for `id` (DESIGN.md Open Question 1).
    async fn set_decomposed_into(&self, id: Uuid, children: Vec<Uuid>) -> Result<(), StoreError>;

    async fn register_agent(&self, agent: AgentEntry) -> Result<(), StoreError>;
    async fn get_agent(&self, id: &str) -> Result<AgentEntry, StoreError>;
    async fn get_all_agents(&self) -> Result<Vec<AgentEntry>, StoreError>;
    async fn update_agent_status(
        &self,
        id: &str,
        status: crate::domain::models::AgentStatus,
        current_subtask_id: Option<Uuid>,
    ) -> Result<(), StoreError>;
    /// Sets the presence key with TTL = `heartbeat_timeout_ms` and refreshes
    /// `lastHeartbeat` (spec §4.1).
    async fn update_heartbeat(&self, id: &str, heartbeat_timeout_ms: u64) -> Result<(), StoreError>;
    /// Folds one subtask outcome into the agent's running metrics
    /// (`AgentMetrics::record_success`/`record_failure`).
    async fn record_agent_result(&self, id: &str, success: bool, execution_ms: u64) -> Result<(), StoreError>;
    async fn is_agent_alive(&self, id: &str) -> Result<bool, StoreError>;
    async fn remove_agent(&self, id: &str) -> Result<(), StoreError>;

    async fn init_context(&self, task_id: Uuid, project_path: String) -> Result<(), StoreError>;
    async fn get_context(&self, task_id: Uuid) -> Result<SharedContext, StoreError>;
    async fn append_context(&self, task_id: Uuid, entry: ContextEntry) -> Result<(), StoreError>;

    async fn store_result(&self, task_id: Uuid, result: SubtaskResult) -> Result<(), StoreError>;
    async fn get_results(&self, task_id: Uuid) -> Result<Vec<SubtaskResult>, StoreError>;

    /// Publishes an event to the named channel; at-most-once across process
    /// boundaries (spec §4.2's ordering guarantee).
    async fn publish(&self, channel: &str, event: Event) -> Result<(), StoreError>;
    /// Subscribes to a channel, returning a receiver of future events.
    fn subscribe(&self, channel: &str) -> tokio::sync::broadcast::Receiver<Event>;
}
