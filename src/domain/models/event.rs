//! Event types for the Event Bus (spec §4.2). Tagged union values with a
//! `type` discriminator and a monotonically non-decreasing `timestamp`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The event type discriminator, used by `EventBus::on`/`waitFor` filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    SubtaskCreated,
    SubtaskQueued,
    SubtaskAssigned,
    SubtaskStarted,
    SubtaskProgress,
    SubtaskCompleted,
    SubtaskFailed,
    SubtaskRetrying,
    AgentRegistered,
    AgentHeartbeat,
    AgentBusy,
    AgentIdle,
    AgentError,
    AgentOffline,
    AgentRemoved,
    DiscoveryShared,
    SystemShutdown,
    SystemError,
}

/// A single event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<Uuid>,
    pub subtask_id: Option<Uuid>,
    pub agent_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, now: DateTime<Utc>) -> Self {
        Self {
            event_type,
            timestamp: now,
            task_id: None,
            subtask_id: None,
            agent_id: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_subtask(mut self, subtask_id: Uuid) -> Self {
        self.subtask_id = Some(subtask_id);
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
