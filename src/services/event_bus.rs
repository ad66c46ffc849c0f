//! Event bus: a thin layer over `Store::publish`/`subscribe` that knows the
//! system's channel-naming convention (spec §4.2), grounded on the
//! teacher's `services/event_bus.rs`.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{Event, EventType};
use crate::domain::ports::Store;

/// Channel a task's lifecycle events are published to.
pub fn task_channel(task_id: Uuid) -> String {
    format!("task:{task_id}:events")
}

/// Channel agent fleet events (registration, heartbeat, status) are
/// published to, shared across all tasks.
pub fn agent_channel() -> String {
    "agents:events".to_string()
}

/// Publishes to and subscribes from a `Store`'s channels under the naming
/// convention the rest of the system expects.
pub struct EventBus {
    store: Arc<dyn Store>,
}

impl EventBus {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn publish_task_event(
        &self,
        task_id: Uuid,
        event_type: EventType,
        now: chrono::DateTime<chrono::Utc>,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let event = Event::new(event_type, now)
            .with_task(task_id)
            .with_payload(payload);
        self.store.publish(&task_channel(task_id), event).await
    }

    pub async fn publish_agent_event(
        &self,
        agent_id: &str,
        event_type: EventType,
        now: chrono::DateTime<chrono::Utc>,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let event = Event::new(event_type, now)
            .with_agent(agent_id.to_string())
            .with_payload(payload);
        self.store.publish(&agent_channel(), event).await
    }

    pub fn subscribe_task(&self, task_id: Uuid) -> broadcast::Receiver<Event> {
        self.store.subscribe(&task_channel(task_id))
    }

    pub fn subscribe_agents(&self) -> broadcast::Receiver<Event> {
        self.store.subscribe(&agent_channel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::InMemoryStore;

    #[tokio::test]
    async fn subscriber_receives_published_task_event() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bus = EventBus::new(store);
        let task_id = Uuid::new_v4();
        let mut rx = bus.subscribe_task(task_id);

        bus.publish_task_event(
            task_id,
            EventType::TaskStarted,
            chrono::Utc::now(),
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::TaskStarted);
        assert_eq!(event.task_id, Some(task_id));
    }
}
