//! Health Monitor: periodically grades agent liveness from missed
//! heartbeat intervals and reaps dead agents, grounded on the teacher's
//! `application/resource_monitor.rs` polling loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::models::{AgentEntry, AgentStatus, HealthGrade, SubtaskResult, SubtaskStatus};
use crate::domain::ports::Store;
use crate::services::event_bus::EventBus;
use crate::services::worker_pool::WorkerPool;

/// Runs the periodic health check loop until `shutdown` fires. Intended to
/// be spawned as its own task (spec §4.5: "Health Monitor polls on an
/// interval independent of the scheduler's wave loop").
pub struct HealthMonitor {
    store: Arc<dyn Store>,
    pool: Arc<WorkerPool>,
    event_bus: Arc<EventBus>,
    heartbeat_interval_ms: u64,
    heartbeat_timeout_ms: u64,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        pool: Arc<WorkerPool>,
        event_bus: Arc<EventBus>,
        heartbeat_interval_ms: u64,
        heartbeat_timeout_ms: u64,
    ) -> Self {
        Self {
            store,
            pool,
            event_bus,
            heartbeat_interval_ms,
            heartbeat_timeout_ms,
        }
    }

    fn check_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms * 2)
    }

    /// Runs until `shutdown` resolves. Each tick grades every registered
    /// agent and reaps any graded `Dead` (spec §4.5: missed >= 3 intervals).
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.check_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.check_once().await {
                        warn!(error = %e, "health check tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    /// One grading pass over every registered agent. Exposed separately
    /// from `run` so tests can drive it deterministically without a real
    /// timer.
    pub async fn check_once(&self) -> Result<(), crate::domain::error::StoreError> {
        let agents = self.store.get_all_agents().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        for agent in agents {
            // missed = ⌊(now - lastHeartbeat) / heartbeatIntervalMs⌋ (spec §4.5).
            let elapsed_ms = (now_ms - agent.last_heartbeat).max(0);
            let missed = (elapsed_ms as u64) / self.heartbeat_interval_ms.max(1);
            let grade = HealthGrade::from_missed_intervals(missed);

            match grade {
                HealthGrade::Healthy | HealthGrade::Warning => {}
                HealthGrade::Critical => {
                    warn!(agent_id = %agent.id, "agent health critical, missed heartbeats");
                }
                HealthGrade::Dead => {
                    warn!(agent_id = %agent.id, "agent declared dead, reaping");
                    self.reap(&agent).await?;
                }
            }
        }
        Ok(())
    }

    /// Marks the agent offline, resolves its in-flight subtask (if any) per
    /// I2 — rescheduled to pending when attempts remain, otherwise failed
    /// with an explanatory error — then removes the agent from the
    /// registry entirely (spec §4.5, invariant I7, Testable Property 7).
    async fn reap(&self, agent: &AgentEntry) -> Result<(), crate::domain::error::StoreError> {
        self.store
            .update_agent_status(&agent.id, AgentStatus::Offline, None)
            .await?;
        self.event_bus
            .publish_agent_event(
                &agent.id,
                crate::domain::models::EventType::AgentOffline,
                chrono::Utc::now(),
                serde_json::json!({ "reason": "heartbeat timeout" }),
            )
            .await?;

        if let Some(subtask_id) = agent.current_subtask_id {
            if let Ok(subtask) = self.store.get_subtask(subtask_id).await {
                if subtask.attempts < subtask.max_attempts {
                    self.store
                        .update_subtask_status(subtask_id, SubtaskStatus::Pending, None, None, None)
                        .await?;
                } else {
                    let error = format!(
                        "agent {} went offline with subtask in flight and max attempts ({}) exceeded",
                        agent.id, subtask.max_attempts
                    );
                    let result = SubtaskResult::failure(subtask_id, error.clone(), 0);
                    self.store
                        .store_result(subtask.parent_task_id, result.clone())
                        .await?;
                    self.store
                        .update_subtask_status(
                            subtask_id,
                            SubtaskStatus::Failed,
                            None,
                            Some(error),
                            Some(result),
                        )
                        .await?;
                }
            }
        }

        self.pool.remove(&agent.id).await;
        self.store.remove_agent(&agent.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentEntry;
    use crate::domain::models::AgentType;
    use crate::infrastructure::store::InMemoryStore;

    #[tokio::test]
    async fn reaps_agent_whose_heartbeat_has_expired() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let pool = Arc::new(WorkerPool::new());
        let event_bus = Arc::new(EventBus::new(store.clone()));

        // last_heartbeat=0 (epoch): already far more than 3 intervals stale.
        let agent = AgentEntry::new("agent-1".to_string(), AgentType::Implementer, None, 0);
        store.register_agent(agent).await.unwrap();

        let monitor = HealthMonitor::new(store.clone(), pool, event_bus, 10, 30);
        monitor.check_once().await.unwrap();

        // Reaping removes the agent from the registry entirely (spec §4.5, I7).
        assert!(store.get_agent("agent-1").await.is_err());
    }

    #[tokio::test]
    async fn reaping_an_agent_reschedules_its_in_flight_subtask() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let pool = Arc::new(WorkerPool::new());
        let event_bus = Arc::new(EventBus::new(store.clone()));

        let input = crate::domain::models::TaskInput {
            description: "do it".to_string(),
            project_path: "/tmp/proj".to_string(),
            task_type: None,
            max_agents: None,
            timeout_ms: None,
        };
        let task = crate::domain::models::Task::from_input(&input, chrono::Utc::now());
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let subtask = crate::domain::models::Subtask::new(
            task_id,
            "do work".to_string(),
            AgentType::Implementer,
            vec![],
            3,
            chrono::Utc::now(),
        );
        let subtask_id = subtask.id;
        store.create_subtask(subtask).await.unwrap();
        store
            .update_subtask_status(
                subtask_id,
                SubtaskStatus::Executing,
                Some("agent-1".to_string()),
                None,
                None,
            )
            .await
            .unwrap();

        let mut agent = AgentEntry::new("agent-1".to_string(), AgentType::Implementer, None, 0);
        agent.current_subtask_id = Some(subtask_id);
        agent.status = AgentStatus::Busy;
        store.register_agent(agent).await.unwrap();

        let monitor = HealthMonitor::new(store.clone(), pool, event_bus, 10, 30);
        monitor.check_once().await.unwrap();

        assert!(store.get_agent("agent-1").await.is_err());
        let refetched = store.get_subtask(subtask_id).await.unwrap();
        assert_eq!(refetched.status, SubtaskStatus::Pending);
        assert!(refetched.assigned_agent_id.is_none());
    }

    #[tokio::test]
    async fn reaping_fails_in_flight_subtask_once_attempts_are_exhausted() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let pool = Arc::new(WorkerPool::new());
        let event_bus = Arc::new(EventBus::new(store.clone()));

        let input = crate::domain::models::TaskInput {
            description: "do it".to_string(),
            project_path: "/tmp/proj".to_string(),
            task_type: None,
            max_agents: None,
            timeout_ms: None,
        };
        let task = crate::domain::models::Task::from_input(&input, chrono::Utc::now());
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let mut subtask = crate::domain::models::Subtask::new(
            task_id,
            "do work".to_string(),
            AgentType::Implementer,
            vec![],
            1,
            chrono::Utc::now(),
        );
        subtask.attempts = 1;
        let subtask_id = subtask.id;
        store.create_subtask(subtask).await.unwrap();
        store
            .update_subtask_status(
                subtask_id,
                SubtaskStatus::Executing,
                Some("agent-1".to_string()),
                None,
                None,
            )
            .await
            .unwrap();

        let mut agent = AgentEntry::new("agent-1".to_string(), AgentType::Implementer, None, 0);
        agent.current_subtask_id = Some(subtask_id);
        agent.status = AgentStatus::Busy;
        store.register_agent(agent).await.unwrap();

        let monitor = HealthMonitor::new(store.clone(), pool, event_bus, 10, 30);
        monitor.check_once().await.unwrap();

        let refetched = store.get_subtask(subtask_id).await.unwrap();
        assert_eq!(refetched.status, SubtaskStatus::Failed);
        assert!(refetched.error.is_some());
    }

    #[tokio::test]
    async fn missed_intervals_reach_warning_and_critical_before_dead() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let pool = Arc::new(WorkerPool::new());
        let event_bus = Arc::new(EventBus::new(store.clone()));

        let now_ms = chrono::Utc::now().timestamp_millis();
        // One missed interval (heartbeat_interval_ms=100): warning, not dead.
        let agent = AgentEntry::new("agent-1".to_string(), AgentType::Implementer, None, now_ms - 150);
        store.register_agent(agent).await.unwrap();

        let monitor = HealthMonitor::new(store.clone(), pool, event_bus, 100, 1_000);
        monitor.check_once().await.unwrap();

        // Still registered and idle: a warning/critical grade must not reap.
        let refetched = store.get_agent("agent-1").await.unwrap();
        assert_eq!(refetched.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn leaves_a_live_agent_alone() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let pool = Arc::new(WorkerPool::new());
        let event_bus = Arc::new(EventBus::new(store.clone()));

        let agent = AgentEntry::new("agent-1".to_string(), AgentType::Implementer, None, 0);
        store.register_agent(agent).await.unwrap();
        store.update_heartbeat("agent-1", 30_000).await.unwrap();

        let monitor = HealthMonitor::new(store.clone(), pool, event_bus, 10, 30);
        monitor.check_once().await.unwrap();

        let refetched = store.get_agent("agent-1").await.unwrap();
        assert_eq!(refetched.status, AgentStatus::Idle);
    }
}
