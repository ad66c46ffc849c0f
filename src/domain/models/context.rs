//! SharedContext / ContextEntry — the per-task collaborative notebook.
//!
//! Append-only for the life of the task; concurrent appends are allowed and
//! observable ordering follows arrival at the Store (spec §5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of thing a worker is recording in the shared notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEntryType {
    File,
    Pattern,
    Insight,
    Discovery,
    Error,
}

/// One append-only entry in a task's shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub entry_type: ContextEntryType,
    pub data: serde_json::Value,
}

impl ContextEntry {
    pub fn new(
        agent_id: impl Into<String>,
        entry_type: ContextEntryType,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            timestamp: now,
            entry_type,
            data,
        }
    }
}

/// Per-task collaborative notebook, shared by all agents working the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedContext {
    pub task_id: Uuid,
    pub project_path: String,
    pub discoveries: Vec<ContextEntry>,
}

impl SharedContext {
    pub fn new(task_id: Uuid, project_path: String) -> Self {
        Self {
            task_id,
            project_path,
            discoveries: Vec::new(),
        }
    }

    pub fn append(&mut self, entry: ContextEntry) {
        self.discoveries.push(entry);
    }

    pub fn entries_of_type(&self, entry_type: ContextEntryType) -> impl Iterator<Item = &ContextEntry> {
        self.discoveries.iter().filter(move |e| e.entry_type == entry_type)
    }
}
