//! Aggregator: a pure read of a task's subtask/result/context state into a
//! `TaskReport`, plus two derived text views (a one-line summary and a
//! role-grouped detail listing), grounded on the teacher's
//! `services/dag_executor.rs::ExecutionResults` reducer.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    AgentType, ContextEntry, ContextEntryType, SharedContext, Subtask, SubtaskResult,
    SubtaskStatus, TaskStatus,
};
use crate::domain::ports::Store;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration_ms: u64,
    pub avg_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AgentTypeStats {
    pub agent_type: String,
    pub count: usize,
    pub successful: usize,
    pub failed: usize,
    pub avg_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TimelineEntry {
    pub subtask_id: Uuid,
    pub agent_type: String,
    pub description: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub execution_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubtaskOutcome {
    pub subtask_id: Uuid,
    pub description: String,
    pub agent_type: String,
    pub status: SubtaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<SubtaskResult>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub task_status: TaskStatus,
    pub summary: TaskSummary,
    pub by_agent_type: Vec<AgentTypeStats>,
    pub outputs: Vec<String>,
    pub errors: Vec<String>,
    pub insights: Vec<String>,
    pub files_modified: Vec<String>,
    pub timeline: Vec<TimelineEntry>,
    pub subtasks: Vec<SubtaskOutcome>,
}

/// Agent roles in the order spec.md §4.8 names for the merged-outputs text
/// view. `Builder` isn't in that list — its subtasks (bookend scaffolding
/// and build verification, spec §4.3) are appended as a trailing group
/// rather than silently dropped.
const ROLE_ORDER: [AgentType; 5] = [
    AgentType::Researcher,
    AgentType::Implementer,
    AgentType::Tester,
    AgentType::Reviewer,
    AgentType::Documenter,
];

/// Reads a task's subtasks, results, and shared context from the store and
/// folds them into a `TaskReport`. A `skipped`/`decomposed` synthesized
/// result (spec §4.6, DESIGN.md Open Question 2) counts toward
/// `completed`, matching its `success: true` marker — `skipped` is broken
/// out separately only for the text views, not in the `summary.failed`
/// count semantics downstream code relies on.
pub async fn build_report(store: &dyn Store, task_id: Uuid) -> Result<TaskReport, StoreError> {
    let task = store.get_task(task_id).await?;
    let subtasks = store.get_subtasks_for_task(task_id).await?;
    let context = match store.get_context(task_id).await {
        Ok(context) => context,
        Err(StoreError::NotFound(_)) => SharedContext::new(task_id, task.project_path.clone()),
        Err(e) => return Err(e),
    };

    let mut completed = 0;
    let mut failed = 0;
    let mut skipped = 0;
    let mut total_duration_ms: u64 = 0;
    let mut outputs = Vec::new();
    let mut errors = Vec::new();
    let mut by_type: HashMap<AgentType, (usize, usize, usize, u64)> = HashMap::new();
    let mut timeline = Vec::new();
    let mut outcomes = Vec::with_capacity(subtasks.len());

    for subtask in &subtasks {
        let duration = subtask.result.as_ref().map(|r| r.execution_ms).unwrap_or(0);

        match subtask.status {
            SubtaskStatus::Completed => {
                completed += 1;
                total_duration_ms += duration;
                if is_skip_marker(subtask) {
                    skipped += 1;
                } else if let Some(output) = subtask.result.as_ref().and_then(|r| r.output.as_deref())
                {
                    outputs.push(output.to_string());
                }
            }
            SubtaskStatus::Failed => {
                failed += 1;
                total_duration_ms += duration;
                let error = subtask
                    .result
                    .as_ref()
                    .and_then(|r| r.error.as_deref())
                    .or(subtask.error.as_deref());
                if let Some(error) = error {
                    errors.push(error.to_string());
                }
            }
            _ => {}
        }

        if subtask.status.is_terminal() {
            let stats = by_type.entry(subtask.agent_type).or_insert((0, 0, 0, 0));
            stats.0 += 1;
            if subtask.status == SubtaskStatus::Completed {
                stats.1 += 1;
            } else {
                stats.2 += 1;
            }
            stats.3 += duration;

            timeline.push(TimelineEntry {
                subtask_id: subtask.id,
                agent_type: subtask.agent_type.as_str().to_string(),
                description: subtask.description.clone(),
                started_at: subtask.updated_at - chrono::Duration::milliseconds(duration as i64),
                execution_ms: duration,
            });
        }

        outcomes.push(SubtaskOutcome {
            subtask_id: subtask.id,
            description: subtask.description.clone(),
            agent_type: subtask.agent_type.as_str().to_string(),
            status: subtask.status,
            attempts: subtask.attempts,
            max_attempts: subtask.max_attempts,
            result: subtask.result.clone(),
        });
    }

    timeline.sort_by_key(|entry| entry.started_at);

    let mut by_agent_type: Vec<AgentTypeStats> = by_type
        .into_iter()
        .map(|(agent_type, (count, successful, failed, duration_sum))| AgentTypeStats {
            agent_type: agent_type.as_str().to_string(),
            count,
            successful,
            failed,
            avg_duration_ms: if count == 0 { 0 } else { duration_sum / count as u64 },
        })
        .collect();
    by_agent_type.sort_by_key(|stats| {
        ROLE_ORDER
            .iter()
            .position(|role| role.as_str() == stats.agent_type)
            .unwrap_or(ROLE_ORDER.len())
    });

    let insights: Vec<String> = context
        .entries_of_type(ContextEntryType::Insight)
        .map(context_entry_text)
        .collect();

    let mut seen_files = HashSet::new();
    let mut files_modified = Vec::new();
    for entry in context.entries_of_type(ContextEntryType::File) {
        let path = context_entry_text(entry);
        if seen_files.insert(path.clone()) {
            files_modified.push(path);
        }
    }

    let terminal_count = completed + failed;
    let avg_duration_ms = if terminal_count == 0 {
        0
    } else {
        total_duration_ms / terminal_count as u64
    };

    Ok(TaskReport {
        task_id,
        task_status: task.status,
        summary: TaskSummary {
            total: subtasks.len(),
            completed,
            failed,
            skipped,
            total_duration_ms,
            avg_duration_ms,
        },
        by_agent_type,
        outputs,
        errors,
        insights,
        files_modified,
        timeline,
        subtasks: outcomes,
    })
}

/// A context entry's data is a free-form JSON value; workers are expected
/// to put the human-readable payload under `text` (for insights) or `path`
/// (for files), falling back to the raw JSON so nothing is silently lost.
fn context_entry_text(entry: &ContextEntry) -> String {
    entry
        .data
        .get("text")
        .or_else(|| entry.data.get("path"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| entry.data.to_string())
}

fn is_skip_marker(subtask: &Subtask) -> bool {
    subtask
        .result
        .as_ref()
        .and_then(|r| r.output.as_deref())
        .map(|output| output == "skipped")
        .unwrap_or(false)
}

/// A one-line human summary, the shape the CLI's non-JSON `status` output
/// prints (spec §6).
pub fn one_line_summary(report: &TaskReport) -> String {
    format!(
        "task {} [{}]: {}/{} completed, {} failed, {} skipped",
        report.task_id,
        report.task_status.as_str(),
        report.summary.completed,
        report.summary.total,
        report.summary.failed,
        report.summary.skipped,
    )
}

/// A multi-line per-subtask breakdown used by the CLI's verbose `status`
/// output and by log lines on task completion: the merged outputs grouped
/// by agent role in the order researcher, implementer, tester, reviewer,
/// documenter (spec §4.8), with any builder subtasks trailing as a final
/// group.
pub fn detail_view(report: &TaskReport) -> String {
    let mut lines = vec![one_line_summary(report)];

    let mut remaining: Vec<&SubtaskOutcome> = report.subtasks.iter().collect();
    for role in ROLE_ORDER.iter() {
        let role_str = role.as_str();
        let (matching, rest): (Vec<&SubtaskOutcome>, Vec<&SubtaskOutcome>) = remaining
            .into_iter()
            .partition(|outcome| outcome.agent_type == role_str);
        remaining = rest;
        if matching.is_empty() {
            continue;
        }
        lines.push(format!("-- {role_str} --"));
        for outcome in matching {
            lines.push(format_outcome_line(outcome));
        }
    }

    if !remaining.is_empty() {
        lines.push(format!("-- {} --", AgentType::Builder.as_str()));
        for outcome in remaining {
            lines.push(format_outcome_line(outcome));
        }
    }

    lines.join("\n")
}

fn format_outcome_line(outcome: &SubtaskOutcome) -> String {
    let error_suffix = outcome
        .result
        .as_ref()
        .and_then(|r| r.error.as_deref())
        .map(|e| format!(" — {e}"))
        .unwrap_or_default();
    format!(
        "  [{}] {} ({}, attempt {}/{}){}",
        outcome.status.as_str(),
        outcome.description,
        outcome.agent_type,
        outcome.attempts,
        outcome.max_attempts,
        error_suffix,
    )
}
