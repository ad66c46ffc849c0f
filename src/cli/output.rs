//! CLI output formatting: a JSON/human switch grounded on the teacher's
//! `cli/output.rs::CommandOutput` trait, plus a `comfy-table` formatter for
//! tabular views, grounded on `cli/output/table.rs`.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use crate::domain::models::{AgentEntry, AgentStatus};
use crate::services::aggregator::TaskReport;

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
}

pub fn print_output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(result).unwrap_or_default()
        );
    } else {
        println!("{}", result.to_human());
    }
}

impl CommandOutput for TaskReport {
    fn to_human(&self) -> String {
        crate::services::aggregator::detail_view(self)
    }
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Renders the agent fleet as a table (`aichestrator agents`).
pub fn format_agents_table(agents: &[AgentEntry]) -> String {
    let mut table = base_table();
    table.set_header(vec![
        Cell::new("ID").add_attribute(Attribute::Bold),
        Cell::new("Type").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Current Subtask").add_attribute(Attribute::Bold),
        Cell::new("Completed").add_attribute(Attribute::Bold),
        Cell::new("Failed").add_attribute(Attribute::Bold),
    ]);

    for agent in agents {
        let status_cell = Cell::new(agent.status.as_str()).fg(status_color(agent.status));
        let subtask_display = agent
            .current_subtask_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&agent.id),
            Cell::new(agent.agent_type.as_str()),
            status_cell,
            Cell::new(subtask_display),
            Cell::new(agent.metrics.tasks_completed.to_string()),
            Cell::new(agent.metrics.tasks_failed.to_string()),
        ]);
    }

    table.to_string()
}

/// Renders a task's subtasks as a table (`aichestrator status`, non-JSON).
pub fn format_subtasks_table(report: &TaskReport) -> String {
    let mut table = base_table();
    table.set_header(vec![
        Cell::new("Subtask").add_attribute(Attribute::Bold),
        Cell::new("Agent").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Attempts").add_attribute(Attribute::Bold),
    ]);

    for outcome in &report.subtasks {
        table.add_row(vec![
            Cell::new(truncate(&outcome.description, 48)),
            Cell::new(&outcome.agent_type),
            Cell::new(outcome.status.as_str()),
            Cell::new(format!("{}/{}", outcome.attempts, outcome.max_attempts)),
        ]);
    }

    table.to_string()
}

fn status_color(status: AgentStatus) -> Color {
    match status {
        AgentStatus::Idle => Color::Green,
        AgentStatus::Busy => Color::Blue,
        AgentStatus::Error => Color::Red,
        AgentStatus::Offline => Color::DarkGrey,
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        format!("{}...", &text[..max.saturating_sub(3)])
    }
}
