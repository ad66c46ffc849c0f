//! Decomposer: turns a `Task` into a validated `Vec<DecompositionResult>`
//! via the `LlmClient` port. Grounded on the teacher's `services/llm_planner.rs`
//! (prompt construction, JSON parsing) and `services/dependency_resolver.rs`
//! (cycle detection, now shared with the Scheduler's graph checks).

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::error::ValidationError;
use crate::domain::models::{
    AgentType, DecompositionResult, DecompositionStrategy, RawDecompositionEntry, ResumeContext,
    Task,
};
use crate::domain::ports::{LlmClient, LlmRequest};
use crate::services::project_analysis::{self, ProjectKind};

/// Prompt fragment for the builder subtask the Parallel variant bookends a
/// plan with when the project is greenfield or has no recognized build
/// system (spec §4.3).
const BUILDER_START_DESCRIPTION: &str =
    "Scaffold the project: establish a build system and baseline structure for the work to follow.";
const BUILDER_END_DESCRIPTION: &str =
    "Verify the project builds and finalize build configuration after all other subtasks complete.";

const PARALLEL_SYSTEM_PROMPT: &str = "You are a task decomposer. Break the task into independent subtasks \
that can run in parallel wherever possible. Respond with a JSON array of objects with fields: \
description, agent_type, dependencies (array of integer indices into this same array), priority, complexity.";

/// First call of the Hierarchical variant (spec §4.3): coarse top-level
/// phases only, each scored for how much further breakdown it needs.
const HIERARCHICAL_PHASE_SYSTEM_PROMPT: &str = "You are a task decomposer. Break the task into a small \
number of coarse top-level phases, ordered so each phase's work follows the last. Respond with a JSON \
array of objects with fields: description, agent_type, priority, complexity (integer 1-5: your estimate \
of how much further breakdown this phase alone would need). Dependencies are handled by the caller — \
omit the dependencies field.";

/// Second call: expands one phase already known to need finer breakdown
/// into sub-phases, in the same shape.
const HIERARCHICAL_EXPAND_SYSTEM_PROMPT: &str = "You are a task decomposer. The phase described by the \
user is too coarse to hand to a single agent. Break it into finer sub-phases, ordered so each sub-phase's \
work follows the last. Respond with a JSON array of objects with fields: description, agent_type, \
priority, complexity (integer 1-5, same meaning as before). Omit the dependencies field.";

/// Validates and normalizes a raw decomposition response (spec §4.3's
/// "validator" contract): checks dependency indices are in range, rejects
/// self-dependencies, detects cycles, and normalizes unknown agent type
/// strings to `implementer`.
pub fn validate_and_normalize(
    raw: Vec<RawDecompositionEntry>,
    resume_context: Option<&ResumeContext>,
) -> Result<Vec<DecompositionResult>, ValidationError> {
    if raw.is_empty() && resume_context.is_none() {
        return Err(ValidationError::EmptyWithoutResume);
    }

    let len = raw.len();
    let mut normalized = Vec::with_capacity(len);
    for (index, entry) in raw.iter().enumerate() {
        let mut dependencies = Vec::with_capacity(entry.dependencies.len());
        for &dep in &entry.dependencies {
            if dep < 0 || dep as usize >= len {
                return Err(ValidationError::DependencyOutOfRange {
                    index: dep,
                    len,
                });
            }
            let dep = dep as usize;
            if dep == index {
                return Err(ValidationError::SelfDependency(index));
            }
            dependencies.push(dep);
        }

        normalized.push(DecompositionResult {
            description: entry.description.clone(),
            agent_type: AgentType::parse_or_implementer(&entry.agent_type),
            dependencies,
            priority: entry.priority,
            complexity: entry.complexity,
        });
    }

    detect_cycle(&normalized)?;
    Ok(normalized)
}

fn detect_cycle(entries: &[DecompositionResult]) -> Result<(), ValidationError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; entries.len()];

    fn visit(
        index: usize,
        entries: &[DecompositionResult],
        marks: &mut Vec<Mark>,
    ) -> Result<(), ValidationError> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(ValidationError::Cycle(index)),
            Mark::Unvisited => {}
        }
        marks[index] = Mark::InProgress;
        for &dep in &entries[index].dependencies {
            visit(dep, entries, marks)?;
        }
        marks[index] = Mark::Done;
        Ok(())
    }

    for index in 0..entries.len() {
        visit(index, entries, &mut marks)?;
    }
    Ok(())
}

/// Picks the concrete strategy for `DecompositionStrategy::Auto` from the
/// project's fingerprint (spec §4.3): a greenfield project gets a
/// hierarchical plan so foundational work lands before parallel work
/// collides with it; an established, larger project gets the same
/// treatment; only a small existing project gets a parallel plan.
pub fn resolve_auto_strategy(project_path: &std::path::Path) -> DecompositionStrategy {
    match project_analysis::detect(project_path) {
        ProjectKind::Greenfield | ProjectKind::Established => DecompositionStrategy::Hierarchical,
        ProjectKind::Small => DecompositionStrategy::Parallel,
    }
}

fn expand_prompt(phase_description: &str) -> String {
    format!("Phase: {phase_description}\n\nBreak this phase into finer sub-phases.")
}

fn user_prompt(task: &Task, resume_context: Option<&ResumeContext>) -> String {
    let mut prompt = format!(
        "Task: {}\nProject path: {}\n",
        task.description, task.project_path
    );
    if let Some(resume) = resume_context {
        prompt.push_str(&format!(
            "\nThis is a resume of previously interrupted work. {} subtask(s) already completed, {} failed:\n",
            resume.completed_work.len(),
            resume.failed_work.len(),
        ));
        for item in &resume.completed_work {
            prompt.push_str(&format!("- completed: {}\n", item.description));
        }
        for item in &resume.failed_work {
            prompt.push_str(&format!(
                "- failed: {} ({})\n",
                item.description,
                item.error.as_deref().unwrap_or("unknown error")
            ));
        }
        prompt.push_str("\nPlan only the remaining work needed to finish the task.\n");
    }
    prompt
}

/// Decomposes a task into validated subtask plans via the LLM port, under
/// the strategy named (resolving `Auto` against the project directory).
pub struct Decomposer {
    llm: Arc<dyn LlmClient>,
}

impl Decomposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn decompose(
        &self,
        task: &Task,
        strategy: DecompositionStrategy,
        resume_context: Option<&ResumeContext>,
        max_depth: u32,
    ) -> anyhow::Result<Vec<DecompositionResult>> {
        let project_path = std::path::Path::new(&task.project_path);
        let strategy = match strategy {
            DecompositionStrategy::Auto => resolve_auto_strategy(project_path),
            other => other,
        };

        let plan = match strategy {
            DecompositionStrategy::Hierarchical => {
                self.decompose_hierarchical(task, resume_context, max_depth.max(1))
                    .await?
            }
            _ => {
                let request =
                    LlmRequest::new(PARALLEL_SYSTEM_PROMPT, user_prompt(task, resume_context));
                let response = self.llm.complete(request).await?;
                let raw: Vec<RawDecompositionEntry> = parse_json_array(&response)?;
                validate_and_normalize(raw, resume_context)?
            }
        };

        // Only the Parallel variant bookends with an explicit builder
        // subtask: Hierarchical already orders its own foundational work
        // first by construction (spec §4.3).
        if strategy == DecompositionStrategy::Parallel
            && !plan.is_empty()
            && (project_analysis::is_greenfield(project_path)
                || project_analysis::lacks_build_system(project_path))
        {
            Ok(bookend_with_builder(plan))
        } else {
            Ok(plan)
        }
    }

    /// Two-call Hierarchical variant (spec §4.3): one call for coarse
    /// top-level phases, then a second call per phase whose
    /// `estimatedComplexity` exceeds 2, recursively, down to `max_depth`
    /// levels. Flattened so every child depends on its immediate parent
    /// and every top-level phase depends on the previous phase's last
    /// descendant.
    async fn decompose_hierarchical(
        &self,
        task: &Task,
        resume_context: Option<&ResumeContext>,
        max_depth: u32,
    ) -> anyhow::Result<Vec<DecompositionResult>> {
        let request = LlmRequest::new(
            HIERARCHICAL_PHASE_SYSTEM_PROMPT,
            user_prompt(task, resume_context),
        );
        let response = self.llm.complete(request).await?;
        let raw_phases: Vec<RawDecompositionEntry> = parse_json_array(&response)?;

        if raw_phases.is_empty() {
            return validate_and_normalize(raw_phases, resume_context).map_err(Into::into);
        }

        let mut overall: Vec<DecompositionResult> = Vec::new();
        let mut previous_tail: Option<usize> = None;

        for phase in raw_phases {
            let offset = overall.len();
            let mut phase_nodes = self
                .expand_recursive(phase, max_depth.saturating_sub(1))
                .await?;

            for (local_index, node) in phase_nodes.iter_mut().enumerate() {
                node.dependencies = node.dependencies.iter().map(|d| d + offset).collect();
                if local_index == 0 {
                    if let Some(tail) = previous_tail {
                        node.dependencies.push(tail);
                    }
                }
            }

            previous_tail = Some(offset + phase_nodes.len() - 1);
            overall.extend(phase_nodes);
        }

        detect_cycle(&overall)?;
        Ok(overall)
    }

    /// Expands a single raw phase into a locally-indexed flattened subtree
    /// (index 0 is the phase itself). Recurses while `remaining_depth > 0`
    /// and the phase's own complexity warrants another call.
    fn expand_recursive<'a>(
        &'a self,
        entry: RawDecompositionEntry,
        remaining_depth: u32,
    ) -> futures::future::BoxFuture<'a, anyhow::Result<Vec<DecompositionResult>>> {
        Box::pin(async move {
            let mut flattened = vec![DecompositionResult {
                description: entry.description.clone(),
                agent_type: AgentType::parse_or_implementer(&entry.agent_type),
                dependencies: vec![],
                priority: entry.priority,
                complexity: entry.complexity,
            }];

            let needs_expansion = entry.complexity.unwrap_or(0) > 2 && remaining_depth > 0;
            if needs_expansion {
                let request =
                    LlmRequest::new(HIERARCHICAL_EXPAND_SYSTEM_PROMPT, expand_prompt(&entry.description));
                let response = self.llm.complete(request).await?;
                let children: Vec<RawDecompositionEntry> = parse_json_array(&response)?;

                for child in children {
                    let offset = flattened.len();
                    let mut sub = self
                        .expand_recursive(child, remaining_depth - 1)
                        .await?;
                    for (local_index, node) in sub.iter_mut().enumerate() {
                        node.dependencies = node.dependencies.iter().map(|d| d + offset).collect();
                        if local_index == 0 {
                            node.dependencies.push(0);
                        }
                    }
                    flattened.append(&mut sub);
                }
            }

            Ok(flattened)
        })
    }
}

/// Prepends a builder subtask every originally-root entry depends on, and
/// appends a second builder subtask depending on every entry nothing else
/// depends on — bookending the plan so scaffolding happens first and a
/// build-verification pass happens last, without disturbing the rest of
/// the dependency graph.
fn bookend_with_builder(entries: Vec<DecompositionResult>) -> Vec<DecompositionResult> {
    let mut entries = entries;
    for entry in &mut entries {
        for dep in &mut entry.dependencies {
            *dep += 1;
        }
    }
    for entry in &mut entries {
        if entry.dependencies.is_empty() {
            entry.dependencies.push(0);
        }
    }
    entries.insert(
        0,
        DecompositionResult {
            description: BUILDER_START_DESCRIPTION.to_string(),
            agent_type: AgentType::Builder,
            dependencies: vec![],
            priority: None,
            complexity: None,
        },
    );

    let mut referenced = vec![false; entries.len()];
    for entry in &entries {
        for &dep in &entry.dependencies {
            referenced[dep] = true;
        }
    }
    let leaves: Vec<usize> = (1..entries.len()).filter(|&i| !referenced[i]).collect();
    entries.push(DecompositionResult {
        description: BUILDER_END_DESCRIPTION.to_string(),
        agent_type: AgentType::Builder,
        dependencies: leaves,
        priority: None,
        complexity: None,
    });

    entries
}

/// The LLM's response is expected to be a bare JSON array, but models
/// sometimes wrap it in prose or a fenced code block; this extracts the
/// first top-level `[...]` span before parsing.
fn parse_json_array(text: &str) -> anyhow::Result<Vec<RawDecompositionEntry>> {
    let start = text
        .find('[')
        .ok_or_else(|| anyhow::anyhow!("no JSON array found in decomposer response"))?;
    let end = text
        .rfind(']')
        .ok_or_else(|| anyhow::anyhow!("no closing bracket found in decomposer response"))?;
    if end < start {
        anyhow::bail!("malformed JSON array in decomposer response");
    }
    Ok(serde_json::from_str(&text[start..=end])?)
}

/// Materializes a validated `DecompositionResult` plan into `Subtask`s for
/// a given parent task, translating index-based dependencies into the ids
/// the scheduler works with.
pub fn materialize(
    task_id: Uuid,
    plan: &[DecompositionResult],
    max_attempts: u32,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<crate::domain::models::Subtask> {
    let mut ids = Vec::with_capacity(plan.len());
    for _ in plan {
        ids.push(Uuid::new_v4());
    }

    plan.iter()
        .enumerate()
        .map(|(index, entry)| {
            let dependencies: Vec<Uuid> = entry.dependencies.iter().map(|&d| ids[d]).collect();
            let mut subtask = crate::domain::models::Subtask::new(
                task_id,
                entry.description.clone(),
                entry.agent_type,
                dependencies,
                max_attempts,
                now,
            );
            subtask.id = ids[index];
            subtask
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Task, TaskInput};
    use crate::infrastructure::llm::MockLlmClient;

    fn test_task() -> Task {
        let input = TaskInput {
            description: "build a thing".to_string(),
            project_path: "/tmp/does-not-matter".to_string(),
            task_type: None,
            max_agents: None,
            timeout_ms: None,
        };
        Task::from_input(&input, chrono::Utc::now())
    }

    fn entry(description: &str, agent_type: &str, deps: Vec<i64>) -> RawDecompositionEntry {
        RawDecompositionEntry {
            description: description.to_string(),
            agent_type: agent_type.to_string(),
            dependencies: deps,
            priority: None,
            complexity: None,
        }
    }

    #[test]
    fn rejects_empty_plan_without_resume_context() {
        let result = validate_and_normalize(vec![], None);
        assert!(matches!(result, Err(ValidationError::EmptyWithoutResume)));
    }

    #[test]
    fn allows_empty_plan_with_resume_context() {
        let resume = ResumeContext::default();
        let result = validate_and_normalize(vec![], Some(&resume));
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn rejects_out_of_range_dependency() {
        let raw = vec![entry("a", "implementer", vec![5])];
        let result = validate_and_normalize(raw, None);
        assert!(matches!(
            result,
            Err(ValidationError::DependencyOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_self_dependency() {
        let raw = vec![entry("a", "implementer", vec![0])];
        let result = validate_and_normalize(raw, None);
        assert!(matches!(result, Err(ValidationError::SelfDependency(0))));
    }

    #[test]
    fn rejects_cyclic_graph() {
        let raw = vec![
            entry("a", "implementer", vec![1]),
            entry("b", "implementer", vec![0]),
        ];
        let result = validate_and_normalize(raw, None);
        assert!(matches!(result, Err(ValidationError::Cycle(_))));
    }

    #[test]
    fn normalizes_unknown_agent_type() {
        let raw = vec![entry("a", "alchemist", vec![])];
        let result = validate_and_normalize(raw, None).unwrap();
        assert_eq!(result[0].agent_type, AgentType::Implementer);
    }

    #[test]
    fn materialize_translates_index_dependencies_to_uuids() {
        let plan = validate_and_normalize(
            vec![
                entry("first", "researcher", vec![]),
                entry("second", "implementer", vec![0]),
            ],
            None,
        )
        .unwrap();
        let subtasks = materialize(Uuid::new_v4(), &plan, 3, chrono::Utc::now());
        assert_eq!(subtasks[1].dependencies, vec![subtasks[0].id]);
    }

    #[test]
    fn bookend_with_builder_wraps_every_root_and_leaf() {
        let plan = validate_and_normalize(
            vec![
                entry("research the area", "researcher", vec![]),
                entry("implement it", "implementer", vec![0]),
                entry("write docs", "documenter", vec![0]),
            ],
            None,
        )
        .unwrap();
        let bookended = bookend_with_builder(plan);

        assert_eq!(bookended.len(), 5);
        assert_eq!(bookended[0].agent_type, AgentType::Builder);
        assert!(bookended[0].dependencies.is_empty());
        // The original root (index 0, now at index 1) waits on the start builder.
        assert_eq!(bookended[1].dependencies, vec![0]);
        // The end builder waits on both leaves (implement and docs, now at 2 and 3).
        let end = bookended.last().unwrap();
        assert_eq!(end.agent_type, AgentType::Builder);
        assert_eq!(end.dependencies.len(), 2);
        assert!(end.dependencies.contains(&2));
        assert!(end.dependencies.contains(&3));

        detect_cycle(&bookended).expect("bookending must not introduce a cycle");
    }

    #[tokio::test]
    async fn hierarchical_decompose_expands_complex_phases_via_second_call() {
        let phases_response = serde_json::to_string(&serde_json::json!([
            {"description": "design", "agent_type": "researcher", "complexity": 1},
            {"description": "build", "agent_type": "implementer", "complexity": 4},
        ]))
        .unwrap();
        let expand_response = serde_json::to_string(&serde_json::json!([
            {"description": "build: part one", "agent_type": "implementer", "complexity": 1},
            {"description": "build: part two", "agent_type": "implementer", "complexity": 1},
        ]))
        .unwrap();
        let llm = Arc::new(MockLlmClient::new(vec![phases_response, expand_response]));
        let decomposer = Decomposer::new(llm.clone());

        let plan = decomposer
            .decompose(
                &test_task(),
                DecompositionStrategy::Hierarchical,
                None,
                3,
            )
            .await
            .unwrap();

        // design, build (placeholder), build: part one, build: part two
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].description, "design");
        assert_eq!(plan[1].description, "build");
        assert!(plan[1].dependencies.contains(&0));
        // Both expansion children depend on their parent phase (index 1).
        assert!(plan[2].dependencies.contains(&1));
        assert!(plan[3].dependencies.contains(&1));

        detect_cycle(&plan).expect("hierarchical plan must not contain a cycle");

        let requests = llm.requests_seen();
        assert_eq!(requests.len(), 2, "expected one phase call and one expand call");
    }

    #[tokio::test]
    async fn hierarchical_decompose_skips_second_call_when_no_phase_is_complex() {
        let phases_response = serde_json::to_string(&serde_json::json!([
            {"description": "design", "agent_type": "researcher", "complexity": 1},
            {"description": "build", "agent_type": "implementer", "complexity": 2},
        ]))
        .unwrap();
        let llm = Arc::new(MockLlmClient::new(vec![phases_response]));
        let decomposer = Decomposer::new(llm.clone());

        let plan = decomposer
            .decompose(&test_task(), DecompositionStrategy::Hierarchical, None, 3)
            .await
            .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(llm.requests_seen().len(), 1);
    }

    #[tokio::test]
    async fn hierarchical_decompose_respects_max_depth() {
        // A phase that stays complex forever would recurse without bound;
        // max_depth=1 means only the top-level phase call runs, no expansion.
        let phases_response = serde_json::to_string(&serde_json::json!([
            {"description": "endless", "agent_type": "implementer", "complexity": 5},
        ]))
        .unwrap();
        let llm = Arc::new(MockLlmClient::new(vec![phases_response]));
        let decomposer = Decomposer::new(llm.clone());

        let plan = decomposer
            .decompose(&test_task(), DecompositionStrategy::Hierarchical, None, 1)
            .await
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(llm.requests_seen().len(), 1);
    }
}
