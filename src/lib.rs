//! `aichestrator` — orchestration engine for a fleet of isolated,
//! LLM-driven worker processes. Decomposes a task into a dependency graph
//! of subtasks, executes them across out-of-process workers under a
//! bounded concurrency cap, and remediates failures via an LLM classifier.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
