//! Infrastructure: concrete implementations of the domain's ports, plus
//! the ambient stack (config loading, logging).

pub mod config;
pub mod llm;
pub mod logging;
pub mod store;
