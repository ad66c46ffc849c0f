//! Hierarchical config loading: built-in defaults, then an optional
//! project-level YAML file (`<project_path>/.aichestrator/config.yaml`),
//! then environment variables (`AICHESTRATOR_*`), in ascending priority.
//! Grounded on the teacher's `config/loader.rs` figment pipeline.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::error::ValidationError;
use crate::domain::models::OrchestratorConfig;

const CONFIG_RELATIVE_PATH: &str = ".aichestrator/config.yaml";
const ENV_PREFIX: &str = "AICHESTRATOR_";

/// Loads an `OrchestratorConfig`, rejecting unknown keys at any layer
/// (`#[serde(deny_unknown_fields)]` on the target struct).
pub fn load(project_path: &Path) -> Result<OrchestratorConfig, ValidationError> {
    let config_file = project_path.join(CONFIG_RELATIVE_PATH);

    let figment = Figment::from(Serialized::defaults(OrchestratorConfig::default()))
        .merge(Yaml::file(config_file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: OrchestratorConfig = figment.extract().map_err(|e| ValidationError::Invalid {
        field: "config".to_string(),
        reason: e.to_string(),
    })?;

    config.validate()?;
    Ok(config)
}
