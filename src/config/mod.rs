//! Configuration loading and validation

mod project;
mod schema;

pub use project::ProjectState;
pub use schema::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {:?}", path))?;
    let config: EngineConfig = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Load a JSON project snapshot
pub fn load_project(path: &Path) -> Result<ProjectState> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read project {:?}", path))?;
    let project = ProjectState::from_json(&contents)
        .with_context(|| format!("invalid project file {:?}", path))?;
    Ok(project)
}

/// Write a project snapshot as JSON
pub fn save_project(project: &ProjectState, path: &Path) -> Result<()> {
    std::fs::write(path, project.to_json()?)
        .with_context(|| format!("failed to write project {:?}", path))?;
    Ok(())
}
