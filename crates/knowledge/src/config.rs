//! Knowledge base paths and persisted configuration.
//!
//! Every base lives in `.modrag/knowledge/<base>/` with its `config.yaml`
//! and index files.

use crate::types::KnowledgeBaseConfig;
use modrag_core::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Base name used when none is given.
pub const DEFAULT_BASE: &str = "default";

/// Get the base directory for a knowledge base.
pub fn get_base_dir(workspace: &Path, base_name: &str) -> PathBuf {
    workspace
        .join(".modrag")
        .join("knowledge")
        .join(base_name)
}

/// Get the path to a base's config file.
pub fn get_config_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("config.yaml")
}

/// Load a base's configuration; `None` when the base was never indexed.
pub fn load_config(workspace: &Path, base_name: &str) -> AppResult<Option<KnowledgeBaseConfig>> {
    let config_path = get_config_path(workspace, base_name);
    if !config_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        AppError::Knowledge(format!("Failed to read config at {:?}: {}", config_path, e))
    })?;

    let mut config: KnowledgeBaseConfig = serde_yaml::from_str(&content).map_err(|e| {
        AppError::Knowledge(format!("Failed to parse config at {:?}: {}", config_path, e))
    })?;
    config.name = base_name.to_string();

    tracing::debug!("Loaded knowledge base config for '{}'", base_name);
    Ok(Some(config))
}

/// Save a base's configuration.
pub fn save_config(workspace: &Path, config: &KnowledgeBaseConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace, &config.name);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Knowledge(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)?;
    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Knowledge(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved knowledge base config for '{}'", config.name);
    Ok(())
}
