// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.colloquy/config.json
//! - Workspace config: .colloquy.json, .colloquy/config.json, or colloquy.config.yaml
//! - Programmatic overrides
//!
//! Configuration is merged with precedence (overrides > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    get_global_config_dir, get_global_config_path, load_config_file, load_global_config,
    load_workspace_config, save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR,
    GLOBAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, ConfigOverrides};

pub use types::{
    CompressionConfig, ModelConfig, RuntimeConfig, StorageBackend, StorageConfig, WorkspaceConfig,
};

use std::path::Path;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::session::SessionManager;
use crate::storage::SqliteStore;

/// Load, merge and validate all configuration sources for a workspace.
pub fn load_config(workspace_root: &Path, overrides: ConfigOverrides) -> Result<RuntimeConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;

    let config = merge_config(global, workspace, overrides);
    config.validate()?;
    Ok(config)
}

/// Build a session manager wired to the configured storage and model.
pub fn open_session_manager(config: &RuntimeConfig) -> crate::error::Result<SessionManager> {
    let profile = config.model_profile()?;
    let manager = match &config.storage {
        StorageBackend::Memory => SessionManager::in_memory(profile),
        StorageBackend::Sqlite(path) => {
            let store = match path {
                Some(path) => SqliteStore::open(path)?,
                None => SqliteStore::open_default()?,
            };
            let store = Arc::new(store);
            SessionManager::new(store.clone(), store, profile)
        }
    };

    Ok(manager
        .with_config(config.session_config())
        .with_compression(config.compression.clone())
        .with_prompt_builder(config.prompt_builder()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_no_files() {
        let temp = TempDir::new().unwrap();
        let result = load_config(temp.path(), ConfigOverrides::default());
        // Global config may exist on the host; it must still resolve
        assert!(result.is_ok());
        assert!(result.unwrap().max_sessions > 0);
    }

    #[test]
    fn test_load_config_with_workspace_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".colloquy.json"),
            r#"{"model": {"provider": "openai", "name": "gpt-4o", "maxTokens": 128000}}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), ConfigOverrides::default()).unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, Some("gpt-4o".to_string()));
        assert_eq!(config.max_tokens, 128_000);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".colloquy.json"), r#"{"maxSessions": 0}"#).unwrap();

        let err = load_config(temp.path(), ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_open_session_manager_sqlite() {
        let temp = TempDir::new().unwrap();
        let config = RuntimeConfig {
            storage: StorageBackend::Sqlite(Some(temp.path().join("sessions.db"))),
            max_sessions: 3,
            ..Default::default()
        };

        let manager = open_session_manager(&config).unwrap();
        assert_eq!(manager.config().max_sessions, 3);

        let created = manager.create_session(None).await.unwrap();
        assert!(manager.get_session_metadata(&created.id).await.unwrap().is_some());
    }
}
