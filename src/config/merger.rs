// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{RuntimeConfig, StorageBackend, WorkspaceConfig};

/// Programmatic overrides applied on top of every file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<usize>,
    pub max_sessions: Option<usize>,
    pub storage_path: Option<PathBuf>,
}

/// Default configuration values.
pub fn default_config() -> RuntimeConfig {
    RuntimeConfig::default()
}

/// Merge configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. Overrides
/// 2. Workspace config
/// 3. Global config (~/.colloquy/config.json)
/// 4. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    overrides: ConfigOverrides,
) -> RuntimeConfig {
    let mut result = default_config();

    if let Some(config) = global {
        apply_workspace_config(&mut result, &config);
    }

    if let Some(config) = workspace {
        apply_workspace_config(&mut result, &config);
    }

    apply_overrides(&mut result, &overrides);

    result
}

fn apply_workspace_config(result: &mut RuntimeConfig, config: &WorkspaceConfig) {
    if let Some(max_sessions) = config.max_sessions {
        result.max_sessions = max_sessions;
    }

    if let Some(ref model) = config.model {
        if let Some(ref provider) = model.provider {
            result.provider = provider.clone();
        }
        if model.name.is_some() {
            result.model = model.name.clone();
        }
        if let Some(max_tokens) = model.max_tokens {
            result.max_tokens = max_tokens;
        }
        if let Some(chars_per_token) = model.chars_per_token {
            result.chars_per_token = chars_per_token;
        }
    }

    if let Some(ref compression) = config.compression {
        let settings = &mut result.compression;
        if let Some(v) = compression.preserve_start {
            settings.preserve_start = v;
        }
        if let Some(v) = compression.preserve_end {
            settings.preserve_end = v;
        }
        if let Some(v) = compression.min_messages {
            settings.min_messages = v;
        }
        if let Some(v) = compression.compress_threshold {
            settings.compress_threshold = v;
        }
    }

    if let Some(ref storage) = config.storage {
        let path = storage.path.as_ref().map(PathBuf::from);
        match storage.backend.as_deref().map(str::to_lowercase).as_deref() {
            Some("memory") => result.storage = StorageBackend::Memory,
            Some("sqlite") => result.storage = StorageBackend::Sqlite(path),
            // A bare path keeps the backend and relocates the database
            _ => {
                if let (Some(path), StorageBackend::Sqlite(_)) = (path, &result.storage) {
                    result.storage = StorageBackend::Sqlite(Some(path));
                }
            }
        }
    }

    if config.system_prompt.is_some() {
        result.system_prompt = config.system_prompt.clone();
    }
}

fn apply_overrides(result: &mut RuntimeConfig, overrides: &ConfigOverrides) {
    if let Some(ref provider) = overrides.provider {
        result.provider = provider.clone();
    }

    if overrides.model.is_some() {
        result.model = overrides.model.clone();
    }

    if let Some(max_tokens) = overrides.max_tokens {
        result.max_tokens = max_tokens;
    }

    if let Some(max_sessions) = overrides.max_sessions {
        result.max_sessions = max_sessions;
    }

    if let Some(ref path) = overrides.storage_path {
        result.storage = StorageBackend::Sqlite(Some(path.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{CompressionConfig, ModelConfig, StorageConfig};

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.storage, StorageBackend::Sqlite(None));
    }

    #[test]
    fn test_workspace_overrides_global() {
        let global = WorkspaceConfig {
            max_sessions: Some(4),
            model: Some(ModelConfig {
                provider: Some("openai".to_string()),
                max_tokens: Some(8_000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            model: Some(ModelConfig {
                max_tokens: Some(16_000),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), ConfigOverrides::default());
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.provider, "openai");
        assert_eq!(config.max_tokens, 16_000);
    }

    #[test]
    fn test_compression_fields_merge_individually() {
        let global = WorkspaceConfig {
            compression: Some(CompressionConfig {
                preserve_start: Some(5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            compression: Some(CompressionConfig {
                compress_threshold: Some(0.6),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), ConfigOverrides::default());
        assert_eq!(config.compression.preserve_start, 5);
        assert_eq!(config.compression.compress_threshold, 0.6);
        assert_eq!(config.compression.preserve_end, 6);
    }

    #[test]
    fn test_storage_backend_selection() {
        let memory = WorkspaceConfig {
            storage: Some(StorageConfig {
                backend: Some("Memory".to_string()),
                path: None,
            }),
            ..Default::default()
        };
        let config = merge_config(None, Some(memory), ConfigOverrides::default());
        assert_eq!(config.storage, StorageBackend::Memory);

        let relocated = WorkspaceConfig {
            storage: Some(StorageConfig {
                backend: None,
                path: Some("/tmp/sessions.db".to_string()),
            }),
            ..Default::default()
        };
        let config = merge_config(None, Some(relocated), ConfigOverrides::default());
        assert_eq!(
            config.storage,
            StorageBackend::Sqlite(Some(PathBuf::from("/tmp/sessions.db")))
        );
    }

    #[test]
    fn test_overrides_win() {
        let workspace = WorkspaceConfig {
            model: Some(ModelConfig {
                provider: Some("openai".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overrides = ConfigOverrides {
            provider: Some("anthropic".to_string()),
            max_sessions: Some(2),
            ..Default::default()
        };

        let config = merge_config(None, Some(workspace), overrides);
        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.max_sessions, 2);
    }
}
