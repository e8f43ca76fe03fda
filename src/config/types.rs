// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration types.
//!
//! [`WorkspaceConfig`] mirrors a config file: every field is optional so that
//! files can be layered. [`RuntimeConfig`] is the fully resolved result.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compression::CompressionSettings;
use crate::context::ModelProfile;
use crate::error::ConfigError;
use crate::formatter::{create_formatter, ProviderKind};
use crate::prompt::{SystemPromptBuilder, TemplatePromptBuilder};
use crate::session::SessionConfig;
use crate::tokenizer::{ApproximateTokenizer, DEFAULT_CHARS_PER_TOKEN};

/// Model section of a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Provider family (anthropic, openai, ollama, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Context window in tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Characters per token for the approximate tokenizer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chars_per_token: Option<f64>,
}

/// Compression section of a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_start: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_end: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_messages: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress_threshold: Option<f64>,
}

/// Storage section of a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// `sqlite` or `memory`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Database file for the SQLite backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Configuration as read from one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Maximum sessions held in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// System prompt template with `{{name}}` placeholders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Where sessions are persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    /// In-process only.
    Memory,
    /// SQLite database; `None` uses the default location.
    Sqlite(Option<PathBuf>),
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub max_sessions: usize,
    pub provider: String,
    pub model: Option<String>,
    pub max_tokens: usize,
    pub chars_per_token: f64,
    pub compression: CompressionSettings,
    pub storage: StorageBackend,
    pub system_prompt: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_sessions: SessionConfig::default().max_sessions,
            provider: "anthropic".to_string(),
            model: None,
            max_tokens: 100_000,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            compression: CompressionSettings::default(),
            storage: StorageBackend::Sqlite(None),
            system_prompt: None,
        }
    }
}

impl RuntimeConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "maxSessions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "model.maxTokens".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(self.chars_per_token > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "model.charsPerToken".to_string(),
                message: "must be positive".to_string(),
            });
        }
        let threshold = self.compression.compress_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "compression.compressThreshold".to_string(),
                message: format!("{} is outside (0, 1]", threshold),
            });
        }
        self.provider_kind().map(|_| ())
    }

    /// Payload shape for the configured provider.
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        self.provider
            .parse::<ProviderKind>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "model.provider".to_string(),
                message: format!("{}: {}", e, self.provider),
            })
    }

    /// Build the model profile: budget, tokenizer and formatter.
    pub fn model_profile(&self) -> Result<ModelProfile, ConfigError> {
        let kind = self.provider_kind()?;
        let mut profile = ModelProfile::new(
            self.max_tokens,
            Arc::new(ApproximateTokenizer::new(self.chars_per_token)),
            create_formatter(kind),
        );
        if let Some(model) = &self.model {
            profile = profile.with_model(model.clone());
        }
        Ok(profile)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_sessions: self.max_sessions,
        }
    }

    /// The configured prompt template, or the default one.
    pub fn prompt_builder(&self) -> Arc<dyn SystemPromptBuilder> {
        match &self.system_prompt {
            Some(template) => Arc::new(TemplatePromptBuilder::new(template.clone())),
            None => Arc::new(TemplatePromptBuilder::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_config_camel_case() {
        let config: WorkspaceConfig = serde_json::from_str(
            r#"{
                "maxSessions": 4,
                "model": {"provider": "openai", "maxTokens": 8000, "charsPerToken": 3.5},
                "compression": {"preserveEnd": 10, "compressThreshold": 0.7},
                "storage": {"backend": "memory"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_sessions, Some(4));
        let model = config.model.unwrap();
        assert_eq!(model.provider.as_deref(), Some("openai"));
        assert_eq!(model.max_tokens, Some(8000));
        assert_eq!(config.compression.unwrap().compress_threshold, Some(0.7));
        assert_eq!(config.storage.unwrap().backend.as_deref(), Some("memory"));
    }

    #[test]
    fn test_serialization_skips_unset_fields() {
        let config = WorkspaceConfig {
            max_sessions: Some(2),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&config).unwrap(), r#"{"maxSessions":2}"#);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RuntimeConfig {
            max_sessions: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let mut config = RuntimeConfig::default();
        config.compression.compress_threshold = 1.5;
        assert!(config.validate().is_err());

        let config = RuntimeConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_profile() {
        let config = RuntimeConfig {
            provider: "ollama".to_string(),
            model: Some("llama3.2".to_string()),
            max_tokens: 4096,
            ..Default::default()
        };
        let profile = config.model_profile().unwrap();
        assert_eq!(profile.max_tokens, 4096);
        assert_eq!(profile.model.as_deref(), Some("llama3.2"));
        assert_eq!(profile.formatter.name(), "chat-completions");
        assert_eq!(profile.tokenizer.count_tokens("abcdefgh"), 2);
    }
}
