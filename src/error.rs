// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the conversation context runtime.
//!
//! This module provides strongly-typed errors for each layer of the runtime,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error propagation
//! at application edges.

use thiserror::Error;

/// A structural invariant violated by a message on append.
///
/// Each variant names the rule it enforces so callers can surface it verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageValidationError {
    #[error("user message must carry non-empty text or at least one content part")]
    EmptyUserContent,

    #[error("assistant message must carry content or at least one tool call")]
    EmptyAssistantMessage,

    #[error("tool call #{index} is missing its {field}")]
    InvalidToolCall { index: usize, field: &'static str },

    #[error("tool message is missing its {0}")]
    MissingToolField(&'static str),

    #[error("system message content must not be empty")]
    EmptySystemContent,

    #[error("content part #{index} is invalid: {reason}")]
    InvalidPart { index: usize, reason: String },
}

impl MessageValidationError {
    /// Stable rule identifier for logs and metrics.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::EmptyUserContent => "user.content",
            Self::EmptyAssistantMessage => "assistant.content_or_tool_calls",
            Self::InvalidToolCall { .. } => "assistant.tool_call",
            Self::MissingToolField(_) => "tool.fields",
            Self::EmptySystemContent => "system.content",
            Self::InvalidPart { .. } => "content.part",
        }
    }
}

/// Errors raised by a history or metadata store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Corrupted record for session {session_id}: {message}")]
    Corrupted { session_id: String, message: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Errors raised by a provider formatter.
#[derive(Error, Debug)]
pub enum FormatterError {
    #[error("Unsupported content for {provider}: {message}")]
    Unsupported { provider: String, message: String },

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FormatterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by a compression strategy.
#[derive(Error, Debug, Clone)]
pub enum CompressionError {
    #[error("Strategy {strategy} failed: {message}")]
    StrategyFailed { strategy: String, message: String },

    #[error("Strategy {strategy} produced an invalid history: {message}")]
    InvalidOutput { strategy: String, message: String },
}

/// Errors surfaced by a [`ContextManager`](crate::context::ContextManager).
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Message validation failed: {0}")]
    Validation(#[from] MessageValidationError),

    #[error("Formatting failed: {0}")]
    Formatting(#[from] FormatterError),

    #[error("Storage failure in {operation} for session {session_id}: {source}")]
    Storage {
        session_id: String,
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("Failed to reset session {session_id}: {source}")]
    ResetFailed {
        session_id: String,
        #[source]
        source: StorageError,
    },
}

impl ContextError {
    /// Wrap a storage failure once with its session and operation.
    pub fn storage(session_id: impl Into<String>, operation: &'static str, source: StorageError) -> Self {
        Self::Storage {
            session_id: session_id.into(),
            operation,
            source,
        }
    }

    /// Check if this error is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Errors that can occur during session lifecycle operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Failed to initialize session {session_id}: {message}")]
    InitializationFailed { session_id: String, message: String },

    #[error("Maximum resident sessions ({max}) reached and no session can be evicted")]
    MaxSessionsExceeded { max: usize },

    #[error("Storage failure in {operation} for session {session_id}: {source}")]
    StorageFailed {
        session_id: String,
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("Failed to reset session {session_id}: {message}")]
    ResetFailed { session_id: String, message: String },

    #[error("Session {0} is current; switch to another session first")]
    CurrentSession(String),
}

impl SessionError {
    /// Stable failure code for callers and presentation layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "SESSION_NOT_FOUND",
            Self::InitializationFailed { .. } => "SESSION_INITIALIZATION_FAILED",
            Self::MaxSessionsExceeded { .. } => "SESSION_MAX_SESSIONS_EXCEEDED",
            Self::StorageFailed { .. } => "SESSION_STORAGE_FAILED",
            Self::ResetFailed { .. } => "SESSION_RESET_FAILED",
            Self::CurrentSession(_) => "SESSION_IS_CURRENT",
        }
    }

    pub(crate) fn storage(session_id: impl Into<String>, operation: &'static str, source: StorageError) -> Self {
        Self::StorageFailed {
            session_id: session_id.into(),
            operation,
            source,
        }
    }
}

impl From<ContextError> for SessionError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Storage {
                session_id,
                operation,
                source,
            } => Self::StorageFailed {
                session_id,
                operation,
                source,
            },
            ContextError::ResetFailed { session_id, source } => Self::ResetFailed {
                session_id,
                message: source.to_string(),
            },
            other => Self::InitializationFailed {
                session_id: String::new(),
                message: other.to_string(),
            },
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
