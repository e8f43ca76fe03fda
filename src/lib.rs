// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Colloquy - conversation context runtime for LLM agents.
//!
//! Keeps per-session message history inside a model's token budget, shapes
//! it into provider payloads, and manages a bounded set of live sessions
//! backed by durable storage.
//!
//! # Architecture
//!
//! - [`types`] - Message model (roles, content parts, tool calls, tool outcomes)
//! - [`error`] - Error types and result aliases
//! - [`tokenizer`] - Token estimation
//! - [`formatter`] - Provider payload shapes (chat completions, messages API)
//! - [`prompt`] - System prompt construction
//! - [`compression`] - History compression strategies and the pipeline that runs them
//! - [`context`] - Per-session [`ContextManager`]
//! - [`session`] - [`SessionManager`] lifecycle: create, load, evict, delete
//! - [`storage`] - History and metadata stores (in-memory, SQLite)
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing and metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy::config::{load_config, open_session_manager, ConfigOverrides};
//! use colloquy::prompt::PromptContext;
//!
//! let config = load_config(".".as_ref(), ConfigOverrides::default())?;
//! let sessions = open_session_manager(&config)?;
//!
//! let meta = sessions.create_session(None).await?;
//! let turn = sessions.begin_turn(&meta.id).await?;
//! turn.add_user_message("Hello!", vec![]).await?;
//! let formatted = turn
//!     .get_formatted_messages_with_compression(&PromptContext::default())
//!     .await?;
//! ```

pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod formatter;
pub mod prompt;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod tokenizer;
pub mod types;

// Re-export commonly used types at crate root
pub use compression::{CompressionResult, CompressionSettings, CompressionStrategy};
pub use context::{ContextManager, ContextObserver, FormattedTurn, ModelProfile};
pub use error::{
    CompressionError, ConfigError, ContextError, FormatterError, MessageValidationError, Result,
    SessionError, StorageError,
};
pub use formatter::{create_formatter, FormattedPayload, Formatter, ProviderKind};
pub use session::{SessionConfig, SessionId, SessionManager, SessionMetadata, TurnGuard};
pub use storage::{HistoryStore, MemoryStore, MetadataStore, SqliteStore};
pub use tokenizer::{ApproximateTokenizer, Tokenizer};
pub use types::{ContentPart, MediaAttachment, Message, MessageContent, Role, ToolCall, ToolOutcome};

/// Colloquy version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let msg = Message::user("test");
        assert_eq!(msg.role(), Role::User);
        assert_eq!(ProviderKind::MessagesApi.to_string(), "messages-api");
    }
}
