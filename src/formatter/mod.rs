// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider formatters.
//!
//! A [`Formatter`] converts the internal history plus a system prompt into the
//! message payload a provider expects, and parses a raw provider response back
//! into typed messages:
//!
//! - [`ChatCompletionsFormatter`] - OpenAI-style chat completions (also Ollama and compatible APIs)
//! - [`MessagesApiFormatter`] - Anthropic-style messages with a top-level system field
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy::formatter::{create_formatter, ProviderKind};
//!
//! let formatter = create_formatter("anthropic".parse::<ProviderKind>()?);
//! let payload = formatter.format(&history, "You are terse.")?;
//! ```

mod chat_completions;
mod messages_api;

pub use chat_completions::ChatCompletionsFormatter;
pub use messages_api::MessagesApiFormatter;

use std::sync::Arc;

use serde::Serialize;

use crate::error::FormatterError;
use crate::types::Message;

/// Provider-ready request fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedPayload {
    /// Top-level system field, for providers that keep it outside the message list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Provider-shaped messages.
    pub messages: Vec<serde_json::Value>,
}

impl FormattedPayload {
    /// Number of provider messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if there are no provider messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The system prompt as sent, wherever the provider keeps it.
    pub fn system_text(&self) -> Option<&str> {
        if let Some(system) = &self.system {
            return Some(system);
        }
        self.messages
            .first()
            .filter(|m| m.get("role").and_then(|r| r.as_str()) == Some("system"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
    }
}

/// Provider-specific adapter between internal messages and an API payload.
pub trait Formatter: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Build the provider payload for `history` under `system_prompt`.
    fn format(&self, history: &[Message], system_prompt: &str) -> Result<FormattedPayload, FormatterError>;

    /// Provider-specific transform of the system prompt.
    fn format_system_prompt(&self, system_prompt: &str) -> String {
        system_prompt.to_string()
    }

    /// Parse a raw provider response into messages to append.
    fn parse_response(&self, raw: &serde_json::Value) -> Result<Vec<Message>, FormatterError>;
}

/// Supported payload shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI chat completions and compatible APIs.
    ChatCompletions,
    /// Anthropic messages API.
    MessagesApi,
}

/// Error type for parsing a provider kind from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseProviderKindError;

impl std::fmt::Display for ParseProviderKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid provider kind")
    }
}

impl std::error::Error for ParseProviderKindError {}

impl std::str::FromStr for ProviderKind {
    type Err = ParseProviderKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "gpt" | "ollama" | "openai-compatible" | "openai_compatible" | "chat" => {
                Ok(Self::ChatCompletions)
            }
            "anthropic" | "claude" | "messages" => Ok(Self::MessagesApi),
            _ => Err(ParseProviderKindError),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChatCompletions => write!(f, "chat-completions"),
            Self::MessagesApi => write!(f, "messages-api"),
        }
    }
}

/// Create the formatter for a provider kind.
pub fn create_formatter(kind: ProviderKind) -> Arc<dyn Formatter> {
    match kind {
        ProviderKind::ChatCompletions => Arc::new(ChatCompletionsFormatter::new()),
        ProviderKind::MessagesApi => Arc::new(MessagesApiFormatter::new()),
    }
}
