// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the conversation context runtime.
//!
//! This module defines the message model shared by every layer: the role-tagged
//! [`Message`] union, its content representation, tool calls, and the tagged
//! [`ToolOutcome`] produced at the tool-execution boundary.

use serde::{Deserialize, Serialize};

use crate::error::MessageValidationError;

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        mime_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },
    File {
        mime_type: String,
        /// Base64-encoded file bytes.
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl ContentPart {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image part.
    pub fn image(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Create a file part.
    pub fn file(mime_type: impl Into<String>, data: impl Into<String>, name: Option<String>) -> Self {
        Self::File {
            mime_type: mime_type.into(),
            data: data.into(),
            name,
        }
    }

    fn validate(&self, index: usize) -> Result<(), MessageValidationError> {
        let reason = match self {
            Self::Text { .. } => None,
            Self::Image { mime_type, data } | Self::File { mime_type, data, .. } => {
                if mime_type.trim().is_empty() {
                    Some("missing mime type")
                } else if data.is_empty() {
                    Some("missing data")
                } else {
                    None
                }
            }
        };
        match reason {
            Some(reason) => Err(MessageValidationError::InvalidPart {
                index,
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Message content - either a plain string or an ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// True when there is nothing to send: blank text or no parts.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }

    /// Concatenated textual content; binary parts are rendered as short markers.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => {
                let mut result = String::new();
                for part in parts {
                    if !result.is_empty() {
                        result.push('\n');
                    }
                    match part {
                        ContentPart::Text { text } => result.push_str(text),
                        ContentPart::Image { mime_type, .. } => {
                            result.push_str(&format!("[image: {}]", mime_type))
                        }
                        ContentPart::File { mime_type, name, .. } => match name {
                            Some(name) => result.push_str(&format!("[file: {} ({})]", name, mime_type)),
                            None => result.push_str(&format!("[file: {}]", mime_type)),
                        },
                    }
                }
                result
            }
        }
    }

    fn validate_parts(&self) -> Result<(), MessageValidationError> {
        if let Self::Parts(parts) = self {
            for (index, part) in parts.iter().enumerate() {
                part.validate(index)?;
            }
        }
        Ok(())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        MessageContent::Parts(parts)
    }
}

/// A call to a tool requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Function name the model asked to invoke.
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A message in a conversation, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: MessageContent,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<MessageContent>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    System {
        content: MessageContent,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: MessageContent,
    },
}

impl Message {
    /// Create a user message with text content.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message with content parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::User {
            content: MessageContent::Parts(parts),
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(MessageContent::Text(content.into())),
            tool_calls: Vec::new(),
        }
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.map(MessageContent::Text),
            tool_calls,
        }
    }

    /// Create a system message with text content.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a tool result message.
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<MessageContent>,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// Role of this message.
    pub fn role(&self) -> Role {
        match self {
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::System { .. } => Role::System,
            Self::Tool { .. } => Role::Tool,
        }
    }

    /// Content of this message, if any.
    pub fn content(&self) -> Option<&MessageContent> {
        match self {
            Self::User { content } | Self::System { content } | Self::Tool { content, .. } => {
                Some(content)
            }
            Self::Assistant { content, .. } => content.as_ref(),
        }
    }

    /// Tool calls requested by an assistant message.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Check if this message requests tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// The tool call this message answers, for tool messages.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Get text content if this message has simple text content.
    pub fn as_text(&self) -> Option<&str> {
        match self.content() {
            Some(MessageContent::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Check the role-specific structural invariants.
    pub fn validate(&self) -> Result<(), MessageValidationError> {
        match self {
            Self::User { content } => {
                if content.is_empty() {
                    return Err(MessageValidationError::EmptyUserContent);
                }
                content.validate_parts()
            }
            Self::Assistant { content, tool_calls } => {
                let has_content = content.as_ref().is_some_and(|c| !c.is_empty());
                if !has_content && tool_calls.is_empty() {
                    return Err(MessageValidationError::EmptyAssistantMessage);
                }
                for (index, call) in tool_calls.iter().enumerate() {
                    if call.id.trim().is_empty() {
                        return Err(MessageValidationError::InvalidToolCall { index, field: "id" });
                    }
                    if call.name.trim().is_empty() {
                        return Err(MessageValidationError::InvalidToolCall {
                            index,
                            field: "function name",
                        });
                    }
                }
                match content {
                    Some(content) => content.validate_parts(),
                    None => Ok(()),
                }
            }
            Self::System { content } => {
                if content.is_empty() {
                    return Err(MessageValidationError::EmptySystemContent);
                }
                Ok(())
            }
            Self::Tool {
                tool_call_id,
                name,
                content,
            } => {
                if tool_call_id.trim().is_empty() {
                    return Err(MessageValidationError::MissingToolField("tool_call_id"));
                }
                if name.trim().is_empty() {
                    return Err(MessageValidationError::MissingToolField("name"));
                }
                content.validate_parts()
            }
        }
    }
}

// ============================================================================
// User Media & Tool Outcomes
// ============================================================================

/// Media attached to a user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl MediaAttachment {
    /// Create a new attachment.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
            file_name: None,
        }
    }

    /// Set the original file name.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Convert into an image part for `image/*` types, a file part otherwise.
    pub fn into_part(self) -> ContentPart {
        if self.mime_type.starts_with("image/") {
            ContentPart::Image {
                mime_type: self.mime_type,
                data: self.data,
            }
        } else {
            ContentPart::File {
                mime_type: self.mime_type,
                data: self.data,
                name: self.file_name,
            }
        }
    }
}

/// Default mime type for tool images that don't declare one.
const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Output of a tool execution, classified once at the tool boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Plain text, stored as-is.
    Text { text: String },
    /// An already-valid parts sequence.
    Parts { parts: Vec<ContentPart> },
    /// A single image.
    Image { mime_type: String, data: String },
    /// Anything else; stored as its JSON encoding.
    Json { value: serde_json::Value },
}

impl ToolOutcome {
    /// Classify a raw JSON tool result.
    ///
    /// Objects exposing an `image` field become images, strings stay text, arrays
    /// that decode as content parts become parts; everything else is kept as JSON.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text { text },
            serde_json::Value::Object(ref map) if map.get("image").is_some_and(|v| v.is_string()) => {
                let data = map
                    .get("image")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let mime_type = map
                    .get("mimeType")
                    .or_else(|| map.get("mime_type"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(DEFAULT_IMAGE_MIME)
                    .to_string();
                Self::Image { mime_type, data }
            }
            serde_json::Value::Array(_) => {
                match serde_json::from_value::<Vec<ContentPart>>(value.clone()) {
                    Ok(parts) => Self::Parts { parts },
                    Err(_) => Self::Json { value },
                }
            }
            other => Self::Json { value: other },
        }
    }

    /// Convert into message content.
    pub fn into_content(self) -> MessageContent {
        match self {
            Self::Text { text } => MessageContent::Text(text),
            Self::Parts { parts } => MessageContent::Parts(parts),
            Self::Image { mime_type, data } => {
                MessageContent::Parts(vec![ContentPart::Image { mime_type, data }])
            }
            Self::Json { value } => MessageContent::Text(value.to_string()),
        }
    }
}

impl From<String> for ToolOutcome {
    fn from(text: String) -> Self {
        Self::Text { text }
    }
}

impl From<&str> for ToolOutcome {
    fn from(text: &str) -> Self {
        Self::Text {
            text: text.to_string(),
        }
    }
}

impl From<serde_json::Value> for ToolOutcome {
    fn from(value: serde_json::Value) -> Self {
        Self::from_value(value)
    }
}
