// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI-style chat completions payloads.
//!
//! The system prompt is the first message of the list. Tool call arguments are
//! sent as JSON strings and tool results as `role: tool` messages.

use serde::{Deserialize, Serialize};

use crate::error::FormatterError;
use crate::types::{ContentPart, Message, MessageContent, ToolCall};

use super::{FormattedPayload, Formatter};

/// Formatter for chat completions APIs (OpenAI, Ollama and compatible servers).
#[derive(Debug, Clone, Default)]
pub struct ChatCompletionsFormatter;

impl ChatCompletionsFormatter {
    pub fn new() -> Self {
        Self
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Chat message format.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<ChatContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// Content can be a string or array of parts.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

/// A content part.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ChatContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
    #[serde(rename = "file")]
    File { file: ChatFile },
}

/// Image URL for vision.
#[derive(Debug, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

/// Inline file attachment.
#[derive(Debug, Serialize, Deserialize)]
struct ChatFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    file_data: String,
}

/// Tool call in a message.
#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<ChatFunction>,
}

/// Function details in a tool call.
#[derive(Debug, Serialize, Deserialize)]
struct ChatFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

/// A choice in the response.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

// ============================================================================
// Type Conversions
// ============================================================================

fn data_url(mime_type: &str, data: &str) -> String {
    format!("data:{};base64,{}", mime_type, data)
}

impl From<&ContentPart> for ChatContentPart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => Self::Text { text: text.clone() },
            ContentPart::Image { mime_type, data } => Self::ImageUrl {
                image_url: ImageUrl {
                    url: data_url(mime_type, data),
                },
            },
            ContentPart::File { mime_type, data, name } => Self::File {
                file: ChatFile {
                    filename: name.clone(),
                    file_data: data_url(mime_type, data),
                },
            },
        }
    }
}

impl From<&MessageContent> for ChatContent {
    fn from(content: &MessageContent) -> Self {
        match content {
            MessageContent::Text(text) => Self::Text(text.clone()),
            MessageContent::Parts(parts) => match parts.as_slice() {
                [ContentPart::Text { text }] => Self::Text(text.clone()),
                _ => Self::Parts(parts.iter().map(ChatContentPart::from).collect()),
            },
        }
    }
}

impl From<&ToolCall> for ChatToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: Some(call.id.clone()),
            call_type: Some("function".to_string()),
            function: Some(ChatFunction {
                name: Some(call.name.clone()),
                arguments: Some(call.arguments.to_string()),
            }),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        match msg {
            Message::User { content } | Message::System { content } => Self {
                role: msg.role().as_str().to_string(),
                content: Some(ChatContent::from(content)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::Assistant { content, tool_calls } => Self {
                role: "assistant".to_string(),
                content: content.as_ref().map(ChatContent::from),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls.iter().map(ChatToolCall::from).collect())
                },
                tool_call_id: None,
                name: None,
            },
            // Tool messages only carry text on this API
            Message::Tool {
                tool_call_id,
                name,
                content,
            } => Self {
                role: "tool".to_string(),
                content: Some(ChatContent::Text(content.to_text())),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
                name: Some(name.clone()),
            },
        }
    }
}

fn content_from_chat(content: ChatContent) -> Option<MessageContent> {
    match content {
        ChatContent::Text(text) if text.is_empty() => None,
        ChatContent::Text(text) => Some(MessageContent::Text(text)),
        ChatContent::Parts(parts) => {
            let parts: Vec<ContentPart> = parts
                .into_iter()
                .filter_map(|p| match p {
                    ChatContentPart::Text { text } => Some(ContentPart::text(text)),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(MessageContent::Parts(parts))
            }
        }
    }
}

fn tool_call_from_chat(call: ChatToolCall) -> Result<ToolCall, FormatterError> {
    let id = call
        .id
        .ok_or_else(|| FormatterError::ParseError("tool call without id".to_string()))?;
    let function = call
        .function
        .ok_or_else(|| FormatterError::ParseError(format!("tool call {} without function", id)))?;
    let name = function
        .name
        .ok_or_else(|| FormatterError::ParseError(format!("tool call {} without name", id)))?;
    // Keep malformed argument strings verbatim rather than dropping them
    let arguments = match function.arguments {
        Some(raw) if raw.trim().is_empty() => serde_json::json!({}),
        Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
        None => serde_json::json!({}),
    };
    Ok(ToolCall::new(id, name, arguments))
}

impl Formatter for ChatCompletionsFormatter {
    fn name(&self) -> &str {
        "chat-completions"
    }

    fn format(&self, history: &[Message], system_prompt: &str) -> Result<FormattedPayload, FormatterError> {
        let system = self.format_system_prompt(system_prompt);
        let mut messages = Vec::with_capacity(history.len() + 1);

        if !system.is_empty() {
            messages.push(serde_json::to_value(ChatMessage::from(&Message::system(system)))?);
        }
        for msg in history {
            messages.push(serde_json::to_value(ChatMessage::from(msg))?);
        }

        Ok(FormattedPayload {
            system: None,
            messages,
        })
    }

    fn format_system_prompt(&self, system_prompt: &str) -> String {
        system_prompt.trim().to_string()
    }

    fn parse_response(&self, raw: &serde_json::Value) -> Result<Vec<Message>, FormatterError> {
        let response: ChatResponse = serde_json::from_value(raw.clone())
            .map_err(|e| FormatterError::ParseError(e.to_string()))?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| FormatterError::ParseError("response has no choices".to_string()))?;

        let message = choice.message;
        if message.role != "assistant" {
            return Err(FormatterError::ParseError(format!(
                "unexpected response role: {}",
                message.role
            )));
        }

        let content = message.content.and_then(content_from_chat);
        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(tool_call_from_chat)
            .collect::<Result<Vec<_>, _>>()?;

        if content.is_none() && tool_calls.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![Message::Assistant { content, tool_calls }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_prompt_is_first_message() {
        let formatter = ChatCompletionsFormatter::new();
        let payload = formatter
            .format(&[Message::user("hi")], "  Be nice.  ")
            .unwrap();

        assert!(payload.system.is_none());
        assert_eq!(payload.messages[0], json!({"role": "system", "content": "Be nice."}));
        assert_eq!(payload.messages[1], json!({"role": "user", "content": "hi"}));
        assert_eq!(payload.system_text(), Some("Be nice."));
    }

    #[test]
    fn test_empty_system_prompt_is_omitted() {
        let formatter = ChatCompletionsFormatter::new();
        let payload = formatter.format(&[Message::user("hi")], "").unwrap();
        assert_eq!(payload.len(), 1);
    }

    #[test]
    fn test_tool_round_trip_shape() {
        let formatter = ChatCompletionsFormatter::new();
        let history = vec![
            Message::user("read it"),
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall::new("call_1", "read_file", json!({"path": "a.txt"}))],
            ),
            Message::tool("call_1", "read_file", "contents"),
        ];
        let payload = formatter.format(&history, "").unwrap();

        let assistant = &payload.messages[1];
        assert_eq!(assistant["content"], serde_json::Value::Null);
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "read_file");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            json!({"path": "a.txt"}).to_string()
        );

        let tool = &payload.messages[2];
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
        assert_eq!(tool["content"], "contents");
    }

    #[test]
    fn test_image_parts_become_data_urls() {
        let formatter = ChatCompletionsFormatter::new();
        let history = vec![Message::user_parts(vec![
            ContentPart::text("what is this?"),
            ContentPart::image("image/png", "aGVsbG8="),
        ])];
        let payload = formatter.format(&history, "").unwrap();

        let parts = payload.messages[0]["content"].as_array().unwrap();
        assert_eq!(parts[0], json!({"type": "text", "text": "what is this?"}));
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn test_parse_text_response() {
        let formatter = ChatCompletionsFormatter::new();
        let raw = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }]
        });
        let messages = formatter.parse_response(&raw).unwrap();
        assert_eq!(messages, vec![Message::assistant("Hello!")]);
    }

    #[test]
    fn test_parse_tool_call_response() {
        let formatter = ChatCompletionsFormatter::new();
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "grep", "arguments": "{\"pattern\":\"fn\"}"}
                    }]
                }
            }]
        });
        let messages = formatter.parse_response(&raw).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content().is_none());
        assert_eq!(messages[0].tool_calls()[0].arguments, json!({"pattern": "fn"}));
    }

    #[test]
    fn test_parse_rejects_missing_choices() {
        let formatter = ChatCompletionsFormatter::new();
        let err = formatter.parse_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, FormatterError::ParseError(_)));
    }
}
