// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Anthropic-style messages payloads.
//!
//! The system prompt travels in a top-level field. Tool results are folded into
//! user messages as `tool_result` blocks, and consecutive messages of the same
//! role are merged because the API requires alternating turns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::FormatterError;
use crate::types::{ContentPart, Message, MessageContent, ToolCall};

use super::{FormattedPayload, Formatter};

/// Formatter for the messages API.
#[derive(Debug, Clone, Default)]
pub struct MessagesApiFormatter;

impl MessagesApiFormatter {
    pub fn new() -> Self {
        Self
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// API message format.
#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

/// Content can be a string or array of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

impl ApiContent {
    fn into_blocks(self) -> Vec<ApiContentBlock> {
        match self {
            Self::Text(text) => vec![ApiContentBlock::text(text)],
            Self::Blocks(blocks) => blocks,
        }
    }
}

/// A content block in the API format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ApiContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<ApiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<ApiMediaSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl ApiContentBlock {
    fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn tool_use(call: &ToolCall) -> Self {
        Self {
            block_type: "tool_use".to_string(),
            id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            input: Some(call.arguments.clone()),
            ..Default::default()
        }
    }

    fn tool_result(tool_use_id: &str, content: &MessageContent) -> Self {
        let content = match content {
            MessageContent::Text(text) => ApiContent::Text(text.clone()),
            MessageContent::Parts(parts) => ApiContent::Blocks(parts.iter().map(Self::from).collect()),
        };
        Self {
            block_type: "tool_result".to_string(),
            tool_use_id: Some(tool_use_id.to_string()),
            content: Some(content),
            ..Default::default()
        }
    }
}

/// Base64 media source in API format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMediaSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

/// API response format.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default = "default_response_role")]
    role: String,
    #[serde(default)]
    content: Vec<ApiContentBlock>,
}

fn default_response_role() -> String {
    "assistant".to_string()
}

// ============================================================================
// Type Conversions
// ============================================================================

impl From<&ContentPart> for ApiContentBlock {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => Self::text(text.clone()),
            ContentPart::Image { mime_type, data } => Self {
                block_type: "image".to_string(),
                source: Some(ApiMediaSource {
                    source_type: "base64".to_string(),
                    media_type: mime_type.clone(),
                    data: data.clone(),
                }),
                ..Default::default()
            },
            ContentPart::File { mime_type, data, name } => Self {
                block_type: "document".to_string(),
                source: Some(ApiMediaSource {
                    source_type: "base64".to_string(),
                    media_type: mime_type.clone(),
                    data: data.clone(),
                }),
                title: name.clone(),
                ..Default::default()
            },
        }
    }
}

impl From<&MessageContent> for ApiContent {
    fn from(content: &MessageContent) -> Self {
        match content {
            MessageContent::Text(text) => Self::Text(text.clone()),
            MessageContent::Parts(parts) => Self::Blocks(parts.iter().map(ApiContentBlock::from).collect()),
        }
    }
}

impl From<&Message> for ApiMessage {
    fn from(msg: &Message) -> Self {
        match msg {
            Message::User { content } => Self {
                role: "user".to_string(),
                content: ApiContent::from(content),
            },
            // No system role inside the message list
            Message::System { content } => Self {
                role: "user".to_string(),
                content: ApiContent::from(content),
            },
            Message::Assistant { content, tool_calls } => {
                if tool_calls.is_empty() {
                    let content = content
                        .as_ref()
                        .map(ApiContent::from)
                        .unwrap_or_else(|| ApiContent::Text(String::new()));
                    return Self {
                        role: "assistant".to_string(),
                        content,
                    };
                }

                let mut blocks = content
                    .as_ref()
                    .filter(|c| !c.is_empty())
                    .map(|c| ApiContent::from(c).into_blocks())
                    .unwrap_or_default();
                blocks.extend(tool_calls.iter().map(ApiContentBlock::tool_use));
                Self {
                    role: "assistant".to_string(),
                    content: ApiContent::Blocks(blocks),
                }
            }
            Message::Tool {
                tool_call_id,
                content,
                ..
            } => Self {
                role: "user".to_string(),
                content: ApiContent::Blocks(vec![ApiContentBlock::tool_result(tool_call_id, content)]),
            },
        }
    }
}

/// Merge consecutive messages that share a role.
fn merge_consecutive(messages: Vec<ApiMessage>) -> Vec<ApiMessage> {
    let mut merged: Vec<ApiMessage> = Vec::with_capacity(messages.len());
    for msg in messages {
        match merged.last_mut() {
            Some(last) if last.role == msg.role => {
                let previous = std::mem::replace(&mut last.content, ApiContent::Blocks(Vec::new()));
                let mut blocks = previous.into_blocks();
                blocks.extend(msg.content.into_blocks());
                last.content = ApiContent::Blocks(blocks);
            }
            _ => merged.push(msg),
        }
    }
    merged
}

fn content_from_blocks(blocks: Vec<ApiContentBlock>) -> MessageContent {
    let parts: Vec<ContentPart> = blocks
        .into_iter()
        .filter_map(|block| match block.block_type.as_str() {
            "text" => block.text.map(ContentPart::text),
            "image" => block
                .source
                .map(|s| ContentPart::image(s.media_type, s.data)),
            _ => None,
        })
        .collect();
    match parts.as_slice() {
        [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
        _ => MessageContent::Parts(parts),
    }
}

impl Formatter for MessagesApiFormatter {
    fn name(&self) -> &str {
        "messages-api"
    }

    fn format(&self, history: &[Message], system_prompt: &str) -> Result<FormattedPayload, FormatterError> {
        let system = self.format_system_prompt(system_prompt);
        let messages = merge_consecutive(history.iter().map(ApiMessage::from).collect())
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FormattedPayload {
            system: if system.is_empty() { None } else { Some(system) },
            messages,
        })
    }

    fn format_system_prompt(&self, system_prompt: &str) -> String {
        system_prompt.trim().to_string()
    }

    fn parse_response(&self, raw: &serde_json::Value) -> Result<Vec<Message>, FormatterError> {
        let response: ApiResponse = serde_json::from_value(raw.clone())
            .map_err(|e| FormatterError::ParseError(e.to_string()))?;
        if response.role != "assistant" {
            return Err(FormatterError::ParseError(format!(
                "unexpected response role: {}",
                response.role
            )));
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut results = Vec::new();

        for block in response.content {
            match block.block_type.as_str() {
                "text" => {
                    if let Some(t) = block.text {
                        text.push_str(&t);
                    }
                }
                "tool_use" => {
                    let (Some(id), Some(name)) = (block.id, block.name) else {
                        return Err(FormatterError::ParseError(
                            "tool_use block without id or name".to_string(),
                        ));
                    };
                    let input = block.input.unwrap_or_else(|| serde_json::json!({}));
                    tool_calls.push(ToolCall::new(id, name, input));
                }
                // Results of server-side tools executed within the response
                "tool_result" => {
                    let Some(tool_use_id) = block.tool_use_id else {
                        return Err(FormatterError::ParseError(
                            "tool_result block without tool_use_id".to_string(),
                        ));
                    };
                    let content = match block.content {
                        Some(ApiContent::Text(t)) => MessageContent::Text(t),
                        Some(ApiContent::Blocks(blocks)) => content_from_blocks(blocks),
                        None => MessageContent::Text(String::new()),
                    };
                    results.push((tool_use_id, content));
                }
                _ => {}
            }
        }

        let mut messages = Vec::with_capacity(1 + results.len());
        let content = if text.is_empty() {
            None
        } else {
            Some(MessageContent::Text(text))
        };
        if content.is_some() || !tool_calls.is_empty() {
            let names: HashMap<String, String> = tool_calls
                .iter()
                .map(|c| (c.id.clone(), c.name.clone()))
                .collect();
            messages.push(Message::Assistant { content, tool_calls });
            for (id, content) in results {
                let name = names.get(&id).cloned().unwrap_or_else(|| "unknown".to_string());
                messages.push(Message::tool(id, name, content));
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_turn() -> Vec<Message> {
        vec![
            Message::user("check both"),
            Message::assistant_with_tool_calls(
                Some("Looking.".to_string()),
                vec![
                    ToolCall::new("t1", "read_file", json!({"path": "a"})),
                    ToolCall::new("t2", "read_file", json!({"path": "b"})),
                ],
            ),
            Message::tool("t1", "read_file", "A"),
            Message::tool("t2", "read_file", "B"),
            Message::user("thanks"),
        ]
    }

    #[test]
    fn test_system_prompt_is_top_level() {
        let formatter = MessagesApiFormatter::new();
        let payload = formatter.format(&[Message::user("hi")], "Be brief.").unwrap();
        assert_eq!(payload.system.as_deref(), Some("Be brief."));
        assert_eq!(payload.messages, vec![json!({"role": "user", "content": "hi"})]);
    }

    #[test]
    fn test_empty_system_prompt_is_none() {
        let formatter = MessagesApiFormatter::new();
        let payload = formatter.format(&[Message::user("hi")], "   ").unwrap();
        assert!(payload.system.is_none());
    }

    #[test]
    fn test_tool_results_merge_into_one_user_turn() {
        let formatter = MessagesApiFormatter::new();
        let payload = formatter.format(&tool_turn(), "").unwrap();

        assert_eq!(payload.len(), 3);
        let assistant = &payload.messages[1];
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["content"][0], json!({"type": "text", "text": "Looking."}));
        assert_eq!(assistant["content"][1]["type"], "tool_use");
        assert_eq!(assistant["content"][2]["input"], json!({"path": "b"}));

        let results = &payload.messages[2];
        assert_eq!(results["role"], "user");
        let blocks = results["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], json!({"type": "tool_result", "tool_use_id": "t1", "content": "A"}));
        assert_eq!(blocks[1]["tool_use_id"], "t2");
        assert_eq!(blocks[2], json!({"type": "text", "text": "thanks"}));
    }

    #[test]
    fn test_images_use_base64_source() {
        let formatter = MessagesApiFormatter::new();
        let history = vec![Message::user_parts(vec![ContentPart::image("image/jpeg", "Zm9v")])];
        let payload = formatter.format(&history, "").unwrap();
        assert_eq!(
            payload.messages[0]["content"][0],
            json!({
                "type": "image",
                "source": {"type": "base64", "media_type": "image/jpeg", "data": "Zm9v"}
            })
        );
    }

    #[test]
    fn test_image_tool_result_keeps_blocks() {
        let formatter = MessagesApiFormatter::new();
        let history = vec![
            Message::assistant_with_tool_calls(None, vec![ToolCall::new("s1", "screenshot", json!({}))]),
            Message::tool(
                "s1",
                "screenshot",
                vec![ContentPart::image("image/png", "cG5n")],
            ),
        ];
        let payload = formatter.format(&history, "").unwrap();
        let result = &payload.messages[1]["content"][0];
        assert_eq!(result["type"], "tool_result");
        assert_eq!(result["content"][0]["type"], "image");
    }

    #[test]
    fn test_parse_response_with_tool_use() {
        let formatter = MessagesApiFormatter::new();
        let raw = json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "tu_1", "name": "glob", "input": {"pattern": "*.rs"}}
            ],
            "stop_reason": "tool_use"
        });
        let messages = formatter.parse_response(&raw).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].as_text(), Some("Let me look."));
        assert_eq!(messages[0].tool_calls()[0].name, "glob");
    }

    #[test]
    fn test_parse_response_with_server_tool_result() {
        let formatter = MessagesApiFormatter::new();
        let raw = json!({
            "content": [
                {"type": "tool_use", "id": "ws_1", "name": "web_search", "input": {"q": "rust"}},
                {"type": "tool_result", "tool_use_id": "ws_1", "content": "results"},
                {"type": "text", "text": "Found it."}
            ]
        });
        let messages = formatter.parse_response(&raw).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], Message::tool("ws_1", "web_search", "results"));
    }

    #[test]
    fn test_parse_empty_response() {
        let formatter = MessagesApiFormatter::new();
        let messages = formatter.parse_response(&json!({"content": []})).unwrap();
        assert!(messages.is_empty());
    }
}
