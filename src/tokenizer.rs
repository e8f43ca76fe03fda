// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Token counting.
//!
//! The runtime never hardcodes a model's tokenizer: callers inject a [`Tokenizer`]
//! per session. Two approximations are provided for models without an exact
//! counter, plus helpers that count whole messages and histories.

use crate::types::{ContentPart, Message, MessageContent};

/// Default characters per token ratio (approximate).
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Per-message overhead for role and framing.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Flat estimate charged for an image or file part.
pub const MEDIA_PART_TOKENS: usize = 85;

/// Text to token count capability.
///
/// Implementations must be deterministic for identical input.
pub trait Tokenizer: Send + Sync {
    /// Count the tokens in `text`.
    fn count_tokens(&self, text: &str) -> usize;

    /// Name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Character-ratio tokenizer (~4 chars per token for English text).
#[derive(Debug, Clone)]
pub struct ApproximateTokenizer {
    chars_per_token: f64,
}

impl ApproximateTokenizer {
    /// Create with a custom ratio. Non-positive ratios fall back to the default.
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    /// Characters per token.
    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

impl Default for ApproximateTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl Tokenizer for ApproximateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        let chars = text.chars().count();
        (chars as f64 / self.chars_per_token).ceil() as usize
    }

    fn name(&self) -> &str {
        "approximate"
    }
}

/// Word-based tokenizer (~1.3 tokens per word).
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    tokens_per_word: f64,
}

impl WordTokenizer {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordTokenizer {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl Tokenizer for WordTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }

    fn name(&self) -> &str {
        "word"
    }
}

fn count_content_tokens(tokenizer: &dyn Tokenizer, content: &MessageContent) -> usize {
    match content {
        MessageContent::Text(text) => tokenizer.count_tokens(text),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => tokenizer.count_tokens(text),
                ContentPart::Image { .. } | ContentPart::File { .. } => MEDIA_PART_TOKENS,
            })
            .sum(),
    }
}

/// Estimate tokens for a single message, including tool call payloads.
pub fn count_message_tokens(tokenizer: &dyn Tokenizer, message: &Message) -> usize {
    let mut tokens = MESSAGE_OVERHEAD_TOKENS;

    if let Some(content) = message.content() {
        tokens += count_content_tokens(tokenizer, content);
    }

    for call in message.tool_calls() {
        tokens += tokenizer.count_tokens(&call.name);
        tokens += tokenizer.count_tokens(&call.arguments.to_string());
    }

    if let Message::Tool { name, .. } = message {
        tokens += tokenizer.count_tokens(name);
    }

    tokens
}

/// Estimate tokens for a list of messages.
pub fn count_history_tokens(tokenizer: &dyn Tokenizer, messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| count_message_tokens(tokenizer, m))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    #[test]
    fn test_approximate_tokenizer() {
        let tokenizer = ApproximateTokenizer::default();
        assert_eq!(tokenizer.count_tokens(""), 0);
        assert_eq!(tokenizer.count_tokens("abcd"), 1);
        assert_eq!(tokenizer.count_tokens("abcde"), 2);
    }

    #[test]
    fn test_approximate_tokenizer_counts_chars_not_bytes() {
        let tokenizer = ApproximateTokenizer::new(1.0);
        assert_eq!(tokenizer.count_tokens("héllo"), 5);
    }

    #[test]
    fn test_invalid_ratio_falls_back() {
        let tokenizer = ApproximateTokenizer::new(0.0);
        assert_eq!(tokenizer.chars_per_token(), DEFAULT_CHARS_PER_TOKEN);
    }

    #[test]
    fn test_word_tokenizer() {
        let tokenizer = WordTokenizer::default();
        assert_eq!(tokenizer.count_tokens("Hello world test"), 4); // 3 * 1.3 = 3.9 -> 4
    }

    #[test]
    fn test_message_tokens_include_overhead() {
        let tokenizer = ApproximateTokenizer::default();
        let message = Message::user("abcdefgh");
        assert_eq!(count_message_tokens(&tokenizer, &message), 2 + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_tool_calls_are_counted() {
        let tokenizer = ApproximateTokenizer::default();
        let bare = Message::assistant_with_tool_calls(None, vec![]);
        let with_call = Message::assistant_with_tool_calls(
            None,
            vec![ToolCall::new("c1", "read_file", serde_json::json!({"path": "src/lib.rs"}))],
        );
        assert!(count_message_tokens(&tokenizer, &with_call) > count_message_tokens(&tokenizer, &bare));
    }

    #[test]
    fn test_media_parts_flat_cost() {
        let tokenizer = ApproximateTokenizer::default();
        let message = Message::user_parts(vec![ContentPart::image("image/png", "A".repeat(10_000))]);
        assert_eq!(
            count_message_tokens(&tokenizer, &message),
            MEDIA_PART_TOKENS + MESSAGE_OVERHEAD_TOKENS
        );
    }

    #[test]
    fn test_history_tokens() {
        let tokenizer = ApproximateTokenizer::default();
        let messages = vec![Message::user("abcd"), Message::assistant("abcd")];
        assert_eq!(count_history_tokens(&tokenizer, &messages), 2 * (1 + MESSAGE_OVERHEAD_TOKENS));
    }
}
