// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Oldest-first removal.

use crate::error::CompressionError;
use crate::tokenizer::Tokenizer;
use crate::types::Message;

use super::{collect_kept, group_units, unit_tokens, CompressionStrategy};

/// Removes messages from the front of the conversation.
///
/// `min_messages` is a floor for the hopeless case: when even the final unit
/// alone exceeds the target, removal stops at the floor. Otherwise units are
/// dropped until the history fits, down to the final unit if necessary.
#[derive(Debug, Clone)]
pub struct OldestRemovalStrategy {
    min_messages: usize,
}

impl OldestRemovalStrategy {
    pub fn new(min_messages: usize) -> Self {
        Self { min_messages }
    }
}

impl Default for OldestRemovalStrategy {
    fn default() -> Self {
        Self::new(2)
    }
}

impl CompressionStrategy for OldestRemovalStrategy {
    fn name(&self) -> &'static str {
        "oldest-removal"
    }

    fn compress(
        &self,
        history: &[Message],
        tokenizer: &dyn Tokenizer,
        target_tokens: usize,
    ) -> Result<Vec<Message>, CompressionError> {
        let units = group_units(history);
        let Some(last) = units.len().checked_sub(1) else {
            return Ok(Vec::new());
        };
        let tokens = unit_tokens(history, &units, tokenizer);
        let mut total: usize = tokens.iter().sum();
        let mut remaining = history.len();
        let mut keep = vec![true; units.len()];
        let reachable = tokens[last] <= target_tokens;

        for (i, unit) in units[..last].iter().enumerate() {
            if total <= target_tokens {
                break;
            }
            if !reachable && remaining - unit.len() < self.min_messages {
                break;
            }
            keep[i] = false;
            total -= tokens[i];
            remaining -= unit.len();
        }

        Ok(collect_kept(history, &units, &keep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::test_support::*;
    use crate::tokenizer::{count_history_tokens, ApproximateTokenizer};

    #[test]
    fn test_removes_from_front() {
        let tokenizer = ApproximateTokenizer::default();
        let history = chatter(10, 20);
        let out = OldestRemovalStrategy::new(1)
            .compress(&history, &tokenizer, 100)
            .unwrap();

        assert!(count_history_tokens(&tokenizer, &out) <= 100);
        assert_eq!(out.last(), history.last());
        assert_eq!(&history[history.len() - out.len()..], out.as_slice());
    }

    #[test]
    fn test_respects_min_messages_when_target_unreachable() {
        let tokenizer = ApproximateTokenizer::default();
        let history = chatter(10, 20);
        let out = OldestRemovalStrategy::new(4)
            .compress(&history, &tokenizer, 0)
            .unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_crosses_min_messages_when_last_turn_fits() {
        let tokenizer = ApproximateTokenizer::default();
        let history = vec![
            Message::user("x".repeat(40)),
            Message::assistant("y".repeat(2400)),
            Message::user("z".repeat(400)),
        ];

        let out = OldestRemovalStrategy::new(2)
            .compress(&history, &tokenizer, 500)
            .unwrap();

        assert_eq!(out, vec![Message::user("z".repeat(400))]);
        assert!(count_history_tokens(&tokenizer, &out) <= 500);
    }

    #[test]
    fn test_final_unit_always_kept() {
        let tokenizer = ApproximateTokenizer::default();
        let mut history = chatter(4, 20);
        history.extend(tool_exchange("tail", 2));

        let out = OldestRemovalStrategy::new(1)
            .compress(&history, &tokenizer, 0)
            .unwrap();

        assert_eq!(out, history[4..].to_vec());
        assert!(pairing_intact(&out));
    }

    #[test]
    fn test_leading_tool_exchange_removed_whole() {
        let tokenizer = ApproximateTokenizer::default();
        let mut history = tool_exchange("t", 2);
        history.extend(chatter(6, 20));

        let out = OldestRemovalStrategy::new(2)
            .compress(&history, &tokenizer, 150)
            .unwrap();

        assert!(pairing_intact(&out));
        assert!(out.iter().all(|m| m.tool_call_id().is_none() && !m.has_tool_calls()));
    }
}
