// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Interior removal.

use crate::error::CompressionError;
use crate::tokenizer::Tokenizer;
use crate::types::Message;

use super::{collect_kept, group_units, unit_tokens, CompressionStrategy};

/// Removes messages from the middle of the conversation, working outwards.
///
/// The first `preserve_start` and last `preserve_end` messages are kept; a
/// tool exchange straddling either boundary is kept whole.
#[derive(Debug, Clone)]
pub struct MiddleRemovalStrategy {
    preserve_start: usize,
    preserve_end: usize,
}

impl MiddleRemovalStrategy {
    pub fn new(preserve_start: usize, preserve_end: usize) -> Self {
        Self {
            preserve_start,
            preserve_end,
        }
    }
}

impl Default for MiddleRemovalStrategy {
    fn default() -> Self {
        Self::new(2, 6)
    }
}

impl CompressionStrategy for MiddleRemovalStrategy {
    fn name(&self) -> &'static str {
        "middle-removal"
    }

    fn compress(
        &self,
        history: &[Message],
        tokenizer: &dyn Tokenizer,
        target_tokens: usize,
    ) -> Result<Vec<Message>, CompressionError> {
        let units = group_units(history);
        let tokens = unit_tokens(history, &units, tokenizer);
        let mut total: usize = tokens.iter().sum();
        if total <= target_tokens {
            return Ok(history.to_vec());
        }

        let tail_start = history.len().saturating_sub(self.preserve_end);
        let lo = units.iter().take_while(|r| r.start < self.preserve_start).count();
        let hi = units
            .iter()
            .position(|r| r.end > tail_start)
            .unwrap_or(units.len());
        if lo >= hi {
            return Ok(history.to_vec());
        }

        // Closest to the centre of the removable span first, left before right
        let mut order: Vec<usize> = (lo..hi).collect();
        order.sort_by_key(|&i| ((2 * i).abs_diff(lo + hi - 1), i));

        let mut keep = vec![true; units.len()];
        for i in order {
            if total <= target_tokens {
                break;
            }
            keep[i] = false;
            total -= tokens[i];
        }

        Ok(collect_kept(history, &units, &keep))
    }
}
