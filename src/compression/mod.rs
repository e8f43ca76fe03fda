// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! History compression.
//!
//! Compression keeps a conversation under the model's token budget by deleting
//! messages. Strategies are stateless: each takes a borrowed history and returns
//! a new, possibly shorter one. They are applied in order by
//! [`run_pipeline`], each on the previous strategy's output, until the total
//! fits. The first failing strategy halts the pipeline and the last successful
//! output is kept.
//!
//! Every strategy removes whole [`units`](group_units): an assistant message that
//! issued tool calls is removed together with its tool results. A result that
//! arrived later than its call's unit is reconciled when the history is
//! rebuilt, so a compressed history never pairs a result with a missing call or
//! a call with a missing result.

mod middle;
mod oldest;

pub use middle::MiddleRemovalStrategy;
pub use oldest::OldestRemovalStrategy;

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

use crate::error::CompressionError;
use crate::tokenizer::{count_history_tokens, count_message_tokens, Tokenizer};
use crate::types::Message;

/// Default share of the budget that triggers compression.
pub const DEFAULT_COMPRESS_THRESHOLD: f64 = 0.8;

/// A history-shortening policy.
#[cfg_attr(test, mockall::automock)]
pub trait CompressionStrategy: Send + Sync {
    /// Strategy name for logs and run reports.
    fn name(&self) -> &'static str;

    /// Shorten `history` toward `target_tokens` history tokens.
    ///
    /// Implementations must not reorder surviving messages.
    fn compress(
        &self,
        history: &[Message],
        tokenizer: &dyn Tokenizer,
        target_tokens: usize,
    ) -> Result<Vec<Message>, CompressionError>;
}

/// Tunables for the default strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressionSettings {
    /// Messages kept at the start by middle removal.
    pub preserve_start: usize,
    /// Messages kept at the end by middle removal.
    pub preserve_end: usize,
    /// Floor for oldest removal when the history cannot fit at all.
    pub min_messages: usize,
    /// Share of the budget above which `should_compress` reports true.
    pub compress_threshold: f64,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            preserve_start: 2,
            preserve_end: 6,
            min_messages: 2,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
        }
    }
}

/// The default strategy order: middle removal, then oldest removal.
pub fn default_strategies(settings: &CompressionSettings) -> Vec<Arc<dyn CompressionStrategy>> {
    vec![
        Arc::new(MiddleRemovalStrategy::new(settings.preserve_start, settings.preserve_end)),
        Arc::new(OldestRemovalStrategy::new(settings.min_messages)),
    ]
}

/// Outcome of one strategy application.
#[derive(Debug, Clone)]
pub enum StrategyOutcome {
    Succeeded {
        tokens_after: usize,
        removed: usize,
    },
    Failed {
        error: CompressionError,
    },
}

/// Report for one strategy in a pipeline run.
#[derive(Debug, Clone)]
pub struct StrategyRun {
    pub strategy: String,
    pub outcome: StrategyOutcome,
}

impl StrategyRun {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, StrategyOutcome::Succeeded { .. })
    }
}

/// Result of [`run_pipeline`].
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// The history to use for this turn.
    pub messages: Vec<Message>,
    /// History tokens before compression.
    pub tokens_before: usize,
    /// History tokens after compression.
    pub tokens_after: usize,
    /// Strategies that ran, in order.
    pub runs: Vec<StrategyRun>,
}

impl CompressionResult {
    fn unchanged(messages: Vec<Message>, tokens: usize) -> Self {
        Self {
            messages,
            tokens_before: tokens,
            tokens_after: tokens,
            runs: Vec::new(),
        }
    }

    /// True if any strategy was invoked.
    pub fn applied(&self) -> bool {
        !self.runs.is_empty()
    }

    /// The run that halted the pipeline, if any.
    pub fn failure(&self) -> Option<&StrategyRun> {
        self.runs.iter().find(|r| !r.succeeded())
    }
}

/// Apply `strategies` in order until `system_tokens` plus the history fits in `max_tokens`.
///
/// A history already within budget is returned untouched and no strategy runs.
/// There is no rollback: each strategy starts from the previous one's output.
pub fn run_pipeline(
    strategies: &[Arc<dyn CompressionStrategy>],
    history: Vec<Message>,
    tokenizer: &dyn Tokenizer,
    max_tokens: usize,
    system_tokens: usize,
) -> CompressionResult {
    let tokens_before = count_history_tokens(tokenizer, &history);
    if system_tokens + tokens_before <= max_tokens {
        return CompressionResult::unchanged(history, tokens_before);
    }

    let target = max_tokens.saturating_sub(system_tokens);
    let mut current = history;
    let mut current_tokens = tokens_before;
    let mut runs = Vec::new();

    for strategy in strategies {
        if current_tokens <= target {
            break;
        }

        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let outcome = strategy
            .compress(&current, tokenizer, target)
            .and_then(|output| {
                if output.len() > current.len() {
                    Err(CompressionError::InvalidOutput {
                        strategy: strategy.name().to_string(),
                        message: format!("grew history from {} to {} messages", current.len(), output.len()),
                    })
                } else {
                    Ok(output)
                }
            });

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("compression.strategy", start.elapsed());

        match outcome {
            Ok(output) => {
                let removed = current.len() - output.len();
                current = output;
                current_tokens = count_history_tokens(tokenizer, &current);
                debug!(
                    strategy = strategy.name(),
                    removed,
                    tokens = current_tokens,
                    target,
                    "Compression strategy applied"
                );
                runs.push(StrategyRun {
                    strategy: strategy.name().to_string(),
                    outcome: StrategyOutcome::Succeeded {
                        tokens_after: current_tokens,
                        removed,
                    },
                });
            }
            Err(error) => {
                warn!(strategy = strategy.name(), "Compression strategy failed: {}", error);
                runs.push(StrategyRun {
                    strategy: strategy.name().to_string(),
                    outcome: StrategyOutcome::Failed { error },
                });
                break;
            }
        }
    }

    #[cfg(feature = "telemetry")]
    GLOBAL_METRICS.record_compression(current_tokens < tokens_before);

    CompressionResult {
        messages: current,
        tokens_before,
        tokens_after: current_tokens,
        runs,
    }
}

/// Group a history into atomic removal units.
///
/// An assistant message with tool calls forms one unit with the tool results
/// that directly follow it and answer one of its calls. Every other message is
/// its own unit. Returned ranges are contiguous and cover the whole history.
pub fn group_units(history: &[Message]) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    let mut i = 0;

    while i < history.len() {
        let start = i;
        i += 1;
        if history[start].has_tool_calls() {
            let ids: HashSet<&str> = history[start]
                .tool_calls()
                .iter()
                .map(|c| c.id.as_str())
                .collect();
            while i < history.len() && history[i].tool_call_id().is_some_and(|id| ids.contains(id)) {
                i += 1;
            }
        }
        units.push(start..i);
    }

    units
}

/// Drop tool results whose originating call is not present in the history.
pub fn sweep_orphans(history: Vec<Message>) -> Vec<Message> {
    let call_ids: HashSet<String> = history
        .iter()
        .flat_map(|m| m.tool_calls().iter().map(|c| c.id.clone()))
        .collect();

    history
        .into_iter()
        .filter(|m| m.tool_call_id().map_or(true, |id| call_ids.contains(id)))
        .collect()
}

/// Per-unit token costs, aligned with `units`.
pub(crate) fn unit_tokens(history: &[Message], units: &[Range<usize>], tokenizer: &dyn Tokenizer) -> Vec<usize> {
    units
        .iter()
        .map(|range| {
            history[range.clone()]
                .iter()
                .map(|m| count_message_tokens(tokenizer, m))
                .sum()
        })
        .collect()
}

/// Rebuild a history keeping only the units flagged in `keep`.
///
/// Tool results answering a dropped call are removed, and so are calls whose
/// result was dropped. Calls that never had a result are left alone.
pub(crate) fn collect_kept(history: &[Message], units: &[Range<usize>], keep: &[bool]) -> Vec<Message> {
    let kept: Vec<Message> = units
        .iter()
        .zip(keep)
        .filter(|(_, keep)| **keep)
        .flat_map(|(range, _)| history[range.clone()].iter().cloned())
        .collect();

    let answered: HashSet<&str> = history.iter().filter_map(|m| m.tool_call_id()).collect();
    let kept_results: HashSet<String> = kept
        .iter()
        .filter_map(|m| m.tool_call_id().map(str::to_string))
        .collect();
    let dropped: HashSet<&str> = answered
        .into_iter()
        .filter(|id| !kept_results.contains(*id))
        .collect();

    let kept = kept
        .into_iter()
        .filter_map(|message| strip_calls(message, &dropped))
        .collect();
    sweep_orphans(kept)
}

/// Remove the listed tool calls; `None` if nothing is left to send.
fn strip_calls(message: Message, dropped: &HashSet<&str>) -> Option<Message> {
    match message {
        Message::Assistant { content, mut tool_calls } => {
            if tool_calls.is_empty() || dropped.is_empty() {
                return Some(Message::Assistant { content, tool_calls });
            }
            tool_calls.retain(|c| !dropped.contains(c.id.as_str()));
            let has_content = content.as_ref().is_some_and(|c| !c.is_empty());
            if !has_content && tool_calls.is_empty() {
                None
            } else {
                Some(Message::Assistant { content, tool_calls })
            }
        }
        other => Some(other),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::types::{Message, ToolCall};

    /// Alternating user/assistant messages with roughly `words` words each.
    pub fn chatter(count: usize, words: usize) -> Vec<Message> {
        (0..count)
            .map(|i| {
                let text = format!("m{} {}", i, "word ".repeat(words));
                if i % 2 == 0 {
                    Message::user(text)
                } else {
                    Message::assistant(text)
                }
            })
            .collect()
    }

    /// An assistant tool call followed by its results.
    pub fn tool_exchange(prefix: &str, calls: usize) -> Vec<Message> {
        let tool_calls: Vec<ToolCall> = (0..calls)
            .map(|i| ToolCall::new(format!("{}-{}", prefix, i), "read_file", serde_json::json!({"path": i})))
            .collect();
        let mut messages = vec![Message::assistant_with_tool_calls(None, tool_calls)];
        for i in 0..calls {
            messages.push(Message::tool(format!("{}-{}", prefix, i), "read_file", "x ".repeat(40)));
        }
        messages
    }

    /// True if every tool result has its call and every call has its results.
    pub fn pairing_intact(history: &[Message]) -> bool {
        let calls: Vec<&str> = history
            .iter()
            .flat_map(|m| m.tool_calls().iter().map(|c| c.id.as_str()))
            .collect();
        let results: Vec<&str> = history.iter().filter_map(|m| m.tool_call_id()).collect();
        results.iter().all(|id| calls.contains(id)) && calls.iter().all(|id| results.contains(id))
    }
}
