// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-session context management.
//!
//! A [`ContextManager`] is the single authority for one conversation: it
//! validates every append, assembles the system prompt, decides when history
//! must be compressed, and produces the provider payload for a turn.
//!
//! The durable history lives in a [`HistoryStore`]; compression only shapes
//! what is sent for a turn and never deletes stored messages.
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy::context::{ContextManager, ModelProfile};
//!
//! let manager = ContextManager::builder("session-1", store, profile).build();
//! manager.add_user_message("hello", Vec::new()).await?;
//! let turn = manager.get_formatted_messages_with_compression(&PromptContext::new()).await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

use crate::compression::{self, CompressionResult, CompressionSettings, CompressionStrategy};
use crate::error::{ContextError, StorageError};
use crate::formatter::{FormattedPayload, Formatter};
use crate::prompt::{PromptContext, SystemPromptBuilder, TemplatePromptBuilder};
use crate::storage::HistoryStore;
use crate::tokenizer::{count_history_tokens, Tokenizer};
use crate::types::{ContentPart, MediaAttachment, Message, MessageContent, ToolCall, ToolOutcome};

/// Percentage of the estimate added as a safety margin to reported token usage.
const TOKEN_USAGE_MARGIN_PERCENT: usize = 5;

/// Model-specific configuration a context manager formats and counts with.
#[derive(Clone)]
pub struct ModelProfile {
    /// Model identifier, recorded in session metadata.
    pub model: Option<String>,
    /// Context window in tokens.
    pub max_tokens: usize,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub formatter: Arc<dyn Formatter>,
}

impl ModelProfile {
    pub fn new(max_tokens: usize, tokenizer: Arc<dyn Tokenizer>, formatter: Arc<dyn Formatter>) -> Self {
        Self {
            model: None,
            max_tokens,
            tokenizer,
            formatter,
        }
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl fmt::Debug for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelProfile")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("tokenizer", &self.tokenizer.name())
            .field("formatter", &self.formatter.name())
            .finish()
    }
}

/// Receives per-session bookkeeping signals from a [`ContextManager`].
#[async_trait]
pub trait ContextObserver: Send + Sync {
    /// A message was appended to the session.
    async fn message_added(&self, session_id: &str) -> Result<(), StorageError>;

    /// The session's history was cleared.
    async fn conversation_reset(&self, session_id: &str) -> Result<(), StorageError>;
}

/// A formatted turn ready to send.
#[derive(Debug, Clone)]
pub struct FormattedTurn {
    pub payload: FormattedPayload,
    /// Estimated input tokens including the safety margin.
    pub token_usage: usize,
    /// Tokens of the formatted system prompt.
    pub system_tokens: usize,
    pub compression: CompressionResult,
}

/// Builder for [`ContextManager`].
pub struct ContextManagerBuilder {
    session_id: String,
    store: Arc<dyn HistoryStore>,
    profile: ModelProfile,
    prompt_builder: Arc<dyn SystemPromptBuilder>,
    strategies: Option<Vec<Arc<dyn CompressionStrategy>>>,
    settings: CompressionSettings,
    observer: Option<Arc<dyn ContextObserver>>,
}

impl ContextManagerBuilder {
    /// Set the system prompt builder.
    pub fn prompt_builder(mut self, builder: Arc<dyn SystemPromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    /// Replace the compression strategies, in application order.
    pub fn strategies(mut self, strategies: Vec<Arc<dyn CompressionStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Tune the default strategies and the compression threshold.
    pub fn compression(mut self, settings: CompressionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach a bookkeeping observer.
    pub fn observer(mut self, observer: Arc<dyn ContextObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> ContextManager {
        let strategies = self
            .strategies
            .unwrap_or_else(|| compression::default_strategies(&self.settings));
        ContextManager {
            session_id: self.session_id,
            store: self.store,
            profile: RwLock::new(self.profile),
            prompt_builder: self.prompt_builder,
            strategies,
            compress_threshold: self.settings.compress_threshold,
            last_actual_tokens: AtomicUsize::new(0),
            observer: self.observer,
        }
    }
}

/// Owns validation, prompt assembly, compression and formatting for one session.
pub struct ContextManager {
    session_id: String,
    store: Arc<dyn HistoryStore>,
    profile: RwLock<ModelProfile>,
    prompt_builder: Arc<dyn SystemPromptBuilder>,
    strategies: Vec<Arc<dyn CompressionStrategy>>,
    compress_threshold: f64,
    last_actual_tokens: AtomicUsize,
    observer: Option<Arc<dyn ContextObserver>>,
}

impl fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextManager")
            .field("session_id", &self.session_id)
            .field("strategies", &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("compress_threshold", &self.compress_threshold)
            .field("last_actual_tokens", &self.last_actual_token_count())
            .finish()
    }
}

impl ContextManager {
    /// Start building a manager for `session_id`.
    pub fn builder(
        session_id: impl Into<String>,
        store: Arc<dyn HistoryStore>,
        profile: ModelProfile,
    ) -> ContextManagerBuilder {
        ContextManagerBuilder {
            session_id: session_id.into(),
            store,
            profile,
            prompt_builder: Arc::new(TemplatePromptBuilder::default()),
            strategies: None,
            settings: CompressionSettings::default(),
            observer: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot of the active model profile.
    pub async fn profile(&self) -> ModelProfile {
        self.profile.read().await.clone()
    }

    pub async fn max_tokens(&self) -> usize {
        self.profile.read().await.max_tokens
    }

    // ========================================================================
    // Appending
    // ========================================================================

    /// Validate and append a message.
    ///
    /// Nothing is written when validation fails.
    #[instrument(skip(self, message), fields(session_id = %self.session_id, role = %message.role()))]
    pub async fn add_message(&self, message: Message) -> Result<(), ContextError> {
        if let Err(e) = message.validate() {
            debug!(rule = e.rule(), "Rejected message: {}", e);
            return Err(e.into());
        }
        if matches!(message, Message::System { .. }) {
            warn!("System message stored in history; prefer the prompt builder");
        }

        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.store
            .save_message(&self.session_id, &message)
            .await
            .map_err(|e| ContextError::storage(&self.session_id, "save_message", e))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("context.add_message", start.elapsed());

        if let Some(observer) = &self.observer {
            if let Err(e) = observer.message_added(&self.session_id).await {
                warn!("Failed to update session metadata after append: {}", e);
            }
        }
        Ok(())
    }

    /// Append a user turn, optionally with media attachments.
    ///
    /// With media the message becomes a parts sequence: the text first when it
    /// is not blank, then one part per attachment.
    pub async fn add_user_message(
        &self,
        text: impl Into<String>,
        media: Vec<MediaAttachment>,
    ) -> Result<(), ContextError> {
        let text = text.into();
        let message = if media.is_empty() {
            Message::user(text)
        } else {
            let mut parts = Vec::with_capacity(media.len() + 1);
            if !text.trim().is_empty() {
                parts.push(ContentPart::text(text));
            }
            parts.extend(media.into_iter().map(MediaAttachment::into_part));
            Message::user_parts(parts)
        };
        self.add_message(message).await
    }

    /// Append an assistant turn. Fails if there is neither content nor a tool call.
    pub async fn add_assistant_message(
        &self,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<(), ContextError> {
        self.add_message(Message::assistant_with_tool_calls(content, tool_calls))
            .await
    }

    /// Append the result of a tool call.
    pub async fn add_tool_result(
        &self,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        outcome: impl Into<ToolOutcome>,
    ) -> Result<(), ContextError> {
        let content: MessageContent = outcome.into().into_content();
        self.add_message(Message::tool(tool_call_id, name, content)).await
    }

    /// Parse a raw provider response and append the resulting messages.
    ///
    /// Returns the appended messages.
    pub async fn add_provider_response(&self, raw: &serde_json::Value) -> Result<Vec<Message>, ContextError> {
        let formatter = self.profile.read().await.formatter.clone();
        let messages = formatter.parse_response(raw)?;
        // Validate the whole batch first so a bad response appends nothing
        for message in &messages {
            message.validate()?;
        }
        for message in &messages {
            self.add_message(message.clone()).await?;
        }
        Ok(messages)
    }

    /// The full stored history.
    pub async fn get_history(&self) -> Result<Vec<Message>, ContextError> {
        self.store
            .get_history(&self.session_id)
            .await
            .map_err(|e| ContextError::storage(&self.session_id, "get_history", e))
    }

    // ========================================================================
    // Formatting
    // ========================================================================

    /// Build the system prompt for `context`, after the formatter's transform.
    pub async fn build_system_prompt(&self, context: &PromptContext) -> String {
        let formatter = self.profile.read().await.formatter.clone();
        formatter.format_system_prompt(&self.prompt_builder.build(context))
    }

    /// Format history and system prompt into a provider payload.
    ///
    /// A precomputed system prompt or history is used as given; otherwise it
    /// is built or fetched.
    pub async fn get_formatted_messages(
        &self,
        context: &PromptContext,
        system_prompt: Option<String>,
        history: Option<Vec<Message>>,
    ) -> Result<FormattedPayload, ContextError> {
        let system_prompt = match system_prompt {
            Some(prompt) => prompt,
            None => self.build_system_prompt(context).await,
        };
        let history = match history {
            Some(history) => history,
            None => self.get_history().await?,
        };

        let formatter = self.profile.read().await.formatter.clone();
        formatter.format(&history, &system_prompt).map_err(|e| {
            warn!(formatter = formatter.name(), "Formatting failed: {}", e);
            ContextError::Formatting(e)
        })
    }

    /// Build, compress and format a full turn.
    ///
    /// Steps run in a fixed order: build the prompt, count it, fetch history,
    /// compress against the remaining budget, then format. Any error aborts the
    /// turn; no partial payload is returned.
    #[instrument(skip(self, context), fields(session_id = %self.session_id))]
    pub async fn get_formatted_messages_with_compression(
        &self,
        context: &PromptContext,
    ) -> Result<FormattedTurn, ContextError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let system_prompt = self.build_system_prompt(context).await;
        let system_tokens = self.profile.read().await.tokenizer.count_tokens(&system_prompt);
        let history = self.get_history().await?;
        let compression = self.compress_history_if_needed(history, system_tokens).await;

        let payload = self
            .get_formatted_messages(context, Some(system_prompt), Some(compression.messages.clone()))
            .await?;

        let estimate = system_tokens + compression.tokens_after;
        let token_usage = estimate + (estimate * TOKEN_USAGE_MARGIN_PERCENT).div_ceil(100);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("context.format_turn", start.elapsed());

        debug!(
            system_tokens,
            history_tokens = compression.tokens_after,
            token_usage,
            messages = payload.len(),
            "Formatted turn"
        );

        Ok(FormattedTurn {
            payload,
            token_usage,
            system_tokens,
            compression,
        })
    }

    /// Compress `history` if it does not fit next to the system prompt.
    ///
    /// Within budget the history comes back unchanged and no strategy runs.
    /// Otherwise the strategies run in order against
    /// `max_tokens - system_prompt_tokens`, stopping once under budget or at
    /// the first failure.
    pub async fn compress_history_if_needed(
        &self,
        history: Vec<Message>,
        system_prompt_tokens: usize,
    ) -> CompressionResult {
        let profile = self.profile().await;
        let result = compression::run_pipeline(
            &self.strategies,
            history,
            profile.tokenizer.as_ref(),
            profile.max_tokens,
            system_prompt_tokens,
        );

        if result.applied() {
            info!(
                session_id = %self.session_id,
                tokens_before = result.tokens_before,
                tokens_after = result.tokens_after,
                strategies = result.runs.len(),
                "Compressed history"
            );
        }
        result
    }

    // ========================================================================
    // Token accounting
    // ========================================================================

    /// Estimated tokens of the raw stored history.
    pub async fn get_token_count(&self) -> Result<usize, ContextError> {
        let history = self.get_history().await?;
        let tokenizer = self.profile.read().await.tokenizer.clone();
        Ok(count_history_tokens(tokenizer.as_ref(), &history))
    }

    /// Token usage a turn would report right now.
    ///
    /// Falls back to the raw history count if the turn cannot be built.
    pub async fn get_total_token_count(&self, context: &PromptContext) -> Result<usize, ContextError> {
        match self.get_formatted_messages_with_compression(context).await {
            Ok(turn) => Ok(turn.token_usage),
            Err(e) => {
                debug!("Falling back to raw token count: {}", e);
                self.get_token_count().await
            }
        }
    }

    /// Record the exact input token count reported by the provider.
    pub fn update_actual_token_count(&self, tokens: usize) {
        self.last_actual_tokens.store(tokens, Ordering::Relaxed);
        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_tokens(tokens as u64);
    }

    pub fn last_actual_token_count(&self) -> usize {
        self.last_actual_tokens.load(Ordering::Relaxed)
    }

    /// True if the last exact count plus `new_input_tokens` crosses the threshold.
    pub async fn should_compress(&self, new_input_tokens: usize) -> bool {
        let max_tokens = self.max_tokens().await;
        let projected = self.last_actual_token_count() + new_input_tokens;
        projected as f64 > max_tokens as f64 * self.compress_threshold
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clear the stored history. The prompt builder and model profile are kept.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn reset_conversation(&self) -> Result<(), ContextError> {
        self.store
            .clear_history(&self.session_id)
            .await
            .map_err(|source| ContextError::ResetFailed {
                session_id: self.session_id.clone(),
                source,
            })?;
        self.last_actual_tokens.store(0, Ordering::Relaxed);

        if let Some(observer) = &self.observer {
            if let Err(e) = observer.conversation_reset(&self.session_id).await {
                warn!("Failed to update session metadata after reset: {}", e);
            }
        }
        info!("Conversation reset");
        Ok(())
    }

    /// Swap the budget and optionally the tokenizer and formatter.
    ///
    /// Takes effect from the next call; a call already in progress keeps its snapshot.
    pub async fn update_config(
        &self,
        max_tokens: usize,
        tokenizer: Option<Arc<dyn Tokenizer>>,
        formatter: Option<Arc<dyn Formatter>>,
    ) {
        let mut profile = self.profile.write().await;
        profile.max_tokens = max_tokens;
        if let Some(tokenizer) = tokenizer {
            profile.tokenizer = tokenizer;
        }
        if let Some(formatter) = formatter {
            profile.formatter = formatter;
        }
        debug!(
            session_id = %self.session_id,
            max_tokens,
            tokenizer = profile.tokenizer.name(),
            formatter = profile.formatter.name(),
            "Context configuration updated"
        );
    }

    /// Replace the whole model profile.
    pub async fn apply_profile(&self, profile: ModelProfile) {
        let model = profile.model.clone();
        self.update_config(profile.max_tokens, Some(profile.tokenizer), Some(profile.formatter))
            .await;
        self.profile.write().await.model = model;
    }
}
