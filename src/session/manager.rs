// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session lifecycle management.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

use crate::compression::CompressionSettings;
use crate::context::{ContextManager, ContextObserver, ModelProfile};
use crate::error::{SessionError, StorageError};
use crate::prompt::{SystemPromptBuilder, TemplatePromptBuilder};
use crate::storage::{HistoryStore, MemoryStore, MetadataStore};

use super::types::{SessionConfig, SessionId, SessionMetadata, SessionStats};

/// Keeps persisted metadata in step with appends and resets, and tracks the
/// last activity of every session it has seen.
///
/// Read-modify-write of one session's metadata is serialized by a lock for
/// that session only. The shared maps are held just long to look up or insert.
struct MetadataTracker {
    store: Arc<dyn MetadataStore>,
    activity: Mutex<HashMap<SessionId, DateTime<Utc>>>,
    writers: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl MetadataTracker {
    fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            activity: Mutex::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
        }
    }

    async fn writer(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.writers
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Apply `update` to the stored metadata. Sessions without metadata are skipped.
    async fn update<F>(&self, session_id: &str, update: F) -> Result<Option<SessionMetadata>, StorageError>
    where
        F: FnOnce(&mut SessionMetadata) + Send,
    {
        let writer = self.writer(session_id).await;
        let _write = writer.lock().await;

        let Some(mut metadata) = self.store.get_metadata(session_id).await? else {
            self.activity.lock().await.remove(session_id);
            return Ok(None);
        };
        update(&mut metadata);
        self.store.save_metadata(&metadata).await?;

        self.activity
            .lock()
            .await
            .insert(metadata.id.clone(), metadata.last_activity);
        Ok(Some(metadata))
    }

    async fn record(&self, metadata: &SessionMetadata) {
        self.activity
            .lock()
            .await
            .insert(metadata.id.clone(), metadata.last_activity);
    }

    async fn forget(&self, session_id: &str) {
        self.activity.lock().await.remove(session_id);
        self.writers.lock().await.remove(session_id);
    }

    async fn last_activity(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.activity.lock().await.get(session_id).copied()
    }
}

#[async_trait]
impl ContextObserver for MetadataTracker {
    async fn message_added(&self, session_id: &str) -> Result<(), StorageError> {
        self.update(session_id, SessionMetadata::record_message).await?;
        Ok(())
    }

    async fn conversation_reset(&self, session_id: &str) -> Result<(), StorageError> {
        self.update(session_id, SessionMetadata::record_reset).await?;
        Ok(())
    }
}

/// A session held in memory.
struct ResidentSession {
    context: Arc<ContextManager>,
    turn: Arc<Mutex<()>>,
}

impl ResidentSession {
    fn new(context: ContextManager) -> Self {
        Self {
            context: Arc::new(context),
            turn: Arc::new(Mutex::new(())),
        }
    }

    /// True while a turn guard is held for this session.
    fn in_flight(&self) -> bool {
        self.turn.try_lock().is_err()
    }
}

#[derive(Default)]
struct ResidentState {
    sessions: HashMap<SessionId, ResidentSession>,
    current: Option<SessionId>,
}

/// Exclusive access to one session for the duration of a turn.
///
/// While held, the session will not be evicted and other `begin_turn` calls
/// for it wait.
pub struct TurnGuard {
    session_id: SessionId,
    context: Arc<ContextManager>,
    _guard: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }
}

impl Deref for TurnGuard {
    type Target = ContextManager;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl fmt::Debug for TurnGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnGuard")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Creates, hydrates, evicts and deletes sessions under a resident cap.
///
/// Durable state lives in the history and metadata stores; only the
/// per-session [`ContextManager`]s are held in memory, at most
/// `max_sessions` at a time. When a new session needs room, the resident
/// session with the oldest activity that is neither current nor mid-turn is
/// unloaded. Its history stays in the store and it is rehydrated on demand.
pub struct SessionManager {
    history: Arc<dyn HistoryStore>,
    metadata: Arc<dyn MetadataStore>,
    config: SessionConfig,
    compression: CompressionSettings,
    prompt_builder: Arc<dyn SystemPromptBuilder>,
    profile: RwLock<ModelProfile>,
    state: Mutex<ResidentState>,
    tracker: Arc<MetadataTracker>,
    evictions: AtomicU64,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("compression", &self.compression)
            .field("evictions", &self.evictions.load(Ordering::Relaxed))
            .finish()
    }
}

impl SessionManager {
    /// Create a manager over the given stores.
    pub fn new(
        history: Arc<dyn HistoryStore>,
        metadata: Arc<dyn MetadataStore>,
        profile: ModelProfile,
    ) -> Self {
        let tracker = Arc::new(MetadataTracker::new(metadata.clone()));
        Self {
            history,
            metadata,
            config: SessionConfig::default(),
            compression: CompressionSettings::default(),
            prompt_builder: Arc::new(TemplatePromptBuilder::default()),
            profile: RwLock::new(profile),
            state: Mutex::new(ResidentState::default()),
            tracker,
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a manager backed by a fresh [`MemoryStore`].
    pub fn in_memory(profile: ModelProfile) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, profile)
    }

    /// Set the lifecycle configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the compression settings used by new context managers.
    pub fn with_compression(mut self, settings: CompressionSettings) -> Self {
        self.compression = settings;
        self
    }

    /// Set the system prompt builder shared by all sessions.
    pub fn with_prompt_builder(mut self, builder: Arc<dyn SystemPromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a new session, resident but not current.
    ///
    /// A duplicate id fails with `InitializationFailed`. If the resident cap
    /// is reached the least recently active eligible session is evicted first.
    #[instrument(skip(self))]
    pub async fn create_session(&self, id: Option<String>) -> Result<SessionMetadata, SessionError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let id = id.unwrap_or_else(SessionMetadata::generate_id);
        if id.trim().is_empty() {
            return Err(SessionError::InitializationFailed {
                session_id: id,
                message: "session id must not be empty".to_string(),
            });
        }

        let mut state = self.state.lock().await;

        let persisted = self
            .metadata
            .get_metadata(&id)
            .await
            .map_err(|e| SessionError::storage(&id, "get_metadata", e))?;
        if state.sessions.contains_key(&id) || persisted.is_some() {
            return Err(SessionError::InitializationFailed {
                session_id: id,
                message: "a session with this id already exists".to_string(),
            });
        }

        let protected = state.current.clone();
        self.make_room(&mut state, protected.as_deref()).await?;

        let profile = self.profile.read().await.clone();
        let mut metadata = SessionMetadata::new(id.clone());
        metadata.model = profile.model.clone();
        self.metadata
            .save_metadata(&metadata)
            .await
            .map_err(|e| SessionError::storage(&id, "save_metadata", e))?;

        let context = self.build_context(&id, profile);
        state.sessions.insert(id.clone(), ResidentSession::new(context));
        self.tracker.record(&metadata).await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("session.create", start.elapsed());

        info!(session_id = %id, resident = state.sessions.len(), "Session created");
        Ok(metadata)
    }

    /// Make `id` the current session, rehydrating it if it is not resident.
    #[instrument(skip(self))]
    pub async fn load_session(&self, id: &str) -> Result<Arc<ContextManager>, SessionError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let mut state = self.state.lock().await;
        let context = match state.sessions.get(id) {
            Some(resident) => resident.context.clone(),
            None => {
                let previous = state.current.replace(id.to_string());
                match self.rehydrate(&mut state, id, Some(id)).await {
                    Ok(context) => context,
                    Err(e) => {
                        state.current = previous;
                        return Err(e);
                    }
                }
            }
        };
        state.current = Some(id.to_string());
        drop(state);

        if let Err(e) = self.tracker.update(id, SessionMetadata::touch).await {
            warn!(session_id = %id, "Failed to record session activity: {}", e);
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("session.load", start.elapsed());

        debug!(session_id = %id, "Session is now current");
        Ok(context)
    }

    /// The context manager for `id`, rehydrating it if needed. Does not change
    /// the current session.
    pub async fn get_session(&self, id: &str) -> Result<Arc<ContextManager>, SessionError> {
        let mut state = self.state.lock().await;
        if let Some(resident) = state.sessions.get(id) {
            return Ok(resident.context.clone());
        }
        let protected = state.current.clone();
        self.rehydrate(&mut state, id, protected.as_deref()).await
    }

    /// Start a turn on `id`, waiting for any turn already in progress.
    pub async fn begin_turn(&self, id: &str) -> Result<TurnGuard, SessionError> {
        loop {
            let (context, turn) = {
                let mut state = self.state.lock().await;
                if !state.sessions.contains_key(id) {
                    let protected = state.current.clone();
                    self.rehydrate(&mut state, id, protected.as_deref()).await?;
                }
                let resident = state
                    .sessions
                    .get(id)
                    .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

                // Idle session: take the turn before eviction can see it
                if let Ok(guard) = resident.turn.clone().try_lock_owned() {
                    return Ok(TurnGuard {
                        session_id: id.to_string(),
                        context: resident.context.clone(),
                        _guard: guard,
                    });
                }
                (resident.context.clone(), resident.turn.clone())
            };

            let guard = turn.clone().lock_owned().await;

            // The session may have been evicted and rehydrated while we waited
            let state = self.state.lock().await;
            if state
                .sessions
                .get(id)
                .is_some_and(|resident| Arc::ptr_eq(&resident.turn, &turn))
            {
                return Ok(TurnGuard {
                    session_id: id.to_string(),
                    context,
                    _guard: guard,
                });
            }
            debug!(session_id = %id, "session replaced while waiting for turn, retrying");
        }
    }

    /// Persisted metadata for `id`; `None` if the session does not exist.
    pub async fn get_session_metadata(&self, id: &str) -> Result<Option<SessionMetadata>, SessionError> {
        self.metadata
            .get_metadata(id)
            .await
            .map_err(|e| SessionError::storage(id, "get_metadata", e))
    }

    /// Permanently delete a session's history and metadata.
    ///
    /// The current session cannot be deleted.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if state.current.as_deref() == Some(id) {
            return Err(SessionError::CurrentSession(id.to_string()));
        }

        let was_resident = state.sessions.remove(id).is_some();
        self.tracker.forget(id).await;

        self.history
            .delete_history(id)
            .await
            .map_err(|e| SessionError::storage(id, "delete_history", e))?;
        let existed = self
            .metadata
            .delete_metadata(id)
            .await
            .map_err(|e| SessionError::storage(id, "delete_metadata", e))?;

        if !existed && !was_resident {
            return Err(SessionError::NotFound(id.to_string()));
        }

        info!(session_id = %id, "Session deleted");
        Ok(())
    }

    /// Clear a session's conversation history.
    pub async fn reset_session(&self, id: &str) -> Result<(), SessionError> {
        let context = self.get_session(id).await?;
        context.reset_conversation().await.map_err(SessionError::from)
    }

    /// Change the model profile for new sessions and every resident one.
    pub async fn switch_model(&self, profile: ModelProfile) -> Result<(), SessionError> {
        *self.profile.write().await = profile.clone();

        let state = self.state.lock().await;
        for (id, resident) in &state.sessions {
            resident.context.apply_profile(profile.clone()).await;
            let model = profile.model.clone();
            self.tracker
                .update(id, move |m| m.model = model)
                .await
                .map_err(|e| SessionError::storage(id, "save_metadata", e))?;
        }

        info!(
            model = profile.model.as_deref().unwrap_or("unnamed"),
            resident = state.sessions.len(),
            "Model profile switched"
        );
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Most recently active persisted session, if any.
    pub async fn default_session_id(&self) -> Result<Option<SessionId>, SessionError> {
        Ok(self.list_sessions().await?.into_iter().next().map(|m| m.id))
    }

    /// Persisted sessions, most recently active first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>, SessionError> {
        self.metadata
            .list_metadata()
            .await
            .map_err(|e| SessionError::storage("*", "list_metadata", e))
    }

    pub async fn current_session_id(&self) -> Option<SessionId> {
        self.state.lock().await.current.clone()
    }

    /// Ids of the sessions held in memory, sorted.
    pub async fn resident_session_ids(&self) -> Vec<SessionId> {
        let state = self.state.lock().await;
        let mut ids: Vec<SessionId> = state.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn stats(&self) -> SessionStats {
        let state = self.state.lock().await;
        SessionStats {
            resident: state.sessions.len(),
            max_sessions: self.config.max_sessions,
            current: state.current.clone(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn build_context(&self, id: &str, profile: ModelProfile) -> ContextManager {
        ContextManager::builder(id, self.history.clone(), profile)
            .prompt_builder(self.prompt_builder.clone())
            .compression(self.compression.clone())
            .observer(self.tracker.clone())
            .build()
    }

    /// Load a persisted session into memory.
    ///
    /// The stored message count is reconciled with the actual history length.
    async fn rehydrate(
        &self,
        state: &mut ResidentState,
        id: &str,
        protected: Option<&str>,
    ) -> Result<Arc<ContextManager>, SessionError> {
        let mut metadata = self
            .metadata
            .get_metadata(id)
            .await
            .map_err(|e| SessionError::storage(id, "get_metadata", e))?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        let stored = self
            .history
            .message_count(id)
            .await
            .map_err(|e| SessionError::storage(id, "get_history", e))? as u64;
        if stored != metadata.message_count {
            warn!(
                session_id = %id,
                recorded = metadata.message_count,
                stored,
                "Message count out of step with history, repairing"
            );
            metadata.message_count = stored;
            self.metadata
                .save_metadata(&metadata)
                .await
                .map_err(|e| SessionError::storage(id, "save_metadata", e))?;
        }

        self.make_room(state, protected).await?;

        let profile = self.profile.read().await.clone();
        let resident = ResidentSession::new(self.build_context(id, profile));
        let context = resident.context.clone();
        state.sessions.insert(id.to_string(), resident);
        self.tracker.record(&metadata).await;

        debug!(session_id = %id, messages = stored, "Session rehydrated");
        Ok(context)
    }

    /// Evict one session if admitting another would exceed the cap.
    async fn make_room(&self, state: &mut ResidentState, protected: Option<&str>) -> Result<(), SessionError> {
        if state.sessions.len() < self.config.max_sessions {
            return Ok(());
        }

        let mut candidate: Option<(SessionId, Option<DateTime<Utc>>)> = None;
        for (id, resident) in &state.sessions {
            if Some(id.as_str()) == protected || state.current.as_deref() == Some(id.as_str()) || resident.in_flight() {
                continue;
            }
            let activity = self.tracker.last_activity(id).await;
            let older = match &candidate {
                None => true,
                Some((_, best)) => activity < *best,
            };
            if older {
                candidate = Some((id.clone(), activity));
            }
        }

        let Some((evicted, _)) = candidate else {
            warn!(max = self.config.max_sessions, "No resident session can be evicted");
            return Err(SessionError::MaxSessionsExceeded {
                max: self.config.max_sessions,
            });
        };

        state.sessions.remove(&evicted);
        self.evictions.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_eviction();

        info!(session_id = %evicted, "Evicted least recently active session");
        Ok(())
    }
}
