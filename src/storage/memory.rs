// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::session::SessionMetadata;
use crate::types::Message;

use super::{HistoryStore, MetadataStore};

/// Store backed by in-process maps. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    histories: RwLock<HashMap<String, Vec<Message>>>,
    metadata: RwLock<HashMap<String, SessionMetadata>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn get_history(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        let histories = self.histories.read().await;
        Ok(histories.get(session_id).cloned().unwrap_or_default())
    }

    async fn save_message(&self, session_id: &str, message: &Message) -> Result<(), StorageError> {
        let mut histories = self.histories.write().await;
        histories
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn clear_history(&self, session_id: &str) -> Result<(), StorageError> {
        let mut histories = self.histories.write().await;
        if let Some(history) = histories.get_mut(session_id) {
            history.clear();
        }
        Ok(())
    }

    async fn delete_history(&self, session_id: &str) -> Result<(), StorageError> {
        self.histories.write().await.remove(session_id);
        Ok(())
    }

    async fn message_count(&self, session_id: &str) -> Result<usize, StorageError> {
        let histories = self.histories.read().await;
        Ok(histories.get(session_id).map_or(0, Vec::len))
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn save_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError> {
        self.metadata
            .write()
            .await
            .insert(metadata.id.clone(), metadata.clone());
        Ok(())
    }

    async fn get_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        Ok(self.metadata.read().await.get(session_id).cloned())
    }

    async fn delete_metadata(&self, session_id: &str) -> Result<bool, StorageError> {
        Ok(self.metadata.write().await.remove(session_id).is_some())
    }

    async fn list_metadata(&self) -> Result<Vec<SessionMetadata>, StorageError> {
        let mut sessions: Vec<SessionMetadata> = self.metadata.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }
}
