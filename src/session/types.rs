// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session types for lifecycle management.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Session identifier.
pub type SessionId = String;

/// Last timestamp handed out by [`activity_now`], in microseconds.
static LAST_ACTIVITY_MICROS: AtomicI64 = AtomicI64::new(0);

/// Current time, strictly increasing across the process at microsecond resolution.
///
/// Least-recently-active ordering relies on activity timestamps never tying.
pub fn activity_now() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_ACTIVITY_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_ACTIVITY_MICROS.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return micros_to_datetime(next),
            Err(observed) => last = observed,
        }
    }
}

/// Convert epoch microseconds back into a timestamp.
pub(crate) fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros).single().unwrap_or_default()
}

/// Persisted description of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Unique session identifier.
    pub id: SessionId,
    /// Optional user-facing title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Model the session was last configured for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Messages appended since creation or the last reset.
    pub message_count: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last append, reset, or load.
    pub last_activity: DateTime<Utc>,
}

impl SessionMetadata {
    /// Create metadata for a brand new session.
    pub fn new(id: impl Into<SessionId>) -> Self {
        let now = activity_now();
        Self {
            id: id.into(),
            title: None,
            model: None,
            message_count: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Generate a unique session ID based on timestamp and UUID.
    pub fn generate_id() -> SessionId {
        let now = Utc::now();
        let short_uuid = &uuid::Uuid::new_v4().to_string()[..8];
        format!("session-{}-{}", now.format("%Y-%m-%d-%H-%M-%S"), short_uuid)
    }

    /// Update the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = activity_now();
    }

    /// Record a successful append.
    pub fn record_message(&mut self) {
        self.message_count += 1;
        self.touch();
    }

    /// Record a conversation reset. `created_at` is kept.
    pub fn record_reset(&mut self) {
        self.message_count = 0;
        self.touch();
    }
}

/// Configuration for session management.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Maximum sessions whose context managers stay in memory.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_sessions: 16 }
    }
}

/// Snapshot of the lifecycle manager's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions currently held in memory.
    pub resident: usize,
    /// Resident cap.
    pub max_sessions: usize,
    /// Current session, if any.
    pub current: Option<SessionId>,
    /// Sessions unloaded to make room since startup.
    pub evictions: u64,
}
