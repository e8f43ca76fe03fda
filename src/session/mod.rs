// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session lifecycle for many concurrent conversations.
//!
//! - **Types**: SessionMetadata, SessionConfig, SessionStats
//! - **Manager**: create, load, evict, delete and list sessions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SessionManager                          │
//! │   (create, load, delete, list; resident cap + eviction)     │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//! ┌─────────────────┐ ┌──────────────┐ ┌─────────────────┐
//! │ ContextManager  │ │ HistoryStore │ │  MetadataStore  │
//! │  (per session)  │ │  (messages)  │ │   (sessions)    │
//! └─────────────────┘ └──────────────┘ └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy::session::SessionManager;
//!
//! let sessions = SessionManager::in_memory(profile);
//! let created = sessions.create_session(None).await?;
//! sessions.load_session(&created.id).await?;
//!
//! let turn = sessions.begin_turn(&created.id).await?;
//! turn.add_user_message("Hello!", Vec::new()).await?;
//! ```

mod manager;
pub mod types;

pub use manager::{SessionManager, TurnGuard};
pub use types::{activity_now, SessionConfig, SessionId, SessionMetadata, SessionStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let config = SessionConfig::default();
        assert!(config.max_sessions > 0);
        let _metadata = SessionMetadata::new("exported");
    }
}
