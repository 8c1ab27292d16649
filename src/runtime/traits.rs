//! Storage seam for the orchestrator
//!
//! The orchestrator only sees [`SessionStore`], so tests run against an
//! in-memory store and production against SQLite.

use crate::conversation::Message;
use crate::db::Database;
use async_trait::async_trait;
use std::sync::Arc;

/// Ordered message history per session
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Full history; an unknown session is empty, not an error
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, String>;

    /// Append all messages of one request in a single write
    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), String>;

    /// Drop the session's history. Returns whether anything was stored.
    async fn clear(&self, session_id: &str) -> Result<bool, String>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, String> {
        (**self).load(session_id).await
    }

    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), String> {
        (**self).append(session_id, messages).await
    }

    async fn clear(&self, session_id: &str) -> Result<bool, String> {
        (**self).clear(session_id).await
    }
}

// ============================================================================
// Database adapter
// ============================================================================

/// Adapter wrapping Database for the `SessionStore` trait
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[allow(dead_code)] // Useful for tests
    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SessionStore for DatabaseStorage {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, String> {
        self.db.get_messages(session_id).map_err(|e| e.to_string())
    }

    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), String> {
        self.db
            .append_messages(session_id, messages)
            .map_err(|e| e.to_string())
    }

    async fn clear(&self, session_id: &str) -> Result<bool, String> {
        self.db.delete_session(session_id).map_err(|e| e.to_string())
    }
}
