//! Session history persistence
//!
//! Each session is an ordered list of messages. Appends for one request go
//! in a single transaction so a session never holds half a turn.

mod schema;

pub use schema::SCHEMA;

use crate::conversation::{Message, Role, ToolInvocation};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Stored message is corrupt: {0}")]
    Corrupt(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // A panic while holding the lock cannot leave a half-applied
    // transaction behind, so a poisoned connection is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append messages to a session, creating it if needed
    pub fn append_messages(&self, session_id: &str, messages: &[Message]) -> DbResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO sessions (id, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
            params![session_id, now],
        )?;

        let mut next_seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM session_messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO session_messages
                    (session_id, sequence_id, role, content, origin, tool_invocations, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for message in messages {
                let invocations = if message.tool_invocations.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::to_string(&message.tool_invocations)
                            .map_err(|e| DbError::Corrupt(e.to_string()))?,
                    )
                };
                stmt.execute(params![
                    session_id,
                    next_seq,
                    message.role.as_str(),
                    message.content,
                    message.origin,
                    invocations,
                    message.reply_to,
                    now,
                ])?;
                next_seq += 1;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Messages of a session in append order; unknown sessions are empty
    pub fn get_messages(&self, session_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT role, content, origin, tool_invocations, reply_to
             FROM session_messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, origin, invocations, reply_to) = row?;
            messages.push(parse_message(&role, content, origin, invocations.as_deref(), reply_to)?);
        }
        Ok(messages)
    }

    /// Remove a session and its messages. Returns whether it existed.
    pub fn delete_session(&self, session_id: &str) -> DbResult<bool> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM session_messages WHERE session_id = ?1",
            params![session_id],
        )?;
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(deleted > 0)
    }
}

fn parse_message(
    role: &str,
    content: String,
    origin: Option<String>,
    invocations: Option<&str>,
    reply_to: Option<String>,
) -> DbResult<Message> {
    let role = Role::parse(role).ok_or_else(|| DbError::Corrupt(format!("unknown role {role:?}")))?;
    let tool_invocations: Vec<ToolInvocation> = match invocations {
        Some(json) => serde_json::from_str(json).map_err(|e| DbError::Corrupt(e.to_string()))?,
        None => Vec::new(),
    };
    Ok(Message {
        role,
        content,
        origin,
        tool_invocations,
        reply_to,
    })
}
