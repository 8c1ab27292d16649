//! API request and response types

use crate::conversation::Message;
use crate::responders::ResponderDescriptor;
use crate::runtime::{QueryContext, QueryOutcome, TurnMetadata};
use serde::{Deserialize, Serialize};

/// Request to answer a query
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Option<QueryContext>,
}

/// Query string for history lookups
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub session_id: Option<String>,
}

/// Request to clear a session
#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub session_id: Option<String>,
}

/// `{status: "success", data}` envelope
#[derive(Debug, Serialize)]
pub struct Success<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> Success<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "success",
            data,
        }
    }
}

/// Answer to a chat request
#[derive(Debug, Serialize)]
pub struct ChatData {
    pub response: String,
    pub used_responders: Vec<String>,
    pub metadata: TurnMetadata,
}

impl From<QueryOutcome> for ChatData {
    fn from(outcome: QueryOutcome) -> Self {
        Self {
            response: outcome.final_answer,
            used_responders: outcome.used_responders,
            metadata: outcome.metadata,
        }
    }
}

/// One visible message of a session
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl From<Message> for HistoryEntry {
    fn from(message: Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content,
            origin: message.origin,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryData {
    pub session_id: String,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RespondersData {
    pub responders: Vec<ResponderDescriptor>,
}

/// Generic error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, kind: Option<String>) -> Self {
        Self {
            error: error.into(),
            status: "error",
            kind,
        }
    }
}
