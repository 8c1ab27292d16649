//! Errors that end a turn

use crate::llm::{LlmError, LlmErrorKind};
use serde::Serialize;
use thiserror::Error;

const TIMED_OUT: &str = "timed out after";

/// Why a request failed. History is never written when one of these is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("oracle call failed ({kind:?}): {message}")]
    OracleCall { kind: LlmErrorKind, message: String },

    #[error("invalid routing decision: {0}")]
    InvalidRoutingDecision(String),

    #[error("unknown responder: {0}")]
    UnknownResponderReference(String),

    #[error("routing did not finish within {limit} iterations")]
    MaxIterationsExceeded { limit: u32 },

    #[error("responder {responder} failed: {message}")]
    ResponderInvocation { responder: String, message: String },

    #[error("conversation state is empty")]
    EmptyState,

    #[error("session store error: {0}")]
    Store(String),

    /// The engine fed the state machine an event it cannot take
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Stable machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnErrorKind {
    OracleCall,
    InvalidRoutingDecision,
    UnknownResponderReference,
    MaxIterationsExceeded,
    ResponderInvocation,
    EmptyState,
    Store,
    Internal,
}

impl TurnError {
    pub fn kind(&self) -> TurnErrorKind {
        match self {
            TurnError::OracleCall { .. } => TurnErrorKind::OracleCall,
            TurnError::InvalidRoutingDecision(_) => TurnErrorKind::InvalidRoutingDecision,
            TurnError::UnknownResponderReference(_) => TurnErrorKind::UnknownResponderReference,
            TurnError::MaxIterationsExceeded { .. } => TurnErrorKind::MaxIterationsExceeded,
            TurnError::ResponderInvocation { .. } => TurnErrorKind::ResponderInvocation,
            TurnError::EmptyState => TurnErrorKind::EmptyState,
            TurnError::Store(_) => TurnErrorKind::Store,
            TurnError::Internal(_) => TurnErrorKind::Internal,
        }
    }

    /// An oracle call that did not answer in time
    pub fn oracle_timeout(operation: &str, after: std::time::Duration) -> Self {
        TurnError::OracleCall {
            kind: LlmErrorKind::Network,
            message: format!("{operation} {TIMED_OUT} {after:?}"),
        }
    }

    pub fn responder_timeout(responder: &str, after: std::time::Duration) -> Self {
        TurnError::ResponderInvocation {
            responder: responder.to_string(),
            message: format!("{TIMED_OUT} {after:?}"),
        }
    }

    /// Whether a call ran past its deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            TurnError::OracleCall {
                kind: LlmErrorKind::Network,
                message,
            }
            | TurnError::ResponderInvocation { message, .. } => message.contains(TIMED_OUT),
            _ => false,
        }
    }

    /// Whether retrying the same request might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TurnError::OracleCall { kind, .. } => kind.is_retryable(),
            TurnError::ResponderInvocation { .. } | TurnError::Store(_) => true,
            _ => false,
        }
    }
}

impl From<LlmError> for TurnError {
    fn from(e: LlmError) -> Self {
        TurnError::OracleCall {
            kind: e.kind,
            message: e.message,
        }
    }
}
