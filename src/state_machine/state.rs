//! Turn state types

use crate::conversation::{ConversationState, Message};
use crate::error::TurnError;
use crate::router::Invocation;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

pub const DEFAULT_MAX_ITERATIONS: u32 = 6;

/// How the final answer is chosen once the router finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerPolicy {
    /// The last assistant message of the request
    #[default]
    Direct,
    /// Responder outputs are combined by the synthesis responder
    Synthesis,
}

impl FromStr for AnswerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(AnswerPolicy::Direct),
            "synthesis" => Ok(AnswerPolicy::Synthesis),
            other => Err(format!("unknown answer policy: {other}")),
        }
    }
}

/// Static inputs for one request
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session_id: String,
    pub max_iterations: u32,
    pub answer_policy: AnswerPolicy,
    /// Names the router may reference
    pub responders: HashSet<String>,
    /// Seeded into an empty history; empty means none
    pub system_preamble: String,
}

impl TurnContext {
    pub fn new<I, S>(session_id: impl Into<String>, responders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            session_id: session_id.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            answer_policy: AnswerPolicy::default(),
            responders: responders.into_iter().map(Into::into).collect(),
            system_preamble: String::new(),
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    #[must_use]
    pub fn with_answer_policy(mut self, policy: AnswerPolicy) -> Self {
        self.answer_policy = policy;
        self
    }

    #[must_use]
    pub fn with_system_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.system_preamble = preamble.into();
        self
    }
}

/// Where the turn is
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// History loaded, waiting for the user query
    Init,

    /// Waiting on the router; `iteration` counts router calls, from 1
    Routing { iteration: u32 },

    /// Responders running. `completed[i]` holds the output for `calls[i]`.
    Dispatching {
        iteration: u32,
        calls: Vec<Invocation>,
        completed: Vec<Option<Message>>,
    },

    /// Waiting on the synthesis responder
    Synthesizing,

    Terminated { answer: Message },

    Failed { error: TurnError },
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Routing { .. } => "routing",
            Phase::Dispatching { .. } => "dispatching",
            Phase::Synthesizing => "synthesizing",
            Phase::Terminated { .. } => "terminated",
            Phase::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminated { .. } | Phase::Failed { .. })
    }
}

/// Complete engine state for one request
#[derive(Debug, Clone, PartialEq)]
pub struct TurnState {
    pub phase: Phase,
    pub conversation: ConversationState,
    /// Responders that produced output, first occurrence order, no repeats
    pub used: Vec<String>,
    /// Length of the history loaded from the store
    pub seed_len: usize,
}

impl TurnState {
    pub fn new(history: Vec<Message>) -> Self {
        let seed_len = history.len();
        Self {
            phase: Phase::Init,
            conversation: ConversationState::new(history),
            used: Vec::new(),
            seed_len,
        }
    }

    /// Messages appended during this request
    pub fn appended(&self) -> &[Message] {
        self.conversation.messages_since(self.seed_len)
    }

    /// Number of router calls made so far
    pub fn iterations(&self) -> u32 {
        match &self.phase {
            Phase::Routing { iteration } | Phase::Dispatching { iteration, .. } => *iteration,
            _ => 0,
        }
    }
}
