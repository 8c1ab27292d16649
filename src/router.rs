//! Routing: deciding which responders run next, or whether to stop
//!
//! A router makes exactly one oracle call per decision and never retries.
//! Whatever the oracle says is parsed into a [`RoutingDecision`] here; the
//! engine only ever matches on the typed variant.

mod capability;
mod classifier;

pub use capability::CapabilityRouter;
pub use classifier::{normalize_label, ClassifierRouter};

use crate::conversation::{ConversationState, Message};
use crate::error::TurnError;
use crate::responders::ResponderRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// One responder call requested by a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: String,
    pub responder: String,
    pub query: String,
}

impl Invocation {
    pub fn new(responder: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            responder: responder.into(),
            query: query.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "invocations", rename_all = "snake_case")]
pub enum RoutingDecision {
    Finish,
    InvokeOne(Invocation),
    InvokeMany(Vec<Invocation>),
}

impl RoutingDecision {
    /// `Finish` for none, `InvokeOne` for one, `InvokeMany` otherwise
    pub fn from_invocations(mut invocations: Vec<Invocation>) -> Self {
        match invocations.len() {
            0 => RoutingDecision::Finish,
            1 => RoutingDecision::InvokeOne(invocations.remove(0)),
            _ => RoutingDecision::InvokeMany(invocations),
        }
    }

    pub fn invocations(&self) -> &[Invocation] {
        match self {
            RoutingDecision::Finish => &[],
            RoutingDecision::InvokeOne(invocation) => std::slice::from_ref(invocation),
            RoutingDecision::InvokeMany(invocations) => invocations,
        }
    }
}

/// A decision plus the router's own message, folded before dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct RouterTurn {
    pub decision: RoutingDecision,
    pub message: Option<Message>,
}

impl RouterTurn {
    pub fn finish() -> Self {
        Self {
            decision: RoutingDecision::Finish,
            message: None,
        }
    }

    pub fn finish_with(message: Message) -> Self {
        Self {
            decision: RoutingDecision::Finish,
            message: Some(message),
        }
    }

    pub fn invoke(invocations: Vec<Invocation>) -> Self {
        Self {
            decision: RoutingDecision::from_invocations(invocations),
            message: None,
        }
    }
}

#[async_trait]
pub trait Router: Send + Sync {
    async fn route(
        &self,
        state: &ConversationState,
        registry: &ResponderRegistry,
    ) -> Result<RouterTurn, TurnError>;
}

#[async_trait]
impl<T: Router + ?Sized> Router for Arc<T> {
    async fn route(
        &self,
        state: &ConversationState,
        registry: &ResponderRegistry,
    ) -> Result<RouterTurn, TurnError> {
        (**self).route(state, registry).await
    }
}

/// Which router implementation to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterStrategy {
    /// One label from a closed set per decision
    #[default]
    Classifier,
    /// Responders exposed as callable capabilities; allows fan-out
    Capabilities,
}

impl FromStr for RouterStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classifier" => Ok(RouterStrategy::Classifier),
            "capabilities" | "capability" => Ok(RouterStrategy::Capabilities),
            other => Err(format!("unknown router strategy: {other}")),
        }
    }
}
