//! Runtime for answering queries
//!
//! The [`Orchestrator`] loads a session, drives the turn state machine and
//! performs its effects against the router, the responders and the store.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{EngineSettings, Orchestrator};
pub use traits::*;

use crate::router::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Orchestrator over type-erased seams, as built in `main` and served by the API
pub type ProductionOrchestrator = Orchestrator<Arc<dyn SessionStore>, Arc<dyn Router>>;

/// How many previous interactions are carried into an enriched query
const RECENT_INTERACTIONS: usize = 3;

/// Optional caller context appended to a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_preferences: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_interactions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_context: Option<Value>,
}

impl QueryContext {
    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(prefs) = present(self.user_preferences.as_ref()) {
            lines.push(format!("User preferences: {}", render_value(prefs)));
        }
        if let Some(history) = present(self.previous_interactions.as_ref()) {
            let rendered = match history {
                Value::Array(items) => {
                    let start = items.len().saturating_sub(RECENT_INTERACTIONS);
                    items
                        .iter()
                        .skip(start)
                        .map(render_value)
                        .collect::<Vec<_>>()
                        .join(" | ")
                }
                other => render_value(other),
            };
            lines.push(format!("Recent interaction history: {rendered}"));
        }
        if let Some(custom) = present(self.custom_context.as_ref()) {
            lines.push(format!("Additional context: {}", render_value(custom)));
        }
        lines
    }

    /// The query with a `Context:` block, or the query unchanged when there
    /// is nothing to add
    pub fn enrich(&self, query: &str) -> String {
        let lines = self.lines();
        if lines.is_empty() {
            return query.to_string();
        }
        format!("{query}\n\nContext:\n{}", lines.join("\n"))
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Bookkeeping returned with every answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnMetadata {
    pub session_id: String,
    /// User messages in the visible history, this turn included
    pub turn_number: usize,
    /// Visible history length after the turn
    pub total_messages: usize,
    /// Router calls made for this turn
    pub iterations: u32,
}

/// Result of a successful query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryOutcome {
    pub final_answer: String,
    /// Responders that produced output, first use order
    pub used_responders: Vec<String>,
    pub metadata: TurnMetadata,
}
