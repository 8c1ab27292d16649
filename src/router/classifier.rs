//! Closed-label classifier router

use super::{Invocation, Router, RouterTurn};
use crate::conversation::{ConversationState, Role};
use crate::error::TurnError;
use crate::llm::{LlmRequest, LlmService};
use crate::responders::ResponderRegistry;
use crate::system_prompt::{classifier_prompt, FINISH_LABEL};
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;

/// Labels are short; anything longer is not an answer.
const MAX_LABEL_TOKENS: u32 = 16;

pub struct ClassifierRouter {
    llm: Arc<dyn LlmService>,
}

impl ClassifierRouter {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    fn build_request(state: &ConversationState, registry: &ResponderRegistry, latest: &str) -> LlmRequest {
        let descriptors = registry.descriptors();
        let system = classifier_prompt(
            descriptors
                .iter()
                .map(|d| (d.name.as_str(), d.description.as_str())),
        );

        let mut user = String::from("Conversation so far:\n");
        for message in state.messages().iter().filter(|m| m.is_visible()) {
            if message.content.is_empty() {
                continue;
            }
            match (&message.role, &message.origin) {
                (Role::Assistant, Some(origin)) => {
                    let _ = writeln!(user, "assistant ({origin}): {}", message.content);
                }
                (role, _) => {
                    let _ = writeln!(user, "{}: {}", role.as_str(), message.content);
                }
            }
        }
        let _ = write!(
            user,
            "\nPlease decide which option should handle this query next: {latest}"
        );

        LlmRequest::prompt(system, user).with_max_tokens(MAX_LABEL_TOKENS)
    }
}

/// Trim, drop surrounding quotes or backticks and trailing punctuation,
/// then lowercase.
pub fn normalize_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'))
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ',' | ';' | ':'))
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'))
        .trim()
        .to_lowercase()
}

#[async_trait]
impl Router for ClassifierRouter {
    async fn route(
        &self,
        state: &ConversationState,
        registry: &ResponderRegistry,
    ) -> Result<RouterTurn, TurnError> {
        let latest = state.last_user_text().ok_or(TurnError::EmptyState)?;
        let request = Self::build_request(state, registry, latest);
        let response = self.llm.complete(&request).await?;

        let raw = response.text();
        let label = normalize_label(&raw);
        if label == FINISH_LABEL.to_lowercase() {
            tracing::debug!(label = %label, "Classifier finished");
            return Ok(RouterTurn::finish());
        }

        let responder = registry
            .names()
            .into_iter()
            .find(|name| name.to_lowercase() == label)
            .ok_or_else(|| {
                TurnError::InvalidRoutingDecision(format!("classifier returned {raw:?}"))
            })?;

        tracing::debug!(responder = %responder, "Classifier picked responder");
        Ok(RouterTurn::invoke(vec![Invocation::new(responder, latest)]))
    }
}
