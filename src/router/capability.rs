//! Capability router: responders are offered to the oracle as functions

use super::{Invocation, Router, RouterTurn, RoutingDecision};
use crate::conversation::{to_llm_messages, ConversationState, Message, ToolInvocation};
use crate::error::TurnError;
use crate::llm::{LlmRequest, LlmService, SystemContent};
use crate::responders::{QueryInput, ResponderRegistry};
use crate::system_prompt::COORDINATOR_PROMPT;
use async_trait::async_trait;
use std::sync::Arc;

pub struct CapabilityRouter {
    llm: Arc<dyn LlmService>,
}

impl CapabilityRouter {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    fn build_request(state: &ConversationState, registry: &ResponderRegistry) -> LlmRequest {
        let (history_system, messages) = to_llm_messages(state.messages());
        let mut system = vec![SystemContent::new(COORDINATOR_PROMPT)];
        system.extend(history_system);
        LlmRequest {
            system,
            messages,
            tools: registry.definitions(),
            max_tokens: None,
        }
    }
}

/// Arguments must be an object carrying a string `query`.
fn parse_query(name: &str, arguments: &serde_json::Value) -> Result<String, TurnError> {
    serde_json::from_value::<QueryInput>(arguments.clone())
        .map(|input| input.query)
        .map_err(|e| {
            TurnError::InvalidRoutingDecision(format!(
                "arguments for {name} are not {{\"query\": string}}: {e}"
            ))
        })
}

#[async_trait]
impl Router for CapabilityRouter {
    async fn route(
        &self,
        state: &ConversationState,
        registry: &ResponderRegistry,
    ) -> Result<RouterTurn, TurnError> {
        // Nothing to route on without a message
        state.last_message()?;
        let request = Self::build_request(state, registry);
        let response = self.llm.complete(&request).await?;

        let mut invocations = Vec::new();
        let mut requested = Vec::new();
        for (id, name, arguments) in response.tool_uses() {
            let query = parse_query(name, arguments)?;
            let id = if id.is_empty() {
                uuid::Uuid::new_v4().to_string()
            } else {
                id.to_string()
            };
            requested.push(ToolInvocation {
                id: id.clone(),
                name: name.to_string(),
                arguments: arguments.clone(),
            });
            invocations.push(Invocation {
                id,
                responder: name.to_string(),
                query,
            });
        }

        let text = response.text();
        if invocations.is_empty() {
            tracing::debug!("Capability router answered directly");
            return Ok(if text.trim().is_empty() {
                RouterTurn::finish()
            } else {
                RouterTurn::finish_with(Message::assistant(text))
            });
        }

        let message = Some(Message::assistant(text).with_tool_invocations(requested));
        let decision = RoutingDecision::from_invocations(invocations);
        tracing::debug!(
            invocations = decision.invocations().len(),
            "Capability router decided"
        );
        Ok(RouterTurn { decision, message })
    }
}
