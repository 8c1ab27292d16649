//! Combines responder outputs into a single answer. Never routable.

use super::{answer_text, Responder, ResponderContext, ResponderError};
use crate::conversation::{Message, Role};
use crate::llm::{LlmRequest, LlmService};
use crate::system_prompt::SYNTHESIS_PROMPT;
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;

pub struct SynthesisResponder {
    llm: Arc<dyn LlmService>,
}

impl SynthesisResponder {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    /// `ctx.state` holds the responder outputs to combine, in production order.
    fn build_prompt(ctx: &ResponderContext) -> Result<String, ResponderError> {
        let mut prompt = format!("User request: {}\n\nResponder answers:\n", ctx.query);
        let mut count = 0;
        for message in ctx.state.messages() {
            if message.role != Role::Assistant {
                continue;
            }
            let origin = message.origin.as_deref().unwrap_or("assistant");
            let _ = writeln!(prompt, "\n### {origin}\n{}", message.content.trim());
            count += 1;
        }
        if count == 0 {
            return Err(ResponderError::InvalidInput(
                "nothing to synthesize".to_string(),
            ));
        }
        Ok(prompt)
    }
}

#[async_trait]
impl Responder for SynthesisResponder {
    fn name(&self) -> &'static str {
        "synthesis"
    }

    fn description(&self) -> String {
        "Combines multiple responder answers into one response".to_string()
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError> {
        let prompt = Self::build_prompt(&ctx)?;
        let response = self
            .llm
            .complete(&LlmRequest::prompt(SYNTHESIS_PROMPT, prompt))
            .await?;
        Ok(Message::assistant(answer_text(&response)?))
    }
}
