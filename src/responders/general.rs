//! General responder: answers from the whole conversation

use super::{answer_text, Responder, ResponderContext, ResponderError};
use crate::conversation::{plain_transcript, Message};
use crate::llm::{ContentBlock, LlmMessage, LlmRequest, LlmService, MessageRole, SystemContent};
use crate::system_prompt::{GENERAL_DESCRIPTION, SYSTEM_PREAMBLE};
use async_trait::async_trait;
use std::sync::Arc;

pub struct GeneralResponder {
    llm: Arc<dyn LlmService>,
}

impl GeneralResponder {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    fn build_request(ctx: &ResponderContext) -> LlmRequest {
        let (mut system, mut messages) = plain_transcript(ctx.state.messages());
        if system.is_empty() {
            system.push(SystemContent::new(SYSTEM_PREAMBLE));
        }

        // A router may rephrase the request; make sure the oracle sees it last.
        let asked = ctx.query.trim();
        if !asked.is_empty() && ctx.state.last_user_text().map(str::trim) != Some(asked) {
            match messages.last_mut() {
                Some(last) if last.role == MessageRole::User => {
                    last.content.push(ContentBlock::text(asked));
                }
                _ => messages.push(LlmMessage::user_text(asked)),
            }
        }

        LlmRequest {
            system,
            messages,
            tools: vec![],
            max_tokens: None,
        }
    }
}

#[async_trait]
impl Responder for GeneralResponder {
    fn name(&self) -> &'static str {
        "general"
    }

    fn description(&self) -> String {
        GENERAL_DESCRIPTION.to_string()
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError> {
        let request = Self::build_request(&ctx);
        let response = self.llm.complete(&request).await?;
        Ok(Message::assistant(answer_text(&response)?))
    }
}
