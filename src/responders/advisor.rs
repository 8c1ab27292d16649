//! Role-specific advisory responders

use super::{answer_text, Responder, ResponderContext, ResponderError};
use crate::conversation::Message;
use crate::llm::{LlmRequest, LlmService};
use crate::system_prompt::Persona;
use async_trait::async_trait;
use std::sync::Arc;

/// Answers the query in character; sees only the query, not the history.
pub struct AdvisorResponder {
    persona: Persona,
    llm: Arc<dyn LlmService>,
}

impl AdvisorResponder {
    pub fn new(persona: Persona, llm: Arc<dyn LlmService>) -> Self {
        Self { persona, llm }
    }
}

#[async_trait]
impl Responder for AdvisorResponder {
    fn name(&self) -> &str {
        self.persona.name
    }

    fn description(&self) -> String {
        self.persona.description.to_string()
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError> {
        if ctx.query.trim().is_empty() {
            return Err(ResponderError::InvalidInput("query is empty".into()));
        }
        let request = LlmRequest::prompt(self.persona.prompt, ctx.query.as_str());
        let response = self.llm.complete(&request).await?;
        Ok(Message::assistant(answer_text(&response)?))
    }
}
