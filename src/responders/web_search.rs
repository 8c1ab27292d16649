//! Web search responder: search, then answer from the results

use super::{answer_text, Responder, ResponderContext, ResponderError};
use crate::conversation::Message;
use crate::llm::{LlmRequest, LlmService};
use crate::search::WebSearch;
use crate::system_prompt::{grounded_answer_prompt, SYSTEM_PREAMBLE, WEB_SEARCH_DESCRIPTION};
use async_trait::async_trait;
use std::sync::Arc;

pub struct WebSearchResponder {
    search: Arc<dyn WebSearch>,
    llm: Arc<dyn LlmService>,
}

impl WebSearchResponder {
    pub fn new(search: Arc<dyn WebSearch>, llm: Arc<dyn LlmService>) -> Self {
        Self { search, llm }
    }
}

#[async_trait]
impl Responder for WebSearchResponder {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> String {
        WEB_SEARCH_DESCRIPTION.to_string()
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError> {
        let results = self.search.search(&ctx.query).await?;
        let request = LlmRequest::prompt(
            SYSTEM_PREAMBLE,
            grounded_answer_prompt(&ctx.query, "Search", &results),
        );
        let response = self.llm.complete(&request).await?;
        Ok(Message::assistant(answer_text(&response)?))
    }
}
