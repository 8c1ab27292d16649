//! Knowledge-base responder: retrieve passages, then answer from them

use super::{answer_text, Responder, ResponderContext, ResponderError};
use crate::conversation::Message;
use crate::llm::{LlmRequest, LlmService};
use crate::search::{KnowledgeBase, Passage};
use crate::system_prompt::{grounded_answer_prompt, KNOWLEDGE_BASE_DESCRIPTION, SYSTEM_PREAMBLE};
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;

pub const DEFAULT_TOP_K: usize = 5;

pub struct KnowledgeBaseResponder {
    knowledge_base: Arc<dyn KnowledgeBase>,
    top_k: usize,
    llm: Arc<dyn LlmService>,
}

impl KnowledgeBaseResponder {
    pub fn new(knowledge_base: Arc<dyn KnowledgeBase>, top_k: usize, llm: Arc<dyn LlmService>) -> Self {
        Self {
            knowledge_base,
            top_k: top_k.max(1),
            llm,
        }
    }
}

#[async_trait]
impl Responder for KnowledgeBaseResponder {
    fn name(&self) -> &'static str {
        "knowledge_base"
    }

    fn description(&self) -> String {
        KNOWLEDGE_BASE_DESCRIPTION.to_string()
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError> {
        let passages = self.knowledge_base.search(&ctx.query, self.top_k).await?;
        tracing::debug!(
            invocation_id = %ctx.invocation_id,
            passages = passages.len(),
            "Knowledge base passages retrieved"
        );
        let request = LlmRequest::prompt(
            SYSTEM_PREAMBLE,
            grounded_answer_prompt(&ctx.query, "Knowledge base", &render(&passages)),
        );
        let response = self.llm.complete(&request).await?;
        Ok(Message::assistant(answer_text(&response)?))
    }
}

fn render(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return "No matching documents were found.".to_string();
    }
    let mut out = String::new();
    for (i, passage) in passages.iter().enumerate() {
        let _ = writeln!(out, "[{}] (score {:.3}) {}", i + 1, passage.score, passage.text.trim());
    }
    out
}
