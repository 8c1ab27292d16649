//! Responders: the named capabilities the router can invoke
//!
//! Responders are stateless. Everything a call needs arrives in its
//! [`ResponderContext`].

mod advisor;
mod general;
mod knowledge_base;
mod synthesis;
mod web_search;

pub use advisor::AdvisorResponder;
pub use general::GeneralResponder;
pub use knowledge_base::{KnowledgeBaseResponder, DEFAULT_TOP_K};
pub use synthesis::SynthesisResponder;
pub use web_search::WebSearchResponder;

use crate::conversation::{ConversationState, Message};
use crate::llm::{LlmError, LlmService, ToolDefinition};
use crate::search::{KnowledgeBase, SearchError, WebSearch};
use crate::system_prompt::ADVISORS;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Per-call input to a responder
#[derive(Debug, Clone)]
pub struct ResponderContext {
    /// Conversation as of the decision that invoked this responder
    pub state: Arc<ConversationState>,
    pub query: String,
    pub invocation_id: String,
}

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("oracle: {0}")]
    Oracle(#[from] LlmError),
    #[error("search: {0}")]
    Search(#[from] SearchError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Input accepted by every routable responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryInput {
    pub query: String,
}

pub fn query_schema() -> Value {
    json!({
        "type": "object",
        "required": ["query"],
        "properties": {
            "query": {
                "type": "string",
                "description": "Self-contained request for this responder"
            }
        }
    })
}

#[async_trait]
pub trait Responder: Send + Sync {
    fn name(&self) -> &str;

    /// Shown to the router when it picks responders
    fn description(&self) -> String;

    fn input_schema(&self) -> Value {
        query_schema()
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError>;
}

#[async_trait]
impl<T: Responder + ?Sized> Responder for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn description(&self) -> String {
        (**self).description()
    }

    fn input_schema(&self) -> Value {
        (**self).input_schema()
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError> {
        (**self).invoke(ctx).await
    }
}

/// Public description of a registered responder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponderDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("responder name registered twice: {0}")]
    DuplicateName(String),
    #[error("responder name must not be empty")]
    EmptyName,
}

/// Fixed set of responders, in registration order
pub struct ResponderRegistry {
    responders: Vec<Arc<dyn Responder>>,
}

impl ResponderRegistry {
    pub fn builder() -> ResponderRegistryBuilder {
        ResponderRegistryBuilder::default()
    }

    /// The production set: general and advisors always, retrieval responders
    /// when their backends are configured.
    pub fn standard(
        llm: Arc<dyn LlmService>,
        web: Option<Arc<dyn WebSearch>>,
        knowledge_base: Option<(Arc<dyn KnowledgeBase>, usize)>,
    ) -> Result<Self, RegistryError> {
        let mut builder = Self::builder();
        if let Some(web) = web {
            builder = builder.register(Arc::new(WebSearchResponder::new(web, llm.clone())));
        }
        if let Some((kb, top_k)) = knowledge_base {
            builder = builder.register(Arc::new(KnowledgeBaseResponder::new(kb, top_k, llm.clone())));
        }
        builder = builder.register(Arc::new(GeneralResponder::new(llm.clone())));
        for persona in ADVISORS {
            builder = builder.register(Arc::new(AdvisorResponder::new(*persona, llm.clone())));
        }
        builder.build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Responder>> {
        self.responders.iter().find(|r| r.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.responders.iter().map(|r| r.name()).collect()
    }

    pub fn descriptors(&self) -> Vec<ResponderDescriptor> {
        self.responders
            .iter()
            .map(|r| ResponderDescriptor {
                name: r.name().to_string(),
                description: r.description(),
                input_schema: r.input_schema(),
            })
            .collect()
    }

    /// Capability list for the oracle
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.responders
            .iter()
            .map(|r| ToolDefinition {
                name: r.name().to_string(),
                description: r.description(),
                input_schema: r.input_schema(),
            })
            .collect()
    }
}

#[derive(Default)]
pub struct ResponderRegistryBuilder {
    responders: Vec<Arc<dyn Responder>>,
}

impl ResponderRegistryBuilder {
    #[must_use]
    pub fn register(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responders.push(responder);
        self
    }

    pub fn build(self) -> Result<ResponderRegistry, RegistryError> {
        let mut seen = HashSet::new();
        for responder in &self.responders {
            let name = responder.name();
            if name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if !seen.insert(name.to_string()) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
        }
        Ok(ResponderRegistry {
            responders: self.responders,
        })
    }
}

/// Text of the oracle's reply, rejecting empty answers
fn answer_text(response: &crate::llm::LlmResponse) -> Result<String, ResponderError> {
    let text = response.text();
    if text.trim().is_empty() {
        return Err(ResponderError::Oracle(LlmError::malformed_response(
            "oracle returned an empty answer",
        )));
    }
    Ok(text)
}
