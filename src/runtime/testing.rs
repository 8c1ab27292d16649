//! Mock implementations for testing
//!
//! These mocks enable engine and responder tests without real I/O.

use super::executor::{EngineSettings, Orchestrator};
use super::traits::SessionStore;
use crate::conversation::{ConversationState, Message};
use crate::error::TurnError;
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::responders::{Responder, ResponderContext, ResponderError, ResponderRegistry};
use crate::router::{Invocation, Router, RouterTurn};
use crate::search::{KnowledgeBase, Passage, SearchError, WebSearch};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Mock LLM service that returns queued responses
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

#[allow(dead_code)]
impl MockLlmService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Responders
// ============================================================================

/// Responder that always answers with the same text
pub struct StaticResponder {
    name: String,
    answer: String,
    queries: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl StaticResponder {
    pub fn new(name: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            answer: answer.into(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for StaticResponder {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Static test responder {}", self.name)
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError> {
        self.queries.lock().unwrap().push(ctx.query);
        Ok(Message::assistant(&self.answer))
    }
}

/// Responder that sleeps before answering
pub struct DelayedResponder {
    inner: StaticResponder,
    delay: Duration,
}

impl DelayedResponder {
    pub fn new(name: impl Into<String>, answer: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: StaticResponder::new(name, answer),
            delay,
        }
    }
}

#[async_trait]
impl Responder for DelayedResponder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    async fn invoke(&self, ctx: ResponderContext) -> Result<Message, ResponderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.invoke(ctx).await
    }
}

/// Responder whose oracle is always down
pub struct FailingResponder {
    name: String,
    message: String,
}

impl FailingResponder {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Responder for FailingResponder {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Failing test responder {}", self.name)
    }

    async fn invoke(&self, _ctx: ResponderContext) -> Result<Message, ResponderError> {
        Err(ResponderError::Oracle(LlmError::server_error(&self.message)))
    }
}

// ============================================================================
// Mock Router
// ============================================================================

/// Router that replays a fixed script of decisions
pub struct ScriptedRouter {
    steps: Mutex<VecDeque<Result<RouterTurn, TurnError>>>,
    /// When set, every call past the script invokes this responder
    repeat: Option<(String, String)>,
    delay: Option<Duration>,
    /// Conversation length seen by each call
    seen: Mutex<Vec<usize>>,
}

#[allow(dead_code)]
impl ScriptedRouter {
    pub fn new(steps: Vec<Result<RouterTurn, TurnError>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            repeat: None,
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A router that never finishes
    pub fn always(responder: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            repeat: Some((responder.into(), query.into())),
            ..Self::new(vec![])
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen_lengths(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Router for ScriptedRouter {
    async fn route(
        &self,
        state: &ConversationState,
        _registry: &ResponderRegistry,
    ) -> Result<RouterTurn, TurnError> {
        self.seen.lock().unwrap().push(state.len());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = self.steps.lock().unwrap().pop_front();
        match (step, &self.repeat) {
            (Some(step), _) => step,
            (None, Some((responder, query))) => Ok(RouterTurn::invoke(vec![Invocation::new(
                responder.clone(),
                query.clone(),
            )])),
            (None, None) => Err(TurnError::InvalidRoutingDecision(
                "router script exhausted".to_string(),
            )),
        }
    }
}

// ============================================================================
// Mock Search Backends
// ============================================================================

/// Web search returning fixed text or a fixed error
pub struct StaticWebSearch {
    result: Result<String, String>,
    queries: Mutex<Vec<String>>,
}

impl StaticWebSearch {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            result: Ok(text.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: SearchError) -> Self {
        Self {
            result: Err(error.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearch for StaticWebSearch {
    async fn search(&self, query: &str) -> Result<String, SearchError> {
        self.queries.lock().unwrap().push(query.to_string());
        self.result.clone().map_err(SearchError::Http)
    }
}

/// Knowledge base serving a fixed passage list
pub struct StaticKnowledgeBase {
    passages: Vec<Passage>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl StaticKnowledgeBase {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, SearchError> {
        self.calls.lock().unwrap().push((query.to_string(), top_k));
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory session store
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Mutex<HashMap<String, Vec<Message>>>,
    fail_appends: Mutex<bool>,
}

#[allow(dead_code)]
impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail
    pub fn fail_appends(&self, fail: bool) {
        *self.fail_appends.lock().unwrap() = fail;
    }

    /// Raw stored history, system messages included
    pub fn snapshot(&self, session_id: &str) -> Vec<Message> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, String> {
        Ok(self.snapshot(session_id))
    }

    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), String> {
        if *self.fail_appends.lock().unwrap() {
            return Err("disk full".to_string());
        }
        self.sessions
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<bool, String> {
        Ok(self.sessions.lock().unwrap().remove(session_id).is_some())
    }
}

// ============================================================================
// Test Orchestrator Builder
// ============================================================================

pub type MockOrchestrator = Orchestrator<Arc<InMemoryStore>, Arc<ScriptedRouter>>;

/// An orchestrator wired to mocks, with handles to inspect them
pub struct TestOrchestrator {
    pub orchestrator: MockOrchestrator,
    pub store: Arc<InMemoryStore>,
    pub router: Arc<ScriptedRouter>,
}

impl TestOrchestrator {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> TestOrchestratorBuilder {
        TestOrchestratorBuilder::default()
    }
}

#[derive(Default)]
pub struct TestOrchestratorBuilder {
    responders: Vec<Arc<dyn Responder>>,
    router: Option<ScriptedRouter>,
    store: Option<Arc<InMemoryStore>>,
    settings: Option<EngineSettings>,
    synthesizer: Option<Arc<dyn Responder>>,
}

impl TestOrchestratorBuilder {
    #[must_use]
    pub fn responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responders.push(responder);
        self
    }

    #[must_use]
    pub fn router(mut self, router: ScriptedRouter) -> Self {
        self.router = Some(router);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<InMemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Arc<dyn Responder>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn build(self) -> TestOrchestrator {
        let mut registry = ResponderRegistry::builder();
        for responder in self.responders {
            registry = registry.register(responder);
        }
        let registry = Arc::new(registry.build().expect("test responder names are unique"));

        let store = self.store.unwrap_or_default();
        let router = Arc::new(self.router.unwrap_or_else(|| ScriptedRouter::new(vec![])));
        let mut orchestrator = Orchestrator::new(
            store.clone(),
            router.clone(),
            registry,
            self.settings.unwrap_or_default(),
        );
        if let Some(synthesizer) = self.synthesizer {
            orchestrator = orchestrator.with_synthesizer(synthesizer);
        }

        TestOrchestrator {
            orchestrator,
            store,
            router,
        }
    }
}
