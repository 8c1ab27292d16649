//! Query orchestrator
//!
//! Drives one turn per request: load history, feed events through the pure
//! state machine, perform the effects it returns, persist on success.

use super::traits::SessionStore;
use super::{QueryContext, QueryOutcome, TurnMetadata};

use crate::conversation::{ConversationState, Message, Role};
use crate::error::TurnError;
use crate::responders::{Responder, ResponderContext, ResponderRegistry};
use crate::router::{Invocation, Router, RoutingDecision};
use crate::state_machine::{
    transition, AnswerPolicy, Effect, Event, Phase, TransitionResult, TurnContext, TurnState,
    DEFAULT_MAX_ITERATIONS,
};
use crate::system_prompt::SYSTEM_PREAMBLE;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Engine knobs shared by every request
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_iterations: u32,
    /// Bound on one router call
    pub oracle_timeout: Duration,
    /// Bound on one responder (or synthesis) call
    pub responder_timeout: Duration,
    pub system_preamble: String,
    pub answer_policy: AnswerPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            oracle_timeout: Duration::from_secs(60),
            responder_timeout: Duration::from_secs(90),
            system_preamble: SYSTEM_PREAMBLE.to_string(),
            answer_policy: AnswerPolicy::Direct,
        }
    }
}

/// Answers queries against per-session history
pub struct Orchestrator<S, R>
where
    S: SessionStore,
    R: Router,
{
    store: S,
    router: R,
    registry: Arc<ResponderRegistry>,
    synthesizer: Option<Arc<dyn Responder>>,
    settings: EngineSettings,
    /// One async lock per session, held from load to persist
    session_locks: SessionLocks,
}

impl<S, R> Orchestrator<S, R>
where
    S: SessionStore,
    R: Router,
{
    pub fn new(
        store: S,
        router: R,
        registry: Arc<ResponderRegistry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            router,
            registry,
            synthesizer: None,
            settings,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Responder used when the answer policy is synthesis
    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Responder>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn registry(&self) -> &ResponderRegistry {
        &self.registry
    }

    fn session_lease(&self, session_id: &str) -> SessionLease<'_> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(session_id.to_string()).or_default().clone();
        SessionLease {
            locks: &self.session_locks,
            session_id: session_id.to_string(),
            lock,
        }
    }

    fn turn_context(&self, session_id: &str) -> TurnContext {
        TurnContext::new(session_id, self.registry.names())
            .with_max_iterations(self.settings.max_iterations)
            .with_answer_policy(self.settings.answer_policy)
            .with_system_preamble(self.settings.system_preamble.clone())
    }

    /// Answer `query` in the context of the session's history.
    ///
    /// History is written only when the turn terminates with an answer; on
    /// any error the stored session is exactly as it was before the call.
    pub async fn process_query(
        &self,
        query: &str,
        session_id: &str,
    ) -> Result<QueryOutcome, TurnError> {
        let lease = self.session_lease(session_id);
        let _guard = lease.lock().await;
        let started = Instant::now();

        let history = self.store.load(session_id).await.map_err(TurnError::Store)?;
        tracing::info!(
            session_id,
            history_len = history.len(),
            "Processing query"
        );

        let context = self.turn_context(session_id);
        let mut state = TurnState::new(history);
        let mut events = VecDeque::from([Event::UserQuery {
            text: query.to_string(),
        }]);
        let mut router_calls = 0;

        while let Some(event) = events.pop_front() {
            let iteration = state.iterations();
            let TransitionResult { new_state, effects } = transition(&state, &context, event)
                .map_err(|e| TurnError::Internal(e.to_string()))?;
            state = new_state;

            if let Phase::Failed { error } = &state.phase {
                tracing::error!(
                    session_id,
                    iteration,
                    kind = ?error.kind(),
                    transient = error.is_transient(),
                    error = %error,
                    duration_ms = elapsed_ms(started),
                    "Turn failed"
                );
                return Err(error.clone());
            }

            for effect in effects {
                if matches!(effect, Effect::RequestRoute { .. }) {
                    router_calls += 1;
                }
                events.extend(self.execute_effect(effect, &state, session_id).await?);
            }
        }

        if !state.phase.is_terminal() {
            return Err(TurnError::Internal(format!(
                "turn stopped in phase {}",
                state.phase.name()
            )));
        }
        let Phase::Terminated { answer } = &state.phase else {
            return Err(TurnError::Internal("failed turn reached completion".to_string()));
        };

        let visible: Vec<&Message> = state
            .conversation
            .messages()
            .iter()
            .filter(|m| m.is_visible())
            .collect();
        let outcome = QueryOutcome {
            final_answer: answer.content.clone(),
            used_responders: state.used.clone(),
            metadata: TurnMetadata {
                session_id: session_id.to_string(),
                turn_number: visible.iter().filter(|m| m.role == Role::User).count(),
                total_messages: visible.len(),
                iterations: router_calls,
            },
        };

        tracing::info!(
            session_id,
            iterations = router_calls,
            appended = state.appended().len(),
            used = ?outcome.used_responders,
            duration_ms = elapsed_ms(started),
            "Turn completed"
        );
        Ok(outcome)
    }

    /// Like [`Self::process_query`], with caller context appended to the query
    pub async fn process_query_with_context(
        &self,
        query: &str,
        context: &QueryContext,
        session_id: &str,
    ) -> Result<QueryOutcome, TurnError> {
        self.process_query(&context.enrich(query), session_id).await
    }

    /// The session transcript as callers see it; unknown sessions are empty
    pub async fn get_history(&self, session_id: &str) -> Result<Vec<Message>, TurnError> {
        let history = self.store.load(session_id).await.map_err(TurnError::Store)?;
        Ok(history.into_iter().filter(Message::is_visible).collect())
    }

    pub async fn clear_history(&self, session_id: &str) -> Result<(), TurnError> {
        let lease = self.session_lease(session_id);
        let _guard = lease.lock().await;
        let existed = self.store.clear(session_id).await.map_err(TurnError::Store)?;
        tracing::info!(session_id, existed, "Cleared session history");
        Ok(())
    }

    /// Perform one effect and return the events it produced.
    ///
    /// Only persistence failures are returned as errors; every other failure
    /// comes back as an event so the state machine decides what it means.
    async fn execute_effect(
        &self,
        effect: Effect,
        state: &TurnState,
        session_id: &str,
    ) -> Result<Vec<Event>, TurnError> {
        match effect {
            Effect::RequestRoute { iteration } => {
                Ok(vec![self.request_route(&state.conversation, session_id, iteration).await])
            }

            Effect::Dispatch { calls } => {
                Ok(self.dispatch(calls, &state.conversation, session_id).await)
            }

            Effect::Synthesize { query, outputs } => {
                Ok(vec![self.synthesize(query, outputs, session_id).await])
            }

            Effect::PersistHistory { messages } => {
                self.store
                    .append(session_id, &messages)
                    .await
                    .map_err(|e| {
                        tracing::error!(session_id, error = %e, "Failed to persist history");
                        TurnError::Store(e)
                    })?;
                tracing::debug!(session_id, count = messages.len(), "Persisted history");
                Ok(vec![])
            }
        }
    }

    async fn request_route(
        &self,
        conversation: &ConversationState,
        session_id: &str,
        iteration: u32,
    ) -> Event {
        let started = Instant::now();
        let timeout = self.settings.oracle_timeout;
        let result =
            tokio::time::timeout(timeout, self.router.route(conversation, &self.registry)).await;

        match result {
            Ok(Ok(turn)) => {
                let decision = match &turn.decision {
                    RoutingDecision::Finish => "finish".to_string(),
                    other => other
                        .invocations()
                        .iter()
                        .map(|call| call.responder.as_str())
                        .collect::<Vec<_>>()
                        .join(","),
                };
                tracing::info!(
                    session_id,
                    iteration,
                    decision = %decision,
                    duration_ms = elapsed_ms(started),
                    "Router decided"
                );
                Event::Routed(turn)
            }
            Ok(Err(error)) => {
                tracing::warn!(session_id, iteration, error = %error, "Routing failed");
                Event::RouteFailed(error)
            }
            Err(_) => {
                tracing::warn!(session_id, iteration, ?timeout, "Routing timed out");
                Event::RouteFailed(TurnError::oracle_timeout("routing", timeout))
            }
        }
    }

    /// Run every call concurrently. Completions come back in completion
    /// order; the first failure drops the calls still in flight.
    async fn dispatch(
        &self,
        calls: Vec<Invocation>,
        conversation: &ConversationState,
        session_id: &str,
    ) -> Vec<Event> {
        let snapshot = Arc::new(conversation.clone());
        let mut pending: FuturesUnordered<_> = calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| {
                let snapshot = snapshot.clone();
                async move { (index, self.invoke_responder(call, snapshot, session_id).await) }
            })
            .collect();

        let mut events = Vec::new();
        while let Some((index, result)) = pending.next().await {
            match result {
                Ok(message) => events.push(Event::ResponderCompleted { index, message }),
                Err(error) => {
                    if !pending.is_empty() {
                        tracing::warn!(
                            session_id,
                            dropped = pending.len(),
                            "Dropping outstanding responder calls"
                        );
                    }
                    events.push(Event::ResponderFailed { index, error });
                    break;
                }
            }
        }
        events
    }

    async fn invoke_responder(
        &self,
        call: Invocation,
        conversation: Arc<ConversationState>,
        session_id: &str,
    ) -> Result<Message, TurnError> {
        let Some(responder) = self.registry.get(&call.responder) else {
            return Err(TurnError::UnknownResponderReference(call.responder));
        };

        let started = Instant::now();
        let timeout = self.settings.responder_timeout;
        tracing::info!(session_id, responder = %call.responder, id = %call.id, "Invoking responder");

        let ctx = ResponderContext {
            state: conversation,
            query: call.query,
            invocation_id: call.id,
        };
        match tokio::time::timeout(timeout, responder.invoke(ctx)).await {
            Ok(Ok(message)) => {
                tracing::info!(
                    session_id,
                    responder = %call.responder,
                    duration_ms = elapsed_ms(started),
                    "Responder completed"
                );
                Ok(message)
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id, responder = %call.responder, error = %e, "Responder failed");
                Err(TurnError::ResponderInvocation {
                    responder: call.responder,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(session_id, responder = %call.responder, ?timeout, "Responder timed out");
                Err(TurnError::responder_timeout(&call.responder, timeout))
            }
        }
    }

    async fn synthesize(&self, query: String, outputs: Vec<Message>, session_id: &str) -> Event {
        let Some(synthesizer) = &self.synthesizer else {
            return Event::SynthesisFailed(TurnError::ResponderInvocation {
                responder: "synthesis".to_string(),
                message: "no synthesis responder configured".to_string(),
            });
        };

        let started = Instant::now();
        let timeout = self.settings.responder_timeout;
        let ctx = ResponderContext {
            state: Arc::new(ConversationState::new(outputs)),
            query,
            invocation_id: uuid::Uuid::new_v4().to_string(),
        };

        match tokio::time::timeout(timeout, synthesizer.invoke(ctx)).await {
            Ok(Ok(message)) => {
                tracing::info!(session_id, duration_ms = elapsed_ms(started), "Synthesized answer");
                Event::Synthesized { message }
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id, error = %e, "Synthesis failed");
                Event::SynthesisFailed(TurnError::ResponderInvocation {
                    responder: synthesizer.name().to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => Event::SynthesisFailed(TurnError::responder_timeout(
                synthesizer.name(),
                timeout,
            )),
        }
    }
}

type SessionLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A claim on one session's lock.
///
/// The map entry is removed when the last lease for the session drops, so
/// the map only holds sessions with a request in flight or waiting.
struct SessionLease<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionLease<'_> {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        // Leases are only created under this mutex, so the count is stable here
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let unshared = locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if unshared {
            locks.remove(&self.session_id);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmErrorKind, LlmResponse};
    use crate::responders::SynthesisResponder;
    use crate::router::RouterTurn;
    use crate::runtime::testing::{
        DelayedResponder, FailingResponder, InMemoryStore, MockLlmService, MockOrchestrator,
        ScriptedRouter, StaticResponder, TestOrchestrator,
    };
    use serde_json::json;

    fn tracked_sessions(orchestrator: &MockOrchestrator) -> usize {
        orchestrator.session_locks.lock().unwrap().len()
    }

    fn search_call() -> RouterTurn {
        RouterTurn::invoke(vec![Invocation::new("search", "weather in Paris")])
    }

    #[tokio::test]
    async fn immediate_answer_returns_without_responders() {
        let router = ScriptedRouter::new(vec![Ok(RouterTurn::finish_with(Message::assistant("4")))]);
        let test = TestOrchestrator::new().router(router).build();

        let outcome = test.orchestrator.process_query("What is 2+2?", "s1").await.unwrap();

        assert_eq!(outcome.final_answer, "4");
        assert!(outcome.used_responders.is_empty());
        assert_eq!(outcome.metadata.turn_number, 1);
        assert_eq!(outcome.metadata.total_messages, 2);
        assert_eq!(outcome.metadata.iterations, 1);

        let history = test.orchestrator.get_history("s1").await.unwrap();
        assert_eq!(history, vec![Message::user("What is 2+2?"), Message::assistant("4")]);
    }

    #[tokio::test]
    async fn repeated_responder_is_reported_once() {
        let router = ScriptedRouter::new(vec![
            Ok(search_call()),
            Ok(search_call()),
            Ok(RouterTurn::finish()),
        ]);
        let test = TestOrchestrator::new()
            .responder(Arc::new(StaticResponder::new("search", "Sunny, 21C")))
            .router(router)
            .build();

        let outcome = test.orchestrator.process_query("Weather?", "s1").await.unwrap();

        assert_eq!(outcome.used_responders, vec!["search".to_string()]);
        assert_eq!(outcome.final_answer, "Sunny, 21C");
        assert_eq!(outcome.metadata.iterations, 3);
        assert_eq!(test.router.call_count(), 3);

        let history = test.orchestrator.get_history("s1").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].origin.as_deref(), Some("search"));
    }

    #[tokio::test]
    async fn failure_leaves_history_untouched() {
        let router = ScriptedRouter::new(vec![
            Ok(RouterTurn::finish_with(Message::assistant("first answer"))),
            Ok(search_call()),
        ]);
        let test = TestOrchestrator::new()
            .responder(Arc::new(FailingResponder::new("search", "backend down")))
            .router(router)
            .build();

        test.orchestrator.process_query("first", "s1").await.unwrap();
        let before = test.store.snapshot("s1");

        let err = test.orchestrator.process_query("second", "s1").await.unwrap_err();
        assert!(matches!(
            err,
            TurnError::ResponderInvocation { ref responder, .. } if responder == "search"
        ));
        assert_eq!(test.store.snapshot("s1"), before);
    }

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let test = TestOrchestrator::new().build();
        assert!(test.orchestrator.get_history("unknown-session").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn router_that_never_finishes_is_stopped() {
        let test = TestOrchestrator::new()
            .responder(Arc::new(StaticResponder::new("search", "more")))
            .router(ScriptedRouter::always("search", "again"))
            .settings(EngineSettings {
                max_iterations: 3,
                ..EngineSettings::default()
            })
            .build();

        let err = test.orchestrator.process_query("loop", "s1").await.unwrap_err();

        assert_eq!(err, TurnError::MaxIterationsExceeded { limit: 3 });
        assert_eq!(test.router.call_count(), 3);
        assert!(test.store.snapshot("s1").is_empty());
    }

    #[tokio::test]
    async fn unknown_responder_fails_the_turn() {
        let router = ScriptedRouter::new(vec![Ok(RouterTurn::invoke(vec![Invocation::new(
            "astrologer",
            "q",
        )]))]);
        let test = TestOrchestrator::new().router(router).build();

        let err = test.orchestrator.process_query("q", "s1").await.unwrap_err();
        assert_eq!(err, TurnError::UnknownResponderReference("astrologer".into()));
    }

    #[tokio::test]
    async fn router_error_propagates() {
        let router = ScriptedRouter::new(vec![Err(TurnError::InvalidRoutingDecision(
            "banana".into(),
        ))]);
        let test = TestOrchestrator::new().router(router).build();

        let err = test.orchestrator.process_query("q", "s1").await.unwrap_err();
        assert_eq!(err, TurnError::InvalidRoutingDecision("banana".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_responder_times_out() {
        let router = ScriptedRouter::new(vec![Ok(search_call())]);
        let test = TestOrchestrator::new()
            .responder(Arc::new(DelayedResponder::new(
                "search",
                "late",
                Duration::from_secs(5),
            )))
            .router(router)
            .settings(EngineSettings {
                responder_timeout: Duration::from_secs(1),
                ..EngineSettings::default()
            })
            .build();

        let err = test.orchestrator.process_query("q", "s1").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::TurnErrorKind::ResponderInvocation);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_router_is_an_oracle_timeout() {
        let router = ScriptedRouter::new(vec![Ok(RouterTurn::finish())])
            .with_delay(Duration::from_secs(120));
        let test = TestOrchestrator::new().router(router).build();

        let err = test.orchestrator.process_query("q", "s1").await.unwrap_err();
        assert!(matches!(
            err,
            TurnError::OracleCall {
                kind: LlmErrorKind::Network,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_folds_in_request_order() {
        let router = ScriptedRouter::new(vec![
            Ok(RouterTurn::invoke(vec![
                Invocation::new("slow", "a"),
                Invocation::new("fast", "b"),
            ])),
            Ok(RouterTurn::finish()),
        ]);
        let test = TestOrchestrator::new()
            .responder(Arc::new(DelayedResponder::new(
                "slow",
                "slow answer",
                Duration::from_millis(50),
            )))
            .responder(Arc::new(StaticResponder::new("fast", "fast answer")))
            .router(router)
            .build();

        let outcome = test.orchestrator.process_query("both", "s1").await.unwrap();

        assert_eq!(outcome.used_responders, vec!["slow".to_string(), "fast".to_string()]);
        assert_eq!(outcome.final_answer, "fast answer");
        let history = test.orchestrator.get_history("s1").await.unwrap();
        let origins: Vec<_> = history.iter().map(|m| m.origin.as_deref()).collect();
        assert_eq!(origins, vec![None, Some("slow"), Some("fast")]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_responder_drops_slow_siblings() {
        let router = ScriptedRouter::new(vec![Ok(RouterTurn::invoke(vec![
            Invocation::new("slow", "a"),
            Invocation::new("bad", "b"),
        ]))]);
        let slow = Arc::new(DelayedResponder::new(
            "slow",
            "slow answer",
            Duration::from_secs(30),
        ));
        let test = TestOrchestrator::new()
            .responder(slow)
            .responder(Arc::new(FailingResponder::new("bad", "backend down")))
            .router(router)
            .build();
        let started = tokio::time::Instant::now();

        let err = test.orchestrator.process_query("both", "s1").await.unwrap_err();

        assert!(matches!(
            err,
            TurnError::ResponderInvocation { ref responder, .. } if responder == "bad"
        ));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(test.store.snapshot("s1").is_empty());
        assert_eq!(test.router.call_count(), 1);
    }

    #[tokio::test]
    async fn synthesis_policy_combines_outputs() {
        let router = ScriptedRouter::new(vec![
            Ok(RouterTurn::invoke(vec![
                Invocation::new("frontend", "a"),
                Invocation::new("backend", "b"),
            ])),
            Ok(RouterTurn::finish()),
        ]);
        let llm = Arc::new(MockLlmService::new("synth"));
        llm.queue_response(LlmResponse::text_only("Use React with an Axum API."));
        let test = TestOrchestrator::new()
            .responder(Arc::new(StaticResponder::new("frontend", "React")))
            .responder(Arc::new(StaticResponder::new("backend", "Axum")))
            .router(router)
            .settings(EngineSettings {
                answer_policy: AnswerPolicy::Synthesis,
                ..EngineSettings::default()
            })
            .synthesizer(Arc::new(SynthesisResponder::new(llm.clone())))
            .build();

        let outcome = test.orchestrator.process_query("Pick a stack", "s1").await.unwrap();

        assert_eq!(outcome.final_answer, "Use React with an Axum API.");
        let history = test.orchestrator.get_history("s1").await.unwrap();
        assert_eq!(history.last().unwrap().origin.as_deref(), Some("synthesis"));
        let requests = llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        let crate::llm::ContentBlock::Text { text: prompt } = &requests[0].messages[0].content[0] else {
            panic!("expected a text prompt");
        };
        assert!(prompt.contains("Pick a stack"));
        assert!(prompt.contains("### frontend"));
        assert!(prompt.contains("### backend"));
    }

    #[tokio::test]
    async fn preamble_is_stored_once_but_hidden() {
        let router = ScriptedRouter::new(vec![
            Ok(RouterTurn::finish_with(Message::assistant("a1"))),
            Ok(RouterTurn::finish_with(Message::assistant("a2"))),
        ]);
        let test = TestOrchestrator::new().router(router).build();

        test.orchestrator.process_query("q1", "s1").await.unwrap();
        let outcome = test.orchestrator.process_query("q2", "s1").await.unwrap();

        let stored = test.store.snapshot("s1");
        assert_eq!(stored.iter().filter(|m| m.role == Role::System).count(), 1);
        assert_eq!(outcome.metadata.turn_number, 2);
        assert_eq!(outcome.metadata.total_messages, 4);
        assert_eq!(test.router.seen_lengths(), vec![2, 4]);
    }

    #[tokio::test]
    async fn same_session_requests_serialize() {
        let router = ScriptedRouter::new(vec![
            Ok(search_call()),
            Ok(RouterTurn::finish()),
            Ok(search_call()),
            Ok(RouterTurn::finish()),
        ]);
        let test = TestOrchestrator::new()
            .responder(Arc::new(DelayedResponder::new(
                "search",
                "done",
                Duration::from_millis(20),
            )))
            .router(router)
            .build();
        let orchestrator = Arc::new(test.orchestrator);

        let a = tokio::spawn({
            let o = orchestrator.clone();
            async move { o.process_query("one", "shared").await }
        });
        let b = tokio::spawn({
            let o = orchestrator.clone();
            async move { o.process_query("two", "shared").await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Each turn is contiguous: user, responder output, user, responder output
        let roles: Vec<Role> = test
            .store
            .snapshot("shared")
            .iter()
            .filter(|m| m.is_visible())
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(tracked_sessions(&orchestrator), 0);
    }

    #[tokio::test]
    async fn session_locks_are_released_after_each_request() {
        let steps = (0..50)
            .map(|i| Ok(RouterTurn::finish_with(Message::assistant(format!("a{i}")))))
            .collect();
        let test = TestOrchestrator::new().router(ScriptedRouter::new(steps)).build();

        for i in 0..50 {
            let session = format!("s{i}");
            test.orchestrator.process_query("q", &session).await.unwrap();
            test.orchestrator.clear_history(&session).await.unwrap();
        }
        // Failed turns release their lock too
        test.orchestrator.process_query("q", "exhausted").await.unwrap_err();

        assert_eq!(tracked_sessions(&test.orchestrator), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_request_keeps_the_session_lock() {
        let router = ScriptedRouter::new(vec![
            Ok(search_call()),
            Ok(RouterTurn::finish()),
        ]);
        let test = TestOrchestrator::new()
            .responder(Arc::new(DelayedResponder::new(
                "search",
                "done",
                Duration::from_secs(1),
            )))
            .router(router)
            .build();
        let orchestrator = Arc::new(test.orchestrator);

        let running = tokio::spawn({
            let o = orchestrator.clone();
            async move { o.process_query("one", "shared").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracked_sessions(&orchestrator), 1);

        // A clear queued behind the running turn is abandoned
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            orchestrator.clear_history("shared"),
        )
        .await;
        assert!(abandoned.is_err());

        running.await.unwrap().unwrap();
        assert_eq!(tracked_sessions(&orchestrator), 0);
        assert_eq!(test.store.snapshot("shared").len(), 3);
    }

    #[tokio::test]
    async fn context_is_appended_to_the_query() {
        let router = ScriptedRouter::new(vec![Ok(RouterTurn::finish_with(Message::assistant("ok")))]);
        let test = TestOrchestrator::new().router(router).build();
        let context = QueryContext {
            user_preferences: Some(json!("short answers")),
            ..QueryContext::default()
        };

        test.orchestrator
            .process_query_with_context("Deploy?", &context, "s1")
            .await
            .unwrap();

        let history = test.orchestrator.get_history("s1").await.unwrap();
        assert_eq!(
            history[0].content,
            "Deploy?\n\nContext:\nUser preferences: short answers"
        );
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let router = ScriptedRouter::new(vec![Ok(RouterTurn::finish_with(Message::assistant("ok")))]);
        let store = Arc::new(InMemoryStore::new());
        store.fail_appends(true);
        let test = TestOrchestrator::new().router(router).store(store).build();

        let err = test.orchestrator.process_query("q", "s1").await.unwrap_err();
        assert!(matches!(err, TurnError::Store(_)));
        assert!(test.store.snapshot("s1").is_empty());
    }

    #[tokio::test]
    async fn clear_history_empties_the_session() {
        let router = ScriptedRouter::new(vec![Ok(RouterTurn::finish_with(Message::assistant("ok")))]);
        let test = TestOrchestrator::new().router(router).build();
        test.orchestrator.process_query("q", "s1").await.unwrap();

        test.orchestrator.clear_history("s1").await.unwrap();
        assert!(test.orchestrator.get_history("s1").await.unwrap().is_empty());
        // Clearing twice is fine
        test.orchestrator.clear_history("s1").await.unwrap();
    }
}
