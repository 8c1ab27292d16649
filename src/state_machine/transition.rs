//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! result. All I/O is described by the returned effects.

use super::{Effect, Event, Phase, TurnContext, TurnState};
use super::state::AnswerPolicy;
use crate::conversation::{tag_origin, ConversationState, Message, Next};
use crate::error::TurnError;
use crate::router::{Invocation, RouterTurn, RoutingDecision};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(
    state: &TurnState,
    context: &TurnContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&state.phase, event) {
        (Phase::Init, Event::UserQuery { text }) => {
            let mut conversation = state.conversation.clone();
            if conversation.is_empty() && !context.system_preamble.is_empty() {
                conversation = conversation.append(Message::system(&context.system_preamble));
            }
            let conversation = conversation.append(Message::user(text));
            Ok(TransitionResult::new(TurnState {
                phase: Phase::Routing { iteration: 1 },
                conversation,
                ..state.clone()
            })
            .with_effect(Effect::RequestRoute { iteration: 1 }))
        }

        (Phase::Routing { iteration }, Event::Routed(turn)) => {
            Ok(handle_routed(state, context, *iteration, turn))
        }

        (Phase::Routing { .. }, Event::RouteFailed(error))
        | (Phase::Dispatching { .. }, Event::ResponderFailed { error, .. })
        | (Phase::Synthesizing, Event::SynthesisFailed(error)) => Ok(fail(state, error)),

        (
            Phase::Dispatching {
                iteration,
                calls,
                completed,
            },
            Event::ResponderCompleted { index, message },
        ) => {
            let mut completed = completed.clone();
            match completed.get_mut(index) {
                Some(slot) if slot.is_none() => *slot = Some(message),
                Some(_) => {
                    return Err(TransitionError::InvalidTransition(format!(
                        "responder call {index} completed twice"
                    )))
                }
                None => {
                    return Err(TransitionError::InvalidTransition(format!(
                        "no responder call at index {index}"
                    )))
                }
            }

            if completed.iter().any(Option::is_none) {
                return Ok(TransitionResult::new(TurnState {
                    phase: Phase::Dispatching {
                        iteration: *iteration,
                        calls: calls.clone(),
                        completed,
                    },
                    ..state.clone()
                }));
            }

            // All in: fold in request order regardless of completion order.
            let mut conversation = state.conversation.clone();
            let mut used = state.used.clone();
            for (call, message) in calls.iter().zip(completed.into_iter().flatten()) {
                conversation = conversation.append(
                    tag_origin(message, &call.responder).replying_to(call.id.clone()),
                );
                if !used.contains(&call.responder) {
                    used.push(call.responder.clone());
                }
            }

            let next = iteration + 1;
            Ok(TransitionResult::new(TurnState {
                phase: Phase::Routing { iteration: next },
                conversation,
                used,
                seed_len: state.seed_len,
            })
            .with_effect(Effect::RequestRoute { iteration: next }))
        }

        (Phase::Synthesizing, Event::Synthesized { message }) => {
            let answer = tag_origin(message, "synthesis");
            let conversation = state.conversation.append(answer.clone());
            Ok(terminate(state, conversation, answer))
        }

        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in phase {}",
            phase.name()
        ))),
    }
}

fn handle_routed(
    state: &TurnState,
    context: &TurnContext,
    iteration: u32,
    turn: RouterTurn,
) -> TransitionResult {
    let RouterTurn { decision, message } = turn;

    if let Some(unknown) = decision
        .invocations()
        .iter()
        .find(|call| !context.responders.contains(&call.responder))
    {
        return fail(
            state,
            TurnError::UnknownResponderReference(unknown.responder.clone()),
        );
    }

    let mut conversation = state.conversation.clone();
    if let Some(message) = message {
        conversation = conversation.append(message);
    }

    match decision {
        RoutingDecision::Finish => finish(state, context, conversation.with_next(Next::Finish)),
        RoutingDecision::InvokeOne(call) => dispatch(state, context, iteration, conversation, vec![call]),
        RoutingDecision::InvokeMany(calls) => dispatch(state, context, iteration, conversation, calls),
    }
}

fn dispatch(
    state: &TurnState,
    context: &TurnContext,
    iteration: u32,
    conversation: ConversationState,
    calls: Vec<Invocation>,
) -> TransitionResult {
    if calls.is_empty() {
        return finish(state, context, conversation.with_next(Next::Finish));
    }
    // The router has now been called max_iterations times; no room for
    // another decision after these responders.
    if iteration >= context.max_iterations {
        return fail(
            state,
            TurnError::MaxIterationsExceeded {
                limit: context.max_iterations,
            },
        );
    }

    let conversation = conversation.with_next(Next::Responder(calls[0].responder.clone()));
    let completed = vec![None; calls.len()];
    TransitionResult::new(TurnState {
        phase: Phase::Dispatching {
            iteration,
            calls: calls.clone(),
            completed,
        },
        conversation,
        ..state.clone()
    })
    .with_effect(Effect::Dispatch { calls })
}

fn finish(state: &TurnState, context: &TurnContext, conversation: ConversationState) -> TransitionResult {
    let request = conversation.messages_since(state.seed_len);

    if context.answer_policy == AnswerPolicy::Synthesis {
        let outputs: Vec<Message> = conversation
            .responder_messages_since(state.seed_len)
            .into_iter()
            .cloned()
            .collect();
        if !outputs.is_empty() {
            let query = request
                .iter()
                .find(|m| m.role == crate::conversation::Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            return TransitionResult::new(TurnState {
                phase: Phase::Synthesizing,
                conversation,
                ..state.clone()
            })
            .with_effect(Effect::Synthesize { query, outputs });
        }
    }

    let answer = request
        .iter()
        .rev()
        .find(|m| m.role == crate::conversation::Role::Assistant && !m.content.is_empty())
        .cloned();
    match answer {
        Some(answer) => terminate(state, conversation, answer),
        None => fail(
            state,
            TurnError::InvalidRoutingDecision(
                "router finished before any answer was produced".to_string(),
            ),
        ),
    }
}

fn terminate(state: &TurnState, conversation: ConversationState, answer: Message) -> TransitionResult {
    let messages = conversation.messages_since(state.seed_len).to_vec();
    TransitionResult::new(TurnState {
        phase: Phase::Terminated { answer },
        conversation,
        ..state.clone()
    })
    .with_effect(Effect::PersistHistory { messages })
}

fn fail(state: &TurnState, error: TurnError) -> TransitionResult {
    TransitionResult::new(TurnState {
        phase: Phase::Failed { error },
        ..state.clone()
    })
}
