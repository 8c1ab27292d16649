//! Property-based tests for the turn state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::conversation::{Message, Role};
use crate::error::TurnError;
use crate::router::{Invocation, RouterTurn};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

const RESPONDERS: &[&str] = &["search", "knowledge_base", "general", "ui_architect", "qa"];

fn test_context(max_iterations: u32) -> TurnContext {
    TurnContext::new("test-session", RESPONDERS.iter().copied())
        .with_max_iterations(max_iterations)
        .with_system_preamble("preamble")
}

fn start(ctx: &TurnContext, history: Vec<Message>) -> TurnState {
    transition(
        &TurnState::new(history),
        ctx,
        Event::UserQuery {
            text: "question".into(),
        },
    )
    .unwrap()
    .new_state
}

/// Feed completions for every call of the current dispatch, in `order`.
fn complete_all(ctx: &TurnContext, mut state: TurnState, order: &[usize]) -> TurnState {
    for &index in order {
        let result = transition(
            &state,
            ctx,
            Event::ResponderCompleted {
                index,
                message: Message::assistant(format!("output {index}")),
            },
        )
        .unwrap();
        state = result.new_state;
    }
    state
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_responder() -> impl Strategy<Value = String> {
    proptest::sample::select(RESPONDERS).prop_map(String::from)
}

fn arb_calls() -> impl Strategy<Value = Vec<Invocation>> {
    proptest::collection::vec(arb_responder(), 1..6).prop_map(|names| {
        names
            .into_iter()
            .map(|name| Invocation::new(name, "q"))
            .collect()
    })
}

/// Calls together with a completion order over their indices
fn arb_calls_and_order() -> impl Strategy<Value = (Vec<Invocation>, Vec<usize>)> {
    arb_calls().prop_flat_map(|calls| {
        let indices: Vec<usize> = (0..calls.len()).collect();
        (Just(calls), Just(indices).prop_shuffle())
    })
}

fn arb_history() -> impl Strategy<Value = Vec<Message>> {
    proptest::collection::vec(
        prop_oneof![
            "[a-z ]{1,20}".prop_map(Message::user),
            "[a-z ]{1,20}".prop_map(Message::assistant),
        ],
        0..6,
    )
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Fold order equals request order for any completion order
    #[test]
    fn prop_fold_order_matches_request_order((calls, order) in arb_calls_and_order()) {
        let ctx = test_context(10);
        let state = start(&ctx, vec![]);
        let state = transition(&state, &ctx, Event::Routed(RouterTurn::invoke(calls.clone())))
            .unwrap()
            .new_state;
        let state = complete_all(&ctx, state, &order);

        prop_assert_eq!(&state.phase, &Phase::Routing { iteration: 2 });
        let folded = state.conversation.responder_messages_since(0);
        prop_assert_eq!(folded.len(), calls.len());
        for (i, (message, call)) in folded.iter().zip(&calls).enumerate() {
            prop_assert_eq!(message.reply_to.as_deref(), Some(call.id.as_str()));
            prop_assert_eq!(message.origin.as_deref(), Some(call.responder.as_str()));
            prop_assert_eq!(&message.content, &format!("output {i}"));
        }

        // Audit list: first occurrence order, no duplicates
        let mut expected: Vec<String> = Vec::new();
        for call in &calls {
            if !expected.contains(&call.responder) {
                expected.push(call.responder.clone());
            }
        }
        prop_assert_eq!(state.used, expected);
    }

    // A router that never finishes is stopped after exactly max_iterations calls
    #[test]
    fn prop_iteration_bound_is_exact(max in 1u32..10, responder in arb_responder()) {
        let ctx = test_context(max);
        let mut state = start(&ctx, vec![]);
        let mut router_calls = 1;

        loop {
            let result = transition(
                &state,
                &ctx,
                Event::Routed(RouterTurn::invoke(vec![Invocation::new(responder.clone(), "q")])),
            )
            .unwrap();
            state = result.new_state;
            if state.phase.is_terminal() {
                break;
            }
            let result = transition(
                &state,
                &ctx,
                Event::ResponderCompleted { index: 0, message: Message::assistant("more") },
            )
            .unwrap();
            prop_assert_eq!(&result.effects, &vec![Effect::RequestRoute { iteration: router_calls + 1 }]);
            router_calls += 1;
            state = result.new_state;
        }

        prop_assert_eq!(router_calls, max);
        prop_assert_eq!(
            state.phase,
            Phase::Failed { error: TurnError::MaxIterationsExceeded { limit: max } }
        );
    }

    // Finishing within the bound always terminates with the last output
    #[test]
    fn prop_finish_within_bound_terminates(max in 2u32..10, rounds_seed in 0u32..10, responder in arb_responder()) {
        let rounds = rounds_seed % max;
        let ctx = test_context(max);
        let mut state = start(&ctx, vec![]);
        for round in 0..rounds {
            state = transition(
                &state,
                &ctx,
                Event::Routed(RouterTurn::invoke(vec![Invocation::new(responder.clone(), "q")])),
            )
            .unwrap()
            .new_state;
            state = transition(
                &state,
                &ctx,
                Event::ResponderCompleted { index: 0, message: Message::assistant(format!("round {round}")) },
            )
            .unwrap()
            .new_state;
        }

        let finish = if rounds == 0 {
            RouterTurn::finish_with(Message::assistant("direct"))
        } else {
            RouterTurn::finish()
        };
        let result = transition(&state, &ctx, Event::Routed(finish)).unwrap();
        let Phase::Terminated { answer } = &result.new_state.phase else {
            return Err(TestCaseError::fail(format!("not terminated: {:?}", result.new_state.phase)));
        };
        let expected = if rounds == 0 { "direct".to_string() } else { format!("round {}", rounds - 1) };
        prop_assert_eq!(&answer.content, &expected);
        prop_assert_eq!(result.new_state.used.is_empty(), rounds == 0);
    }

    // Any name outside the registry fails the turn
    #[test]
    fn prop_unknown_responder_fails(
        (mut calls, _) in arb_calls_and_order(),
        unknown in "[a-z]{3,12}",
        position in 0usize..6,
    ) {
        prop_assume!(!RESPONDERS.contains(&unknown.as_str()));
        let position = position % (calls.len() + 1);
        calls.insert(position, Invocation::new(unknown.clone(), "q"));

        let ctx = test_context(10);
        let state = start(&ctx, vec![]);
        let result = transition(&state, &ctx, Event::Routed(RouterTurn::invoke(calls))).unwrap();
        prop_assert_eq!(
            result.new_state.phase,
            Phase::Failed { error: TurnError::UnknownResponderReference(unknown) }
        );
        prop_assert!(result.effects.is_empty());
    }

    // Loaded history is never modified; only appended to
    #[test]
    fn prop_history_prefix_is_preserved(history in arb_history(), (calls, order) in arb_calls_and_order()) {
        let ctx = test_context(10);
        let state = start(&ctx, history.clone());
        let state = transition(&state, &ctx, Event::Routed(RouterTurn::invoke(calls)))
            .unwrap()
            .new_state;
        let state = complete_all(&ctx, state, &order);
        let result = transition(&state, &ctx, Event::Routed(RouterTurn::finish())).unwrap();

        let messages = result.new_state.conversation.messages();
        prop_assert_eq!(&messages[..history.len()], history.as_slice());
        let Some(Effect::PersistHistory { messages: persisted }) = result.effects.first() else {
            return Err(TestCaseError::fail("expected PersistHistory"));
        };
        prop_assert_eq!(persisted.as_slice(), &messages[history.len()..]);

        // The preamble is only seeded into an empty history
        let systems = messages.iter().filter(|m| m.role == Role::System).count();
        prop_assert_eq!(systems, usize::from(history.is_empty()));
    }
}
