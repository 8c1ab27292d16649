//! Turn state machine
//!
//! Elm-style: a pure transition function over [`TurnState`] that returns the
//! effects for the executor to perform.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{AnswerPolicy, Phase, TurnContext, TurnState, DEFAULT_MAX_ITERATIONS};
pub use transition::{transition, TransitionError, TransitionResult};
