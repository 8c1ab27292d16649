//! Events that drive a turn

use crate::conversation::Message;
use crate::error::TurnError;
use crate::router::RouterTurn;

#[derive(Debug, Clone)]
pub enum Event {
    UserQuery {
        text: String,
    },

    // Router events
    Routed(RouterTurn),
    RouteFailed(TurnError),

    // Responder events; `index` is the call's position in the decision
    ResponderCompleted {
        index: usize,
        message: Message,
    },
    ResponderFailed {
        index: usize,
        error: TurnError,
    },

    // Synthesis events
    Synthesized {
        message: Message,
    },
    SynthesisFailed(TurnError),
}
