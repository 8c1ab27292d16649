//! Effects produced by transitions

use crate::conversation::Message;
use crate::router::Invocation;

/// Work for the executor after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the router for the next decision
    RequestRoute { iteration: u32 },

    /// Run these responders concurrently
    Dispatch { calls: Vec<Invocation> },

    /// Combine responder outputs into one answer
    Synthesize { query: String, outputs: Vec<Message> },

    /// Write every message appended during the request, in one call
    PersistHistory { messages: Vec<Message> },
}
