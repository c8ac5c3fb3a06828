//! Generation state machine
//!
//! One machine per conversation. `AwaitingCompletion` doubles as the per-conversation lock:
//! a second generation request is rejected while a machine is in that state.

mod events;
mod states;
mod transitions;

pub use events::ChatEvent;
pub use states::ConversationState;
pub use transitions::{StateMachine, StateTransition, TransitionError};
