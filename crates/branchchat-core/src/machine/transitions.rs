//! State transitions for the generation state machine

use thiserror::Error;

use super::events::ChatEvent;
use super::states::ConversationState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} with event {event}")]
    InvalidTransition {
        from: ConversationState,
        event: String,
    },
}

/// Result of feeding one event to the machine.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: ChatEvent,
    /// Whether the state actually changed.
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    current_state: ConversationState,
    /// Recent transitions, oldest first.
    history: Vec<StateTransition>,
    max_history: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current_state: ConversationState::Idle,
            history: Vec::new(),
            max_history: 50,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.current_state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Apply an event. Events with no transition from the current state leave it unchanged.
    pub fn handle_event(&mut self, event: ChatEvent) -> StateTransition {
        let old_state = self.current_state.clone();
        let new_state = Self::compute_next_state(&old_state, &event);
        let changed = old_state != new_state;

        self.current_state = new_state.clone();

        let transition = StateTransition {
            from: old_state,
            to: new_state,
            event,
            changed,
        };

        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        transition
    }

    /// Apply an event, rejecting it if it is not valid from the current state.
    pub fn try_handle_event(
        &mut self,
        event: ChatEvent,
    ) -> Result<StateTransition, TransitionError> {
        if !Self::is_valid(&self.current_state, &event) {
            return Err(TransitionError::InvalidTransition {
                from: self.current_state.clone(),
                event: event.name().to_string(),
            });
        }
        Ok(self.handle_event(event))
    }

    fn compute_next_state(state: &ConversationState, event: &ChatEvent) -> ConversationState {
        use ChatEvent::*;
        use ConversationState::*;

        match (state, event) {
            (Idle, GenerationRequested) => AwaitingCompletion,

            (AwaitingCompletion, StreamCompleted) => Idle,
            (AwaitingCompletion, StreamFailed { .. }) => Idle,
            (AwaitingCompletion, Cancelled) => Idle,

            _ => state.clone(),
        }
    }

    fn is_valid(state: &ConversationState, event: &ChatEvent) -> bool {
        use ChatEvent::*;
        use ConversationState::*;

        matches!(
            (state, event),
            (Idle, GenerationRequested)
                | (
                    AwaitingCompletion,
                    StreamCompleted | StreamFailed { .. } | Cancelled
                )
        )
    }
}
