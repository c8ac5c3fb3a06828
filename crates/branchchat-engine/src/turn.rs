//! A generation turn between preparation and commit
//!
//! Preparing a turn claims the conversation (Idle -> AwaitingCompletion), stages the new user
//! node if there is one and freezes the transcript. The claim is released when the turn is
//! finished or dropped, so an abandoned turn can never wedge a conversation.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use branchchat_core::{
    ChatEvent, ConversationId, MessageNode, NodeId, StateMachine, TreeError, Turn,
};

/// Which controller operation produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Reply to the user node already at the tail of the active path.
    Respond,
    Send,
    Edit,
    Reroll,
}

/// Outcome of a committed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub user_node_id: NodeId,
    pub assistant_node_id: NodeId,
    pub active_path: Vec<NodeId>,
}

pub(crate) type Machines = Arc<DashMap<ConversationId, StateMachine>>;
pub(crate) type CancelTokens = Arc<DashMap<ConversationId, CancellationToken>>;

/// Holds a conversation in `AwaitingCompletion` until dropped.
pub(crate) struct InFlightGuard {
    machines: Machines,
    cancel_tokens: CancelTokens,
    conversation_id: ConversationId,
    finished: bool,
}

impl InFlightGuard {
    pub(crate) fn acquire(
        machines: &Machines,
        cancel_tokens: &CancelTokens,
        conversation_id: &str,
        cancel: CancellationToken,
    ) -> Result<Self, TreeError> {
        {
            let mut machine = machines.entry(conversation_id.to_string()).or_default();
            machine
                .try_handle_event(ChatEvent::GenerationRequested)
                .map_err(|_| TreeError::Conflict(conversation_id.to_string()))?;
        }
        cancel_tokens.insert(conversation_id.to_string(), cancel);

        Ok(Self {
            machines: Arc::clone(machines),
            cancel_tokens: Arc::clone(cancel_tokens),
            conversation_id: conversation_id.to_string(),
            finished: false,
        })
    }

    pub(crate) fn finish(mut self, event: ChatEvent) {
        self.release(event);
    }

    fn release(&mut self, event: ChatEvent) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.cancel_tokens.remove(&self.conversation_id);
        if let Some(mut machine) = self.machines.get_mut(&self.conversation_id) {
            machine.handle_event(event);
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.release(ChatEvent::Cancelled);
    }
}

/// A claimed, staged generation waiting to be run by the controller.
pub struct PreparedTurn {
    pub(crate) kind: TurnKind,
    pub(crate) conversation_id: ConversationId,
    pub(crate) transcript: Vec<Turn>,
    /// New user node, committed together with the reply. `None` for respond and reroll.
    pub(crate) staged_user: Option<MessageNode>,
    /// User node the reply will hang under.
    pub(crate) user_node_id: NodeId,
    /// Active path through `user_node_id`, applied at commit.
    pub(crate) base_path: Vec<NodeId>,
    pub(crate) cancel: CancellationToken,
    pub(crate) guard: InFlightGuard,
}

impl PreparedTurn {
    pub fn kind(&self) -> TurnKind {
        self.kind
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn user_node_id(&self) -> &str {
        &self.user_node_id
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Token that aborts this turn when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for PreparedTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedTurn")
            .field("kind", &self.kind)
            .field("conversation_id", &self.conversation_id)
            .field("user_node_id", &self.user_node_id)
            .field("turns", &self.transcript.len())
            .finish()
    }
}
