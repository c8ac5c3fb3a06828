//! Conversation controller
//!
//! Owns every conversation and the shared node store. Generation runs in two phases:
//! `prepare_*` claims the conversation and stages the turn without touching the tree, then
//! [`ConversationController::run_turn`] streams the reply and commits the staged user node, the
//! assistant node and the new active path in one step. A failed or cancelled turn commits
//! nothing.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use branchchat_core::tree::{self, BranchAnchor, BranchDirection, TranscriptEntry};
use branchchat_core::{
    ChatEvent, Conversation, ConversationId, ConversationSummary, MessageNode, NodeId, NodeStore,
    Result, Role, Storage, TreeError, Turn, TurnEvent, UpstreamError,
};
use branchchat_llm::LLMProvider;

use crate::config::ControllerConfig;
use crate::stream::handler::consume_llm_stream;
use crate::turn::{CancelTokens, InFlightGuard, Machines, PreparedTurn, TurnKind, TurnOutcome};

/// A conversation together with its rendered active path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub transcript: Vec<TranscriptEntry>,
    pub generating: bool,
}

#[derive(Default)]
struct TreeState {
    nodes: NodeStore,
    conversations: HashMap<ConversationId, Conversation>,
}

impl TreeState {
    fn conversation(&self, conversation_id: &str) -> Result<&Conversation> {
        self.conversations
            .get(conversation_id)
            .ok_or_else(|| TreeError::ConversationNotFound(conversation_id.to_string()))
    }

    fn conversation_mut(&mut self, conversation_id: &str) -> Result<&mut Conversation> {
        self.conversations
            .get_mut(conversation_id)
            .ok_or_else(|| TreeError::ConversationNotFound(conversation_id.to_string()))
    }
}

pub struct ConversationController {
    state: RwLock<TreeState>,
    machines: Machines,
    cancel_tokens: CancelTokens,
    llm: Arc<dyn LLMProvider>,
    storage: Option<Arc<dyn Storage>>,
    config: ControllerConfig,
}

impl ConversationController {
    pub fn new(llm: Arc<dyn LLMProvider>, config: ControllerConfig) -> Self {
        Self {
            state: RwLock::new(TreeState::default()),
            machines: Arc::new(DashMap::new()),
            cancel_tokens: Arc::new(DashMap::new()),
            llm,
            storage: None,
            config,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Hydrate every stored conversation. Returns how many were loaded.
    ///
    /// A stored active path that no longer satisfies the tree invariant is cut back to its
    /// longest valid prefix.
    pub async fn load_from_storage(&self) -> Result<usize> {
        let Some(storage) = self.storage.clone() else {
            return Ok(0);
        };

        let conversations = storage.list_conversations().await?;
        let mut state = self.state.write().await;
        let mut loaded = 0usize;

        for mut conversation in conversations {
            if state.conversations.contains_key(&conversation.id) {
                continue;
            }
            let nodes = storage.load_nodes(&conversation.id).await?;
            let node_count = nodes.len();
            state.nodes.extend(nodes)?;

            let valid = longest_valid_prefix(&state.nodes, &conversation.id, &conversation.active_path);
            if valid < conversation.active_path.len() {
                log::warn!(
                    "[{}] Stored active path broken at position {}, truncating",
                    conversation.id,
                    valid
                );
                let path = conversation.active_path[..valid].to_vec();
                conversation.set_active_path(path);
            }

            log::debug!(
                "[{}] Loaded conversation with {} nodes",
                conversation.id,
                node_count
            );
            state
                .conversations
                .insert(conversation.id.clone(), conversation);
            loaded += 1;
        }

        log::info!("Loaded {} conversations from storage", loaded);
        Ok(loaded)
    }

    // ========== Conversations ==========

    /// Create a conversation from its first user message.
    ///
    /// The user node is committed right away and becomes the whole active path; call
    /// [`Self::prepare_respond`] to generate the first reply.
    pub async fn start(&self, first_message: &str) -> Result<Conversation> {
        let mut conversation =
            Conversation::from_first_message(first_message, self.config.title_max_chars);
        let node = MessageNode::user(first_message, None, conversation.id.clone());

        {
            let mut state = self.state.write().await;
            state.nodes.insert(node.clone())?;
            state.nodes.append_root(&conversation.id, &node.id);
            conversation.set_active_path(vec![node.id.clone()]);
            state
                .conversations
                .insert(conversation.id.clone(), conversation.clone());
        }

        log::info!(
            "[{}] Conversation started: {:?}",
            conversation.id,
            conversation.title
        );
        self.persist(&[node], &conversation).await;
        Ok(conversation)
    }

    /// All conversations, most recently updated first.
    pub async fn list_conversations(&self) -> Vec<ConversationSummary> {
        let state = self.state.read().await;
        let mut summaries: Vec<ConversationSummary> = state
            .conversations
            .values()
            .map(Conversation::summary)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<ConversationView> {
        let state = self.state.read().await;
        let conversation = state.conversation(conversation_id)?.clone();
        let transcript = tree::render_path(&state.nodes, conversation_id, &conversation.active_path);
        Ok(ConversationView {
            conversation,
            transcript,
            generating: self.is_generating(conversation_id),
        })
    }

    /// Every node of a conversation, oldest first.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageNode>> {
        let state = self.state.read().await;
        state.conversation(conversation_id)?;
        Ok(state
            .nodes
            .list_by_conversation(conversation_id)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Linear transcript along the active path.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let state = self.state.read().await;
        let conversation = state.conversation(conversation_id)?;
        Ok(tree::build_history(&state.nodes, &conversation.active_path))
    }

    /// Remove a conversation and all of its nodes, cancelling any generation in flight.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.cancel(conversation_id);

        let removed_nodes = {
            let mut state = self.state.write().await;
            if state.conversations.remove(conversation_id).is_none() {
                return Err(TreeError::ConversationNotFound(conversation_id.to_string()));
            }
            state.nodes.remove_conversation(conversation_id)
        };
        self.machines
            .remove_if(conversation_id, |_, machine| !machine.state().is_busy());

        if let Some(storage) = &self.storage {
            if let Err(error) = storage.delete_conversation(conversation_id).await {
                log::error!("[{}] Failed to delete stored conversation: {}", conversation_id, error);
            }
        }

        log::info!(
            "[{}] Conversation deleted ({} nodes)",
            conversation_id,
            removed_nodes
        );
        Ok(())
    }

    // ========== Tree edits without generation ==========

    /// Add a message node without generating a reply.
    ///
    /// The node is linked under `parent_id`, or registered as a root when there is none. The
    /// active path moves to the new node only when the parent is on it (or the node is a root).
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<MessageNode> {
        let (mut written, conversation) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let on_path = match parent_id {
                Some(parent) => state.conversation(conversation_id)?.contains_on_path(parent),
                None => {
                    state.conversation(conversation_id)?;
                    true
                }
            };
            if let Some(parent) = parent_id {
                state.nodes.get_in_conversation(conversation_id, parent)?;
            }

            let node = state.nodes.create_node(
                role,
                content,
                parent_id.map(str::to_string),
                conversation_id,
            )?;
            let mut written = vec![node.clone()];
            match parent_id {
                Some(parent) => {
                    state.nodes.append_child(parent, &node.id)?;
                    written.push(state.nodes.get_node(parent)?.clone());
                }
                None => {
                    state.nodes.append_root(conversation_id, &node.id);
                }
            }

            let new_path = if on_path {
                let current = &state.conversation(conversation_id)?.active_path;
                Some(tree::extend_path(&state.nodes, current, parent_id, &node.id)?)
            } else {
                None
            };
            let conversation = state.conversation_mut(conversation_id)?;
            match new_path {
                Some(path) => conversation.set_active_path(path),
                None => conversation.updated_at = chrono::Utc::now(),
            }
            (written, conversation.clone())
        };

        log::debug!(
            "[{}] Appended {:?} node {}",
            conversation_id,
            role,
            written[0].id
        );
        self.persist(&written, &conversation).await;
        Ok(written.swap_remove(0))
    }

    /// Replace the active path with a client-supplied one.
    pub async fn set_active_path(
        &self,
        conversation_id: &str,
        path: Vec<NodeId>,
    ) -> Result<Conversation> {
        let conversation = {
            let mut state = self.state.write().await;
            state.conversation(conversation_id)?;
            tree::validate_path(&state.nodes, conversation_id, &path)?;
            let conversation = state.conversation_mut(conversation_id)?;
            conversation.set_active_path(path);
            conversation.clone()
        };
        self.persist(&[], &conversation).await;
        Ok(conversation)
    }

    // ========== Branches ==========

    /// Sibling branches under `node_id`, or the root-level branches when it is `None`.
    pub async fn list_branches(
        &self,
        conversation_id: &str,
        node_id: Option<&str>,
    ) -> Result<Vec<NodeId>> {
        let state = self.state.read().await;
        state.conversation(conversation_id)?;
        if let Some(id) = node_id {
            if state
                .nodes
                .get(id)
                .is_some_and(|node| node.conversation_id != conversation_id)
            {
                return Ok(Vec::new());
            }
        }
        Ok(tree::list_branches(
            &state.nodes,
            BranchAnchor::from_parent(conversation_id, node_id),
        ))
    }

    /// Which branch the active path follows under `node_id`, and how many there are.
    pub async fn branch_position(
        &self,
        conversation_id: &str,
        node_id: Option<&str>,
    ) -> Result<Option<(usize, usize)>> {
        let state = self.state.read().await;
        let conversation = state.conversation(conversation_id)?;
        Ok(tree::branch_position(
            &state.nodes,
            &conversation.active_path,
            BranchAnchor::from_parent(conversation_id, node_id),
        ))
    }

    pub async fn select_branch(
        &self,
        conversation_id: &str,
        node_id: Option<&str>,
        branch_index: usize,
    ) -> Result<Vec<NodeId>> {
        self.rewrite_path(conversation_id, |nodes, path| {
            tree::select_branch(
                nodes,
                path,
                BranchAnchor::from_parent(conversation_id, node_id),
                branch_index,
            )
        })
        .await
    }

    pub async fn cycle_branch(
        &self,
        conversation_id: &str,
        node_id: Option<&str>,
        direction: BranchDirection,
    ) -> Result<Vec<NodeId>> {
        self.rewrite_path(conversation_id, |nodes, path| {
            tree::cycle_branch(
                nodes,
                path,
                BranchAnchor::from_parent(conversation_id, node_id),
                direction,
            )
        })
        .await
    }

    async fn rewrite_path<F>(&self, conversation_id: &str, rewrite: F) -> Result<Vec<NodeId>>
    where
        F: FnOnce(&NodeStore, &[NodeId]) -> Result<Vec<NodeId>>,
    {
        let conversation = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let current = state.conversation(conversation_id)?;
            let path = rewrite(&state.nodes, &current.active_path)?;
            let conversation = state.conversation_mut(conversation_id)?;
            conversation.set_active_path(path);
            conversation.clone()
        };

        log::info!(
            "[{}] Branch selected, active path length {}",
            conversation_id,
            conversation.active_path.len()
        );
        self.persist(&[], &conversation).await;
        Ok(conversation.active_path)
    }

    // ========== Generation ==========

    pub fn is_generating(&self, conversation_id: &str) -> bool {
        self.machines
            .get(conversation_id)
            .is_some_and(|machine| machine.state().is_busy())
    }

    /// Cancel the generation in flight for a conversation. Returns whether one was running.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.cancel_tokens.get(conversation_id) {
            Some(token) => {
                token.cancel();
                log::info!("[{}] Cancellation requested", conversation_id);
                true
            }
            None => false,
        }
    }

    /// Claim a turn that answers the user node at the tail of the active path.
    pub async fn prepare_respond(&self, conversation_id: &str) -> Result<PreparedTurn> {
        let state = self.state.read().await;
        let conversation = state.conversation(conversation_id)?;
        let tail = conversation
            .tail()
            .cloned()
            .ok_or_else(|| TreeError::InvalidPath("conversation has no messages".to_string()))?;
        require_role(state.nodes.get_node(&tail)?, Role::User)?;
        check_path(&state.nodes, conversation)?;

        let (guard, cancel) = self.claim(conversation_id)?;
        let path = conversation.active_path.clone();
        Ok(PreparedTurn {
            kind: TurnKind::Respond,
            conversation_id: conversation_id.to_string(),
            transcript: tree::build_history(&state.nodes, &path),
            staged_user: None,
            user_node_id: tail,
            base_path: path,
            cancel,
            guard,
        })
    }

    /// Claim a turn that adds `content` under `parent_id` (default: the active path's tail).
    pub async fn prepare_send(
        &self,
        conversation_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<PreparedTurn> {
        let state = self.state.read().await;
        let conversation = state.conversation(conversation_id)?;
        let parent = parent_id
            .map(str::to_string)
            .or_else(|| conversation.tail().cloned());
        if let Some(parent) = &parent {
            state.nodes.get_in_conversation(conversation_id, parent)?;
        }
        check_path(&state.nodes, conversation)?;

        let (guard, cancel) = self.claim(conversation_id)?;
        let user = MessageNode::user(content, parent.clone(), conversation_id);
        let base_path = tree::extend_path(
            &state.nodes,
            &conversation.active_path,
            parent.as_deref(),
            &user.id,
        )?;
        let transcript = staged_transcript(&state.nodes, &base_path, &user);

        Ok(PreparedTurn {
            kind: TurnKind::Send,
            conversation_id: conversation_id.to_string(),
            transcript,
            user_node_id: user.id.clone(),
            staged_user: Some(user),
            base_path,
            cancel,
            guard,
        })
    }

    /// Claim a turn that replaces user node `node_id` with a sibling holding `content`.
    pub async fn prepare_edit(
        &self,
        conversation_id: &str,
        node_id: &str,
        content: &str,
    ) -> Result<PreparedTurn> {
        let state = self.state.read().await;
        let conversation = state.conversation(conversation_id)?;
        let edited = state.nodes.get_in_conversation(conversation_id, node_id)?;
        require_role(edited, Role::User)?;

        let prefix = match conversation.active_path.iter().position(|id| id == node_id) {
            Some(index) => conversation.active_path[..index].to_vec(),
            None => match &edited.parent_id {
                Some(parent) => tree::path_to(&state.nodes, parent)?,
                None => Vec::new(),
            },
        };

        let (guard, cancel) = self.claim(conversation_id)?;
        let user = MessageNode::user(content, edited.parent_id.clone(), conversation_id);
        let mut base_path = prefix;
        base_path.push(user.id.clone());
        let transcript = staged_transcript(&state.nodes, &base_path, &user);

        Ok(PreparedTurn {
            kind: TurnKind::Edit,
            conversation_id: conversation_id.to_string(),
            transcript,
            user_node_id: user.id.clone(),
            staged_user: Some(user),
            base_path,
            cancel,
            guard,
        })
    }

    /// Claim a turn that regenerates assistant node `node_id` as a new sibling.
    pub async fn prepare_reroll(&self, conversation_id: &str, node_id: &str) -> Result<PreparedTurn> {
        let state = self.state.read().await;
        let conversation = state.conversation(conversation_id)?;
        let rerolled = state.nodes.get_in_conversation(conversation_id, node_id)?;
        require_role(rerolled, Role::Assistant)?;
        let parent = rerolled.parent_id.clone().ok_or_else(|| {
            TreeError::InvariantViolation(format!("assistant node {node_id} has no parent"))
        })?;
        require_role(state.nodes.get_in_conversation(conversation_id, &parent)?, Role::User)?;

        let base_path = match conversation.active_path.iter().position(|id| *id == parent) {
            Some(index) => conversation.active_path[..=index].to_vec(),
            None => tree::path_to(&state.nodes, &parent)?,
        };

        let (guard, cancel) = self.claim(conversation_id)?;
        Ok(PreparedTurn {
            kind: TurnKind::Reroll,
            conversation_id: conversation_id.to_string(),
            transcript: tree::build_history(&state.nodes, &base_path),
            staged_user: None,
            user_node_id: parent,
            base_path,
            cancel,
            guard,
        })
    }

    /// Stream the reply for a prepared turn and commit it.
    ///
    /// Emits `Started`, then a `Token` per fragment, then `Complete` or `Error`. Failures and
    /// cancellation leave the tree and the active path exactly as they were. The conversation is
    /// idle again before the terminal event goes out.
    pub async fn run_turn(
        &self,
        turn: PreparedTurn,
        event_tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome> {
        let PreparedTurn {
            kind,
            conversation_id,
            transcript,
            staged_user,
            user_node_id,
            base_path,
            cancel,
            guard,
        } = turn;

        log::info!(
            "[{}] {:?} turn started: {} turns via {}",
            conversation_id,
            kind,
            transcript.len(),
            self.llm.name()
        );
        let _ = event_tx
            .send(TurnEvent::Started {
                conversation_id: conversation_id.clone(),
                user_node_id: user_node_id.clone(),
            })
            .await;

        let reply = match self
            .stream_reply(&transcript, event_tx, &cancel, &conversation_id)
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                let event = match &error {
                    UpstreamError::Cancelled => ChatEvent::Cancelled,
                    other => ChatEvent::StreamFailed {
                        error: other.to_string(),
                    },
                };
                log::warn!("[{}] Upstream failure: {}", conversation_id, error);
                guard.finish(event);
                self.emit_failure(event_tx, &error.to_string()).await;
                return Err(TreeError::UpstreamFailure(error));
            }
        };

        match self
            .commit_turn(&conversation_id, staged_user, &user_node_id, base_path, reply, &cancel)
            .await
        {
            Ok(outcome) => {
                guard.finish(ChatEvent::StreamCompleted);
                let _ = event_tx
                    .send(TurnEvent::Complete {
                        assistant_node_id: outcome.assistant_node_id.clone(),
                        active_path: outcome.active_path.clone(),
                    })
                    .await;
                Ok(outcome)
            }
            Err(error) => {
                log::error!("[{}] Commit failed: {}", conversation_id, error);
                guard.finish(ChatEvent::StreamFailed {
                    error: error.to_string(),
                });
                self.emit_failure(event_tx, &error.to_string()).await;
                Err(error)
            }
        }
    }

    /// Prepare and run a respond turn.
    pub async fn respond(
        &self,
        conversation_id: &str,
        event_tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome> {
        let turn = self.prepare_respond(conversation_id).await?;
        self.run_turn(turn, event_tx).await
    }

    /// Prepare and run a send turn.
    pub async fn send(
        &self,
        conversation_id: &str,
        content: &str,
        parent_id: Option<&str>,
        event_tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome> {
        let turn = self.prepare_send(conversation_id, content, parent_id).await?;
        self.run_turn(turn, event_tx).await
    }

    /// Prepare and run an edit turn.
    pub async fn edit(
        &self,
        conversation_id: &str,
        node_id: &str,
        content: &str,
        event_tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome> {
        let turn = self.prepare_edit(conversation_id, node_id, content).await?;
        self.run_turn(turn, event_tx).await
    }

    /// Prepare and run a reroll turn.
    pub async fn reroll(
        &self,
        conversation_id: &str,
        node_id: &str,
        event_tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome> {
        let turn = self.prepare_reroll(conversation_id, node_id).await?;
        self.run_turn(turn, event_tx).await
    }

    fn claim(&self, conversation_id: &str) -> Result<(InFlightGuard, CancellationToken)> {
        let cancel = CancellationToken::new();
        let guard = InFlightGuard::acquire(
            &self.machines,
            &self.cancel_tokens,
            conversation_id,
            cancel.clone(),
        )?;
        Ok((guard, cancel))
    }

    async fn stream_reply(
        &self,
        transcript: &[Turn],
        event_tx: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
        conversation_id: &str,
    ) -> std::result::Result<String, UpstreamError> {
        let request = self.llm.chat_stream(
            transcript,
            Some(self.config.max_output_tokens),
            self.config.model.as_deref(),
        );
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            stream = request => stream?,
        };

        let staged = consume_llm_stream(stream, event_tx, cancel, conversation_id).await?;
        Ok(staged.content)
    }

    async fn emit_failure(&self, event_tx: &mpsc::Sender<TurnEvent>, message: &str) {
        let _ = event_tx
            .send(TurnEvent::Error {
                message: message.to_string(),
                failure_marker: Some(self.config.failure_marker.clone()),
            })
            .await;
    }

    async fn commit_turn(
        &self,
        conversation_id: &str,
        staged_user: Option<MessageNode>,
        user_node_id: &str,
        mut base_path: Vec<NodeId>,
        reply: String,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let assistant = MessageNode::assistant(reply, Some(user_node_id.to_string()), conversation_id);

        let (written, conversation) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.conversation(conversation_id)?;
            if cancel.is_cancelled() {
                return Err(TreeError::UpstreamFailure(UpstreamError::Cancelled));
            }

            for id in staged_user.iter().map(|user| &user.id).chain([&assistant.id]) {
                if state.nodes.contains(id) {
                    return Err(TreeError::InvariantViolation(format!(
                        "staged node id {id} already exists"
                    )));
                }
            }
            let staged = staged_user.is_some();
            let user_parent = staged_user.as_ref().and_then(|user| user.parent_id.clone());
            match (&staged_user, &user_parent) {
                (Some(_), Some(parent)) => {
                    state.nodes.get_in_conversation(conversation_id, parent)?;
                }
                (None, _) => {
                    state.nodes.get_in_conversation(conversation_id, user_node_id)?;
                }
                (Some(_), None) => {}
            }

            if let Some(user) = staged_user {
                state.nodes.insert(user)?;
                match &user_parent {
                    Some(parent) => {
                        state.nodes.append_child(parent, user_node_id)?;
                    }
                    None => {
                        state.nodes.append_root(conversation_id, user_node_id);
                    }
                }
            }
            state.nodes.insert(assistant.clone())?;
            state.nodes.append_child(user_node_id, &assistant.id)?;

            // New records first, then the parents whose children changed.
            let mut written = Vec::with_capacity(3);
            if staged {
                written.push(state.nodes.get_node(user_node_id)?.clone());
            }
            written.push(assistant.clone());
            match (staged, &user_parent) {
                (true, Some(parent)) => written.push(state.nodes.get_node(parent)?.clone()),
                (false, _) => written.push(state.nodes.get_node(user_node_id)?.clone()),
                (true, None) => {}
            }

            base_path.push(assistant.id.clone());
            let conversation = state.conversation_mut(conversation_id)?;
            conversation.set_active_path(base_path);
            (written, conversation.clone())
        };

        log::info!(
            "[{}] Turn committed: user={}, assistant={}, path length {}",
            conversation_id,
            user_node_id,
            assistant.id,
            conversation.active_path.len()
        );
        if !self.persist(&written, &conversation).await {
            return Err(TreeError::ConversationNotFound(conversation_id.to_string()));
        }

        Ok(TurnOutcome {
            conversation_id: conversation_id.to_string(),
            user_node_id: user_node_id.to_string(),
            assistant_node_id: assistant.id,
            active_path: conversation.active_path,
        })
    }

    /// Write node records, then the conversation. Failures are logged; memory stays
    /// authoritative.
    ///
    /// Returns `false` when the conversation was deleted while writing. Records that landed after
    /// the deletion are removed again, so a deleted conversation never reappears on reload.
    async fn persist(&self, nodes: &[MessageNode], conversation: &Conversation) -> bool {
        let Some(storage) = &self.storage else {
            return self.is_live(&conversation.id).await;
        };

        let mut written = true;
        for node in nodes {
            if !self.is_live(&conversation.id).await {
                break;
            }
            if let Err(error) = storage.append_node(node).await {
                log::error!(
                    "[{}] Failed to persist node {}: {}",
                    node.conversation_id,
                    node.id,
                    error
                );
                written = false;
                break;
            }
        }

        if written && self.is_live(&conversation.id).await {
            if let Err(error) = storage.save_conversation(conversation).await {
                log::error!(
                    "[{}] Failed to persist conversation: {}",
                    conversation.id,
                    error
                );
            }
        }

        if self.is_live(&conversation.id).await {
            return true;
        }

        log::warn!(
            "[{}] Conversation deleted while persisting, removing stored records",
            conversation.id
        );
        if let Err(error) = storage.delete_conversation(&conversation.id).await {
            log::error!(
                "[{}] Failed to remove stored conversation: {}",
                conversation.id,
                error
            );
        }
        false
    }

    async fn is_live(&self, conversation_id: &str) -> bool {
        self.state
            .read()
            .await
            .conversations
            .contains_key(conversation_id)
    }
}

fn require_role(node: &MessageNode, expected: Role) -> Result<()> {
    if node.role != expected {
        return Err(TreeError::WrongRole {
            node_id: node.id.clone(),
            expected,
        });
    }
    Ok(())
}

/// The stored path must be sound before a generation builds on it.
fn check_path(nodes: &NodeStore, conversation: &Conversation) -> Result<()> {
    tree::validate_path(nodes, &conversation.id, &conversation.active_path)
        .map_err(|error| TreeError::InvariantViolation(error.to_string()))
}

/// Transcript for a path whose last element is the staged (not yet stored) user node.
fn staged_transcript(
    nodes: &NodeStore,
    base_path: &[NodeId],
    user: &MessageNode,
) -> Vec<Turn> {
    let prefix = &base_path[..base_path.len().saturating_sub(1)];
    let mut transcript = tree::build_history(nodes, prefix);
    transcript.push(user.to_turn());
    transcript
}

fn longest_valid_prefix(nodes: &NodeStore, conversation_id: &str, path: &[NodeId]) -> usize {
    (0..=path.len())
        .rev()
        .find(|&len| tree::validate_path(nodes, conversation_id, &path[..len]).is_ok())
        .unwrap_or(0)
}
