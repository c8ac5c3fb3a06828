//! NodeStore - arena of message nodes keyed by id
//!
//! Holds every node of every conversation. Nodes reference each other only through ids, so
//! the store is the single owner of the tree. Apart from link updates the store is
//! append-only; whole conversations are removed at once.

use std::collections::HashMap;

use crate::conversation::types::{ConversationId, MessageNode, NodeId, Role};
use crate::error::TreeError;
use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, MessageNode>,
    /// Root-level branches per conversation, in creation order.
    roots: HashMap<ConversationId, Vec<NodeId>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from previously persisted nodes.
    ///
    /// Nodes must be given in creation order; that order defines root branch indices.
    pub fn from_nodes(nodes: impl IntoIterator<Item = MessageNode>) -> Result<Self> {
        let mut store = Self::new();
        store.extend(nodes)?;
        Ok(store)
    }

    /// Add persisted nodes, registering parentless ones as roots in the order given.
    pub fn extend(&mut self, nodes: impl IntoIterator<Item = MessageNode>) -> Result<()> {
        for node in nodes {
            let root = node
                .is_root()
                .then(|| (node.conversation_id.clone(), node.id.clone()));
            self.insert(node)?;
            if let Some((conversation_id, node_id)) = root {
                self.append_root(&conversation_id, &node_id);
            }
        }
        Ok(())
    }

    /// Create a node with a fresh id and no children, and add it to the store.
    ///
    /// The node is not linked under its parent; call [`NodeStore::append_child`] (or
    /// [`NodeStore::append_root`]) afterwards.
    pub fn create_node(
        &mut self,
        role: Role,
        content: impl Into<String>,
        parent_id: Option<NodeId>,
        conversation_id: impl Into<ConversationId>,
    ) -> Result<MessageNode> {
        let node = MessageNode::new(role, content, parent_id, conversation_id);
        self.insert(node.clone())?;
        Ok(node)
    }

    /// Add an already-built node. A node whose id is taken is rejected.
    pub fn insert(&mut self, node: MessageNode) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::InvariantViolation(format!(
                "node id {} already exists",
                node.id
            )));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Link `child_id` under `parent_id`. Returns `false` if it was already linked.
    pub fn append_child(&mut self, parent_id: &str, child_id: &str) -> Result<bool> {
        if !self.nodes.contains_key(parent_id) {
            return Err(TreeError::NodeNotFound(parent_id.to_string()));
        }
        let child = self
            .nodes
            .get(child_id)
            .ok_or_else(|| TreeError::NodeNotFound(child_id.to_string()))?;

        if child.parent_id.as_deref() != Some(parent_id) {
            return Err(TreeError::InvariantViolation(format!(
                "node {child_id} does not name {parent_id} as its parent"
            )));
        }
        if self.is_ancestor(child_id, parent_id) {
            return Err(TreeError::InvariantViolation(format!(
                "linking {child_id} under {parent_id} would create a cycle"
            )));
        }

        let parent = self
            .nodes
            .get_mut(parent_id)
            .ok_or_else(|| TreeError::NodeNotFound(parent_id.to_string()))?;
        if parent.children.iter().any(|id| id == child_id) {
            return Ok(false);
        }
        parent.children.push(child_id.to_string());
        Ok(true)
    }

    /// Register a parentless node as a root branch of its conversation.
    pub fn append_root(&mut self, conversation_id: &str, node_id: &str) -> bool {
        let roots = self.roots.entry(conversation_id.to_string()).or_default();
        if roots.iter().any(|id| id == node_id) {
            return false;
        }
        roots.push(node_id.to_string());
        true
    }

    pub fn get_node(&self, id: &str) -> Result<&MessageNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| TreeError::NodeNotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&MessageNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Fetch a node and check it belongs to `conversation_id`.
    pub fn get_in_conversation(&self, conversation_id: &str, id: &str) -> Result<&MessageNode> {
        match self.nodes.get(id) {
            Some(node) if node.conversation_id == conversation_id => Ok(node),
            _ => Err(TreeError::NodeNotFound(id.to_string())),
        }
    }

    /// All nodes of a conversation, oldest first.
    pub fn list_by_conversation(&self, conversation_id: &str) -> Vec<&MessageNode> {
        let mut nodes: Vec<&MessageNode> = self
            .nodes
            .values()
            .filter(|node| node.conversation_id == conversation_id)
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        nodes
    }

    pub fn roots(&self, conversation_id: &str) -> &[NodeId] {
        self.roots
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop every node of a conversation. Returns how many nodes were removed.
    pub fn remove_conversation(&mut self, conversation_id: &str) -> usize {
        let before = self.nodes.len();
        self.nodes
            .retain(|_, node| node.conversation_id != conversation_id);
        self.roots.remove(conversation_id);
        before - self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if `candidate` appears in the ancestor chain of `node_id` (or is the node itself).
    fn is_ancestor(&self, candidate: &str, node_id: &str) -> bool {
        let mut current = Some(node_id);
        let mut steps = 0usize;
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return true;
            }
            current = self.nodes.get(id).and_then(|node| node.parent_id.as_deref());
        }
        false
    }
}
