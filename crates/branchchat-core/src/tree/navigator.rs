//! Tree navigation - pure functions over a node store snapshot
//!
//! Nothing here mutates the store. Every function takes the store and a path by reference
//! and returns fresh values, so repeated calls on the same snapshot agree.

use serde::{Deserialize, Serialize};

use crate::conversation::types::{NodeId, Role, Turn};
use crate::error::TreeError;
use crate::tree::store::NodeStore;
use crate::Result;

/// Where a set of sibling branches hangs: under a node, or at the conversation's root level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchAnchor<'a> {
    Root { conversation_id: &'a str },
    Node(&'a str),
}

impl<'a> BranchAnchor<'a> {
    /// Anchor for an optional parent id; `None` means the root level.
    pub fn from_parent(conversation_id: &'a str, parent_id: Option<&'a str>) -> Self {
        match parent_id {
            Some(id) => Self::Node(id),
            None => Self::Root { conversation_id },
        }
    }
}

/// A transcript entry with enough branch context to render sibling navigation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    pub node_id: NodeId,
    pub role: Role,
    pub content: String,
    pub branch_index: usize,
    pub branch_count: usize,
}

/// Linear transcript along `path`.
///
/// Stops at the first id that does not resolve and returns what was collected so far.
pub fn build_history(store: &NodeStore, path: &[NodeId]) -> Vec<Turn> {
    let mut history = Vec::with_capacity(path.len());
    for id in path {
        let Some(node) = store.get(id) else {
            log::warn!("Message node {} not found while building history", id);
            break;
        };
        history.push(node.to_turn());
    }
    history
}

/// Child ids at `anchor`, in creation order. Empty when the anchor is unknown.
pub fn list_branches(store: &NodeStore, anchor: BranchAnchor<'_>) -> Vec<NodeId> {
    match anchor {
        BranchAnchor::Root { conversation_id } => store.roots(conversation_id).to_vec(),
        BranchAnchor::Node(id) => store
            .get(id)
            .map(|node| node.children.clone())
            .unwrap_or_default(),
    }
}

/// Root-to-node chain of ids ending at `node_id`.
pub fn path_to(store: &NodeStore, node_id: &str) -> Result<Vec<NodeId>> {
    let mut chain = Vec::new();
    let mut current = Some(node_id.to_string());

    while let Some(id) = current {
        if chain.len() > store.len() {
            return Err(TreeError::InvariantViolation(format!(
                "cycle detected in ancestry of {node_id}"
            )));
        }
        let node = store.get_node(&id)?;
        current = node.parent_id.clone();
        chain.push(id);
    }

    chain.reverse();
    Ok(chain)
}

/// Path after attaching `new_id` under `parent_id`.
///
/// When the parent is on `path` the suffix after it is dropped before appending. A parent
/// elsewhere in the tree retargets the path to that parent's lineage. No parent starts a new
/// root-level path.
pub fn extend_path(
    store: &NodeStore,
    path: &[NodeId],
    parent_id: Option<&str>,
    new_id: &str,
) -> Result<Vec<NodeId>> {
    let mut extended = match parent_id {
        None => Vec::new(),
        Some(parent) => match path.iter().position(|id| id == parent) {
            Some(index) => path[..=index].to_vec(),
            None => path_to(store, parent)?,
        },
    };
    extended.push(new_id.to_string());
    Ok(extended)
}

/// Check the active-path invariant for `conversation_id`.
///
/// Every id must resolve inside the conversation, the first must be a root and each next id
/// must be a child of the previous one. An empty path is valid.
pub fn validate_path(store: &NodeStore, conversation_id: &str, path: &[NodeId]) -> Result<()> {
    let mut previous: Option<&str> = None;

    for id in path {
        let node = match store.get(id) {
            Some(node) if node.conversation_id == conversation_id => node,
            Some(_) => {
                return Err(TreeError::InvalidPath(format!(
                    "node {id} belongs to another conversation"
                )))
            }
            None => return Err(TreeError::InvalidPath(format!("node {id} does not exist"))),
        };

        match previous {
            None if !node.is_root() => {
                return Err(TreeError::InvalidPath(format!(
                    "path starts at {id}, which is not a root"
                )))
            }
            Some(parent) => {
                let linked = store
                    .get(parent)
                    .is_some_and(|p| p.children.iter().any(|child| child == id));
                if !linked {
                    return Err(TreeError::InvalidPath(format!(
                        "node {id} is not a child of {parent}"
                    )));
                }
            }
            None => {}
        }

        previous = Some(id.as_str());
    }

    Ok(())
}

/// Transcript along `path` annotated with each node's position among its siblings.
pub fn render_path(store: &NodeStore, conversation_id: &str, path: &[NodeId]) -> Vec<TranscriptEntry> {
    let mut entries = Vec::with_capacity(path.len());
    for id in path {
        let Some(node) = store.get(id) else {
            break;
        };
        let anchor = BranchAnchor::from_parent(conversation_id, node.parent_id.as_deref());
        let siblings = list_branches(store, anchor);
        let branch_index = siblings.iter().position(|s| s == id).unwrap_or(0);
        entries.push(TranscriptEntry {
            node_id: node.id.clone(),
            role: node.role,
            content: node.content.clone(),
            branch_index,
            branch_count: siblings.len().max(1),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::types::MessageNode;

    /// root(u) -> a(a) -> u2(u)
    ///         \-> a_alt(a)
    fn sample() -> (NodeStore, Vec<NodeId>, NodeId) {
        let mut store = NodeStore::new();
        let root = store.create_node(Role::User, "hello", None, "c1").unwrap();
        store.append_root("c1", &root.id);
        let a = store
            .create_node(Role::Assistant, "hi", Some(root.id.clone()), "c1")
            .unwrap();
        store.append_child(&root.id, &a.id).unwrap();
        let u2 = store
            .create_node(Role::User, "how are you", Some(a.id.clone()), "c1")
            .unwrap();
        store.append_child(&a.id, &u2.id).unwrap();
        let alt = store
            .create_node(Role::Assistant, "hey", Some(root.id.clone()), "c1")
            .unwrap();
        store.append_child(&root.id, &alt.id).unwrap();

        (store, vec![root.id, a.id, u2.id], alt.id)
    }

    #[test]
    fn build_history_follows_path() {
        let (store, path, _) = sample();
        let history = build_history(&store, &path);
        assert_eq!(
            history,
            vec![
                Turn::user("hello"),
                Turn::assistant("hi"),
                Turn::user("how are you")
            ]
        );
    }

    #[test]
    fn build_history_stops_at_missing_id() {
        let (store, mut path, _) = sample();
        path.insert(2, "missing".to_string());
        let history = build_history(&store, &path);
        assert_eq!(history.len(), 2);
        assert!(history.len() <= path.len());
    }

    #[test]
    fn build_history_is_idempotent() {
        let (store, path, _) = sample();
        assert_eq!(build_history(&store, &path), build_history(&store, &path));
        assert!(build_history(&store, &[]).is_empty());
    }

    #[test]
    fn list_branches_returns_children_in_order() {
        let (store, path, alt) = sample();
        assert_eq!(
            list_branches(&store, BranchAnchor::Node(&path[0])),
            vec![path[1].clone(), alt]
        );
        assert!(list_branches(&store, BranchAnchor::Node(&path[2])).is_empty());
        assert!(list_branches(&store, BranchAnchor::Node("missing")).is_empty());
        assert_eq!(
            list_branches(&store, BranchAnchor::Root { conversation_id: "c1" }),
            vec![path[0].clone()]
        );
    }

    #[test]
    fn path_to_walks_ancestors() {
        let (store, path, alt) = sample();
        assert_eq!(path_to(&store, &path[2]).unwrap(), path);
        assert_eq!(path_to(&store, &alt).unwrap(), vec![path[0].clone(), alt]);
        assert!(path_to(&store, "missing").unwrap_err().is_not_found());
    }

    #[test]
    fn extend_path_truncates_after_parent() {
        let (store, path, _) = sample();
        let extended = extend_path(&store, &path, Some(&path[0]), "new").unwrap();
        assert_eq!(extended, vec![path[0].clone(), "new".to_string()]);

        let at_tail = extend_path(&store, &path, Some(&path[2]), "new").unwrap();
        assert_eq!(at_tail.len(), 4);
    }

    #[test]
    fn extend_path_retargets_to_off_path_parent() {
        let (store, path, alt) = sample();
        let extended = extend_path(&store, &path, Some(&alt), "new").unwrap();
        assert_eq!(extended, vec![path[0].clone(), alt, "new".to_string()]);
    }

    #[test]
    fn extend_path_without_parent_starts_root_path() {
        let (store, path, _) = sample();
        assert_eq!(extend_path(&store, &path, None, "new").unwrap(), vec!["new"]);
    }

    #[test]
    fn validate_path_accepts_linked_chain() {
        let (store, path, _) = sample();
        assert!(validate_path(&store, "c1", &path).is_ok());
        assert!(validate_path(&store, "c1", &[]).is_ok());
    }

    #[test]
    fn validate_path_rejects_broken_chains() {
        let (mut store, path, alt) = sample();
        assert!(validate_path(&store, "c1", &[alt.clone()]).is_err());
        assert!(validate_path(&store, "c1", &[path[0].clone(), path[2].clone()]).is_err());
        assert!(validate_path(&store, "c2", &path).is_err());
        assert!(validate_path(&store, "c1", &["missing".to_string()]).is_err());

        let foreign = MessageNode::user("x", None, "c2");
        store.insert(foreign.clone()).unwrap();
        let error = validate_path(&store, "c1", &[foreign.id]).unwrap_err();
        assert_eq!(error.kind(), "invalid_path");
    }

    #[test]
    fn render_path_reports_branch_positions() {
        let (store, path, alt) = sample();
        let entries = render_path(&store, "c1", &[path[0].clone(), alt]);
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].branch_index, entries[0].branch_count), (0, 1));
        assert_eq!((entries[1].branch_index, entries[1].branch_count), (1, 2));
        assert_eq!(entries[1].content, "hey");
    }
}
