//! Branch selection over the active path
//!
//! Selecting a branch never creates nodes. It only rewrites the active path: the prefix up to
//! the anchor is kept, then the chosen child, then that child's first child when it has one.

use serde::{Deserialize, Serialize};

use crate::conversation::types::NodeId;
use crate::error::TreeError;
use crate::tree::navigator::{list_branches, BranchAnchor};
use crate::tree::store::NodeStore;
use crate::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BranchDirection {
    Previous,
    Next,
}

/// Number of path entries kept in front of the branch chosen at `anchor`.
fn prefix_len(path: &[NodeId], anchor: BranchAnchor<'_>) -> Result<usize> {
    match anchor {
        BranchAnchor::Root { .. } => Ok(0),
        BranchAnchor::Node(node_id) => path
            .iter()
            .position(|id| id == node_id)
            .map(|index| index + 1)
            .ok_or_else(|| {
                TreeError::InvalidPath(format!("node {node_id} is not on the active path"))
            }),
    }
}

/// New active path that follows child `branch_index` at `anchor`.
pub fn select_branch(
    store: &NodeStore,
    path: &[NodeId],
    anchor: BranchAnchor<'_>,
    branch_index: usize,
) -> Result<Vec<NodeId>> {
    let keep = prefix_len(path, anchor)?;
    let branches = list_branches(store, anchor);

    let chosen = branches.get(branch_index).ok_or(TreeError::OutOfRange {
        index: branch_index,
        count: branches.len(),
    })?;

    let mut selected = path[..keep].to_vec();
    selected.push(chosen.clone());
    if let Some(first_child) = store.get_node(chosen)?.children.first() {
        selected.push(first_child.clone());
    }
    Ok(selected)
}

/// Index of the branch the path follows at `anchor`, and the sibling count there.
///
/// `None` when the anchor is not on the path or the path ends at the anchor.
pub fn branch_position(
    store: &NodeStore,
    path: &[NodeId],
    anchor: BranchAnchor<'_>,
) -> Option<(usize, usize)> {
    let keep = prefix_len(path, anchor).ok()?;
    let current = path.get(keep)?;
    let branches = list_branches(store, anchor);
    let index = branches.iter().position(|id| id == current)?;
    Some((index, branches.len()))
}

/// Move to the previous or next sibling at `anchor`, wrapping around.
pub fn cycle_branch(
    store: &NodeStore,
    path: &[NodeId],
    anchor: BranchAnchor<'_>,
    direction: BranchDirection,
) -> Result<Vec<NodeId>> {
    prefix_len(path, anchor)?;
    let count = list_branches(store, anchor).len();
    if count == 0 {
        return Err(TreeError::OutOfRange { index: 0, count: 0 });
    }

    let target = match (branch_position(store, path, anchor), direction) {
        (Some((index, _)), BranchDirection::Next) => (index + 1) % count,
        (Some((index, _)), BranchDirection::Previous) => (index + count - 1) % count,
        (None, BranchDirection::Next) => 0,
        (None, BranchDirection::Previous) => count - 1,
    };

    select_branch(store, path, anchor, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::types::Role;

    /// u1 -> a1 -> u2
    ///    \-> a2 -> u3
    ///    \-> a3
    struct Fixture {
        store: NodeStore,
        u1: NodeId,
        a1: NodeId,
        a2: NodeId,
        a3: NodeId,
        u2: NodeId,
        u3: NodeId,
    }

    fn child(store: &mut NodeStore, role: Role, content: &str, parent: Option<&NodeId>) -> NodeId {
        let node = store
            .create_node(role, content, parent.cloned(), "c1")
            .unwrap();
        match parent {
            Some(parent) => {
                store.append_child(parent, &node.id).unwrap();
            }
            None => {
                store.append_root("c1", &node.id);
            }
        }
        node.id
    }

    fn fixture() -> Fixture {
        let mut store = NodeStore::new();
        let u1 = child(&mut store, Role::User, "q", None);
        let a1 = child(&mut store, Role::Assistant, "r1", Some(&u1));
        let u2 = child(&mut store, Role::User, "follow", Some(&a1));
        let a2 = child(&mut store, Role::Assistant, "r2", Some(&u1));
        let u3 = child(&mut store, Role::User, "other", Some(&a2));
        let a3 = child(&mut store, Role::Assistant, "r3", Some(&u1));

        Fixture {
            store,
            u1,
            a1,
            a2,
            a3,
            u2,
            u3,
        }
    }

    #[test]
    fn select_branch_descends_one_level() {
        let f = fixture();
        let path = vec![f.u1.clone(), f.a1.clone(), f.u2.clone()];
        let selected = select_branch(&f.store, &path, BranchAnchor::Node(&f.u1), 1).unwrap();
        assert_eq!(selected, vec![f.u1.clone(), f.a2.clone(), f.u3.clone()]);

        let leaf = select_branch(&f.store, &path, BranchAnchor::Node(&f.u1), 2).unwrap();
        assert_eq!(leaf, vec![f.u1.clone(), f.a3.clone()]);
    }

    #[test]
    fn select_branch_round_trip_restores_path() {
        let f = fixture();
        let path = vec![f.u1.clone(), f.a1.clone(), f.u2.clone()];
        let away = select_branch(&f.store, &path, BranchAnchor::Node(&f.u1), 1).unwrap();
        let back = select_branch(&f.store, &away, BranchAnchor::Node(&f.u1), 0).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn select_branch_rejects_index_equal_to_count() {
        let f = fixture();
        let path = vec![f.u1.clone(), f.a1.clone()];
        let error = select_branch(&f.store, &path, BranchAnchor::Node(&f.u1), 3).unwrap_err();
        assert_eq!(error, TreeError::OutOfRange { index: 3, count: 3 });
        assert_eq!(path, vec![f.u1.clone(), f.a1.clone()]);
    }

    #[test]
    fn select_branch_requires_anchor_on_path() {
        let f = fixture();
        let path = vec![f.u1.clone(), f.a1.clone()];
        let error = select_branch(&f.store, &path, BranchAnchor::Node(&f.a2), 0).unwrap_err();
        assert_eq!(error.kind(), "invalid_path");
    }

    #[test]
    fn select_branch_at_root_level() {
        let f = fixture();
        let path = vec![f.u1.clone(), f.a1.clone()];
        let selected =
            select_branch(&f.store, &path, BranchAnchor::Root { conversation_id: "c1" }, 0)
                .unwrap();
        assert_eq!(selected, vec![f.u1.clone(), f.a1.clone()]);
    }

    #[test]
    fn branch_position_reports_followed_child() {
        let f = fixture();
        let path = vec![f.u1.clone(), f.a2.clone()];
        assert_eq!(
            branch_position(&f.store, &path, BranchAnchor::Node(&f.u1)),
            Some((1, 3))
        );
        assert_eq!(branch_position(&f.store, &path, BranchAnchor::Node(&f.a2)), None);
        assert_eq!(
            branch_position(&f.store, &path, BranchAnchor::Root { conversation_id: "c1" }),
            Some((0, 1))
        );
    }

    #[test]
    fn cycle_branch_wraps_in_both_directions() {
        let f = fixture();
        let path = vec![f.u1.clone(), f.a3.clone()];
        let next = cycle_branch(&f.store, &path, BranchAnchor::Node(&f.u1), BranchDirection::Next)
            .unwrap();
        assert_eq!(next[1], f.a1);

        let first = vec![f.u1.clone(), f.a1.clone()];
        let previous = cycle_branch(
            &f.store,
            &first,
            BranchAnchor::Node(&f.u1),
            BranchDirection::Previous,
        )
        .unwrap();
        assert_eq!(previous, vec![f.u1.clone(), f.a3.clone()]);
    }

    #[test]
    fn cycle_branch_from_path_ending_at_anchor() {
        let f = fixture();
        let path = vec![f.u1.clone()];
        let next = cycle_branch(&f.store, &path, BranchAnchor::Node(&f.u1), BranchDirection::Next)
            .unwrap();
        assert_eq!(next[1], f.a1);
        let previous = cycle_branch(
            &f.store,
            &path,
            BranchAnchor::Node(&f.u1),
            BranchDirection::Previous,
        )
        .unwrap();
        assert_eq!(previous[1], f.a3);
    }

    #[test]
    fn cycle_branch_without_children_is_out_of_range() {
        let f = fixture();
        let path = vec![f.u1.clone(), f.a3.clone()];
        let error = cycle_branch(&f.store, &path, BranchAnchor::Node(&f.a3), BranchDirection::Next)
            .unwrap_err();
        assert_eq!(error, TreeError::OutOfRange { index: 0, count: 0 });
    }
}
