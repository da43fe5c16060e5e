//! # Hierarchy Tree
//!
//! Arena of [`HierarchyNode`]s keyed by [`NodeId`], with a single root.
//!
//! Every structural mutation (add, link, unlink, move, remove) recomputes the
//! transitive `parent_ids`/`child_ids` of all nodes before returning, so the
//! read side can answer ancestor and descendant queries without traversal.
//! Snapshots loaded through [`Hierarchy::from_nodes`] are recomputed as well.
//!
//! Uses `BTreeMap` exclusively for deterministic ordering.

use super::HierarchyNode;
use crate::{EvalsysError, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An organizational hierarchy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hierarchy {
    hierarchy_id: String,
    root: Option<NodeId>,
    nodes: BTreeMap<NodeId, HierarchyNode>,
    next_node_id: u64,
}

impl Hierarchy {
    /// Create an empty hierarchy.
    #[must_use]
    pub fn new(hierarchy_id: impl Into<String>) -> Self {
        Self {
            hierarchy_id: hierarchy_id.into(),
            ..Self::default()
        }
    }

    /// Rebuild a hierarchy from stored nodes.
    ///
    /// Node ids and direct edges are taken as-is; transitive sets are
    /// recomputed. Fails if a node has no id, belongs to another hierarchy,
    /// references a missing node, or if there is not exactly one root.
    pub fn from_nodes(
        hierarchy_id: impl Into<String>,
        nodes: Vec<HierarchyNode>,
    ) -> Result<Self, EvalsysError> {
        let mut hierarchy = Self::new(hierarchy_id);

        for node in nodes {
            let id = node.id.ok_or_else(|| {
                EvalsysError::InvalidInput("Stored node has no id".to_string())
            })?;
            if node.hierarchy_id != hierarchy.hierarchy_id {
                return Err(EvalsysError::InvalidInput(format!(
                    "Node {} belongs to hierarchy '{}', expected '{}'",
                    id, node.hierarchy_id, hierarchy.hierarchy_id
                )));
            }
            hierarchy.next_node_id = hierarchy.next_node_id.max(id.0.saturating_add(1));
            hierarchy.nodes.insert(id, node);
        }

        for node in hierarchy.nodes.values() {
            for edge in node.direct_parent_ids.iter().chain(&node.direct_child_ids) {
                if !hierarchy.nodes.contains_key(edge) {
                    return Err(EvalsysError::NodeNotFound(*edge));
                }
            }
        }

        let roots: Vec<NodeId> = hierarchy
            .nodes
            .iter()
            .filter(|(_, node)| node.is_root())
            .map(|(id, _)| *id)
            .collect();
        match roots.as_slice() {
            [] if hierarchy.nodes.is_empty() => {}
            [root] => hierarchy.root = Some(*root),
            _ => {
                return Err(EvalsysError::InvalidState(format!(
                    "Hierarchy '{}' must have exactly one root, found {}",
                    hierarchy.hierarchy_id,
                    roots.len()
                )));
            }
        }

        hierarchy.rebuild_closure()?;
        Ok(hierarchy)
    }

    // =========================================================================
    // READ ACCESS
    // =========================================================================

    #[must_use]
    pub fn hierarchy_id(&self) -> &str {
        &self.hierarchy_id
    }

    #[must_use]
    pub fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&HierarchyNode> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.nodes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The id the next added node will receive.
    #[must_use]
    pub fn next_node_id(&self) -> u64 {
        self.next_node_id
    }

    /// Never hand out ids below `next`. Used when restoring from storage,
    /// where removed nodes may have held the highest ids.
    pub fn reserve_ids_below(&mut self, next: u64) {
        self.next_node_id = self.next_node_id.max(next);
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Create the root node. Fails if a root already exists.
    pub fn create_root(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<NodeId, EvalsysError> {
        if let Some(root) = self.root {
            return Err(EvalsysError::InvalidState(format!(
                "Hierarchy '{}' already has root node {}",
                self.hierarchy_id, root
            )));
        }
        let id = self.allocate(title.into(), description.into(), None);
        self.root = Some(id);
        Ok(id)
    }

    /// Add a node under `parent`.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        title: impl Into<String>,
        description: impl Into<String>,
        permission_token: Option<String>,
    ) -> Result<NodeId, EvalsysError> {
        if !self.contains(parent) {
            return Err(EvalsysError::NodeNotFound(parent));
        }
        let id = self.allocate(title.into(), description.into(), permission_token);
        self.link(id, parent);
        self.rebuild_closure()?;
        Ok(id)
    }

    /// Replace the descriptive data of a node. Edges are untouched.
    pub fn update_node(
        &mut self,
        id: NodeId,
        title: impl Into<String>,
        description: impl Into<String>,
        permission_token: Option<String>,
    ) -> Result<(), EvalsysError> {
        let node = self.nodes.get_mut(&id).ok_or(EvalsysError::NodeNotFound(id))?;
        node.title = title.into();
        node.description = description.into();
        node.permission_token = permission_token;
        Ok(())
    }

    /// Add `parent` as an additional direct parent of `node`.
    ///
    /// Returns `false` if the edge already existed.
    pub fn add_parent(&mut self, node: NodeId, parent: NodeId) -> Result<bool, EvalsysError> {
        self.check_relink(node, parent)?;
        if self.is_direct_parent(node, parent) {
            return Ok(false);
        }
        self.link(node, parent);
        self.rebuild_closure()?;
        Ok(true)
    }

    /// Remove `parent` from the direct parents of `node`.
    ///
    /// A node must keep at least one parent. Returns `false` if the edge did
    /// not exist.
    pub fn remove_parent(&mut self, node: NodeId, parent: NodeId) -> Result<bool, EvalsysError> {
        let current = self.nodes.get(&node).ok_or(EvalsysError::NodeNotFound(node))?;
        if !current.direct_parent_ids.contains(&parent) {
            return Ok(false);
        }
        if current.direct_parent_ids.len() == 1 {
            return Err(EvalsysError::InvalidState(format!(
                "Node {} would be detached from the hierarchy",
                node
            )));
        }
        self.unlink(node, parent);
        self.rebuild_closure()?;
        Ok(true)
    }

    /// Make `new_parent` the only direct parent of `node`.
    pub fn move_node(&mut self, node: NodeId, new_parent: NodeId) -> Result<(), EvalsysError> {
        self.check_relink(node, new_parent)?;
        let old_parents: Vec<NodeId> = self
            .nodes
            .get(&node)
            .map(|n| n.direct_parent_ids.iter().copied().collect())
            .unwrap_or_default();
        for parent in old_parents {
            self.unlink(node, parent);
        }
        self.link(node, new_parent);
        self.rebuild_closure()
    }

    /// Remove a leaf node.
    ///
    /// The root can only be removed when it is the last node.
    pub fn remove_node(&mut self, id: NodeId) -> Result<HierarchyNode, EvalsysError> {
        let node = self.nodes.get(&id).ok_or(EvalsysError::NodeNotFound(id))?;
        if !node.is_leaf() {
            return Err(EvalsysError::InvalidState(format!(
                "Node {} still has {} child node(s)",
                id,
                node.direct_child_ids.len()
            )));
        }

        let parents: Vec<NodeId> = node.direct_parent_ids.iter().copied().collect();
        for parent in parents {
            self.unlink(id, parent);
        }
        let removed = self.nodes.remove(&id).ok_or(EvalsysError::NodeNotFound(id))?;
        if self.root == Some(id) {
            self.root = None;
        }
        self.rebuild_closure()?;
        Ok(removed)
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn allocate(
        &mut self,
        title: String,
        description: String,
        permission_token: Option<String>,
    ) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);

        let mut node = HierarchyNode::new(self.hierarchy_id.clone(), title, description);
        node.id = Some(id);
        node.permission_token = permission_token;
        self.nodes.insert(id, node);
        id
    }

    fn is_direct_parent(&self, node: NodeId, parent: NodeId) -> bool {
        self.nodes
            .get(&node)
            .is_some_and(|n| n.direct_parent_ids.contains(&parent))
    }

    /// Validate that `node` may be placed under `parent`.
    fn check_relink(&self, node: NodeId, parent: NodeId) -> Result<(), EvalsysError> {
        let current = self.nodes.get(&node).ok_or(EvalsysError::NodeNotFound(node))?;
        if !self.contains(parent) {
            return Err(EvalsysError::NodeNotFound(parent));
        }
        if self.root == Some(node) {
            return Err(EvalsysError::InvalidState(
                "The root node cannot be given a parent".to_string(),
            ));
        }
        if node == parent || current.child_ids.contains(&parent) {
            return Err(EvalsysError::CycleDetected { node, parent });
        }
        Ok(())
    }

    fn link(&mut self, node: NodeId, parent: NodeId) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.direct_parent_ids.insert(parent);
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.direct_child_ids.insert(node);
        }
    }

    fn unlink(&mut self, node: NodeId, parent: NodeId) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.direct_parent_ids.remove(&parent);
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.direct_child_ids.remove(&node);
        }
    }

    /// Recompute every transitive set from the direct edges.
    fn rebuild_closure(&mut self) -> Result<(), EvalsysError> {
        let mut ancestors: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();

        for (&id, node) in &self.nodes {
            let mut seen = BTreeSet::new();
            let mut stack: Vec<NodeId> = node.direct_parent_ids.iter().copied().collect();
            while let Some(current) = stack.pop() {
                if current == id {
                    return Err(EvalsysError::CycleDetected {
                        node: id,
                        parent: current,
                    });
                }
                if !seen.insert(current) {
                    continue;
                }
                if let Some(parent) = self.nodes.get(&current) {
                    stack.extend(parent.direct_parent_ids.iter().copied());
                }
            }
            ancestors.insert(id, seen);
        }

        for node in self.nodes.values_mut() {
            node.child_ids.clear();
        }
        for (id, parents) in ancestors {
            for parent in &parents {
                if let Some(p) = self.nodes.get_mut(parent) {
                    p.child_ids.insert(id);
                }
            }
            if let Some(n) = self.nodes.get_mut(&id) {
                n.parent_ids = parents;
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// root -> a -> b, root -> c
    fn sample() -> (Hierarchy, NodeId, NodeId, NodeId, NodeId) {
        let mut tree = Hierarchy::new("campus");
        let root = tree.create_root("University", "").expect("root");
        let a = tree.add_node(root, "Engineering", "", None).expect("a");
        let b = tree.add_node(a, "Computer Science", "", None).expect("b");
        let c = tree.add_node(root, "Arts", "", None).expect("c");
        (tree, root, a, b, c)
    }

    fn node(tree: &Hierarchy, id: NodeId) -> &HierarchyNode {
        tree.get(id).expect("node exists")
    }

    #[test]
    fn closure_after_adds() {
        let (tree, root, a, b, c) = sample();

        assert_eq!(node(&tree, root).child_ids, BTreeSet::from([a, b, c]));
        assert_eq!(node(&tree, root).direct_child_ids, BTreeSet::from([a, c]));
        assert_eq!(node(&tree, b).parent_ids, BTreeSet::from([root, a]));
        assert_eq!(node(&tree, b).direct_parent_ids, BTreeSet::from([a]));
        assert_eq!(node(&tree, b).depth(), 2);
    }

    #[test]
    fn second_root_rejected() {
        let (mut tree, ..) = sample();
        assert!(matches!(
            tree.create_root("Other", ""),
            Err(EvalsysError::InvalidState(_))
        ));
    }

    #[test]
    fn add_under_missing_parent_fails() {
        let mut tree = Hierarchy::new("campus");
        assert!(matches!(
            tree.add_node(NodeId(9), "x", "", None),
            Err(EvalsysError::NodeNotFound(NodeId(9)))
        ));
    }

    #[test]
    fn move_updates_both_sides() {
        let (mut tree, root, a, b, c) = sample();
        tree.move_node(b, c).expect("move");

        assert_eq!(node(&tree, a).child_ids, BTreeSet::new());
        assert_eq!(node(&tree, c).child_ids, BTreeSet::from([b]));
        assert_eq!(node(&tree, b).parent_ids, BTreeSet::from([root, c]));
        assert_eq!(node(&tree, root).child_ids, BTreeSet::from([a, b, c]));
    }

    #[test]
    fn cycles_rejected() {
        let (mut tree, _, a, b, _) = sample();
        assert!(matches!(
            tree.move_node(a, b),
            Err(EvalsysError::CycleDetected { .. })
        ));
        assert!(matches!(
            tree.add_parent(a, a),
            Err(EvalsysError::CycleDetected { .. })
        ));
        // unchanged
        assert_eq!(node(&tree, b).direct_parent_ids, BTreeSet::from([a]));
    }

    #[test]
    fn multiple_parents_merge_ancestry() {
        let (mut tree, root, a, b, c) = sample();
        assert!(tree.add_parent(b, c).expect("link"));
        assert!(!tree.add_parent(b, c).expect("relink is a no-op"));

        assert_eq!(node(&tree, b).parent_ids, BTreeSet::from([root, a, c]));
        assert_eq!(node(&tree, c).child_ids, BTreeSet::from([b]));

        assert!(tree.remove_parent(b, a).expect("unlink"));
        assert_eq!(node(&tree, a).child_ids, BTreeSet::new());
        assert!(matches!(
            tree.remove_parent(b, c),
            Err(EvalsysError::InvalidState(_))
        ));
    }

    #[test]
    fn remove_requires_leaf() {
        let (mut tree, root, a, b, _) = sample();
        assert!(tree.remove_node(a).is_err());

        let removed = tree.remove_node(b).expect("remove leaf");
        assert_eq!(removed.id, Some(b));
        assert!(!node(&tree, root).child_ids.contains(&b));
        assert!(node(&tree, a).is_leaf());
    }

    #[test]
    fn root_cannot_take_a_parent() {
        let (mut tree, root, a, ..) = sample();
        assert!(matches!(
            tree.add_parent(root, a),
            Err(EvalsysError::InvalidState(_))
        ));
    }

    #[test]
    fn from_nodes_recomputes_closure() {
        let (tree, root, _, b, _) = sample();
        let mut stored: Vec<HierarchyNode> = tree.iter().cloned().collect();
        for n in &mut stored {
            n.parent_ids.clear();
            n.child_ids.clear();
        }

        let restored = Hierarchy::from_nodes("campus", stored).expect("restore");
        assert_eq!(restored.root_id(), Some(root));
        assert_eq!(node(&restored, b).parent_ids, node(&tree, b).parent_ids);
        assert_eq!(restored.next_node_id(), tree.next_node_id());
    }

    #[test]
    fn from_nodes_rejects_foreign_nodes() {
        let (tree, ..) = sample();
        let stored: Vec<HierarchyNode> = tree.iter().cloned().collect();
        assert!(Hierarchy::from_nodes("online", stored).is_err());
    }
}
