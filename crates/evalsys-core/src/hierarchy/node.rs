//! # Hierarchy Node
//!
//! A node of the organizational tree (college, department, program).

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A node in an organizational hierarchy.
///
/// `id` is `None` until the owning [`Hierarchy`](super::Hierarchy) assigns one.
/// The transitive sets (`parent_ids`, `child_ids`) are maintained by the tree
/// and always contain the direct sets.
///
/// # Equality
///
/// Two nodes are equal when both have an id and `(id, hierarchy_id)` match.
/// A node without an id equals nothing, not even a copy of itself, so this
/// type is `PartialEq` but not `Eq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: Option<NodeId>,
    pub hierarchy_id: String,
    pub title: String,
    pub description: String,
    pub permission_token: Option<String>,
    pub direct_parent_ids: BTreeSet<NodeId>,
    pub direct_child_ids: BTreeSet<NodeId>,
    pub parent_ids: BTreeSet<NodeId>,
    pub child_ids: BTreeSet<NodeId>,
}

impl HierarchyNode {
    /// Create a detached node with no id and no edges.
    #[must_use]
    pub fn new(
        hierarchy_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            hierarchy_id: hierarchy_id.into(),
            title: title.into(),
            description: description.into(),
            permission_token: None,
            direct_parent_ids: BTreeSet::new(),
            direct_child_ids: BTreeSet::new(),
            parent_ids: BTreeSet::new(),
            child_ids: BTreeSet::new(),
        }
    }

    /// Whether this node has no parents.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.direct_parent_ids.is_empty()
    }

    /// Whether this node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.direct_child_ids.is_empty()
    }

    /// Depth below the root, counted as the number of ancestors.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.parent_ids.len()
    }
}

impl PartialEq for HierarchyNode {
    fn eq(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b && self.hierarchy_id == other.hierarchy_id,
            _ => false,
        }
    }
}
