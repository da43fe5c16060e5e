//! # Access Control View
//!
//! Read-only queries over a [`Hierarchy`] and its [`NodeBindings`].
//!
//! `AccessControl` borrows both snapshots and holds no state of its own, so any
//! number of views may be used concurrently. Lookup misses are never errors:
//! unknown ids yield `None` or empty collections. The only failure is a
//! hierarchy without a root.
//!
//! Group queries return groups attached *directly* beneath the given nodes.
//! Permission queries do not walk the tree; callers decide which nodes to ask
//! about. The `*_inherited`/`*_in_subtree` helpers are the explicit opt-ins to
//! tree-aware answers.

use super::{Hierarchy, HierarchyNode, NodeBindings};
use crate::{EvalGroupId, EvalsysError, NodeId, Permission, UserId};
use std::collections::{BTreeMap, BTreeSet};

/// Borrowed view answering hierarchy and permission queries.
#[derive(Debug, Clone, Copy)]
pub struct AccessControl<'a> {
    tree: &'a Hierarchy,
    bindings: &'a NodeBindings,
}

impl<'a> AccessControl<'a> {
    #[must_use]
    pub fn new(tree: &'a Hierarchy, bindings: &'a NodeBindings) -> Self {
        Self { tree, bindings }
    }

    // =========================================================================
    // NODES
    // =========================================================================

    /// The root node. Every usable hierarchy has exactly one.
    pub fn root_node(&self) -> Result<&'a HierarchyNode, EvalsysError> {
        self.tree
            .root_id()
            .and_then(|id| self.tree.get(id))
            .ok_or_else(|| {
                EvalsysError::InvalidState(format!(
                    "No root node in hierarchy '{}'",
                    self.tree.hierarchy_id()
                ))
            })
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&'a HierarchyNode> {
        self.tree.get(id)
    }

    /// Batched lookup. Unknown ids are dropped; result is in id order.
    #[must_use]
    pub fn nodes(&self, ids: &[NodeId]) -> Vec<&'a HierarchyNode> {
        let wanted: BTreeSet<NodeId> = ids.iter().copied().collect();
        wanted.into_iter().filter_map(|id| self.tree.get(id)).collect()
    }

    /// Children of `id`: direct children only, or every descendant.
    #[must_use]
    pub fn child_nodes(&self, id: NodeId, direct_only: bool) -> Vec<&'a HierarchyNode> {
        if direct_only {
            return self
                .tree
                .iter()
                .filter(|node| node.direct_parent_ids.contains(&id))
                .collect();
        }
        match self.tree.get(id) {
            Some(node) => node
                .child_ids
                .iter()
                .filter_map(|child| self.tree.get(*child))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ancestors of `id`, root first, excluding `id` itself.
    #[must_use]
    pub fn parent_path(&self, id: NodeId) -> Vec<&'a HierarchyNode> {
        let Some(node) = self.tree.get(id) else {
            return Vec::new();
        };
        let mut path: Vec<&HierarchyNode> = node
            .parent_ids
            .iter()
            .filter_map(|parent| self.tree.get(*parent))
            .collect();
        path.sort_by_key(|n| (n.depth(), n.id));
        path
    }

    /// Chain from the root down to, not including, the node `group` is
    /// attached beneath. Uses the lowest node id when the group is attached in
    /// several places. Empty when the group is not attached.
    #[must_use]
    pub fn ancestor_path(&self, group: &EvalGroupId) -> Vec<&'a HierarchyNode> {
        self.bindings
            .nodes_for_group(group)
            .into_iter()
            .find(|id| self.tree.contains(*id))
            .map(|id| self.parent_path(id))
            .unwrap_or_default()
    }

    /// Every node `group` is attached beneath, plus all their ancestors.
    #[must_use]
    pub fn nodes_above_group(&self, group: &EvalGroupId) -> Vec<&'a HierarchyNode> {
        let mut ids = BTreeSet::new();
        for id in self.bindings.nodes_for_group(group) {
            if let Some(node) = self.tree.get(id) {
                ids.insert(id);
                ids.extend(node.parent_ids.iter().copied());
            }
        }
        ids.into_iter().filter_map(|id| self.tree.get(id)).collect()
    }

    // =========================================================================
    // GROUPS
    // =========================================================================

    /// Groups attached directly beneath `id`.
    #[must_use]
    pub fn groups_under_node(&self, id: NodeId) -> BTreeSet<EvalGroupId> {
        if !self.tree.contains(id) {
            return BTreeSet::new();
        }
        self.bindings.node_groups(id).cloned().unwrap_or_default()
    }

    /// Groups attached directly beneath each valid node in `ids`.
    ///
    /// Unknown ids are omitted; an empty input yields an empty map.
    #[must_use]
    pub fn groups_under_nodes(&self, ids: &[NodeId]) -> BTreeMap<NodeId, BTreeSet<EvalGroupId>> {
        ids.iter()
            .filter(|id| self.tree.contains(**id))
            .map(|id| (*id, self.groups_under_node(*id)))
            .collect()
    }

    /// Count variant of [`Self::groups_under_nodes`].
    #[must_use]
    pub fn count_groups_under_nodes(&self, ids: &[NodeId]) -> BTreeMap<NodeId, usize> {
        ids.iter()
            .filter(|id| self.tree.contains(**id))
            .map(|id| (*id, self.bindings.node_groups(*id).map_or(0, BTreeSet::len)))
            .collect()
    }

    /// Groups attached beneath `id` or any of its descendants.
    #[must_use]
    pub fn groups_in_subtree(&self, id: NodeId) -> BTreeSet<EvalGroupId> {
        let Some(node) = self.tree.get(id) else {
            return BTreeSet::new();
        };
        std::iter::once(id)
            .chain(node.child_ids.iter().copied())
            .filter_map(|n| self.bindings.node_groups(n))
            .flatten()
            .cloned()
            .collect()
    }

    // =========================================================================
    // PERMISSIONS
    // =========================================================================

    /// Users holding `permission` at any of `ids`. No tree walk.
    #[must_use]
    pub fn user_ids_with_permission(
        &self,
        ids: &[NodeId],
        permission: &Permission,
    ) -> BTreeSet<UserId> {
        ids.iter()
            .flat_map(|id| self.bindings.users_with_grant(*id, permission))
            .cloned()
            .collect()
    }

    /// Nodes at which `user` holds `permission`, in id order.
    #[must_use]
    pub fn nodes_for_user_permission(
        &self,
        user: &UserId,
        permission: &Permission,
    ) -> Vec<&'a HierarchyNode> {
        self.bindings
            .nodes_with_grant(user, permission)
            .into_iter()
            .filter_map(|id| self.tree.get(id))
            .collect()
    }

    /// Point check at `node`.
    #[must_use]
    pub fn has_permission(&self, user: &UserId, node: NodeId, permission: &Permission) -> bool {
        self.tree.contains(node) && self.bindings.holds(user, node, permission)
    }

    /// Whether `user` holds `permission` at `node` or any ancestor of it.
    #[must_use]
    pub fn has_permission_inherited(
        &self,
        user: &UserId,
        node: NodeId,
        permission: &Permission,
    ) -> bool {
        let Some(target) = self.tree.get(node) else {
            return false;
        };
        std::iter::once(node)
            .chain(target.parent_ids.iter().copied())
            .any(|id| self.bindings.holds(user, id, permission))
    }

    /// Groups attached at or below any node where `user` holds `permission`.
    #[must_use]
    pub fn groups_for_user_permission(
        &self,
        user: &UserId,
        permission: &Permission,
    ) -> BTreeSet<EvalGroupId> {
        self.bindings
            .nodes_with_grant(user, permission)
            .into_iter()
            .flat_map(|id| self.groups_in_subtree(id))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        tree: Hierarchy,
        bindings: NodeBindings,
        root: NodeId,
        a: NodeId,
        b: NodeId,
        c: NodeId,
    }

    /// root -> a -> b ; root -> c
    /// groups: a={g-a}, b={g-b1,g-b2}
    /// grants: alice assign@a, bob assign@c, alice view@root
    fn fixture() -> Fixture {
        let mut tree = Hierarchy::new("campus");
        let root = tree.create_root("University", "").expect("root");
        let a = tree.add_node(root, "Engineering", "", None).expect("a");
        let b = tree.add_node(a, "Computer Science", "", None).expect("b");
        let c = tree.add_node(root, "Arts", "", None).expect("c");

        let mut bindings = NodeBindings::new();
        bindings.add_node_groups(a, [EvalGroupId::new("g-a")]);
        bindings.add_node_groups(b, [EvalGroupId::new("g-b1"), EvalGroupId::new("g-b2")]);
        bindings.grant_permission(UserId::new("alice"), a, Permission::new("assign"));
        bindings.grant_permission(UserId::new("bob"), c, Permission::new("assign"));
        bindings.grant_permission(UserId::new("alice"), root, Permission::new("view"));

        Fixture { tree, bindings, root, a, b, c }
    }

    fn ids(nodes: &[&HierarchyNode]) -> Vec<NodeId> {
        nodes.iter().filter_map(|n| n.id).collect()
    }

    #[test]
    fn root_required() {
        let tree = Hierarchy::new("empty");
        let bindings = NodeBindings::new();
        let access = AccessControl::new(&tree, &bindings);
        assert!(matches!(access.root_node(), Err(EvalsysError::InvalidState(_))));
    }

    #[test]
    fn direct_vs_transitive_children() {
        let f = fixture();
        let access = AccessControl::new(&f.tree, &f.bindings);

        assert_eq!(ids(&access.child_nodes(f.root, true)), vec![f.a, f.c]);
        assert_eq!(ids(&access.child_nodes(f.root, false)), vec![f.a, f.b, f.c]);
        assert!(access.child_nodes(NodeId(99), false).is_empty());
        assert!(access.child_nodes(NodeId(99), true).is_empty());
    }

    #[test]
    fn batched_lookup_drops_unknown() {
        let f = fixture();
        let access = AccessControl::new(&f.tree, &f.bindings);
        assert_eq!(ids(&access.nodes(&[f.c, NodeId(42), f.a])), vec![f.a, f.c]);
    }

    #[test]
    fn ancestor_path_excludes_attachment_node() {
        let f = fixture();
        let access = AccessControl::new(&f.tree, &f.bindings);

        assert_eq!(
            ids(&access.ancestor_path(&EvalGroupId::new("g-b1"))),
            vec![f.root, f.a]
        );
        assert_eq!(ids(&access.ancestor_path(&EvalGroupId::new("g-a"))), vec![f.root]);
        assert!(access.ancestor_path(&EvalGroupId::new("nowhere")).is_empty());
        assert_eq!(
            ids(&access.nodes_above_group(&EvalGroupId::new("g-b2"))),
            vec![f.root, f.a, f.b]
        );
    }

    #[test]
    fn group_queries_are_direct_only() {
        let f = fixture();
        let access = AccessControl::new(&f.tree, &f.bindings);

        assert_eq!(
            access.groups_under_node(f.a),
            BTreeSet::from([EvalGroupId::new("g-a")])
        );
        assert!(access.groups_under_node(f.root).is_empty());
        assert!(access.groups_under_node(NodeId(404)).is_empty());
        assert!(access.groups_under_nodes(&[]).is_empty());

        let counts = access.count_groups_under_nodes(&[f.a, f.b, f.c, NodeId(404)]);
        assert_eq!(counts, BTreeMap::from([(f.a, 1), (f.b, 2), (f.c, 0)]));

        assert_eq!(access.groups_in_subtree(f.a).len(), 3);
    }

    #[test]
    fn permission_queries() {
        let f = fixture();
        let access = AccessControl::new(&f.tree, &f.bindings);
        let assign = Permission::new("assign");
        let alice = UserId::new("alice");

        assert_eq!(
            access.user_ids_with_permission(&[f.a, f.c], &assign),
            BTreeSet::from([UserId::new("alice"), UserId::new("bob")])
        );
        assert!(access.user_ids_with_permission(&[f.b], &assign).is_empty());

        assert_eq!(ids(&access.nodes_for_user_permission(&alice, &assign)), vec![f.a]);
        assert!(access.has_permission(&alice, f.a, &assign));
        assert!(!access.has_permission(&alice, f.b, &assign));
        assert!(access.has_permission_inherited(&alice, f.b, &assign));
        assert!(!access.has_permission_inherited(&alice, f.c, &assign));

        assert_eq!(access.groups_for_user_permission(&alice, &assign).len(), 3);
        assert!(
            access
                .groups_for_user_permission(&UserId::new("bob"), &assign)
                .is_empty()
        );
    }
}
