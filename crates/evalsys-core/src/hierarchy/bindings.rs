//! # Node Bindings
//!
//! What hangs off hierarchy nodes: evaluation groups attached beneath a node,
//! and permission grants held by users at a node.
//!
//! The group registry mirrors the external group provider. Bindings do not
//! validate node ids against a tree; the session does that before writing.

use crate::{EvalGroup, EvalGroupId, NodeId, Permission, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Groups and permission grants keyed by node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBindings {
    /// Known evaluation groups.
    groups: BTreeMap<EvalGroupId, EvalGroup>,
    /// node -> groups attached directly beneath it
    node_groups: BTreeMap<NodeId, BTreeSet<EvalGroupId>>,
    /// user -> node -> permissions
    grants: BTreeMap<UserId, BTreeMap<NodeId, BTreeSet<Permission>>>,
}

impl NodeBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // GROUPS
    // =========================================================================

    /// Register or replace a group in the registry.
    pub fn register_group(&mut self, group: EvalGroup) {
        self.groups.insert(group.id.clone(), group);
    }

    #[must_use]
    pub fn group(&self, id: &EvalGroupId) -> Option<&EvalGroup> {
        self.groups.get(id)
    }

    /// All registered groups in id order.
    pub fn groups(&self) -> impl Iterator<Item = &EvalGroup> {
        self.groups.values()
    }

    /// Replace the set of groups attached beneath `node`.
    pub fn set_node_groups(&mut self, node: NodeId, groups: BTreeSet<EvalGroupId>) {
        if groups.is_empty() {
            self.node_groups.remove(&node);
        } else {
            self.node_groups.insert(node, groups);
        }
    }

    /// Attach additional groups beneath `node`.
    pub fn add_node_groups(
        &mut self,
        node: NodeId,
        groups: impl IntoIterator<Item = EvalGroupId>,
    ) {
        self.node_groups.entry(node).or_default().extend(groups);
        if self.node_groups.get(&node).is_some_and(BTreeSet::is_empty) {
            self.node_groups.remove(&node);
        }
    }

    /// Detach groups from `node`. Returns how many were attached.
    pub fn remove_node_groups(&mut self, node: NodeId, groups: &[EvalGroupId]) -> usize {
        let Some(attached) = self.node_groups.get_mut(&node) else {
            return 0;
        };
        let removed = groups.iter().filter(|g| attached.remove(*g)).count();
        if attached.is_empty() {
            self.node_groups.remove(&node);
        }
        removed
    }

    /// Groups attached directly beneath `node`.
    #[must_use]
    pub fn node_groups(&self, node: NodeId) -> Option<&BTreeSet<EvalGroupId>> {
        self.node_groups.get(&node)
    }

    /// Nodes a group is attached beneath.
    #[must_use]
    pub fn nodes_for_group(&self, group: &EvalGroupId) -> BTreeSet<NodeId> {
        self.node_groups
            .iter()
            .filter(|(_, groups)| groups.contains(group))
            .map(|(node, _)| *node)
            .collect()
    }

    // =========================================================================
    // PERMISSIONS
    // =========================================================================

    /// Grant `permission` to `user` at `node`. Returns `false` if already held.
    pub fn grant_permission(
        &mut self,
        user: UserId,
        node: NodeId,
        permission: Permission,
    ) -> bool {
        self.grants
            .entry(user)
            .or_default()
            .entry(node)
            .or_default()
            .insert(permission)
    }

    /// Revoke a grant. Returns `false` if it was not held.
    pub fn revoke_permission(
        &mut self,
        user: &UserId,
        node: NodeId,
        permission: &Permission,
    ) -> bool {
        let Some(nodes) = self.grants.get_mut(user) else {
            return false;
        };
        let Some(permissions) = nodes.get_mut(&node) else {
            return false;
        };
        let removed = permissions.remove(permission);
        if permissions.is_empty() {
            nodes.remove(&node);
        }
        if nodes.is_empty() {
            self.grants.remove(user);
        }
        removed
    }

    /// Point check, no inheritance.
    #[must_use]
    pub fn holds(&self, user: &UserId, node: NodeId, permission: &Permission) -> bool {
        self.grants
            .get(user)
            .and_then(|nodes| nodes.get(&node))
            .is_some_and(|permissions| permissions.contains(permission))
    }

    /// Nodes at which `user` holds `permission`.
    #[must_use]
    pub fn nodes_with_grant(&self, user: &UserId, permission: &Permission) -> BTreeSet<NodeId> {
        self.grants
            .get(user)
            .into_iter()
            .flat_map(|nodes| nodes.iter())
            .filter(|(_, permissions)| permissions.contains(permission))
            .map(|(node, _)| *node)
            .collect()
    }

    /// Users holding `permission` at `node`.
    pub fn users_with_grant<'a>(
        &'a self,
        node: NodeId,
        permission: &'a Permission,
    ) -> impl Iterator<Item = &'a UserId> + 'a {
        self.grants
            .iter()
            .filter(move |(_, nodes)| {
                nodes
                    .get(&node)
                    .is_some_and(|permissions| permissions.contains(permission))
            })
            .map(|(user, _)| user)
    }

    /// Number of distinct (user, node, permission) grants.
    #[must_use]
    pub fn grant_count(&self) -> usize {
        self.grants
            .values()
            .flat_map(|nodes| nodes.values())
            .map(BTreeSet::len)
            .sum()
    }

    // =========================================================================
    // NODE REMOVAL
    // =========================================================================

    /// Drop every binding that references `node`.
    pub fn remove_node(&mut self, node: NodeId) {
        self.node_groups.remove(&node);
        for nodes in self.grants.values_mut() {
            nodes.remove(&node);
        }
        self.grants.retain(|_, nodes| !nodes.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(s: &str) -> EvalGroupId {
        EvalGroupId::new(s)
    }

    #[test]
    fn set_groups_replaces() {
        let mut bindings = NodeBindings::new();
        bindings.set_node_groups(NodeId(1), BTreeSet::from([gid("a"), gid("b")]));
        bindings.set_node_groups(NodeId(1), BTreeSet::from([gid("c")]));

        assert_eq!(
            bindings.node_groups(NodeId(1)),
            Some(&BTreeSet::from([gid("c")]))
        );
        bindings.set_node_groups(NodeId(1), BTreeSet::new());
        assert!(bindings.node_groups(NodeId(1)).is_none());
    }

    #[test]
    fn add_and_remove_groups() {
        let mut bindings = NodeBindings::new();
        bindings.add_node_groups(NodeId(2), [gid("x"), gid("y")]);
        assert_eq!(bindings.remove_node_groups(NodeId(2), &[gid("x"), gid("z")]), 1);
        assert_eq!(bindings.nodes_for_group(&gid("y")), BTreeSet::from([NodeId(2)]));
        assert_eq!(bindings.remove_node_groups(NodeId(2), &[gid("y")]), 1);
        assert!(bindings.node_groups(NodeId(2)).is_none());
    }

    #[test]
    fn grants_are_point_checks() {
        let mut bindings = NodeBindings::new();
        let user = UserId::new("alice");
        let perm = Permission::new("assign_evaluation");

        assert!(bindings.grant_permission(user.clone(), NodeId(1), perm.clone()));
        assert!(!bindings.grant_permission(user.clone(), NodeId(1), perm.clone()));
        assert!(bindings.holds(&user, NodeId(1), &perm));
        assert!(!bindings.holds(&user, NodeId(2), &perm));
        assert_eq!(bindings.grant_count(), 1);

        assert!(bindings.revoke_permission(&user, NodeId(1), &perm));
        assert!(!bindings.revoke_permission(&user, NodeId(1), &perm));
        assert_eq!(bindings.grant_count(), 0);
    }

    #[test]
    fn remove_node_drops_bindings() {
        let mut bindings = NodeBindings::new();
        let user = UserId::new("bob");
        let perm = Permission::new("view_node_data");
        bindings.grant_permission(user.clone(), NodeId(3), perm.clone());
        bindings.add_node_groups(NodeId(3), [gid("g")]);

        bindings.remove_node(NodeId(3));

        assert!(!bindings.holds(&user, NodeId(3), &perm));
        assert!(bindings.node_groups(NodeId(3)).is_none());
        assert_eq!(bindings.users_with_grant(NodeId(3), &perm).count(), 0);
    }
}
