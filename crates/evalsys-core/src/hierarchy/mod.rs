//! # Organizational Hierarchy
//!
//! A rooted structure of nodes (university, college, department) with
//! evaluation groups attached beneath nodes and permission grants held by
//! users at nodes.
//!
//! - [`node`]: the node type and its equality rule
//! - [`tree`]: structural mutations with transitive closure maintenance
//! - [`bindings`]: node-to-group attachments and user permission grants
//! - [`access`]: read-only access-control queries over both

pub mod access;
pub mod bindings;
pub mod node;
pub mod tree;

pub use access::AccessControl;
pub use bindings::NodeBindings;
pub use node::HierarchyNode;
pub use tree::Hierarchy;
