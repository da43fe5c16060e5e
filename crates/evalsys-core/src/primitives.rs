//! # Primitives
//!
//! Compiled-in constants for the Evalsys core: file format markers, default
//! names, well-known permission tokens and input limits.

/// Magic bytes for the Evalsys snapshot header.
///
/// - File Header = Magic Bytes ("EVAL") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"EVAL";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

/// Hierarchy id used when a session is created without one.
pub const DEFAULT_HIERARCHY_ID: &str = "default";

// =============================================================================
// PERMISSION TOKENS
// =============================================================================

/// May create evaluations and assign them to groups under the node.
pub const PERM_ASSIGN_EVALUATION: &str = "assign_evaluation";

/// May see results of evaluations assigned under the node.
pub const PERM_VIEW_NODE_DATA: &str = "view_node_data";

/// May edit the node itself and its descendants.
pub const PERM_CONTROL_NODE: &str = "control_node";

/// May create or edit evaluation templates at the node.
pub const PERM_CONTROL_TEMPLATES: &str = "control_templates";

/// All well-known permission tokens. Grants are not restricted to these.
pub const KNOWN_PERMISSIONS: [&str; 4] = [
    PERM_ASSIGN_EVALUATION,
    PERM_VIEW_NODE_DATA,
    PERM_CONTROL_NODE,
    PERM_CONTROL_TEMPLATES,
];

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of evaluation and node titles.
pub const MAX_TITLE_LENGTH: usize = 256;

/// Maximum length of instructions and descriptions (64KB).
pub const MAX_TEXT_LENGTH: usize = 65536;

/// Maximum number of node ids accepted by a single batched query.
pub const MAX_QUERY_NODES: usize = 1000;

/// Maximum reminder interval, in days.
pub const MAX_REMINDER_DAYS: u32 = 365;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"EVAL");
    }

    #[test]
    fn known_permissions_are_distinct() {
        let set: std::collections::BTreeSet<_> = KNOWN_PERMISSIONS.iter().collect();
        assert_eq!(set.len(), KNOWN_PERMISSIONS.len());
    }
}
