//! # Persistence Format
//!
//! Binary serialization for Evalsys snapshots.
//!
//! Format: Header (5 bytes) + postcard-serialized [`Snapshot`].
//! - 4 bytes: Magic ("EVAL")
//! - 1 byte: Version
//!
//! ## Validation
//!
//! Size limits and the header are checked before the payload is decoded, so
//! corrupted or hostile input fails fast without large allocations.

use crate::hierarchy::{Hierarchy, NodeBindings};
use crate::scheduling::InMemoryScheduler;
use crate::{Evaluation, EvaluationId, EvalsysError, primitives};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum accepted snapshot size (256 MB), checked before decoding.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

const HEADER_SIZE: usize = 5;

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Complete, self-contained copy of a session's state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub hierarchy: Hierarchy,
    pub bindings: NodeBindings,
    pub evaluations: BTreeMap<EvaluationId, Evaluation>,
    pub scheduler: InMemoryScheduler,
    pub next_evaluation_id: u64,
}

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all snapshot data.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), EvalsysError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(EvalsysError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(EvalsysError::SerializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EvalsysError> {
        let Some(header) = bytes.get(..HEADER_SIZE) else {
            return Err(EvalsysError::SerializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a snapshot to bytes (header + payload).
pub fn snapshot_to_bytes(snapshot: &Snapshot) -> Result<Vec<u8>, EvalsysError> {
    let header = PersistenceHeader::new();
    let payload = postcard::to_stdvec(snapshot)
        .map_err(|e| EvalsysError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a snapshot from bytes.
///
/// The hierarchy is rebuilt from its stored nodes, so transitive sets and the
/// single-root rule are re-validated rather than trusted.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<Snapshot, EvalsysError> {
    if bytes.len() < HEADER_SIZE {
        return Err(EvalsysError::SerializationError(format!(
            "Data too short: minimum {HEADER_SIZE} bytes required"
        )));
    }
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(EvalsysError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    let mut snapshot: Snapshot = postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        EvalsysError::SerializationError(format!("Failed to deserialize snapshot: {e}"))
    })?;

    let next_node_id = snapshot.hierarchy.next_node_id();
    let mut hierarchy = Hierarchy::from_nodes(
        snapshot.hierarchy.hierarchy_id(),
        snapshot.hierarchy.iter().cloned().collect(),
    )?;
    hierarchy.reserve_ids_below(next_node_id);
    snapshot.hierarchy = hierarchy;

    Ok(snapshot)
}

/// Deterministic, order-sensitive checksum of the encoded snapshot.
///
/// Detects accidental corruption only; not a cryptographic hash. Enable the
/// `crypto-hash` feature for [`snapshot_crypto_hash`].
pub fn snapshot_checksum(snapshot: &Snapshot) -> Result<u64, EvalsysError> {
    let bytes = snapshot_to_bytes(snapshot)?;
    Ok(bytes
        .iter()
        .fold(0u64, |hash, byte| hash.rotate_left(5) ^ u64::from(*byte)))
}

/// BLAKE3 hash of the encoded snapshot, as 64 hex characters.
#[cfg(feature = "crypto-hash")]
pub fn snapshot_crypto_hash(snapshot: &Snapshot) -> Result<String, EvalsysError> {
    let bytes = snapshot_to_bytes(snapshot)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
