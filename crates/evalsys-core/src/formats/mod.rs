//! # Formats
//!
//! Binary file format for Evalsys snapshots. File I/O lives in the app layer.

pub mod persistence;

pub use persistence::{
    MAX_PERSISTENCE_PAYLOAD_SIZE, PersistenceHeader, Snapshot, snapshot_checksum,
    snapshot_from_bytes, snapshot_to_bytes,
};

#[cfg(feature = "crypto-hash")]
pub use persistence::snapshot_crypto_hash;
