//! # Storage
//!
//! Disk-backed persistence for sessions using the redb embedded database.

pub mod redb_store;

pub use redb_store::{RedbStore, StoreWrite};
