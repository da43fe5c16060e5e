//! # redb-backed Session Storage
//!
//! Write-through persistence for a [`Session`](crate::Session) using redb:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! The session keeps its working state in memory. Each mutation is staged,
//! committed as one [`StoreWrite`] transaction, and only then applied in
//! memory. [`RedbStore::load`] rebuilds a [`Snapshot`] on startup.

use crate::formats::Snapshot;
use crate::hierarchy::{Hierarchy, HierarchyNode, NodeBindings};
use crate::primitives::DEFAULT_HIERARCHY_ID;
use crate::scheduling::InMemoryScheduler;
use crate::{Evaluation, EvaluationId, EvalsysError};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use std::collections::BTreeMap;
use std::path::Path;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

/// Table for evaluations: EvaluationId(u64) -> serialized Evaluation bytes
const EVALUATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("evaluations");

/// Table for hierarchy nodes: NodeId(u64) -> serialized HierarchyNode bytes
const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// Table for whole-value records: name -> serialized bytes
/// ("bindings", "scheduler")
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Table for counters: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Table for labels: key string -> value string
const LABELS: TableDefinition<&str, &str> = TableDefinition::new("labels");

const BINDINGS_KEY: &str = "bindings";
const SCHEDULER_KEY: &str = "scheduler";
const NEXT_EVALUATION_ID: &str = "next_evaluation_id";
const NEXT_NODE_ID: &str = "next_node_id";
const HIERARCHY_ID: &str = "hierarchy_id";

fn io_err(e: impl std::fmt::Display) -> EvalsysError {
    EvalsysError::IoError(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, EvalsysError> {
    postcard::to_allocvec(value).map_err(|e| EvalsysError::SerializationError(e.to_string()))
}

fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, EvalsysError> {
    postcard::from_bytes(bytes).map_err(|e| EvalsysError::SerializationError(e.to_string()))
}

// =============================================================================
// STORE WRITE
// =============================================================================

/// Everything one session mutation writes through.
///
/// All parts land in a single redb transaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreWrite<'a> {
    evaluation: Option<&'a Evaluation>,
    removed_evaluation: Option<EvaluationId>,
    next_evaluation_id: Option<u64>,
    hierarchy: Option<&'a Hierarchy>,
    bindings: Option<&'a NodeBindings>,
    scheduler: Option<&'a InMemoryScheduler>,
}

impl<'a> StoreWrite<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert one evaluation together with the id counter.
    #[must_use]
    pub fn evaluation(mut self, evaluation: &'a Evaluation, next_evaluation_id: u64) -> Self {
        self.evaluation = Some(evaluation);
        self.next_evaluation_id = Some(next_evaluation_id);
        self
    }

    #[must_use]
    pub fn remove_evaluation(mut self, id: EvaluationId) -> Self {
        self.removed_evaluation = Some(id);
        self
    }

    /// Replace the stored hierarchy.
    #[must_use]
    pub fn hierarchy(mut self, hierarchy: &'a Hierarchy) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    #[must_use]
    pub fn bindings(mut self, bindings: &'a NodeBindings) -> Self {
        self.bindings = Some(bindings);
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: &'a InMemoryScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Session storage on disk.
pub struct RedbStore {
    db: Database,
    #[cfg(test)]
    reject_writes: AtomicBool,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EvalsysError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        let write_txn = db.begin_write().map_err(io_err)?;
        {
            let _ = write_txn.open_table(EVALUATIONS).map_err(io_err)?;
            let _ = write_txn.open_table(NODES).map_err(io_err)?;
            let _ = write_txn.open_table(RECORDS).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            let _ = write_txn.open_table(LABELS).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;

        Ok(Self {
            db,
            #[cfg(test)]
            reject_writes: AtomicBool::new(false),
        })
    }

    /// Compact the database file. Returns `true` if any space was reclaimed.
    pub fn compact(&mut self) -> Result<bool, EvalsysError> {
        self.db.compact().map_err(io_err)
    }

    /// Make every following write fail before it commits.
    #[cfg(test)]
    pub(crate) fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    // =========================================================================
    // READ
    // =========================================================================

    /// Read the complete stored state.
    pub fn load(&self) -> Result<Snapshot, EvalsysError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;

        let (next_evaluation_id, next_node_id) = {
            let table = read_txn.open_table(METADATA).map_err(io_err)?;
            let next_eval = table
                .get(NEXT_EVALUATION_ID)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(1);
            let next_node = table
                .get(NEXT_NODE_ID)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            (next_eval, next_node)
        };

        let hierarchy_id = {
            let table = read_txn.open_table(LABELS).map_err(io_err)?;
            table
                .get(HIERARCHY_ID)
                .map_err(io_err)?
                .map(|v| v.value().to_string())
                .unwrap_or_else(|| DEFAULT_HIERARCHY_ID.to_string())
        };

        let evaluations = {
            let table = read_txn.open_table(EVALUATIONS).map_err(io_err)?;
            let mut evaluations = BTreeMap::new();
            for entry in table.iter().map_err(io_err)? {
                let (key, value) = entry.map_err(io_err)?;
                let evaluation: Evaluation = decode(value.value())?;
                evaluations.insert(EvaluationId(key.value()), evaluation);
            }
            evaluations
        };

        let nodes = {
            let table = read_txn.open_table(NODES).map_err(io_err)?;
            let mut nodes = Vec::new();
            for entry in table.iter().map_err(io_err)? {
                let (_, value) = entry.map_err(io_err)?;
                let node: HierarchyNode = decode(value.value())?;
                nodes.push(node);
            }
            nodes
        };
        let mut hierarchy = Hierarchy::from_nodes(hierarchy_id, nodes)?;
        hierarchy.reserve_ids_below(next_node_id);

        let (bindings, scheduler) = {
            let table = read_txn.open_table(RECORDS).map_err(io_err)?;
            let bindings: NodeBindings = match table.get(BINDINGS_KEY).map_err(io_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => NodeBindings::new(),
            };
            let scheduler: InMemoryScheduler = match table.get(SCHEDULER_KEY).map_err(io_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => InMemoryScheduler::new(),
            };
            (bindings, scheduler)
        };

        Ok(Snapshot {
            hierarchy,
            bindings,
            evaluations,
            scheduler,
            next_evaluation_id,
        })
    }

    /// Number of stored evaluations.
    pub fn evaluation_count(&self) -> Result<u64, EvalsysError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(EVALUATIONS).map_err(io_err)?;
        table.len().map_err(io_err)
    }

    // =========================================================================
    // WRITE
    // =========================================================================

    fn write<F>(&self, f: F) -> Result<(), EvalsysError>
    where
        F: FnOnce(&WriteTransaction) -> Result<(), EvalsysError>,
    {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        f(&write_txn)?;
        #[cfg(test)]
        if self.reject_writes.load(Ordering::SeqCst) {
            // dropping the transaction aborts it
            return Err(io_err("write rejected"));
        }
        write_txn.commit().map_err(io_err)
    }

    /// Apply one [`StoreWrite`] in a single transaction.
    pub fn commit(&self, write: &StoreWrite<'_>) -> Result<(), EvalsysError> {
        let evaluation = match write.evaluation {
            Some(evaluation) => Some((evaluation.id.0, encode(evaluation)?)),
            None => None,
        };
        let bindings = write.bindings.map(encode::<NodeBindings>).transpose()?;
        let scheduler = write.scheduler.map(encode::<InMemoryScheduler>).transpose()?;

        self.write(|txn| {
            {
                let mut table = txn.open_table(EVALUATIONS).map_err(io_err)?;
                if let Some(id) = write.removed_evaluation {
                    table.remove(id.0).map_err(io_err)?;
                }
                if let Some((id, bytes)) = &evaluation {
                    table.insert(*id, bytes.as_slice()).map_err(io_err)?;
                }
            }
            if let Some(next) = write.next_evaluation_id {
                let mut meta = txn.open_table(METADATA).map_err(io_err)?;
                meta.insert(NEXT_EVALUATION_ID, next).map_err(io_err)?;
            }
            if let Some(hierarchy) = write.hierarchy {
                Self::write_hierarchy(txn, hierarchy)?;
            }
            let mut records = txn.open_table(RECORDS).map_err(io_err)?;
            if let Some(bytes) = &bindings {
                records
                    .insert(BINDINGS_KEY, bytes.as_slice())
                    .map_err(io_err)?;
            }
            if let Some(bytes) = &scheduler {
                records
                    .insert(SCHEDULER_KEY, bytes.as_slice())
                    .map_err(io_err)?;
            }
            Ok(())
        })
    }

    /// Replace everything with `snapshot` in a single transaction.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), EvalsysError> {
        let bindings = encode(&snapshot.bindings)?;
        let scheduler = encode(&snapshot.scheduler)?;
        let evaluations = snapshot
            .evaluations
            .iter()
            .map(|(id, evaluation)| Ok((id.0, encode(evaluation)?)))
            .collect::<Result<Vec<_>, EvalsysError>>()?;

        self.write(|txn| {
            Self::write_hierarchy(txn, &snapshot.hierarchy)?;
            {
                let mut table = txn.open_table(EVALUATIONS).map_err(io_err)?;
                table.retain(|_, _| false).map_err(io_err)?;
                for (id, bytes) in &evaluations {
                    table.insert(*id, bytes.as_slice()).map_err(io_err)?;
                }
            }
            {
                let mut table = txn.open_table(RECORDS).map_err(io_err)?;
                table
                    .insert(BINDINGS_KEY, bindings.as_slice())
                    .map_err(io_err)?;
                table
                    .insert(SCHEDULER_KEY, scheduler.as_slice())
                    .map_err(io_err)?;
            }
            let mut meta = txn.open_table(METADATA).map_err(io_err)?;
            meta.insert(NEXT_EVALUATION_ID, snapshot.next_evaluation_id)
                .map_err(io_err)?;
            Ok(())
        })
    }

    fn write_hierarchy(txn: &WriteTransaction, hierarchy: &Hierarchy) -> Result<(), EvalsysError> {
        let nodes = hierarchy
            .iter()
            .filter_map(|node| node.id.map(|id| (id, node)))
            .map(|(id, node)| Ok((id.0, encode(node)?)))
            .collect::<Result<Vec<_>, EvalsysError>>()?;

        {
            let mut table = txn.open_table(NODES).map_err(io_err)?;
            table.retain(|_, _| false).map_err(io_err)?;
            for (id, bytes) in &nodes {
                table.insert(*id, bytes.as_slice()).map_err(io_err)?;
            }
        }
        {
            let mut meta = txn.open_table(METADATA).map_err(io_err)?;
            meta.insert(NEXT_NODE_ID, hierarchy.next_node_id())
                .map_err(io_err)?;
        }
        let mut labels = txn.open_table(LABELS).map_err(io_err)?;
        labels
            .insert(HIERARCHY_ID, hierarchy.hierarchy_id())
            .map_err(io_err)?;
        Ok(())
    }
}
