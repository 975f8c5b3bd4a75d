//! # redb-backed Graph Store
//!
//! A property graph laid out over redb tables:
//! - ACID transactions (one redb write transaction per `execute`)
//! - Crash safety (copy-on-write B-trees)
//! - An in-memory backend for tests and throwaway runs
//!
//! Node and relationship records are postcard-encoded. Indices are
//! multimap tables with a reverse table per index family, so removing a
//! node or relationship from every entry it owns never needs a scan.

use super::{GraphTxn, Relationship, Store, ValueIndex};
use crate::types::{NodeId, RelId, Scalar, StitchError, Value};
use redb::backends::InMemoryBackend;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Nodes: NodeId(u64) -> postcard NodeRecord
const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// Relationships: RelId(u64) -> postcard RelRecord
const RELATIONSHIPS: TableDefinition<u64, &[u8]> = TableDefinition::new("relationships");

/// Adjacency: NodeId -> RelIds touching it (both endpoints)
const ADJACENCY: MultimapTableDefinition<u64, u64> = MultimapTableDefinition::new("adjacency");

/// Label -> NodeIds
const LABELS: MultimapTableDefinition<&str, u64> = MultimapTableDefinition::new("labels");

/// (index, field, term) -> NodeIds
const NODE_INDEX: MultimapTableDefinition<(&str, &str, &str), u64> =
    MultimapTableDefinition::new("node_index");

/// NodeId -> (index, field, term)
const NODE_INDEX_REV: MultimapTableDefinition<u64, (&str, &str, &str)> =
    MultimapTableDefinition::new("node_index_rev");

/// (index, field, term) -> RelIds
const REL_INDEX: MultimapTableDefinition<(&str, &str, &str), u64> =
    MultimapTableDefinition::new("rel_index");

/// RelId -> (index, field, term)
const REL_INDEX_REV: MultimapTableDefinition<u64, (&str, &str, &str)> =
    MultimapTableDefinition::new("rel_index_rev");

/// (millis, node) -> node
const TIMELINE: TableDefinition<(i64, u64), u64> = TableDefinition::new("timeline");

/// NodeId -> millis of each timeline entry
const TIMELINE_REV: MultimapTableDefinition<u64, i64> = MultimapTableDefinition::new("timeline_rev");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_NODE_ID: &str = "next_node_id";
const NEXT_REL_ID: &str = "next_rel_id";

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeRecord {
    labels: BTreeSet<String>,
    properties: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelRecord {
    from: u64,
    to: u64,
    rel_type: String,
    properties: BTreeMap<String, Value>,
}

fn io_err(e: impl std::fmt::Display) -> StitchError {
    StitchError::IoError(e.to_string())
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, StitchError> {
    postcard::to_allocvec(record).map_err(|e| StitchError::SerializationError(e.to_string()))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, StitchError> {
    postcard::from_bytes(bytes).map_err(|e| StitchError::DeserializationError(e.to_string()))
}

// =============================================================================
// STORE
// =============================================================================

/// A graph store in a redb database.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StitchError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;
        Self::init(db)
    }

    /// A store that lives only as long as this value.
    pub fn in_memory() -> Result<Self, StitchError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(io_err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, StitchError> {
        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(io_err)?;
        {
            write_txn.open_table(NODES).map_err(io_err)?;
            write_txn.open_table(RELATIONSHIPS).map_err(io_err)?;
            write_txn.open_table(TIMELINE).map_err(io_err)?;
            write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.open_multimap_table(ADJACENCY).map_err(io_err)?;
            write_txn.open_multimap_table(LABELS).map_err(io_err)?;
            write_txn.open_multimap_table(NODE_INDEX).map_err(io_err)?;
            write_txn.open_multimap_table(NODE_INDEX_REV).map_err(io_err)?;
            write_txn.open_multimap_table(REL_INDEX).map_err(io_err)?;
            write_txn.open_multimap_table(REL_INDEX_REV).map_err(io_err)?;
            write_txn.open_multimap_table(TIMELINE_REV).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), StitchError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }
}

impl Store for RedbStore {
    type Txn = RedbTxn;

    fn execute<T, F>(&self, f: F) -> Result<T, StitchError>
    where
        F: FnOnce(&mut Self::Txn) -> Result<T, StitchError>,
    {
        let mut tx = RedbTxn {
            txn: self.db.begin_write().map_err(io_err)?,
        };
        match f(&mut tx) {
            Ok(value) => {
                tx.txn.commit().map_err(io_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = tx.txn.abort() {
                    tracing::warn!(error = %abort, "transaction abort failed");
                }
                Err(e)
            }
        }
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// One open write transaction.
pub struct RedbTxn {
    txn: WriteTransaction,
}

impl std::fmt::Debug for RedbTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbTxn").finish_non_exhaustive()
    }
}

impl RedbTxn {
    fn next_id(&mut self, counter: &str) -> Result<u64, StitchError> {
        let mut meta = self.txn.open_table(METADATA).map_err(io_err)?;
        let current = meta
            .get(counter)
            .map_err(io_err)?
            .map(|v| v.value())
            .unwrap_or(0);
        meta.insert(counter, current.saturating_add(1))
            .map_err(io_err)?;
        Ok(current)
    }

    fn load_node(&self, id: NodeId) -> Result<NodeRecord, StitchError> {
        let nodes = self.txn.open_table(NODES).map_err(io_err)?;
        let guard = nodes
            .get(id.0)
            .map_err(io_err)?
            .ok_or(StitchError::NodeNotFound(id))?;
        decode(guard.value())
    }

    fn save_node(&mut self, id: NodeId, record: &NodeRecord) -> Result<(), StitchError> {
        let bytes = encode(record)?;
        let mut nodes = self.txn.open_table(NODES).map_err(io_err)?;
        nodes.insert(id.0, bytes.as_slice()).map_err(io_err)?;
        Ok(())
    }

    fn load_rel(&self, id: RelId) -> Result<Option<RelRecord>, StitchError> {
        let rels = self.txn.open_table(RELATIONSHIPS).map_err(io_err)?;
        match rels.get(id.0).map_err(io_err)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn adjacent(&self, node: NodeId) -> Result<Vec<u64>, StitchError> {
        let adjacency = self.txn.open_multimap_table(ADJACENCY).map_err(io_err)?;
        let mut ids = Vec::new();
        for entry in adjacency.get(node.0).map_err(io_err)? {
            ids.push(entry.map_err(io_err)?.value());
        }
        Ok(ids)
    }
}

impl GraphTxn for RedbTxn {
    fn create_node(&mut self) -> Result<NodeId, StitchError> {
        let id = NodeId(self.next_id(NEXT_NODE_ID)?);
        self.save_node(id, &NodeRecord::default())?;
        Ok(id)
    }

    fn delete_node(&mut self, id: NodeId) -> Result<(), StitchError> {
        if !self.adjacent(id)?.is_empty() {
            return Err(StitchError::Constraint(format!(
                "node {id} still has relationships"
            )));
        }
        let record = self.load_node(id)?;
        {
            let mut labels = self.txn.open_multimap_table(LABELS).map_err(io_err)?;
            for label in &record.labels {
                labels.remove(label.as_str(), id.0).map_err(io_err)?;
            }
        }
        self.timeline_remove(id)?;
        let mut nodes = self.txn.open_table(NODES).map_err(io_err)?;
        nodes.remove(id.0).map_err(io_err)?;
        Ok(())
    }

    fn contains_node(&self, id: NodeId) -> Result<bool, StitchError> {
        let nodes = self.txn.open_table(NODES).map_err(io_err)?;
        Ok(nodes.get(id.0).map_err(io_err)?.is_some())
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, StitchError> {
        let nodes = self.txn.open_table(NODES).map_err(io_err)?;
        let mut ids = Vec::new();
        for entry in nodes.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            ids.push(NodeId(key.value()));
        }
        Ok(ids)
    }

    fn labels(&self, id: NodeId) -> Result<BTreeSet<String>, StitchError> {
        Ok(self.load_node(id)?.labels)
    }

    fn add_label(&mut self, id: NodeId, label: &str) -> Result<(), StitchError> {
        let mut record = self.load_node(id)?;
        if record.labels.insert(label.to_string()) {
            self.save_node(id, &record)?;
            let mut labels = self.txn.open_multimap_table(LABELS).map_err(io_err)?;
            labels.insert(label, id.0).map_err(io_err)?;
        }
        Ok(())
    }

    fn remove_label(&mut self, id: NodeId, label: &str) -> Result<(), StitchError> {
        let mut record = self.load_node(id)?;
        if record.labels.remove(label) {
            self.save_node(id, &record)?;
            let mut labels = self.txn.open_multimap_table(LABELS).map_err(io_err)?;
            labels.remove(label, id.0).map_err(io_err)?;
        }
        Ok(())
    }

    fn nodes_with_label(&self, label: &str) -> Result<Vec<NodeId>, StitchError> {
        let labels = self.txn.open_multimap_table(LABELS).map_err(io_err)?;
        let mut ids = Vec::new();
        for entry in labels.get(label).map_err(io_err)? {
            ids.push(NodeId(entry.map_err(io_err)?.value()));
        }
        Ok(ids)
    }

    fn property(&self, id: NodeId, name: &str) -> Result<Option<Value>, StitchError> {
        Ok(self.load_node(id)?.properties.remove(name))
    }

    fn properties(&self, id: NodeId) -> Result<BTreeMap<String, Value>, StitchError> {
        Ok(self.load_node(id)?.properties)
    }

    fn set_property(&mut self, id: NodeId, name: &str, value: Value) -> Result<(), StitchError> {
        let mut record = self.load_node(id)?;
        record.properties.insert(name.to_string(), value);
        self.save_node(id, &record)
    }

    fn remove_property(&mut self, id: NodeId, name: &str) -> Result<Option<Value>, StitchError> {
        let mut record = self.load_node(id)?;
        let previous = record.properties.remove(name);
        if previous.is_some() {
            self.save_node(id, &record)?;
        }
        Ok(previous)
    }

    fn create_relationship(
        &mut self,
        from: NodeId,
        to: NodeId,
        rel_type: &str,
        properties: BTreeMap<String, Value>,
    ) -> Result<RelId, StitchError> {
        for endpoint in [from, to] {
            if !self.contains_node(endpoint)? {
                return Err(StitchError::NodeNotFound(endpoint));
            }
        }
        let id = RelId(self.next_id(NEXT_REL_ID)?);
        let bytes = encode(&RelRecord {
            from: from.0,
            to: to.0,
            rel_type: rel_type.to_string(),
            properties,
        })?;
        {
            let mut rels = self.txn.open_table(RELATIONSHIPS).map_err(io_err)?;
            rels.insert(id.0, bytes.as_slice()).map_err(io_err)?;
        }
        let mut adjacency = self.txn.open_multimap_table(ADJACENCY).map_err(io_err)?;
        adjacency.insert(from.0, id.0).map_err(io_err)?;
        adjacency.insert(to.0, id.0).map_err(io_err)?;
        Ok(id)
    }

    fn relationship(&self, id: RelId) -> Result<Option<Relationship>, StitchError> {
        Ok(self.load_rel(id)?.map(|r| Relationship {
            id,
            from: NodeId(r.from),
            to: NodeId(r.to),
            rel_type: r.rel_type,
            properties: r.properties,
        }))
    }

    fn relationships(&self, node: NodeId) -> Result<Vec<Relationship>, StitchError> {
        let mut out = Vec::new();
        for rel in self.adjacent(node)? {
            if let Some(r) = self.relationship(RelId(rel))? {
                out.push(r);
            }
        }
        Ok(out)
    }

    fn set_relationship_property(
        &mut self,
        id: RelId,
        name: &str,
        value: Value,
    ) -> Result<(), StitchError> {
        let mut record = self
            .load_rel(id)?
            .ok_or_else(|| StitchError::Constraint(format!("relationship {} not found", id.0)))?;
        record.properties.insert(name.to_string(), value);
        let bytes = encode(&record)?;
        let mut rels = self.txn.open_table(RELATIONSHIPS).map_err(io_err)?;
        rels.insert(id.0, bytes.as_slice()).map_err(io_err)?;
        Ok(())
    }

    fn delete_relationship(&mut self, id: RelId) -> Result<(), StitchError> {
        let Some(record) = self.load_rel(id)? else {
            return Ok(());
        };
        {
            let mut adjacency = self.txn.open_multimap_table(ADJACENCY).map_err(io_err)?;
            adjacency.remove(record.from, id.0).map_err(io_err)?;
            adjacency.remove(record.to, id.0).map_err(io_err)?;
        }
        let mut rels = self.txn.open_table(RELATIONSHIPS).map_err(io_err)?;
        rels.remove(id.0).map_err(io_err)?;
        Ok(())
    }

    fn timeline_add(&mut self, node: NodeId, millis: i64) -> Result<(), StitchError> {
        {
            let mut timeline = self.txn.open_table(TIMELINE).map_err(io_err)?;
            timeline.insert((millis, node.0), node.0).map_err(io_err)?;
        }
        let mut rev = self.txn.open_multimap_table(TIMELINE_REV).map_err(io_err)?;
        rev.insert(node.0, millis).map_err(io_err)?;
        Ok(())
    }

    fn timeline_remove(&mut self, node: NodeId) -> Result<(), StitchError> {
        let stamps: Vec<i64> = {
            let mut rev = self.txn.open_multimap_table(TIMELINE_REV).map_err(io_err)?;
            let mut stamps = Vec::new();
            for entry in rev.remove_all(node.0).map_err(io_err)? {
                stamps.push(entry.map_err(io_err)?.value());
            }
            stamps
        };
        let mut timeline = self.txn.open_table(TIMELINE).map_err(io_err)?;
        for millis in stamps {
            timeline.remove((millis, node.0)).map_err(io_err)?;
        }
        Ok(())
    }

    fn timeline_latest(&self) -> Result<Option<NodeId>, StitchError> {
        let timeline = self.txn.open_table(TIMELINE).map_err(io_err)?;
        Ok(timeline
            .last()
            .map_err(io_err)?
            .map(|(_, node)| NodeId(node.value())))
    }
}

impl ValueIndex for RedbTxn {
    fn index_node(
        &mut self,
        index: &str,
        field: &str,
        value: &Scalar,
        node: NodeId,
    ) -> Result<(), StitchError> {
        let term = value.index_term();
        {
            let mut forward = self.txn.open_multimap_table(NODE_INDEX).map_err(io_err)?;
            forward
                .insert((index, field, term.as_str()), node.0)
                .map_err(io_err)?;
        }
        let mut rev = self.txn.open_multimap_table(NODE_INDEX_REV).map_err(io_err)?;
        rev.insert(node.0, (index, field, term.as_str()))
            .map_err(io_err)?;
        Ok(())
    }

    fn unindex_node(
        &mut self,
        index: &str,
        field: &str,
        value: &Scalar,
        node: NodeId,
    ) -> Result<(), StitchError> {
        let term = value.index_term();
        {
            let mut forward = self.txn.open_multimap_table(NODE_INDEX).map_err(io_err)?;
            forward
                .remove((index, field, term.as_str()), node.0)
                .map_err(io_err)?;
        }
        let mut rev = self.txn.open_multimap_table(NODE_INDEX_REV).map_err(io_err)?;
        rev.remove(node.0, (index, field, term.as_str()))
            .map_err(io_err)?;
        Ok(())
    }

    fn unindex_node_all(&mut self, index: &str, node: NodeId) -> Result<(), StitchError> {
        let entries: Vec<(String, String)> = {
            let rev = self.txn.open_multimap_table(NODE_INDEX_REV).map_err(io_err)?;
            let mut entries = Vec::new();
            for entry in rev.get(node.0).map_err(io_err)? {
                let guard = entry.map_err(io_err)?;
                let (idx, field, term) = guard.value();
                if idx == index {
                    entries.push((field.to_string(), term.to_string()));
                }
            }
            entries
        };
        let mut forward = self.txn.open_multimap_table(NODE_INDEX).map_err(io_err)?;
        let mut rev = self.txn.open_multimap_table(NODE_INDEX_REV).map_err(io_err)?;
        for (field, term) in &entries {
            forward
                .remove((index, field.as_str(), term.as_str()), node.0)
                .map_err(io_err)?;
            rev.remove(node.0, (index, field.as_str(), term.as_str()))
                .map_err(io_err)?;
        }
        Ok(())
    }

    fn lookup_nodes(
        &self,
        index: &str,
        field: &str,
        value: &Scalar,
    ) -> Result<Vec<NodeId>, StitchError> {
        let term = value.index_term();
        let forward = self.txn.open_multimap_table(NODE_INDEX).map_err(io_err)?;
        let mut ids = Vec::new();
        for entry in forward
            .get((index, field, term.as_str()))
            .map_err(io_err)?
        {
            ids.push(NodeId(entry.map_err(io_err)?.value()));
        }
        Ok(ids)
    }

    fn index_relationship(
        &mut self,
        index: &str,
        field: &str,
        value: &Scalar,
        rel: RelId,
    ) -> Result<(), StitchError> {
        let term = value.index_term();
        {
            let mut forward = self.txn.open_multimap_table(REL_INDEX).map_err(io_err)?;
            forward
                .insert((index, field, term.as_str()), rel.0)
                .map_err(io_err)?;
        }
        let mut rev = self.txn.open_multimap_table(REL_INDEX_REV).map_err(io_err)?;
        rev.insert(rel.0, (index, field, term.as_str()))
            .map_err(io_err)?;
        Ok(())
    }

    fn unindex_relationship(&mut self, rel: RelId) -> Result<(), StitchError> {
        let entries: Vec<(String, String, String)> = {
            let mut rev = self.txn.open_multimap_table(REL_INDEX_REV).map_err(io_err)?;
            let mut entries = Vec::new();
            for entry in rev.remove_all(rel.0).map_err(io_err)? {
                let guard = entry.map_err(io_err)?;
                let (idx, field, term) = guard.value();
                entries.push((idx.to_string(), field.to_string(), term.to_string()));
            }
            entries
        };
        let mut forward = self.txn.open_multimap_table(REL_INDEX).map_err(io_err)?;
        for (idx, field, term) in &entries {
            forward
                .remove((idx.as_str(), field.as_str(), term.as_str()), rel.0)
                .map_err(io_err)?;
        }
        Ok(())
    }

    fn count_relationships(
        &self,
        index: &str,
        field: &str,
        value: &Scalar,
    ) -> Result<usize, StitchError> {
        let term = value.index_term();
        let forward = self.txn.open_multimap_table(REL_INDEX).map_err(io_err)?;
        let mut count = 0;
        for entry in forward
            .get((index, field, term.as_str()))
            .map_err(io_err)?
        {
            entry.map_err(io_err)?;
            count += 1;
        }
        Ok(count)
    }
}
