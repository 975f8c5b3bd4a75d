//! # Graph Store
//!
//! The engine never talks to a database directly. It works against three
//! traits:
//!
//! - [`GraphTxn`]: nodes, labels, properties, relationships and the
//!   timeline, as seen from inside one transaction.
//! - [`ValueIndex`]: the value index service. Stitching looks values up
//!   here and the relationship index feeds the closure rule.
//! - [`Store`]: runs a closure inside one ACID transaction.
//!
//! [`RedbStore`] implements all three on top of redb.

mod redb_store;

pub use redb_store::{RedbStore, RedbTxn};

use crate::types::{NodeId, RelId, Scalar, StitchError, Value};
use std::collections::{BTreeMap, BTreeSet};

/// A stored relationship. Relationships are directed in storage but the
/// engine treats stitch edges as undirected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: RelId,
    pub from: NodeId,
    pub to: NodeId,
    pub rel_type: String,
    pub properties: BTreeMap<String, Value>,
}

impl Relationship {
    /// The endpoint that is not `node`.
    #[must_use]
    pub fn other(&self, node: NodeId) -> NodeId {
        if self.from == node { self.to } else { self.from }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// Property-graph operations available inside a transaction.
pub trait GraphTxn {
    fn create_node(&mut self) -> Result<NodeId, StitchError>;

    /// Delete a node. Fails with `Constraint` while relationships remain.
    fn delete_node(&mut self, id: NodeId) -> Result<(), StitchError>;

    fn contains_node(&self, id: NodeId) -> Result<bool, StitchError>;

    /// All node ids in ascending order.
    fn node_ids(&self) -> Result<Vec<NodeId>, StitchError>;

    fn labels(&self, id: NodeId) -> Result<BTreeSet<String>, StitchError>;

    fn has_label(&self, id: NodeId, label: &str) -> Result<bool, StitchError> {
        Ok(self.labels(id)?.contains(label))
    }

    fn add_label(&mut self, id: NodeId, label: &str) -> Result<(), StitchError>;

    fn remove_label(&mut self, id: NodeId, label: &str) -> Result<(), StitchError>;

    /// Nodes carrying `label`, ascending.
    fn nodes_with_label(&self, label: &str) -> Result<Vec<NodeId>, StitchError>;

    fn property(&self, id: NodeId, name: &str) -> Result<Option<Value>, StitchError>;

    fn properties(&self, id: NodeId) -> Result<BTreeMap<String, Value>, StitchError>;

    fn set_property(&mut self, id: NodeId, name: &str, value: Value) -> Result<(), StitchError>;

    /// Remove a property, returning its previous value.
    fn remove_property(&mut self, id: NodeId, name: &str) -> Result<Option<Value>, StitchError>;

    fn create_relationship(
        &mut self,
        from: NodeId,
        to: NodeId,
        rel_type: &str,
        properties: BTreeMap<String, Value>,
    ) -> Result<RelId, StitchError>;

    fn relationship(&self, id: RelId) -> Result<Option<Relationship>, StitchError>;

    /// Relationships touching `node` in either direction, ordered by id.
    fn relationships(&self, node: NodeId) -> Result<Vec<Relationship>, StitchError>;

    fn set_relationship_property(
        &mut self,
        id: RelId,
        name: &str,
        value: Value,
    ) -> Result<(), StitchError>;

    fn delete_relationship(&mut self, id: RelId) -> Result<(), StitchError>;

    /// Record that `node` changed at `millis`.
    fn timeline_add(&mut self, node: NodeId, millis: i64) -> Result<(), StitchError>;

    /// Drop every timeline entry of `node`.
    fn timeline_remove(&mut self, node: NodeId) -> Result<(), StitchError>;

    /// The most recently changed node.
    fn timeline_latest(&self) -> Result<Option<NodeId>, StitchError>;
}

/// Named value indices over nodes and relationships.
pub trait ValueIndex {
    fn index_node(
        &mut self,
        index: &str,
        field: &str,
        value: &Scalar,
        node: NodeId,
    ) -> Result<(), StitchError>;

    fn unindex_node(
        &mut self,
        index: &str,
        field: &str,
        value: &Scalar,
        node: NodeId,
    ) -> Result<(), StitchError>;

    /// Remove every entry of `node` from `index`.
    fn unindex_node_all(&mut self, index: &str, node: NodeId) -> Result<(), StitchError>;

    /// Nodes indexed under `field = value`, ascending.
    fn lookup_nodes(
        &self,
        index: &str,
        field: &str,
        value: &Scalar,
    ) -> Result<Vec<NodeId>, StitchError>;

    fn index_relationship(
        &mut self,
        index: &str,
        field: &str,
        value: &Scalar,
        rel: RelId,
    ) -> Result<(), StitchError>;

    /// Remove every index entry of `rel`.
    fn unindex_relationship(&mut self, rel: RelId) -> Result<(), StitchError>;

    /// Number of relationships indexed under `field = value`.
    fn count_relationships(
        &self,
        index: &str,
        field: &str,
        value: &Scalar,
    ) -> Result<usize, StitchError>;
}

/// Everything the engine needs from a transaction.
pub trait Txn: GraphTxn + ValueIndex {}

impl<T: GraphTxn + ValueIndex> Txn for T {}

/// A transactional store.
pub trait Store {
    type Txn: Txn;

    /// Run `f` in one write transaction: commit on `Ok`, roll back on `Err`.
    fn execute<T, F>(&self, f: F) -> Result<T, StitchError>
    where
        F: FnOnce(&mut Self::Txn) -> Result<T, StitchError>;
}
