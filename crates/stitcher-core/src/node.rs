//! # Versioned Node Model
//!
//! `CNode` is the base of every node the engine writes. It stamps
//! creation and update times, keeps a per-property change history as
//! immutable snapshot nodes, and owns the cascade that removes a node
//! together with everything that only exists because of it.
//!
//! The persisted component bookkeeping also lives here: every entity
//! carries a `PARENT` pointer and a `rank`, forming a union-find forest
//! that is updated as stitches are created. Roots carry the `COMPONENT`
//! label.

use crate::primitives::{
    COMPONENT_INDEX, CREATED, KEY, KIND, LAST_UPDATED, NEW_VALUE, OLD_VALUE, PARENT, RANK,
    node_index,
};
use crate::store::{GraphTxn, Txn};
use crate::types::{AuxNodeType, AuxRelType, NodeId, Scalar, StitchError, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Current wall-clock time in epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One recorded property change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: NodeId,
    pub key: String,
    pub created: i64,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Handle to a versioned node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CNode(NodeId);

impl CNode {
    /// Create a node of `kind` carrying `labels`.
    pub fn create<T: Txn>(
        tx: &mut T,
        kind: &str,
        labels: &[AuxNodeType],
    ) -> Result<Self, StitchError> {
        let id = tx.create_node()?;
        let now = now_millis();
        tx.set_property(id, CREATED, now.into())?;
        tx.set_property(id, LAST_UPDATED, now.into())?;
        tx.set_property(id, KIND, kind.into())?;
        for label in labels {
            tx.add_label(id, label.as_str())?;
        }
        tx.timeline_add(id, now)?;
        Ok(Self(id))
    }

    /// Wrap an existing node.
    pub fn open<T: GraphTxn>(tx: &T, id: NodeId) -> Result<Self, StitchError> {
        if !tx.contains_node(id)? {
            return Err(StitchError::NodeNotFound(id));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub const fn id(self) -> NodeId {
        self.0
    }

    pub fn kind<T: GraphTxn>(self, tx: &T) -> Result<Option<String>, StitchError> {
        Ok(tx
            .property(self.0, KIND)?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    pub fn created<T: GraphTxn>(self, tx: &T) -> Result<i64, StitchError> {
        Ok(tx.property(self.0, CREATED)?.and_then(|v| v.as_long()).unwrap_or(0))
    }

    pub fn last_updated<T: GraphTxn>(self, tx: &T) -> Result<i64, StitchError> {
        Ok(tx
            .property(self.0, LAST_UPDATED)?
            .and_then(|v| v.as_long())
            .unwrap_or(0))
    }

    pub fn get<T: GraphTxn>(self, tx: &T, name: &str) -> Result<Option<Value>, StitchError> {
        tx.property(self.0, name)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Replace property `key` with `new` (remove it on `None`), recording
    /// the previous value in a snapshot node.
    pub fn snapshot<T: Txn>(
        self,
        tx: &mut T,
        key: &str,
        new: Option<Value>,
    ) -> Result<NodeId, StitchError> {
        let now = now_millis();
        let old = tx.property(self.0, key)?;

        let snap = tx.create_node()?;
        tx.add_label(snap, AuxNodeType::Snapshot.as_str())?;
        tx.set_property(snap, KEY, key.into())?;
        tx.set_property(snap, CREATED, now.into())?;
        if let Some(old) = old {
            tx.set_property(snap, OLD_VALUE, old)?;
        }
        if let Some(new) = &new {
            tx.set_property(snap, NEW_VALUE, new.clone())?;
        }
        tx.create_relationship(
            self.0,
            snap,
            &AuxRelType::snapshot_of(key),
            BTreeMap::from([(CREATED.to_string(), Value::from(now))]),
        )?;

        match new {
            Some(value) => tx.set_property(self.0, key, value)?,
            None => {
                tx.remove_property(self.0, key)?;
            }
        }
        tx.set_property(self.0, LAST_UPDATED, now.into())?;
        tx.timeline_add(self.0, now)?;
        Ok(snap)
    }

    /// Change history, oldest first, optionally for one property only.
    pub fn history<T: GraphTxn>(
        self,
        tx: &T,
        key: Option<&str>,
    ) -> Result<Vec<Snapshot>, StitchError> {
        let mut out = Vec::new();
        for rel in tx.relationships(self.0)? {
            if rel.from != self.0 || !AuxRelType::is_snapshot(&rel.rel_type) {
                continue;
            }
            let props = tx.properties(rel.to)?;
            let Some(name) = props.get(KEY).and_then(|v| v.as_str()) else {
                continue;
            };
            if key.is_some_and(|k| k != name) {
                continue;
            }
            out.push(Snapshot {
                id: rel.to,
                key: name.to_string(),
                created: props.get(CREATED).and_then(Value::as_long).unwrap_or(0),
                old_value: props.get(OLD_VALUE).cloned(),
                new_value: props.get(NEW_VALUE).cloned(),
            });
        }
        out.sort_by_key(|s| (s.created, s.id));
        Ok(out)
    }

    // =========================================================================
    // DELETION
    // =========================================================================

    /// Delete this node with its snapshots, payload data, relationships
    /// and index entries.
    pub fn delete<T: Txn>(self, tx: &mut T) -> Result<(), StitchError> {
        for rel in tx.relationships(self.0)? {
            let other = rel.other(self.0);
            tx.unindex_relationship(rel.id)?;
            tx.delete_relationship(rel.id)?;

            let owned = other != self.0
                && ((rel.rel_type == AuxRelType::Payload.as_str()
                    && tx.has_label(other, AuxNodeType::Data.as_str())?)
                    || tx.has_label(other, AuxNodeType::Snapshot.as_str())?);
            if owned {
                purge(tx, other)?;
            }
        }

        self.reparent_children(tx)?;
        if let Some(kind) = self.kind(tx)? {
            tx.unindex_node_all(&node_index(&kind), self.0)?;
        }
        tx.unindex_node_all(COMPONENT_INDEX, self.0)?;
        tx.delete_node(self.0)
    }

    // =========================================================================
    // PERSISTED COMPONENT TRACKING
    // =========================================================================

    /// Make this node the single-member root of its own component.
    pub fn init_component<T: Txn>(self, tx: &mut T) -> Result<(), StitchError> {
        tx.set_property(self.0, RANK, Value::from(1_i64))?;
        tx.add_label(self.0, AuxNodeType::Component.as_str())?;
        set_parent(tx, self.0, self.0)
    }

    pub fn rank<T: GraphTxn>(self, tx: &T) -> Result<i64, StitchError> {
        Ok(tx.property(self.0, RANK)?.and_then(|v| v.as_long()).unwrap_or(1))
    }

    fn parent<T: GraphTxn>(self, tx: &T) -> Result<NodeId, StitchError> {
        Ok(tx
            .property(self.0, PARENT)?
            .and_then(|v| v.as_long())
            .map(|p| NodeId(p as u64))
            .unwrap_or(self.0))
    }

    /// Root of this node's persisted component.
    pub fn root<T: GraphTxn>(self, tx: &T) -> Result<NodeId, StitchError> {
        let mut seen = BTreeSet::new();
        let mut current = self;
        loop {
            let parent = current.parent(tx)?;
            if parent == current.0 || !seen.insert(current.0) {
                return Ok(current.0);
            }
            current = Self(parent);
        }
    }

    pub fn is_root<T: GraphTxn>(self, tx: &T) -> Result<bool, StitchError> {
        Ok(self.parent(tx)? == self.0)
    }

    /// Join the persisted components of `self` and `other`. The root with
    /// the higher rank (older node on ties) absorbs the other and the
    /// ranks are summed. Returns false when already joined.
    pub fn union<T: Txn>(self, tx: &mut T, other: Self) -> Result<bool, StitchError> {
        let a = Self(self.root(tx)?);
        let b = Self(other.root(tx)?);
        if a == b {
            return Ok(false);
        }
        let (rank_a, rank_b) = (a.rank(tx)?, b.rank(tx)?);
        let (parent, child) = if rank_a > rank_b || (rank_a == rank_b && a.0 < b.0) {
            (a, b)
        } else {
            (b, a)
        };
        set_parent(tx, child.0, parent.0)?;
        tx.remove_label(child.0, AuxNodeType::Component.as_str())?;
        tx.set_property(parent.0, RANK, rank_a.saturating_add(rank_b).into())?;
        Ok(true)
    }

    /// Nodes whose `PARENT` points at this node (excluding itself).
    pub fn children<T: Txn>(self, tx: &T) -> Result<Vec<NodeId>, StitchError> {
        let mut kids = tx.lookup_nodes(COMPONENT_INDEX, PARENT, &parent_term(self.0))?;
        kids.retain(|k| *k != self.0);
        Ok(kids)
    }

    fn reparent_children<T: Txn>(self, tx: &mut T) -> Result<(), StitchError> {
        let children = self.children(tx)?;
        let parent = self.parent(tx)?;
        if parent != self.0 {
            for child in children {
                set_parent(tx, child, parent)?;
            }
            let root = Self(Self(parent).root(tx)?);
            let rank = root.rank(tx)?;
            tx.set_property(root.0, RANK, rank.saturating_sub(1).max(1).into())?;
            return Ok(());
        }

        let mut best: Option<(i64, NodeId)> = None;
        for child in &children {
            let rank = Self(*child).rank(tx)?;
            // highest rank wins, lowest id on ties
            if best.is_none_or(|(r, id)| rank > r || (rank == r && *child < id)) {
                best = Some((rank, *child));
            }
        }
        let Some((_, new_root)) = best else {
            return Ok(());
        };
        let rank = self.rank(tx)?;
        set_parent(tx, new_root, new_root)?;
        tx.add_label(new_root, AuxNodeType::Component.as_str())?;
        tx.set_property(new_root, RANK, rank.saturating_sub(1).max(1).into())?;
        for child in children.into_iter().filter(|c| *c != new_root) {
            set_parent(tx, child, new_root)?;
        }
        Ok(())
    }
}

fn parent_term(id: NodeId) -> Scalar {
    Scalar::Long(id.0 as i64)
}

fn set_parent<T: Txn>(tx: &mut T, node: NodeId, parent: NodeId) -> Result<(), StitchError> {
    if let Some(old) = tx.property(node, PARENT)?.and_then(|v| v.as_long()) {
        tx.unindex_node(COMPONENT_INDEX, PARENT, &Scalar::Long(old), node)?;
    }
    tx.set_property(node, PARENT, parent.into())?;
    tx.index_node(COMPONENT_INDEX, PARENT, &parent_term(parent), node)
}

/// Remove a dependent node (snapshot or payload data) outright.
fn purge<T: Txn>(tx: &mut T, node: NodeId) -> Result<(), StitchError> {
    for rel in tx.relationships(node)? {
        tx.unindex_relationship(rel.id)?;
        tx.delete_relationship(rel.id)?;
    }
    if let Some(kind) = tx.property(node, KIND)?.and_then(|v| v.as_str().map(str::to_string)) {
        tx.unindex_node_all(&node_index(&kind), node)?;
    }
    tx.delete_node(node)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::{RedbStore, Store};

    const KIND_TEST: &str = "test::Node";

    #[test]
    fn create_stamps_node() {
        let store = RedbStore::in_memory().unwrap();
        store
            .execute(|tx| {
                let n = CNode::create(tx, KIND_TEST, &[AuxNodeType::Entity])?;
                assert_eq!(n.kind(tx)?.as_deref(), Some(KIND_TEST));
                assert!(n.created(tx)? > 0);
                assert_eq!(n.created(tx)?, n.last_updated(tx)?);
                assert!(tx.has_label(n.id(), "ENTITY")?);
                assert_eq!(tx.timeline_latest()?, Some(n.id()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn snapshot_records_old_and_new() {
        let store = RedbStore::in_memory().unwrap();
        store
            .execute(|tx| {
                let n = CNode::create(tx, KIND_TEST, &[])?;
                n.snapshot(tx, "name", Some("a".into()))?;
                n.snapshot(tx, "name", Some("b".into()))?;
                n.snapshot(tx, "name", None)?;
                assert_eq!(n.get(tx, "name")?, None);

                let history = n.history(tx, Some("name"))?;
                assert_eq!(history.len(), 3);
                assert_eq!(history[0].old_value, None);
                assert_eq!(history[0].new_value, Some("a".into()));
                assert_eq!(history[1].old_value, Some("a".into()));
                assert_eq!(history[2].new_value, None);
                assert!(n.history(tx, Some("other"))?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn delete_removes_snapshots() {
        let store = RedbStore::in_memory().unwrap();
        store
            .execute(|tx| {
                let n = CNode::create(tx, KIND_TEST, &[])?;
                let snap = n.snapshot(tx, "name", Some("a".into()))?;
                n.delete(tx)?;
                assert!(!tx.contains_node(n.id())?);
                assert!(!tx.contains_node(snap)?);
                assert!(tx.nodes_with_label("SNAPSHOT")?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn union_by_rank_prefers_older_root() {
        let store = RedbStore::in_memory().unwrap();
        store
            .execute(|tx| {
                let a = CNode::create(tx, KIND_TEST, &[])?;
                let b = CNode::create(tx, KIND_TEST, &[])?;
                let c = CNode::create(tx, KIND_TEST, &[])?;
                for n in [a, b, c] {
                    n.init_component(tx)?;
                }
                assert!(a.union(tx, b)?);
                assert!(!b.union(tx, a)?);
                assert_eq!(b.root(tx)?, a.id());
                assert_eq!(a.rank(tx)?, 2);

                // c has the lower rank and joins under a
                assert!(c.union(tx, b)?);
                assert_eq!(c.root(tx)?, a.id());
                assert_eq!(a.rank(tx)?, 3);
                assert!(!tx.has_label(c.id(), "COMPONENT")?);
                assert_eq!(tx.nodes_with_label("COMPONENT")?, vec![a.id()]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn deleting_root_promotes_child() {
        let store = RedbStore::in_memory().unwrap();
        store
            .execute(|tx| {
                let a = CNode::create(tx, KIND_TEST, &[])?;
                let b = CNode::create(tx, KIND_TEST, &[])?;
                let c = CNode::create(tx, KIND_TEST, &[])?;
                for n in [a, b, c] {
                    n.init_component(tx)?;
                }
                a.union(tx, b)?;
                a.union(tx, c)?;
                a.delete(tx)?;
                assert!(b.is_root(tx)?);
                assert_eq!(c.root(tx)?, b.id());
                assert_eq!(b.rank(tx)?, 2);
                assert!(tx.has_label(b.id(), "COMPONENT")?);
                Ok(())
            })
            .unwrap();
    }
}
