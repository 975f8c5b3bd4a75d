//! # Stitch Indexing & Linking
//!
//! Stitching is eager: the moment an entity stores a value under a key,
//! it is linked to every other entity of the same kind already indexed
//! under that key and value. Each link is one relationship typed by the
//! key name, carrying the shared scalar. It is also added to the
//! relationship index, and the two entities are joined in the persisted
//! component forest.

use crate::config::StitchConfig;
use crate::node::{CNode, now_millis};
use crate::primitives::{CREATED, VALUE, node_index, relationship_index};
use crate::stitch_key::StitchKey;
use crate::store::Txn;
use crate::types::{NodeId, Scalar, StitchError, Value};
use std::collections::BTreeMap;

/// Link `node` to every entity sharing an element of `value` under
/// `key`, then index `node` itself. Returns the number of relationships
/// created.
pub fn stitch<T: Txn>(
    tx: &mut T,
    config: &StitchConfig,
    node: NodeId,
    kind: &str,
    key: StitchKey,
    value: &Value,
) -> Result<usize, StitchError> {
    let index = node_index(kind);
    let rel_index = relationship_index(kind);
    let mut created = 0;

    for element in value.elements() {
        let hits: Vec<NodeId> = tx
            .lookup_nodes(&index, key.name(), element)?
            .into_iter()
            .filter(|hit| *hit != node)
            .collect();

        if hits.len() > config.fanout_warn {
            tracing::warn!(
                key = key.name(),
                value = %element,
                hits = hits.len(),
                "pathologic fan-out for stitched value"
            );
        }

        let now = now_millis();
        for other in &hits {
            let properties = BTreeMap::from([
                (VALUE.to_string(), Value::Single(element.clone())),
                (CREATED.to_string(), Value::from(now)),
            ]);
            let rel = tx.create_relationship(node, *other, key.name(), properties)?;
            tx.index_relationship(&rel_index, key.name(), element, rel)?;
            CNode::open(tx, node)?.union(tx, CNode::open(tx, *other)?)?;
        }
        created += hits.len();

        tracing::debug!(
            node = node.0,
            key = key.name(),
            value = %element,
            hits = hits.len(),
            "stitched"
        );
        tx.index_node(&index, key.name(), element, node)?;
    }
    Ok(created)
}

/// Remove every `key` relationship touching `node` and drop the index
/// entries of its current `key` value. Returns the number of
/// relationships removed.
///
/// The persisted component forest is not split; components only grow
/// until a full recomputation.
pub fn unstitch<T: Txn>(
    tx: &mut T,
    node: NodeId,
    kind: &str,
    key: StitchKey,
) -> Result<usize, StitchError> {
    let mut removed = 0;
    for rel in tx.relationships(node)? {
        if rel.rel_type == key.name() {
            tx.unindex_relationship(rel.id)?;
            tx.delete_relationship(rel.id)?;
            removed += 1;
        }
    }
    if let Some(current) = tx.property(node, key.name())? {
        let index = node_index(kind);
        for element in current.elements() {
            tx.unindex_node(&index, key.name(), element, node)?;
        }
    }
    Ok(removed)
}

/// Number of `key` relationships carrying `value` among entities of
/// `kind`.
pub fn stitched_value_count<T: Txn>(
    tx: &T,
    kind: &str,
    key: StitchKey,
    value: &Scalar,
) -> Result<usize, StitchError> {
    tx.count_relationships(&relationship_index(kind), key.name(), value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::datasource::DataSourceFactory;
    use crate::entity::Entity;
    use crate::store::{RedbStore, Store, ValueIndex};

    #[test]
    fn fanout_over_threshold_still_links() {
        let store = RedbStore::in_memory().unwrap();
        let config = StitchConfig::default();
        let holders = config.fanout_warn + 2;
        store
            .execute(|tx| {
                let ds = DataSourceFactory::register(tx, "s1")?;
                let mut last = None;
                for _ in 0..holders {
                    let e = Entity::create(tx, ds)?;
                    e.set(tx, &config, StitchKey::I_UNII, "U1".into())?;
                    last = Some(e);
                }
                let last = last.unwrap();
                assert_eq!(last.neighbors(tx)?.len(), holders - 1);
                assert_eq!(
                    stitched_value_count(tx, Entity::kind_name(), StitchKey::I_UNII, &"U1".into())?,
                    holders * (holders - 1) / 2
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn unstitch_drops_links_and_index_entries() {
        let store = RedbStore::in_memory().unwrap();
        let config = StitchConfig::default();
        store
            .execute(|tx| {
                let ds = DataSourceFactory::register(tx, "s1")?;
                let a = Entity::create(tx, ds)?;
                let b = Entity::create(tx, ds)?;
                a.set(tx, &config, StitchKey::I_CAS, "50-00-0".into())?;
                b.set(tx, &config, StitchKey::I_CAS, "50-00-0".into())?;

                assert_eq!(unstitch(tx, b.id(), Entity::kind_name(), StitchKey::I_CAS)?, 1);
                assert!(a.neighbors(tx)?.is_empty());
                let index = node_index(Entity::kind_name());
                assert_eq!(
                    tx.lookup_nodes(&index, StitchKey::I_CAS.name(), &"50-00-0".into())?,
                    vec![a.id()]
                );
                Ok(())
            })
            .unwrap();
    }
}
