//! # Entities
//!
//! An entity is the resolvable record: a versioned node carrying typed
//! stitch values, raw payloads and a data-source reference. Every value
//! mutation runs in a fixed order inside the caller's transaction:
//! unstitch, snapshot, write, stitch.

use crate::config::StitchConfig;
use crate::datasource::{DataSource, DataSourceFactory};
use crate::node::{CNode, now_millis};
use crate::payload::Payload;
use crate::primitives::{CREATED, ID, INDEXED_FIELDS, LAST_UPDATED, SOURCE, UPDATED, node_index};
use crate::stitch::{stitch, unstitch};
use crate::stitch_key::StitchKey;
use crate::store::{GraphTxn, Relationship, Txn};
use crate::types::{AuxNodeType, AuxRelType, NodeId, RelId, Scalar, StitchError, Value};
use crate::values::{Delta, delta, merge};
use std::collections::{BTreeMap, BTreeSet};

/// Prefix of payload fields indexed on the owning entity.
const PAYLOAD_FIELD_PREFIX: &str = "payload.";

/// One stitch relationship as seen from an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stitch {
    pub rel: RelId,
    pub other: NodeId,
    pub key: StitchKey,
    pub value: Scalar,
}

/// Handle to an entity node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(CNode);

impl Entity {
    /// Kind tag of entity nodes; also names their value indices.
    #[must_use]
    pub fn kind_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Create an entity belonging to `source`. It starts as the root of
    /// its own component.
    pub fn create<T: Txn>(tx: &mut T, source: DataSource) -> Result<Self, StitchError> {
        let node = CNode::create(tx, Self::kind_name(), &[AuxNodeType::Entity])?;
        let key = source.key(tx)?;
        tx.set_property(node.id(), SOURCE, key.into())?;
        node.init_component(tx)?;
        Ok(Self(node))
    }

    /// Wrap an existing entity node.
    pub fn open<T: GraphTxn>(tx: &T, id: NodeId) -> Result<Self, StitchError> {
        let node = CNode::open(tx, id)?;
        if !tx.has_label(id, AuxNodeType::Entity.as_str())? {
            return Err(StitchError::NotAnEntity(id));
        }
        Ok(Self(node))
    }

    #[must_use]
    pub const fn id(self) -> NodeId {
        self.0.id()
    }

    #[must_use]
    pub const fn node(self) -> CNode {
        self.0
    }

    pub fn get<T: GraphTxn>(self, tx: &T, key: StitchKey) -> Result<Option<Value>, StitchError> {
        self.0.get(tx, key.name())
    }

    /// Keys this entity currently holds a value for.
    pub fn keys<T: GraphTxn>(self, tx: &T) -> Result<Vec<StitchKey>, StitchError> {
        Ok(self.stitch_values(tx)?.into_keys().collect())
    }

    /// Every stitch value of this entity, by key.
    pub fn stitch_values<T: GraphTxn>(
        self,
        tx: &T,
    ) -> Result<BTreeMap<StitchKey, Value>, StitchError> {
        Ok(tx
            .properties(self.id())?
            .into_iter()
            .filter_map(|(name, value)| {
                StitchKey::try_from(name.as_str()).ok().map(|k| (k, value))
            })
            .collect())
    }

    // =========================================================================
    // VALUE MUTATION
    // =========================================================================

    /// Replace the value of `key`. A value left empty by the blacklist
    /// removes the property.
    pub fn set<T: Txn>(
        self,
        tx: &mut T,
        config: &StitchConfig,
        key: StitchKey,
        value: Value,
    ) -> Result<(), StitchError> {
        let Some(value) = admit(config, key, value)? else {
            if self.remove(tx, key)?.is_some() {
                tracing::debug!(entity = %self.id(), key = key.name(), "value cleared by blacklist");
            }
            return Ok(());
        };
        self.replace(tx, config, key, Some(value))
    }

    /// Merge `value` into the current value of `key`, stitching only the
    /// new elements.
    pub fn add<T: Txn>(
        self,
        tx: &mut T,
        config: &StitchConfig,
        key: StitchKey,
        value: Value,
    ) -> Result<(), StitchError> {
        let Some(value) = admit(config, key, value)? else {
            return Ok(());
        };
        let Some(old) = self.get(tx, key)? else {
            return self.replace(tx, config, key, Some(value));
        };

        let novel = match delta(&value, &old)? {
            Delta::Removed => return Ok(()),
            Delta::Unchanged => value,
            Delta::Changed(rest) => rest,
        };
        let merged = merge([&old, &novel])?;
        self.0.snapshot(tx, key.name(), Some(merged))?;
        stitch(tx, config, self.id(), Self::kind_name(), key, &novel)?;
        Ok(())
    }

    /// Replace the elements `old` of `key` with `new`.
    ///
    /// With `new = None` the elements are removed. With `old = None` this
    /// is [`Entity::add`].
    pub fn update<T: Txn>(
        self,
        tx: &mut T,
        config: &StitchConfig,
        key: StitchKey,
        old: Option<&Value>,
        new: Option<Value>,
    ) -> Result<(), StitchError> {
        let current = self.get(tx, key)?;
        match (old, new) {
            (None, None) => Ok(()),
            (None, Some(new)) => self.add(tx, config, key, new),
            (Some(old), None) => {
                let Some(current) = current else {
                    tracing::warn!(entity = self.id().0, key = key.name(), "no value to update");
                    return Ok(());
                };
                match delta(&current, old)? {
                    Delta::Unchanged => {
                        tracing::warn!(
                            entity = self.id().0,
                            key = key.name(),
                            value = %old,
                            "none of the values to remove are present"
                        );
                        Ok(())
                    }
                    Delta::Removed => self.replace(tx, config, key, None),
                    Delta::Changed(rest) => self.replace(tx, config, key, Some(rest)),
                }
            }
            (Some(old), Some(new)) => {
                let new = admit(config, key, new)?;
                let remaining = match &current {
                    None => None,
                    Some(current) => match delta(current, old)? {
                        Delta::Removed => None,
                        Delta::Unchanged => Some(current.clone()),
                        Delta::Changed(rest) => Some(rest),
                    },
                };
                let value = match (remaining, new) {
                    (Some(rest), Some(new)) => Some(merge([&rest, &new])?),
                    (rest, new) => rest.or(new),
                };
                self.replace(tx, config, key, value)
            }
        }
    }

    /// Drop the value of `key`. Returns the removed value.
    pub fn remove<T: Txn>(
        self,
        tx: &mut T,
        key: StitchKey,
    ) -> Result<Option<Value>, StitchError> {
        let old = self.get(tx, key)?;
        if old.is_some() {
            unstitch(tx, self.id(), Self::kind_name(), key)?;
            self.0.snapshot(tx, key.name(), None)?;
        }
        Ok(old)
    }

    fn replace<T: Txn>(
        self,
        tx: &mut T,
        config: &StitchConfig,
        key: StitchKey,
        value: Option<Value>,
    ) -> Result<(), StitchError> {
        unstitch(tx, self.id(), Self::kind_name(), key)?;
        self.0.snapshot(tx, key.name(), value.clone())?;
        if let Some(value) = value {
            stitch(tx, config, self.id(), Self::kind_name(), key, &value)?;
        }
        Ok(())
    }

    /// Attach `label` to this entity.
    pub fn add_label<T: Txn>(self, tx: &mut T, label: &str) -> Result<(), StitchError> {
        tx.add_label(self.id(), label)
    }

    pub fn labels<T: GraphTxn>(self, tx: &T) -> Result<BTreeSet<String>, StitchError> {
        tx.labels(self.id())
    }

    // =========================================================================
    // PAYLOADS
    // =========================================================================

    /// Store `payload` under this entity, replacing an earlier payload
    /// with the same source and id. Returns the data node. Index entries
    /// of the replaced data are dropped unless another payload of this
    /// entity still holds them.
    pub fn add_payload<T: Txn>(self, tx: &mut T, payload: &Payload) -> Result<NodeId, StitchError> {
        let id = payload.id_value();
        let now = now_millis();
        let fields = Value::from_elements(
            payload.indexed_fields.iter().map(|f| Scalar::from(f.as_str())).collect(),
        );

        let existing = self
            .payload_relationships(tx)?
            .into_iter()
            .find(|rel| {
                rel.property(SOURCE).and_then(Value::as_str) == Some(payload.source.as_str())
                    && rel.property(ID) == Some(&id)
            });

        let mut stale = BTreeSet::new();
        let data = match existing {
            Some(rel) => {
                let old = tx.properties(rel.to)?;
                stale = indexed_entries(&rel, &old);
                for name in old.into_keys() {
                    if name != CREATED {
                        tx.remove_property(rel.to, &name)?;
                    }
                }
                tx.set_relationship_property(rel.id, UPDATED, now.into())?;
                tx.set_relationship_property(rel.id, INDEXED_FIELDS, fields)?;
                rel.to
            }
            None => {
                let data = tx.create_node()?;
                tx.add_label(data, AuxNodeType::Data.as_str())?;
                tx.set_property(data, CREATED, now.into())?;
                let properties = BTreeMap::from([
                    (SOURCE.to_string(), Value::from(payload.source.as_str())),
                    (ID.to_string(), id.clone()),
                    (CREATED.to_string(), Value::from(now)),
                    (INDEXED_FIELDS.to_string(), fields),
                ]);
                tx.create_relationship(self.id(), data, AuxRelType::Payload.as_str(), properties)?;
                data
            }
        };

        for (name, value) in &payload.data {
            tx.set_property(data, name, value.clone())?;
        }

        let mut held = BTreeSet::new();
        for rel in self.payload_relationships(tx)? {
            let props = tx.properties(rel.to)?;
            held.extend(indexed_entries(&rel, &props));
        }

        let index = node_index(Self::kind_name());
        for (name, element) in stale.difference(&held) {
            tx.unindex_node(&index, name, element, self.id())?;
        }
        let id_field = format!("{PAYLOAD_FIELD_PREFIX}{ID}");
        for element in id.elements() {
            tx.index_node(&index, &id_field, element, self.id())?;
        }
        for field in &payload.indexed_fields {
            let Some(value) = payload.data.get(field) else {
                continue;
            };
            let name = format!("{PAYLOAD_FIELD_PREFIX}{field}");
            for element in value.elements() {
                tx.index_node(&index, &name, element, self.id())?;
            }
        }

        tx.set_property(self.id(), LAST_UPDATED, now.into())?;
        tx.timeline_add(self.id(), now)?;
        Ok(data)
    }

    /// The most recently written payload, if any.
    pub fn payload<T: GraphTxn>(self, tx: &T) -> Result<Option<Payload>, StitchError> {
        let stamp = |rel: &Relationship| {
            rel.property(UPDATED)
                .or_else(|| rel.property(CREATED))
                .and_then(Value::as_long)
                .unwrap_or(0)
        };
        let newest = self
            .payload_relationships(tx)?
            .into_iter()
            .max_by_key(|rel| (stamp(rel), rel.id));
        let Some(rel) = newest else {
            return Ok(None);
        };

        let mut data = tx.properties(rel.to)?;
        data.remove(CREATED);
        Ok(Some(Payload {
            source: rel
                .property(SOURCE)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            id: rel.property(ID).cloned(),
            data,
            indexed_fields: indexed_fields(&rel),
        }))
    }

    /// Entities whose payload index holds `field = value`.
    pub fn find_by_payload<T: Txn>(
        tx: &T,
        field: &str,
        value: &Scalar,
    ) -> Result<Vec<Self>, StitchError> {
        let name = format!("{PAYLOAD_FIELD_PREFIX}{field}");
        tx.lookup_nodes(&node_index(Self::kind_name()), &name, value)?
            .into_iter()
            .map(|id| Self::open(tx, id))
            .collect()
    }

    fn payload_relationships<T: GraphTxn>(
        self,
        tx: &T,
    ) -> Result<Vec<Relationship>, StitchError> {
        Ok(tx
            .relationships(self.id())?
            .into_iter()
            .filter(|rel| rel.from == self.id() && rel.rel_type == AuxRelType::Payload.as_str())
            .collect())
    }

    // =========================================================================
    // NEIGHBORHOOD
    // =========================================================================

    /// Stitch relationships of this entity, ordered by relationship id.
    pub fn stitches<T: GraphTxn>(self, tx: &T) -> Result<Vec<Stitch>, StitchError> {
        Ok(tx
            .relationships(self.id())?
            .into_iter()
            .filter_map(|rel| {
                let key = StitchKey::try_from(rel.rel_type.as_str()).ok()?;
                let value = rel.property(crate::primitives::VALUE)?.as_single()?.clone();
                Some(Stitch {
                    rel: rel.id,
                    other: rel.other(self.id()),
                    key,
                    value,
                })
            })
            .collect())
    }

    /// Directly stitched entities with the key/value pairs linking them.
    pub fn neighbors<T: GraphTxn>(
        self,
        tx: &T,
    ) -> Result<BTreeMap<NodeId, Vec<(StitchKey, Scalar)>>, StitchError> {
        let mut out: BTreeMap<NodeId, Vec<(StitchKey, Scalar)>> = BTreeMap::new();
        for s in self.stitches(tx)? {
            out.entry(s.other).or_default().push((s.key, s.value));
        }
        Ok(out)
    }

    /// Depth-first traversal over stitch relationships.
    ///
    /// `follow(key, value)` decides whether an edge is taken.
    /// `visit(path, node)` sees every reached node with the path leading
    /// to it; returning false stops the walk from expanding that node.
    /// Returns nodes in visit order, starting with this entity.
    pub fn walk<T, F, V>(self, tx: &T, mut follow: F, mut visit: V) -> Result<Vec<NodeId>, StitchError>
    where
        T: GraphTxn,
        F: FnMut(StitchKey, &Scalar) -> bool,
        V: FnMut(&[NodeId], NodeId) -> bool,
    {
        let mut seen = BTreeSet::from([self.id()]);
        let mut order = Vec::new();
        let mut stack: Vec<(NodeId, Vec<NodeId>)> = vec![(self.id(), Vec::new())];

        while let Some((node, path)) = stack.pop() {
            order.push(node);
            if !visit(&path, node) {
                continue;
            }
            let mut next = Vec::new();
            for s in Self(CNode::open(tx, node)?).stitches(tx)? {
                if !seen.contains(&s.other) && follow(s.key, &s.value) {
                    seen.insert(s.other);
                    next.push(s.other);
                }
            }
            let mut child_path = path;
            child_path.push(node);
            // reversed so the lowest relationship id is expanded first
            for other in next.into_iter().rev() {
                stack.push((other, child_path.clone()));
            }
        }
        Ok(order)
    }

    // =========================================================================
    // OWNERSHIP
    // =========================================================================

    pub fn datasource_key<T: GraphTxn>(self, tx: &T) -> Result<Option<String>, StitchError> {
        Ok(self
            .0
            .get(tx, SOURCE)?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    /// The data source this entity was registered through.
    pub fn datasource<T: Txn>(self, tx: &T) -> Result<DataSource, StitchError> {
        let key = self
            .datasource_key(tx)?
            .ok_or_else(|| StitchError::MissingDataSource(format!("entity {}", self.id())))?;
        DataSourceFactory::get_by_key(tx, &key)?.ok_or(StitchError::MissingDataSource(key))
    }

    /// Delete this entity with its stitches, snapshots and payloads.
    pub fn delete<T: Txn>(self, tx: &mut T) -> Result<(), StitchError> {
        tracing::debug!(entity = self.id().0, "deleting entity");
        self.0.delete(tx)
    }
}

/// Type-check `value` against `key` and drop blacklisted elements.
/// Returns `None` when nothing is left to store.
fn admit(
    config: &StitchConfig,
    key: StitchKey,
    value: Value,
) -> Result<Option<Value>, StitchError> {
    let expected = key.value_type();
    if let Some(found) = value.elements().iter().map(Scalar::scalar_type).find(|t| *t != expected) {
        return Err(StitchError::TypeMismatch { expected, found });
    }
    let (kept, dropped): (Vec<Scalar>, Vec<Scalar>) = value
        .elements()
        .iter()
        .cloned()
        .partition(|e| !config.is_blacklisted(key, e));
    for element in &dropped {
        tracing::debug!(key = key.name(), value = %element, "blacklisted value skipped");
    }
    if kept.is_empty() {
        return Ok(None);
    }
    let kept = Value::from_elements(kept);
    Ok(Some(merge([&kept])?))
}

/// `(field, element)` index entries of one payload: its id plus every
/// indexed field the data node holds.
fn indexed_entries(rel: &Relationship, data: &BTreeMap<String, Value>) -> BTreeSet<(String, Scalar)> {
    let mut entries = BTreeSet::new();
    if let Some(id) = rel.property(ID) {
        let name = format!("{PAYLOAD_FIELD_PREFIX}{ID}");
        entries.extend(id.elements().iter().map(|e| (name.clone(), e.clone())));
    }
    for field in indexed_fields(rel) {
        let Some(value) = data.get(&field) else {
            continue;
        };
        let name = format!("{PAYLOAD_FIELD_PREFIX}{field}");
        entries.extend(value.elements().iter().map(|e| (name.clone(), e.clone())));
    }
    entries
}

fn indexed_fields(rel: &Relationship) -> BTreeSet<String> {
    rel.property(INDEXED_FIELDS)
        .map(|v| {
            v.elements()
                .iter()
                .filter_map(Scalar::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::{RedbStore, Store, ValueIndex};

    fn setup() -> (RedbStore, StitchConfig) {
        (RedbStore::in_memory().unwrap(), StitchConfig::default())
    }

    fn entity<T: Txn>(tx: &mut T, source: &str) -> Result<Entity, StitchError> {
        let ds = DataSourceFactory::register(tx, source)?;
        Entity::create(tx, ds)
    }

    #[test]
    fn new_entity_is_own_component() {
        let (store, _) = setup();
        store
            .execute(|tx| {
                let e = entity(tx, "s1")?;
                assert!(e.node().is_root(tx)?);
                assert_eq!(e.node().rank(tx)?, 1);
                assert!(tx.has_label(e.id(), "COMPONENT")?);
                assert_eq!(e.datasource(tx)?.name(tx)?, "s1");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn open_rejects_non_entities() {
        let (store, _) = setup();
        let err = store.execute(|tx| {
            let ds = DataSourceFactory::register(tx, "s1")?;
            Entity::open(tx, ds.id())
        });
        assert!(matches!(err, Err(StitchError::NotAnEntity(_))));
    }

    #[test]
    fn set_stitches_both_ways() {
        let (store, config) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let b = entity(tx, "s2")?;
                a.set(tx, &config, StitchKey::I_CAS, "50-00-0".into())?;
                b.set(tx, &config, StitchKey::I_CAS, "50-00-0".into())?;

                let from_a = a.stitches(tx)?;
                let from_b = b.stitches(tx)?;
                assert_eq!(from_a.len(), 1);
                assert_eq!(from_a[0].other, b.id());
                assert_eq!(from_b[0].rel, from_a[0].rel);
                assert_eq!(from_b[0].value, Scalar::from("50-00-0"));
                assert_eq!(a.node().root(tx)?, b.node().root(tx)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn set_replaces_stitches() {
        let (store, config) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let b = entity(tx, "s2")?;
                a.set(tx, &config, StitchKey::I_UNII, "X".into())?;
                b.set(tx, &config, StitchKey::I_UNII, "X".into())?;
                a.set(tx, &config, StitchKey::I_UNII, "Y".into())?;
                assert!(a.stitches(tx)?.is_empty());
                assert!(b.stitches(tx)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn add_merges_and_stitches_delta() {
        let (store, config) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let b = entity(tx, "s2")?;
                a.add(tx, &config, StitchKey::N_Name, Value::strings(&["ASPIRIN"]))?;
                b.add(tx, &config, StitchKey::N_Name, Value::strings(&["ASA"]))?;
                a.add(tx, &config, StitchKey::N_Name, Value::strings(&["ASPIRIN", "ASA"]))?;
                assert_eq!(
                    a.get(tx, StitchKey::N_Name)?,
                    Some(Value::strings(&["ASPIRIN", "ASA"]))
                );
                assert_eq!(a.stitches(tx)?.len(), 1);

                // fully contained: no snapshot, no new stitch
                let before = a.node().history(tx, Some("N_Name"))?.len();
                a.add(tx, &config, StitchKey::N_Name, "ASA".into())?;
                assert_eq!(a.node().history(tx, Some("N_Name"))?.len(), before);
                assert_eq!(a.stitches(tx)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn update_removes_subset() {
        let (store, config) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let b = entity(tx, "s2")?;
                a.set(tx, &config, StitchKey::I_CAS, Value::strings(&["1", "2"]))?;
                b.set(tx, &config, StitchKey::I_CAS, Value::strings(&["2"]))?;
                assert_eq!(a.stitches(tx)?.len(), 1);

                a.update(tx, &config, StitchKey::I_CAS, Some(&"2".into()), None)?;
                assert_eq!(a.get(tx, StitchKey::I_CAS)?, Some("1".into()));
                assert!(b.stitches(tx)?.is_empty());

                // nothing present: unchanged
                a.update(tx, &config, StitchKey::I_CAS, Some(&"9".into()), None)?;
                assert_eq!(a.get(tx, StitchKey::I_CAS)?, Some("1".into()));

                a.update(tx, &config, StitchKey::I_CAS, Some(&"1".into()), None)?;
                assert_eq!(a.get(tx, StitchKey::I_CAS)?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn update_replaces_subset() {
        let (store, config) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                a.set(tx, &config, StitchKey::I_CAS, Value::strings(&["1", "2"]))?;
                a.update(
                    tx,
                    &config,
                    StitchKey::I_CAS,
                    Some(&"2".into()),
                    Some("3".into()),
                )?;
                assert_eq!(a.get(tx, StitchKey::I_CAS)?, Some(Value::strings(&["1", "3"])));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn wrong_type_is_rejected() {
        let (store, config) = setup();
        let err = store.execute(|tx| {
            let a = entity(tx, "s1")?;
            a.set(tx, &config, StitchKey::I_CID, "2244".into())
        });
        assert!(matches!(err, Err(StitchError::TypeMismatch { .. })));
    }

    #[test]
    fn blacklisted_values_are_skipped() {
        let (store, mut config) = setup();
        config.add_blacklist(StitchKey::N_Name, &["water"]);
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                a.set(tx, &config, StitchKey::N_Name, Value::strings(&["WATER"]))?;
                assert_eq!(a.get(tx, StitchKey::N_Name)?, None);
                a.set(tx, &config, StitchKey::N_Name, Value::strings(&["WATER", "ICE"]))?;
                assert_eq!(a.get(tx, StitchKey::N_Name)?, Some("ICE".into()));
                a.set(tx, &config, StitchKey::N_Name, Value::strings(&["WATER"]))?;
                assert_eq!(a.get(tx, StitchKey::N_Name)?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn payload_replaced_in_place() {
        let (store, _) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let mut p = Payload::new("s1", Some("R1".into()));
                p.put("name", "aspirin".into()).index("name");
                let first = a.add_payload(tx, &p)?;

                let mut q = Payload::new("s1", Some("R1".into()));
                q.put("note", "updated".into());
                let second = a.add_payload(tx, &q)?;
                assert_eq!(first, second);

                let stored = a.payload(tx)?.unwrap();
                assert_eq!(stored.data.get("note"), Some(&"updated".into()));
                assert!(!stored.data.contains_key("name"));
                assert!(Entity::find_by_payload(tx, "name", &"aspirin".into())?.is_empty());
                assert_eq!(Entity::find_by_payload(tx, "id", &"R1".into())?, vec![a]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn replaced_payload_value_leaves_the_index() {
        let (store, _) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let mut p = Payload::new("s1", Some("R1".into()));
                p.put("name", "aspirin".into()).index("name");
                a.add_payload(tx, &p)?;

                let mut q = Payload::new("s1", Some("R1".into()));
                q.put("name", "ibuprofen".into()).index("name");
                a.add_payload(tx, &q)?;

                let stored = a.payload(tx)?.unwrap();
                assert_eq!(stored, q);
                assert!(Entity::find_by_payload(tx, "name", &"aspirin".into())?.is_empty());
                assert_eq!(
                    Entity::find_by_payload(tx, "name", &"ibuprofen".into())?,
                    vec![a]
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn value_shared_with_another_payload_stays_indexed() {
        let (store, _) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let mut p = Payload::new("s1", Some("R1".into()));
                p.put("name", "aspirin".into()).index("name");
                a.add_payload(tx, &p)?;
                let mut other = Payload::new("s2", Some("X9".into()));
                other.put("name", "aspirin".into()).index("name");
                a.add_payload(tx, &other)?;

                let mut q = Payload::new("s1", Some("R1".into()));
                q.put("name", "ibuprofen".into()).index("name");
                a.add_payload(tx, &q)?;

                assert_eq!(
                    Entity::find_by_payload(tx, "name", &"aspirin".into())?,
                    vec![a]
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn walk_follows_only_selected_edges() {
        let (store, config) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let b = entity(tx, "s2")?;
                let c = entity(tx, "s3")?;
                a.set(tx, &config, StitchKey::I_UNII, "U".into())?;
                b.set(tx, &config, StitchKey::I_UNII, "U".into())?;
                b.set(tx, &config, StitchKey::N_Name, "N".into())?;
                c.set(tx, &config, StitchKey::N_Name, "N".into())?;

                let all = a.walk(tx, |_, _| true, |_, _| true)?;
                assert_eq!(all, vec![a.id(), b.id(), c.id()]);

                let unii = a.walk(tx, |k, _| k == StitchKey::I_UNII, |_, _| true)?;
                assert_eq!(unii, vec![a.id(), b.id()]);

                let mut paths = Vec::new();
                a.walk(tx, |_, _| true, |path, node| {
                    paths.push((path.to_vec(), node));
                    true
                })?;
                assert_eq!(paths[2], (vec![a.id(), b.id()], c.id()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn delete_cleans_up() {
        let (store, config) = setup();
        store
            .execute(|tx| {
                let a = entity(tx, "s1")?;
                let b = entity(tx, "s2")?;
                a.set(tx, &config, StitchKey::I_UNII, "U".into())?;
                b.set(tx, &config, StitchKey::I_UNII, "U".into())?;
                a.add_payload(tx, &Payload::new("s1", None))?;
                a.delete(tx)?;

                assert!(b.stitches(tx)?.is_empty());
                assert!(tx.nodes_with_label("DATA")?.is_empty());
                let hits = tx.lookup_nodes(
                    &node_index(Entity::kind_name()),
                    "I_UNII",
                    &"U".into(),
                )?;
                assert_eq!(hits, vec![b.id()]);
                Ok(())
            })
            .unwrap();
    }
}
