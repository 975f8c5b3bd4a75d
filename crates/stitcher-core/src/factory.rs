//! # Entity Factory
//!
//! Auto-commit facade over a [`Store`]. Every method runs in its own
//! transaction; [`EntityFactory::execute`] composes several steps into
//! one. Methods that hand out data never hold a transaction open past
//! their return.

use crate::clique::{Clique, CliqueEnumeration};
use crate::component::{Component, ConnectedComponents};
use crate::config::StitchConfig;
use crate::datasource::{DataSource, DataSourceFactory};
use crate::entity::Entity;
use crate::metrics::GraphMetrics;
use crate::node::{CNode, Snapshot};
use crate::payload::Payload;
use crate::primitives::node_index;
use crate::resolution::{CliqueEntityResolution, ResolutionSummary};
use crate::stitch::stitched_value_count;
use crate::stitch_key::StitchKey;
use crate::store::{GraphTxn, RedbStore, Store, ValueIndex};
use crate::types::{AuxNodeType, NodeId, Scalar, StitchError, Value};
use std::path::Path;

/// Log a failed operation and convert it to `None`.
fn log_and_convert<T>(result: Result<T, StitchError>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(operation = context, error = %e, "operation failed");
            None
        }
    }
}

pub struct EntityFactory<S: Store> {
    store: S,
    config: StitchConfig,
}

impl EntityFactory<RedbStore> {
    /// Open (or create) a database at `path`.
    pub fn open(path: impl AsRef<Path>, config: StitchConfig) -> Result<Self, StitchError> {
        Self::new(RedbStore::open(path)?, config)
    }

    /// A factory over a throwaway in-memory database.
    pub fn in_memory(config: StitchConfig) -> Result<Self, StitchError> {
        Self::new(RedbStore::in_memory()?, config)
    }
}

impl<S: Store> EntityFactory<S> {
    pub fn new(store: S, config: StitchConfig) -> Result<Self, StitchError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    #[must_use]
    pub const fn config(&self) -> &StitchConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Run `f` in one transaction.
    pub fn execute<T, F>(&self, f: F) -> Result<T, StitchError>
    where
        F: FnOnce(&mut S::Txn, &StitchConfig) -> Result<T, StitchError>,
    {
        self.store.execute(|tx| f(tx, &self.config))
    }

    /// Run `f` in one transaction, logging a failure instead of returning it.
    pub fn execute_or_log<T, F>(&self, context: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut S::Txn, &StitchConfig) -> Result<T, StitchError>,
    {
        log_and_convert(self.execute(f), context)
    }

    // =========================================================================
    // DATA SOURCES
    // =========================================================================

    pub fn register_source(&self, name: &str) -> Result<DataSource, StitchError> {
        self.execute(|tx, _| DataSourceFactory::register(tx, name))
    }

    pub fn register_file(&self, path: &Path) -> Result<DataSource, StitchError> {
        self.execute(|tx, _| DataSourceFactory::register_file(tx, path))
    }

    pub fn source_by_name(&self, name: &str) -> Result<Option<DataSource>, StitchError> {
        self.execute(|tx, _| DataSourceFactory::get_by_name(tx, name))
    }

    pub fn sources(&self) -> Result<Vec<DataSource>, StitchError> {
        self.execute(|tx, _| DataSourceFactory::list(tx))
    }

    // =========================================================================
    // ENTITIES
    // =========================================================================

    pub fn create_entity(&self, source: DataSource) -> Result<Entity, StitchError> {
        self.execute(|tx, _| Entity::create(tx, source))
    }

    pub fn entity(&self, id: NodeId) -> Result<Entity, StitchError> {
        self.execute(|tx, _| Entity::open(tx, id))
    }

    /// Every entity, ascending by id.
    pub fn entities(&self) -> Result<Vec<Entity>, StitchError> {
        self.execute(|tx, _| {
            tx.nodes_with_label(AuxNodeType::Entity.as_str())?
                .into_iter()
                .map(|id| Entity::open(tx, id))
                .collect()
        })
    }

    /// Entities whose `key` value contains `value`.
    pub fn find(&self, key: StitchKey, value: &Scalar) -> Result<Vec<Entity>, StitchError> {
        self.execute(|tx, _| {
            tx.lookup_nodes(&node_index(Entity::kind_name()), key.name(), value)?
                .into_iter()
                .map(|id| Entity::open(tx, id))
                .collect()
        })
    }

    pub fn set(&self, entity: Entity, key: StitchKey, value: Value) -> Result<(), StitchError> {
        self.execute(|tx, config| entity.set(tx, config, key, value))
    }

    pub fn add(&self, entity: Entity, key: StitchKey, value: Value) -> Result<(), StitchError> {
        self.execute(|tx, config| entity.add(tx, config, key, value))
    }

    pub fn update(
        &self,
        entity: Entity,
        key: StitchKey,
        old: Option<&Value>,
        new: Option<Value>,
    ) -> Result<(), StitchError> {
        self.execute(|tx, config| entity.update(tx, config, key, old, new))
    }

    pub fn remove(&self, entity: Entity, key: StitchKey) -> Result<Option<Value>, StitchError> {
        self.execute(|tx, _| entity.remove(tx, key))
    }

    pub fn get(&self, entity: Entity, key: StitchKey) -> Result<Option<Value>, StitchError> {
        self.execute(|tx, _| entity.get(tx, key))
    }

    pub fn add_payload(&self, entity: Entity, payload: &Payload) -> Result<NodeId, StitchError> {
        self.execute(|tx, _| entity.add_payload(tx, payload))
    }

    pub fn payload(&self, entity: Entity) -> Result<Option<Payload>, StitchError> {
        self.execute(|tx, _| entity.payload(tx))
    }

    pub fn delete(&self, entity: Entity) -> Result<(), StitchError> {
        self.execute(|tx, _| entity.delete(tx))
    }

    /// Change history of any node.
    pub fn history(&self, id: NodeId, key: Option<&str>) -> Result<Vec<Snapshot>, StitchError> {
        self.execute(|tx, _| CNode::open(tx, id)?.history(tx, key))
    }

    /// Remove `value` from the `key` value of every entity holding it.
    /// Returns the number of entities changed.
    pub fn delete_value(&self, key: StitchKey, value: &Scalar) -> Result<usize, StitchError> {
        self.execute(|tx, config| {
            let holders = tx.lookup_nodes(&node_index(Entity::kind_name()), key.name(), value)?;
            let removed = Value::Single(value.clone());
            for id in &holders {
                Entity::open(tx, *id)?.update(tx, config, key, Some(&removed), None)?;
            }
            tracing::info!(key = key.name(), value = %value, entities = holders.len(), "value deleted");
            Ok(holders.len())
        })
    }

    /// Delete every entity of `source`, then the source itself. Returns
    /// the number of entities deleted.
    pub fn delete_source(&self, source: DataSource) -> Result<usize, StitchError> {
        self.execute(|tx, _| {
            let key = source.key(tx)?;
            let mut deleted = 0;
            for id in tx.nodes_with_label(AuxNodeType::Entity.as_str())? {
                let entity = Entity::open(tx, id)?;
                if entity.datasource_key(tx)?.as_deref() == Some(key.as_str()) {
                    entity.delete(tx)?;
                    deleted += 1;
                }
            }
            CNode::open(tx, source.id())?.delete(tx)?;
            tracing::info!(source = %key, entities = deleted, "data source deleted");
            Ok(deleted)
        })
    }

    // =========================================================================
    // ANALYSIS
    // =========================================================================

    /// Every connected component, multi-member first.
    pub fn components(&self) -> Result<Vec<Component>, StitchError> {
        self.execute(|tx, _| Ok(ConnectedComponents::compute(tx)?.collect()))
    }

    /// The computed component containing `id`.
    pub fn component(&self, id: NodeId) -> Result<Option<Component>, StitchError> {
        self.execute(|tx, _| Ok(ConnectedComponents::compute(tx)?.find(|c| c.contains(id))))
    }

    /// Enumerate cliques of `component` under the resolution keys.
    /// Returns false when the visitor stopped early.
    pub fn cliques<V>(&self, component: &Component, visitor: &mut V) -> Result<bool, StitchError>
    where
        V: FnMut(&Clique) -> bool,
    {
        self.execute(|tx, config| {
            CliqueEnumeration::new(component.members())
                .with_min_size(config.min_clique_size)
                .enumerate(tx, &config.resolution_keys(), visitor)
        })
    }

    /// Resolve every component, passing each group to `consumer`.
    pub fn resolve<C>(&self, consumer: C) -> Result<ResolutionSummary, StitchError>
    where
        C: FnMut(&[NodeId]),
    {
        self.execute(|tx, config| CliqueEntityResolution::new(config).resolve(tx, consumer))
    }

    pub fn metrics(&self) -> Result<GraphMetrics, StitchError> {
        self.execute(|tx, _| GraphMetrics::compute(tx))
    }

    pub fn stitched_value_count(&self, key: StitchKey, value: &Scalar) -> Result<usize, StitchError> {
        self.execute(|tx, _| stitched_value_count(tx, Entity::kind_name(), key, value))
    }

    /// The most recently changed node.
    pub fn last_updated(&self) -> Option<NodeId> {
        self.execute_or_log("last_updated", |tx, _| tx.timeline_latest())
            .flatten()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn factory() -> EntityFactory<RedbStore> {
        EntityFactory::in_memory(StitchConfig::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = StitchConfig {
            min_clique_size: 2,
            ..StitchConfig::default()
        };
        assert!(matches!(
            EntityFactory::in_memory(config),
            Err(StitchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let f = factory();
        let ds = f.register_source("s").unwrap();
        let result = f.execute(|tx, config| {
            let e = Entity::create(tx, ds)?;
            e.set(tx, config, StitchKey::I_CID, "not a long".into())
        });
        assert!(result.is_err());
        assert!(f.entities().unwrap().is_empty());

        let logged = f.execute_or_log("bad", |tx, _| Entity::open(tx, NodeId(999)));
        assert!(logged.is_none());
    }

    #[test]
    fn find_and_delete_value() {
        let f = factory();
        let ds = f.register_source("s").unwrap();
        let a = f.create_entity(ds).unwrap();
        let b = f.create_entity(ds).unwrap();
        f.set(a, StitchKey::I_UNII, Value::strings(&["X", "Y"])).unwrap();
        f.set(b, StitchKey::I_UNII, "X".into()).unwrap();
        assert_eq!(f.find(StitchKey::I_UNII, &"X".into()).unwrap(), vec![a, b]);
        assert_eq!(f.stitched_value_count(StitchKey::I_UNII, &"X".into()).unwrap(), 1);

        assert_eq!(f.delete_value(StitchKey::I_UNII, &"X".into()).unwrap(), 2);
        assert!(f.find(StitchKey::I_UNII, &"X".into()).unwrap().is_empty());
        assert_eq!(f.get(a, StitchKey::I_UNII).unwrap(), Some("Y".into()));
        assert_eq!(f.get(b, StitchKey::I_UNII).unwrap(), None);
        assert_eq!(f.stitched_value_count(StitchKey::I_UNII, &"X".into()).unwrap(), 0);
    }

    #[test]
    fn delete_source_removes_its_entities() {
        let f = factory();
        let s1 = f.register_source("s1").unwrap();
        let s2 = f.register_source("s2").unwrap();
        let a = f.create_entity(s1).unwrap();
        let b = f.create_entity(s2).unwrap();
        f.set(a, StitchKey::N_Name, "N".into()).unwrap();
        f.set(b, StitchKey::N_Name, "N".into()).unwrap();

        assert_eq!(f.delete_source(s1).unwrap(), 1);
        assert_eq!(f.entities().unwrap(), vec![b]);
        assert!(f.source_by_name("s1").unwrap().is_none());
        assert_eq!(f.metrics().unwrap().stitch_count, 0);
    }

    #[test]
    fn component_lookup_and_timeline() {
        let f = factory();
        let ds = f.register_source("s").unwrap();
        let a = f.create_entity(ds).unwrap();
        let b = f.create_entity(ds).unwrap();
        f.set(a, StitchKey::I_CAS, "1".into()).unwrap();
        f.set(b, StitchKey::I_CAS, "1".into()).unwrap();
        let component = f.component(a.id()).unwrap().unwrap();
        assert!(component.contains(b.id()));
        assert_eq!(f.components().unwrap().len(), 1);
        assert_eq!(f.last_updated(), Some(b.id()));
        assert_eq!(f.history(b.id(), Some("I_CAS")).unwrap().len(), 1);
    }
}
