//! # Entity Registry
//!
//! Generic loader binding one data source to a field mapping. Each record
//! is a flat property map; mapped fields are normalized and added as
//! stitch values, `T_Keyword` fields become labels, and the whole record
//! is kept as the entity's payload.

use crate::config::StitchConfig;
use crate::datasource::DataSource;
use crate::entity::Entity;
use crate::payload::Payload;
use crate::primitives::{ID, INSTANCES};
use crate::stitch_key::StitchKey;
use crate::store::Txn;
use crate::types::{Scalar, ScalarType, StitchError, Value};
use crate::values::merge;
use std::collections::{BTreeMap, BTreeSet};

/// One input record.
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct EntityRegistry {
    source: DataSource,
    source_key: String,
    stitches: BTreeMap<StitchKey, BTreeSet<String>>,
    id_field: Option<String>,
    config: StitchConfig,
    registered: usize,
}

impl EntityRegistry {
    /// Registry loading into `source`. The blacklist of `config` applies
    /// in addition to any added here.
    pub fn new<T: Txn>(
        tx: &T,
        source: DataSource,
        config: StitchConfig,
    ) -> Result<Self, StitchError> {
        Ok(Self {
            source,
            source_key: source.key(tx)?,
            stitches: BTreeMap::new(),
            id_field: None,
            config,
            registered: 0,
        })
    }

    /// Map record field `field` to `key`.
    pub fn add(&mut self, key: StitchKey, field: impl Into<String>) -> &mut Self {
        self.stitches.entry(key).or_default().insert(field.into());
        self
    }

    pub fn set_id_field(&mut self, field: impl Into<String>) -> &mut Self {
        self.id_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn id_field(&self) -> Option<&str> {
        self.id_field.as_deref()
    }

    /// Never stitch `values` under `key`, or under any key when `key` is
    /// `None`.
    pub fn add_blacklist(&mut self, key: Option<StitchKey>, values: &[&str]) -> &mut Self {
        match key {
            Some(key) => self.config.add_blacklist(key, values),
            None => self
                .config
                .blacklist
                .entry("*".to_string())
                .or_default()
                .extend(values.iter().map(|v| (*v).to_string())),
        }
        self
    }

    /// Key a record field is mapped to.
    #[must_use]
    pub fn stitch_key(&self, field: &str) -> Option<StitchKey> {
        self.stitches
            .iter()
            .find(|(_, fields)| fields.contains(field))
            .map(|(key, _)| *key)
    }

    #[must_use]
    pub const fn source(&self) -> DataSource {
        self.source
    }

    /// Entities registered through this registry so far.
    #[must_use]
    pub const fn registered(&self) -> usize {
        self.registered
    }

    /// Create an entity from `record`.
    pub fn register<T: Txn>(&mut self, tx: &mut T, record: &Record) -> Result<Entity, StitchError> {
        let entity = Entity::create(tx, self.source)?;

        for (key, fields) in &self.stitches {
            for field in fields {
                let Some(raw) = record.get(field) else {
                    continue;
                };
                if *key == StitchKey::T_Keyword {
                    for element in raw.elements() {
                        entity.add_label(tx, &element.to_string())?;
                    }
                    continue;
                }
                if let Some(value) = normalize(*key, raw) {
                    entity.add(tx, &self.config, *key, value)?;
                }
            }
        }

        let mut payload = Payload::new(self.source_key.clone(), self.record_id(record));
        payload.data = record.clone();
        if let Some(field) = &self.id_field {
            payload.index(field.clone());
        }
        entity.add_payload(tx, &payload)?;

        self.registered = self.registered.saturating_add(1);
        Ok(entity)
    }

    /// Like [`EntityRegistry::register`], but skips records whose id was
    /// already registered for this source.
    pub fn register_if_absent<T: Txn>(
        &mut self,
        tx: &mut T,
        record: &Record,
    ) -> Result<Option<Entity>, StitchError> {
        let Some(id) = self.record_id(record) else {
            return self.register(tx, record).map(Some);
        };
        let Some(term) = id.as_single() else {
            return self.register(tx, record).map(Some);
        };

        let mut existing = Vec::new();
        for entity in Entity::find_by_payload(tx, ID, term)? {
            if entity.datasource_key(tx)?.as_deref() == Some(self.source_key.as_str()) {
                existing.push(entity);
            }
        }
        if existing.len() > 1 {
            tracing::warn!(id = %id, matches = existing.len(), "record id matches several entities");
        }
        if existing.is_empty() {
            return self.register(tx, record).map(Some);
        }
        tracing::info!(id = %id, "record already registered");
        Ok(None)
    }

    /// Add this run's count to the source's `instances` property.
    pub fn finish<T: Txn>(&self, tx: &mut T) -> Result<i64, StitchError> {
        let total = self
            .source
            .instances(tx)?
            .saturating_add(self.registered as i64);
        self.source.set(tx, INSTANCES, total.into())?;
        tracing::info!(
            source = %self.source_key,
            registered = self.registered,
            total,
            "registration finished"
        );
        Ok(total)
    }

    fn record_id(&self, record: &Record) -> Option<Value> {
        let field = self.id_field.as_ref()?;
        let value = record.get(field)?;
        Some(Value::from(value.to_string()))
    }
}

/// Coerce a raw value to the element type of `key`. Long keys parse
/// numbers and drop unparsable ones; string keys are upper-cased.
#[must_use]
pub fn normalize(key: StitchKey, raw: &Value) -> Option<Value> {
    let mut elements = Vec::new();
    for element in raw.elements() {
        let normalized = match (key.value_type(), element) {
            (ScalarType::Long, Scalar::Long(v)) => Some(Scalar::Long(*v)),
            (ScalarType::Long, Scalar::Str(s)) => match s.trim().parse::<i64>() {
                Ok(v) => Some(Scalar::Long(v)),
                Err(_) => {
                    tracing::warn!(key = key.name(), value = %s, "bogus long value");
                    None
                }
            },
            (ScalarType::String, Scalar::Str(s)) => {
                let s = s.trim();
                (!s.is_empty()).then(|| Scalar::Str(s.to_uppercase()))
            }
            (ScalarType::String, Scalar::Long(v)) => Some(Scalar::Str(v.to_string())),
        };
        elements.extend(normalized);
    }
    if elements.is_empty() {
        return None;
    }
    merge([&Value::Array(elements)]).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::datasource::DataSourceFactory;
    use crate::store::{RedbStore, Store};

    fn record(fields: &[(&str, Value)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn normalize_coerces_types() {
        assert_eq!(
            normalize(StitchKey::I_CID, &Value::strings(&["2244", "x", " 7 "])),
            Some(Value::longs(&[2244, 7]))
        );
        assert_eq!(
            normalize(StitchKey::N_Name, &Value::strings(&["aspirin", "ASPIRIN", " "])),
            Some(Value::from("ASPIRIN"))
        );
        assert_eq!(normalize(StitchKey::I_CID, &"none".into()), None);
        assert_eq!(normalize(StitchKey::I_CAS, &Value::from(5)), Some("5".into()));
    }

    #[test]
    fn register_maps_fields_labels_and_payload() {
        let store = RedbStore::in_memory().unwrap();
        store
            .execute(|tx| {
                let ds = DataSourceFactory::register(tx, "drugs")?;
                let mut reg = EntityRegistry::new(tx, ds, StitchConfig::default())?;
                reg.add(StitchKey::N_Name, "name")
                    .add(StitchKey::I_CID, "cid")
                    .add(StitchKey::T_Keyword, "tags")
                    .set_id_field("id");
                assert_eq!(reg.stitch_key("cid"), Some(StitchKey::I_CID));

                let e = reg.register(
                    tx,
                    &record(&[
                        ("id", "D1".into()),
                        ("name", "aspirin".into()),
                        ("cid", "2244".into()),
                        ("tags", Value::strings(&["Drug", "Analgesic"])),
                    ]),
                )?;
                assert_eq!(e.get(tx, StitchKey::N_Name)?, Some("ASPIRIN".into()));
                assert_eq!(e.get(tx, StitchKey::I_CID)?, Some(Value::from(2244)));
                assert_eq!(e.get(tx, StitchKey::T_Keyword)?, None);
                assert!(e.labels(tx)?.contains("Analgesic"));

                let payload = e.payload(tx)?.unwrap();
                assert_eq!(payload.id, Some("D1".into()));
                assert_eq!(payload.data.get("name"), Some(&"aspirin".into()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn register_if_absent_skips_known_ids() {
        let store = RedbStore::in_memory().unwrap();
        store
            .execute(|tx| {
                let ds = DataSourceFactory::register(tx, "drugs")?;
                let mut reg = EntityRegistry::new(tx, ds, StitchConfig::default())?;
                reg.add(StitchKey::N_Name, "name").set_id_field("id");
                let r = record(&[("id", Value::from(1)), ("name", "a".into())]);
                assert!(reg.register_if_absent(tx, &r)?.is_some());
                assert!(reg.register_if_absent(tx, &r)?.is_none());

                // same id from another source is not a duplicate
                let other = DataSourceFactory::register(tx, "other")?;
                let mut reg2 = EntityRegistry::new(tx, other, StitchConfig::default())?;
                reg2.set_id_field("id");
                assert!(reg2.register_if_absent(tx, &r)?.is_some());

                assert_eq!(reg.finish(tx)?, 1);
                assert_eq!(ds.instances(tx)?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn registry_blacklist_applies() {
        let store = RedbStore::in_memory().unwrap();
        store
            .execute(|tx| {
                let ds = DataSourceFactory::register(tx, "drugs")?;
                let mut reg = EntityRegistry::new(tx, ds, StitchConfig::default())?;
                reg.add(StitchKey::N_Name, "name")
                    .add(StitchKey::I_UNII, "unii")
                    .add_blacklist(None, &["unknown"]);
                let e = reg.register(
                    tx,
                    &record(&[("name", "Unknown".into()), ("unii", "unknown".into())]),
                )?;
                assert!(e.keys(tx)?.is_empty());
                Ok(())
            })
            .unwrap();
    }
}
