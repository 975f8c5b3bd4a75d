//! Raw source records attached to entities.

use crate::primitives::DEFAULT_PAYLOAD_ID;
use crate::types::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A source record: `(source, id)` identifies it, `data` is its property
/// bag. Fields named in `indexed_fields` are made searchable on the
/// owning entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    pub source: String,
    pub id: Option<Value>,
    pub data: BTreeMap<String, Value>,
    pub indexed_fields: BTreeSet<String>,
}

impl Payload {
    pub fn new(source: impl Into<String>, id: Option<Value>) -> Self {
        Self {
            source: source.into(),
            id,
            ..Self::default()
        }
    }

    /// The record id, `*` when the record has none.
    #[must_use]
    pub fn id_value(&self) -> Value {
        self.id
            .clone()
            .unwrap_or_else(|| Value::from(DEFAULT_PAYLOAD_ID))
    }

    pub fn put(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.data.insert(name.into(), value);
        self
    }

    pub fn index(&mut self, field: impl Into<String>) -> &mut Self {
        self.indexed_fields.insert(field.into());
        self
    }
}
