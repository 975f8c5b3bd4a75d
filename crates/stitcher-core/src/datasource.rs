//! # Data Sources
//!
//! Every entity belongs to exactly one registered input. A data source is
//! identified by a short key: a hex prefix of the BLAKE3 hash of a file's
//! content or of a source name. Its metadata properties are versioned like
//! any other node property. The key itself can never be changed.

use crate::node::CNode;
use crate::primitives::{DIGEST, INSTANCES, KEY, NAME, SIZE, URI, node_index, short_key};
use crate::store::{GraphTxn, Txn};
use crate::types::{AuxNodeType, NodeId, Scalar, StitchError, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Handle to a registered data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataSource(CNode);

impl DataSource {
    /// Kind tag of data-source nodes.
    #[must_use]
    pub fn kind_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Wrap an existing data-source node.
    pub fn open<T: GraphTxn>(tx: &T, id: NodeId) -> Result<Self, StitchError> {
        let node = CNode::open(tx, id)?;
        if !tx.has_label(id, AuxNodeType::DataSource.as_str())? {
            return Err(StitchError::MissingDataSource(format!("node {id}")));
        }
        Ok(Self(node))
    }

    #[must_use]
    pub const fn id(self) -> NodeId {
        self.0.id()
    }

    pub fn key<T: GraphTxn>(self, tx: &T) -> Result<String, StitchError> {
        self.string(tx, KEY)
    }

    pub fn name<T: GraphTxn>(self, tx: &T) -> Result<String, StitchError> {
        self.string(tx, NAME)
    }

    pub fn get<T: GraphTxn>(self, tx: &T, name: &str) -> Result<Option<Value>, StitchError> {
        self.0.get(tx, name)
    }

    pub fn properties<T: GraphTxn>(self, tx: &T) -> Result<BTreeMap<String, Value>, StitchError> {
        tx.properties(self.id())
    }

    /// Number of entities registered through this source.
    pub fn instances<T: GraphTxn>(self, tx: &T) -> Result<i64, StitchError> {
        Ok(self.get(tx, INSTANCES)?.and_then(|v| v.as_long()).unwrap_or(0))
    }

    /// Set a metadata property, keeping the previous value in a snapshot.
    pub fn set<T: Txn>(self, tx: &mut T, name: &str, value: Value) -> Result<(), StitchError> {
        if name == KEY {
            return Err(StitchError::ReadOnlyProperty(KEY.to_string()));
        }
        if name == NAME {
            let index = node_index(Self::kind_name());
            if let Some(old) = self.get(tx, NAME)? {
                for element in old.elements() {
                    tx.unindex_node(&index, NAME, element, self.id())?;
                }
            }
            for element in value.elements() {
                tx.index_node(&index, NAME, element, self.id())?;
            }
        }
        self.0.snapshot(tx, name, Some(value))?;
        Ok(())
    }

    fn string<T: GraphTxn>(self, tx: &T, name: &str) -> Result<String, StitchError> {
        Ok(self
            .get(tx, name)?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }
}

/// Registration and lookup of data sources.
pub struct DataSourceFactory;

impl DataSourceFactory {
    /// Key of a named source.
    #[must_use]
    pub fn source_key(name: &str) -> String {
        short_key(&blake3::hash(name.as_bytes()))
    }

    /// Register (or find) the source called `name`.
    pub fn register<T: Txn>(tx: &mut T, name: &str) -> Result<DataSource, StitchError> {
        Self::register_with_key(tx, &Self::source_key(name), name)
    }

    /// Register (or find) a file, keyed by its content.
    pub fn register_file<T: Txn>(tx: &mut T, path: &Path) -> Result<DataSource, StitchError> {
        let bytes = std::fs::read(path).map_err(|e| {
            StitchError::IoError(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        let digest = blake3::hash(&bytes);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let source = Self::register_with_key(tx, &short_key(&digest), &name)?;
        if source.get(tx, DIGEST)?.is_none() {
            let uri = path
                .canonicalize()
                .unwrap_or_else(|_| path.to_path_buf())
                .display()
                .to_string();
            source.set(tx, URI, uri.into())?;
            source.set(tx, SIZE, Value::from(bytes.len() as i64))?;
            source.set(tx, DIGEST, digest.to_hex().to_string().into())?;
        }
        Ok(source)
    }

    /// Create a new source under a fresh key, even when `name` is taken.
    pub fn create<T: Txn>(tx: &mut T, name: &str) -> Result<DataSource, StitchError> {
        let mut salt: u64 = crate::node::now_millis() as u64;
        loop {
            let mut hasher = blake3::Hasher::new();
            hasher.update(name.as_bytes());
            hasher.update(&salt.to_le_bytes());
            let key = short_key(&hasher.finalize());
            if Self::get_by_key(tx, &key)?.is_none() {
                return Self::register_with_key(tx, &key, name);
            }
            salt = salt.wrapping_add(1);
        }
    }

    /// Find the source stored under `key`, or create it.
    pub fn register_with_key<T: Txn>(
        tx: &mut T,
        key: &str,
        name: &str,
    ) -> Result<DataSource, StitchError> {
        if let Some(existing) = Self::get_by_key(tx, key)? {
            return Ok(existing);
        }
        let node = CNode::create(tx, DataSource::kind_name(), &[AuxNodeType::DataSource])?;
        let index = node_index(DataSource::kind_name());
        tx.set_property(node.id(), KEY, key.into())?;
        tx.index_node(&index, KEY, &Scalar::from(key), node.id())?;
        tx.set_property(node.id(), NAME, name.into())?;
        tx.index_node(&index, NAME, &Scalar::from(name), node.id())?;
        tracing::info!(key, name, "registered data source");
        Ok(DataSource(node))
    }

    pub fn get_by_key<T: Txn>(tx: &T, key: &str) -> Result<Option<DataSource>, StitchError> {
        Self::lookup(tx, KEY, key)
    }

    pub fn get_by_name<T: Txn>(tx: &T, name: &str) -> Result<Option<DataSource>, StitchError> {
        Self::lookup(tx, NAME, name)
    }

    /// All registered sources in creation order.
    pub fn list<T: GraphTxn>(tx: &T) -> Result<Vec<DataSource>, StitchError> {
        tx.nodes_with_label(AuxNodeType::DataSource.as_str())?
            .into_iter()
            .map(|id| DataSource::open(tx, id))
            .collect()
    }

    fn lookup<T: Txn>(tx: &T, field: &str, value: &str) -> Result<Option<DataSource>, StitchError> {
        let index = node_index(DataSource::kind_name());
        match tx.lookup_nodes(&index, field, &Scalar::from(value))?.first() {
            Some(id) => Ok(Some(DataSource::open(tx, *id)?)),
            None => Ok(None),
        }
    }
}
