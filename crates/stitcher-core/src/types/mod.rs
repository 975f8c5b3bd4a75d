//! # Core Type Definitions
//!
//! This module contains the core types shared by every layer of the
//! stitching engine:
//! - Graph identifiers (`NodeId`, `RelId`)
//! - Property values (`Scalar`, `ScalarType`, `Value`)
//! - Auxiliary node and relationship roles (`AuxNodeType`, `AuxRelType`)
//! - Error types (`StitchError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// GRAPH IDENTIFIERS
// =============================================================================

/// Identifier of a node in the graph store (entities, snapshots, payload
/// data, data sources).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Identifier of a relationship in the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// VALUES
// =============================================================================

/// Element type of a stitch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    String,
    Long,
}

/// A single typed property element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scalar {
    Str(String),
    Long(i64),
}

impl Scalar {
    /// The element type of this scalar.
    #[must_use]
    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Str(_) => ScalarType::String,
            Self::Long(_) => ScalarType::Long,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Long(_) => None,
        }
    }

    #[must_use]
    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Str(_) => None,
            Self::Long(v) => Some(*v),
        }
    }

    /// Canonical index term. The type tag keeps `"42"` and `42` apart.
    #[must_use]
    pub fn index_term(&self) -> String {
        match self {
            Self::Str(s) => format!("s:{s}"),
            Self::Long(v) => format!("l:{v}"),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Long(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

/// A property value: one scalar, or an array of same-typed scalars.
///
/// Arrays built through [`crate::values::merge`] are deduplicated and
/// never hold fewer than two elements. A one-element result collapses to
/// `Single`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Single(Scalar),
    Array(Vec<Scalar>),
}

impl Value {
    /// Build a value from string elements.
    #[must_use]
    pub fn strings(items: &[&str]) -> Self {
        Self::from_elements(items.iter().map(|s| Scalar::from(*s)).collect())
    }

    /// Build a value from long elements.
    #[must_use]
    pub fn longs(items: &[i64]) -> Self {
        Self::from_elements(items.iter().map(|v| Scalar::Long(*v)).collect())
    }

    /// Collapse a one-element vector to `Single`. Duplicates and types are
    /// not checked here; use `merge` for that.
    #[must_use]
    pub fn from_elements(mut items: Vec<Scalar>) -> Self {
        if items.len() == 1 {
            if let Some(only) = items.pop() {
                return Self::Single(only);
            }
        }
        Self::Array(items)
    }

    /// The elements of this value in stored order.
    #[must_use]
    pub fn elements(&self) -> &[Scalar] {
        match self {
            Self::Single(s) => std::slice::from_ref(s),
            Self::Array(items) => items,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements().is_empty()
    }

    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    #[must_use]
    pub fn contains(&self, scalar: &Scalar) -> bool {
        self.elements().contains(scalar)
    }

    /// Type of the first element, if any.
    #[must_use]
    pub fn scalar_type(&self) -> Option<ScalarType> {
        self.elements().first().map(Scalar::scalar_type)
    }

    /// The lone scalar, when this is a single value.
    #[must_use]
    pub const fn as_single(&self) -> Option<&Scalar> {
        match self {
            Self::Single(s) => Some(s),
            Self::Array(_) => None,
        }
    }

    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        self.as_single().and_then(Scalar::as_long)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_single().and_then(Scalar::as_str)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(s) => write!(f, "{s}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Self::Single(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Single(Scalar::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Single(Scalar::Str(s))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Single(Scalar::Long(v))
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Self::Single(Scalar::Long(id.0 as i64))
    }
}

// =============================================================================
// AUXILIARY ROLES
// =============================================================================

/// Node labels the engine emits and expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuxNodeType {
    Snapshot,
    Singleton,
    Group,
    Supernode,
    Component,
    Data,
    Entity,
    DataSource,
}

impl AuxNodeType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "SNAPSHOT",
            Self::Singleton => "SINGLETON",
            Self::Group => "GROUP",
            Self::Supernode => "SUPERNODE",
            Self::Component => "COMPONENT",
            Self::Data => "DATA",
            Self::Entity => "ENTITY",
            Self::DataSource => "DATASOURCE",
        }
    }
}

/// Relationship roles that are not stitch keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuxRelType {
    /// Entity to its raw-data node.
    Payload,
    /// Owner to one of its change snapshots (`<property>.SNAPSHOT`).
    Snapshot,
}

impl AuxRelType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payload => "PAYLOAD",
            Self::Snapshot => "SNAPSHOT",
        }
    }

    /// Relationship type linking an owner to snapshots of `property`.
    #[must_use]
    pub fn snapshot_of(property: &str) -> String {
        format!("{property}.{}", Self::Snapshot.as_str())
    }

    /// True for `<property>.SNAPSHOT` relationship types.
    #[must_use]
    pub fn is_snapshot(rel_type: &str) -> bool {
        rel_type
            .strip_suffix(Self::Snapshot.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the stitching engine.
///
/// - No silent failures
/// - Use `Result<T, StitchError>` for fallible operations
/// - The engine never panics; every error is recoverable by the caller
#[derive(Debug, Error)]
pub enum StitchError {
    /// The requested node does not exist.
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// The node exists but is not an entity.
    #[error("Node {0:?} is not an entity")]
    NotAnEntity(NodeId),

    /// An entity or registry was used without a data source.
    #[error("Missing data source: {0}")]
    MissingDataSource(String),

    /// A relationship type or config entry names no stitch key.
    #[error("Unknown stitch key: {0}")]
    UnknownStitchKey(String),

    /// Attempt to overwrite a read-only property.
    #[error("Property {0} is read-only")]
    ReadOnlyProperty(String),

    /// Elements of incompatible types met in the value algebra.
    #[error("Type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        expected: ScalarType,
        found: ScalarType,
    },

    /// A merge was asked to produce a value out of nothing.
    #[error("Empty value")]
    EmptyValue,

    /// The configuration is out of range or malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The store rejected an operation (e.g. deleting a linked node).
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O or storage error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_collapses() {
        assert_eq!(Value::strings(&["a"]), Value::from("a"));
        assert!(Value::strings(&["a", "b"]).is_array());
    }

    #[test]
    fn elements_of_single_and_array() {
        assert_eq!(Value::from(7).elements(), &[Scalar::Long(7)]);
        assert_eq!(Value::longs(&[1, 2]).len(), 2);
        assert!(Value::longs(&[1, 2]).contains(&Scalar::Long(2)));
    }

    #[test]
    fn index_terms_are_type_tagged() {
        assert_ne!(
            Scalar::from("42").index_term(),
            Scalar::Long(42).index_term()
        );
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::strings(&["a", "b"]).to_string(), "[a, b]");
        assert_eq!(Value::from(3).to_string(), "3");
    }

    #[test]
    fn snapshot_rel_names() {
        let rel = AuxRelType::snapshot_of("I_CAS");
        assert_eq!(rel, "I_CAS.SNAPSHOT");
        assert!(AuxRelType::is_snapshot(&rel));
        assert!(!AuxRelType::is_snapshot("PAYLOAD"));
        assert!(!AuxRelType::is_snapshot("SNAPSHOT"));
    }

    #[test]
    fn error_messages() {
        let err = StitchError::TypeMismatch {
            expected: ScalarType::String,
            found: ScalarType::Long,
        };
        assert!(err.to_string().contains("Type mismatch"));
        assert!(
            StitchError::NodeNotFound(NodeId(3))
                .to_string()
                .contains("NodeId(3)")
        );
    }
}
