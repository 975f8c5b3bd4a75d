//! # Primitives
//!
//! Property names, index naming and the default heuristic thresholds.
//! Names are part of the persisted graph shape and must not change
//! between releases.

// =============================================================================
// NODE PROPERTIES
// =============================================================================

/// Creation time, epoch millis.
pub const CREATED: &str = "created";

/// Last mutation time, epoch millis.
pub const LAST_UPDATED: &str = "lastUpdated";

/// Type tag of the node's concrete kind.
pub const KIND: &str = "kind";

/// Component size counter used by the persisted union-find.
pub const RANK: &str = "rank";

/// Parent pointer of the persisted union-find.
pub const PARENT: &str = "PARENT";

/// Data-source key on entities and payload relationships.
pub const SOURCE: &str = "source";

/// Record id on payload relationships.
pub const ID: &str = "id";

/// Data-source key property.
pub const KEY: &str = "key";

/// Data-source display name.
pub const NAME: &str = "name";

pub const URI: &str = "uri";
pub const SIZE: &str = "size";
pub const DIGEST: &str = "digest";

/// Count of entities registered through a data source.
pub const INSTANCES: &str = "instances";

/// Shared value on stitch relationships and old/new values on snapshots.
pub const VALUE: &str = "value";
pub const OLD_VALUE: &str = "oldValue";
pub const NEW_VALUE: &str = "newValue";

/// Stamp written on a payload relationship when its data is replaced.
pub const UPDATED: &str = "updated";

/// Payload fields indexed on the owning entity, kept on the payload
/// relationship.
pub const INDEXED_FIELDS: &str = "indexedFields";

/// Default payload id when a record has none.
pub const DEFAULT_PAYLOAD_ID: &str = "*";

// =============================================================================
// INDEX NAMES
// =============================================================================

/// Index of `PARENT` pointers, used to rebuild persisted components.
pub const COMPONENT_INDEX: &str = "stitcher.component_index";

/// Node-value index of a kind.
#[must_use]
pub fn node_index(kind: &str) -> String {
    format!("{kind}.node_index")
}

/// Relationship-value index of a kind.
#[must_use]
pub fn relationship_index(kind: &str) -> String {
    format!("{kind}.relationship_index")
}

// =============================================================================
// HEURISTIC DEFAULTS
// =============================================================================

/// Hits above which a stitched value is reported as pathologic fan-out.
pub const DEFAULT_FANOUT_WARN: usize = 20;

/// Smallest clique emitted by enumeration.
pub const DEFAULT_MIN_CLIQUE_SIZE: usize = 3;

/// Length of hex prefixes used for data-source keys and clique ids.
pub const KEY_PREFIX_LEN: usize = 9;

/// Short hex key of a BLAKE3 hash.
#[must_use]
pub fn short_key(hash: &blake3::Hash) -> String {
    let hex = hash.to_hex();
    hex.as_str()[..KEY_PREFIX_LEN].to_string()
}

// =============================================================================
// TESTS
// =============================================================================
