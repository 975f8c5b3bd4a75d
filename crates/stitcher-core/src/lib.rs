//! # stitcher-core
//!
//! The stitching graph engine.
//!
//! Records from independent data sources become entity nodes. Whenever two
//! entities share a value under the same stitch key they are linked by a
//! stitch relationship carrying that value, and both land in the same
//! connected component. Entity resolution then looks for cliques inside
//! each component and decides, per shared `(key, value)`, whether the
//! clique members are one and the same thing.
//!
//! ## Architectural Constraints
//!
//! - Every mutation runs inside one store transaction
//! - The engine only sees the [`store::GraphTxn`] and [`store::ValueIndex`] traits
//! - Deterministic: ordered maps only, no floats, stable enumeration order
//! - No async, no network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod clique;
pub mod component;
pub mod config;
pub mod datasource;
pub mod entity;
pub mod factory;
pub mod metrics;
pub mod node;
pub mod payload;
pub mod primitives;
pub mod registry;
pub mod resolution;
pub mod stitch;
pub mod stitch_key;
pub mod store;
pub mod types;
pub mod union_find;
pub mod values;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use stitch_key::StitchKey;
pub use types::{AuxNodeType, AuxRelType, NodeId, RelId, Scalar, ScalarType, StitchError, Value};
pub use values::{Delta, delta, merge, same_elements, subtract};

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use store::{GraphTxn, RedbStore, RedbTxn, Relationship, Store, Txn, ValueIndex};

// =============================================================================
// RE-EXPORTS: Graph Model
// =============================================================================

pub use config::StitchConfig;
pub use datasource::{DataSource, DataSourceFactory};
pub use entity::{Entity, Stitch};
pub use node::{CNode, Snapshot};
pub use payload::Payload;
pub use registry::{EntityRegistry, Record};

// =============================================================================
// RE-EXPORTS: Analysis
// =============================================================================

pub use cache::{Cache, MemoryCache, RedbCache};
pub use clique::{Clique, CliqueEnumeration, CliqueVisitor};
pub use component::{Component, ConnectedComponents};
pub use factory::EntityFactory;
pub use metrics::GraphMetrics;
pub use resolution::{CliqueEntityResolution, ResolutionSummary};
pub use union_find::UnionFind;
