//! # Graph Metrics
//!
//! Informational counts over the stitched graph. They gate nothing.
//! Everything is integer-valued so reports are reproducible.

use crate::component::ConnectedComponents;
use crate::entity::Entity;
use crate::stitch_key::StitchKey;
use crate::store::GraphTxn;
use crate::types::{AuxNodeType, StitchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of the stitched graph.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphMetrics {
    /// Number of entities.
    pub entity_count: usize,
    /// Number of stitch relationships (each counted once).
    pub stitch_count: usize,
    /// Stitch relationships per key.
    pub stitch_histogram: BTreeMap<StitchKey, usize>,
    /// Connected components, singletons included.
    pub connected_component_count: usize,
    /// Components with exactly one entity.
    pub singleton_count: usize,
    /// Component size to number of components of that size.
    pub component_size_histogram: BTreeMap<usize, usize>,
}

impl GraphMetrics {
    /// Compute metrics over every entity.
    pub fn compute<T: GraphTxn>(tx: &T) -> Result<Self, StitchError> {
        let mut metrics = Self::default();
        for id in tx.nodes_with_label(AuxNodeType::Entity.as_str())? {
            metrics.entity_count = metrics.entity_count.saturating_add(1);
            for stitch in Entity::open(tx, id)?.stitches(tx)? {
                // each relationship is seen from both ends; count it at the lower one
                if id < stitch.other {
                    metrics.stitch_count = metrics.stitch_count.saturating_add(1);
                    *metrics.stitch_histogram.entry(stitch.key).or_insert(0) += 1;
                }
            }
        }
        for component in ConnectedComponents::compute(tx)? {
            metrics.connected_component_count = metrics.connected_component_count.saturating_add(1);
            if component.is_singleton() {
                metrics.singleton_count = metrics.singleton_count.saturating_add(1);
            }
            *metrics
                .component_size_histogram
                .entry(component.size())
                .or_insert(0) += 1;
        }
        Ok(metrics)
    }

    /// Components with more than one member.
    #[must_use]
    pub fn multi_member_components(&self) -> usize {
        self.connected_component_count
            .saturating_sub(self.singleton_count)
    }
}
