//! # Clique-Based Entity Resolution
//!
//! Resolution runs per connected component. Cliques are enumerated over
//! the resolution keys, and each `(key, value)` a clique carries is
//! either closed or left alone by the closure rule. Closing walks along
//! that exact key and value from each clique member not yet merged, and
//! joins everything reached into one equivalence class.
//!
//! Entities untouched by any closure are reconciled against their direct
//! neighbors. Anything still unmerged is emitted as a singleton. The
//! equivalence classes live in a [`UnionFind`] scoped to one component;
//! the persisted component forest is never touched here.

use crate::clique::{Clique, CliqueEnumeration};
use crate::component::{Component, ConnectedComponents};
use crate::config::StitchConfig;
use crate::entity::Entity;
use crate::stitch::stitched_value_count;
use crate::stitch_key::StitchKey;
use crate::store::Txn;
use crate::types::{NodeId, Scalar, StitchError};
use crate::union_find::UnionFind;
use std::collections::{BTreeMap, BTreeSet};

/// Counts reported by a resolution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub components: usize,
    pub cliques: usize,
    pub groups: usize,
    pub singletons: usize,
}

pub struct CliqueEntityResolution<'a> {
    config: &'a StitchConfig,
}

impl<'a> CliqueEntityResolution<'a> {
    #[must_use]
    pub const fn new(config: &'a StitchConfig) -> Self {
        Self { config }
    }

    /// Resolve every component in the store, handing each resolved group
    /// of entity ids to `consumer`.
    pub fn resolve<T, C>(&self, tx: &T, mut consumer: C) -> Result<ResolutionSummary, StitchError>
    where
        T: Txn,
        C: FnMut(&[NodeId]),
    {
        let mut summary = ResolutionSummary::default();
        for component in ConnectedComponents::compute(tx)? {
            summary.components += 1;
            if component.is_singleton() {
                consumer(component.members());
                summary.singletons += 1;
                continue;
            }
            let part = self.resolve_component(tx, &component, &mut consumer)?;
            summary.cliques += part.cliques;
            summary.groups += part.groups;
            summary.singletons += part.singletons;
        }
        tracing::info!(
            components = summary.components,
            cliques = summary.cliques,
            groups = summary.groups,
            singletons = summary.singletons,
            "resolution finished"
        );
        Ok(summary)
    }

    /// Resolve one multi-member component.
    pub fn resolve_component<T, C>(
        &self,
        tx: &T,
        component: &Component,
        consumer: &mut C,
    ) -> Result<ResolutionSummary, StitchError>
    where
        T: Txn,
        C: FnMut(&[NodeId]),
    {
        let mut cliques: Vec<Clique> = Vec::new();
        CliqueEnumeration::new(component.members())
            .with_min_size(self.config.min_clique_size)
            .enumerate(tx, &self.config.resolution_keys(), &mut |c: &Clique| {
                cliques.push(c.clone());
                true
            })?;
        tracing::debug!(
            component = component.id(),
            size = component.size(),
            cliques = cliques.len(),
            "resolving component"
        );

        let mut eqv = UnionFind::new();
        for clique in &cliques {
            for (key, values) in clique.values() {
                for value in values {
                    if self.should_close(tx, clique, *key, value)? {
                        self.close(tx, &mut eqv, clique, *key, value)?;
                    }
                }
            }
        }
        self.reconcile(tx, &mut eqv, component)?;

        let mut summary = ResolutionSummary {
            components: 1,
            cliques: cliques.len(),
            ..ResolutionSummary::default()
        };
        let mut grouped = BTreeSet::new();
        for group in eqv.components().into_iter().filter(|g| g.len() > 1) {
            grouped.extend(group.iter().copied());
            consumer(group.as_slice());
            summary.groups += 1;
        }
        for member in component.members() {
            if !grouped.contains(member) {
                consumer(std::slice::from_ref(member));
                summary.singletons += 1;
            }
        }
        Ok(summary)
    }

    /// The closure rule for one `(key, value)` of a clique.
    pub fn should_close<T: Txn>(
        &self,
        tx: &T,
        clique: &Clique,
        key: StitchKey,
        value: &Scalar,
    ) -> Result<bool, StitchError> {
        if self.config.never_close.contains(&key) {
            return Ok(false);
        }
        if self.config.always_close.contains(&key) {
            return Ok(true);
        }

        let size = clique.size();
        if self.config.require_exclusive_value {
            let pairs = size * size.saturating_sub(1) / 2;
            let count = stitched_value_count(tx, Entity::kind_name(), key, value)?;
            if count != pairs {
                tracing::debug!(
                    clique = clique.id(),
                    key = key.name(),
                    value = %value,
                    count,
                    pairs,
                    "value is not exclusive to clique"
                );
                return Ok(false);
            }
        }
        if self.config.require_distinct_sources {
            let mut sources = BTreeSet::new();
            for member in clique.members() {
                sources.insert(Entity::open(tx, *member)?.datasource_key(tx)?);
            }
            if sources.len() != size {
                tracing::debug!(
                    clique = clique.id(),
                    key = key.name(),
                    sources = sources.len(),
                    size,
                    "clique members share a data source"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn close<T: Txn>(
        &self,
        tx: &T,
        eqv: &mut UnionFind,
        clique: &Clique,
        key: StitchKey,
        value: &Scalar,
    ) -> Result<(), StitchError> {
        for member in clique.members() {
            if eqv.contains(*member) {
                continue;
            }
            let start = *member;
            Entity::open(tx, start)?.walk(
                tx,
                |k, v| k == key && v == value,
                |_, node| {
                    if node == start {
                        eqv.add(node);
                    } else {
                        eqv.union(start, node);
                    }
                    true
                },
            )?;
        }
        Ok(())
    }

    /// Majority vote for entities no closure reached.
    fn reconcile<T: Txn>(
        &self,
        tx: &T,
        eqv: &mut UnionFind,
        component: &Component,
    ) -> Result<(), StitchError> {
        for member in component.members() {
            if eqv.contains(*member) {
                continue;
            }
            let mut mapped: BTreeMap<NodeId, usize> = BTreeMap::new();
            let mut unmapped = Vec::new();
            for neighbor in Entity::open(tx, *member)?.neighbors(tx)?.into_keys() {
                match eqv.root(neighbor) {
                    Some(root) => *mapped.entry(root).or_insert(0) += 1,
                    None => unmapped.push(neighbor),
                }
            }
            let best = mapped.values().copied().max().unwrap_or(0);

            if best > 0 && unmapped.len() > best {
                tracing::warn!(
                    entity = member.0,
                    unmapped = unmapped.len(),
                    mapped = best,
                    "inconsistent neighborhood: more unmapped than mapped neighbors"
                );
                for neighbor in unmapped {
                    eqv.union(*member, neighbor);
                }
            } else if best > 0 {
                tracing::debug!(entity = member.0, mapped = best, "entity left unmerged");
            }
        }
        Ok(())
    }
}
