//! # Connected Components
//!
//! Components are views, recomputed per query from stitch relationships.
//! The persisted `PARENT` forest maintained during stitching can also be
//! read back with [`Component::from_parent_tree`].

use crate::entity::Entity;
use crate::node::CNode;
use crate::primitives::{COMPONENT_INDEX, PARENT, short_key};
use crate::stitch_key::StitchKey;
use crate::store::{GraphTxn, Txn};
use crate::types::{AuxNodeType, NodeId, Scalar, StitchError};
use crate::union_find::UnionFind;
use std::collections::{BTreeMap, BTreeSet};

/// A set of entities connected through stitch relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    id: String,
    root: NodeId,
    members: Vec<NodeId>,
}

impl Component {
    /// Build a component from its root and members.
    #[must_use]
    pub fn new(root: NodeId, members: impl IntoIterator<Item = NodeId>) -> Self {
        let members: Vec<NodeId> = members
            .into_iter()
            .chain(std::iter::once(root))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut hasher = blake3::Hasher::new();
        for member in &members {
            hasher.update(&member.0.to_le_bytes());
        }
        Self {
            id: short_key(&hasher.finalize()),
            root,
            members,
        }
    }

    /// Content-derived id; identical member sets share an id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Members in ascending id order.
    #[must_use]
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.binary_search(&node).is_ok()
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        other.members.iter().any(|m| self.contains(*m))
    }

    /// Rebuild the persisted component rooted at `root` by following
    /// `PARENT` pointers downward.
    pub fn from_parent_tree<T: Txn>(tx: &T, root: NodeId) -> Result<Self, StitchError> {
        let root = CNode::open(tx, root)?;
        let mut members = BTreeSet::from([root.id()]);
        let mut stack = vec![root.id()];
        while let Some(node) = stack.pop() {
            for child in tx.lookup_nodes(COMPONENT_INDEX, PARENT, &Scalar::Long(node.0 as i64))? {
                if members.insert(child) {
                    stack.push(child);
                }
            }
        }
        Ok(Self::new(root.id(), members))
    }

    /// Values of `key` held by members, with the number of members
    /// holding each.
    pub fn stitch_values<T: GraphTxn>(
        &self,
        tx: &T,
        key: StitchKey,
    ) -> Result<BTreeMap<Scalar, usize>, StitchError> {
        let mut counts = BTreeMap::new();
        for member in &self.members {
            if let Some(value) = tx.property(*member, key.name())? {
                for element in value.elements() {
                    *counts.entry(element.clone()).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Label histogram over members.
    pub fn labels<T: GraphTxn>(&self, tx: &T) -> Result<BTreeMap<String, usize>, StitchError> {
        let mut counts = BTreeMap::new();
        for member in &self.members {
            for label in tx.labels(*member)? {
                *counts.entry(label).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

/// Iterator over connected components: multi-member components first
/// (largest first, then by lowest id), then singletons.
#[derive(Debug)]
pub struct ConnectedComponents {
    inner: std::vec::IntoIter<Component>,
    singletons: usize,
}

impl ConnectedComponents {
    /// Components over every entity in the store.
    pub fn compute<T: GraphTxn>(tx: &T) -> Result<Self, StitchError> {
        let entities = tx.nodes_with_label(AuxNodeType::Entity.as_str())?;
        Self::build(tx, &entities)
    }

    /// Components over `nodes` only; relationships leaving the subset
    /// are ignored.
    pub fn scoped<T: GraphTxn>(tx: &T, nodes: &[NodeId]) -> Result<Self, StitchError> {
        Self::build(tx, nodes)
    }

    /// Number of single-member components still to be yielded.
    #[must_use]
    pub const fn singletons(&self) -> usize {
        self.singletons
    }

    fn build<T: GraphTxn>(tx: &T, nodes: &[NodeId]) -> Result<Self, StitchError> {
        let scope: BTreeSet<NodeId> = nodes.iter().copied().collect();
        let mut uf = UnionFind::new();
        for node in &scope {
            uf.add(*node);
            for stitch in Entity::open(tx, *node)?.stitches(tx)? {
                if scope.contains(&stitch.other) {
                    uf.union(*node, stitch.other);
                }
            }
        }

        let components: Vec<Component> = uf
            .components()
            .into_iter()
            .filter_map(|members| {
                let root = uf.root(*members.first()?)?;
                Some(Component::new(root, members))
            })
            .collect();
        let singletons = components.iter().filter(|c| c.is_singleton()).count();
        tracing::debug!(
            components = components.len(),
            singletons,
            "connected components computed"
        );
        Ok(Self {
            inner: components.into_iter(),
            singletons,
        })
    }
}

impl Iterator for ConnectedComponents {
    type Item = Component;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next()?;
        if next.is_singleton() {
            self.singletons = self.singletons.saturating_sub(1);
        }
        Some(next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::StitchConfig;
    use crate::datasource::DataSourceFactory;
    use crate::store::{RedbStore, Store};
    use crate::types::Value;

    #[test]
    fn ids_depend_on_members_only() {
        let a = Component::new(NodeId(2), [NodeId(1), NodeId(3)]);
        let b = Component::new(NodeId(3), [NodeId(2), NodeId(1)]);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.members(), &[NodeId(1), NodeId(2), NodeId(3)]);
        assert!(a.overlaps(&Component::new(NodeId(3), [])));
    }

    #[test]
    fn components_then_singletons() {
        let store = RedbStore::in_memory().unwrap();
        let config = StitchConfig::default();
        store
            .execute(|tx| {
                let ds = DataSourceFactory::register(tx, "s")?;
                let e: Vec<Entity> = (0..4)
                    .map(|_| Entity::create(tx, ds))
                    .collect::<Result<_, _>>()?;
                e[1].set(tx, &config, StitchKey::I_UNII, "U".into())?;
                e[2].set(tx, &config, StitchKey::I_UNII, "U".into())?;

                let mut cc = ConnectedComponents::compute(tx)?;
                assert_eq!(cc.singletons(), 2);
                let first = cc.next().unwrap();
                assert_eq!(first.members(), &[e[1].id(), e[2].id()]);
                assert_eq!(
                    first.stitch_values(tx, StitchKey::I_UNII)?,
                    BTreeMap::from([(Scalar::from("U"), 2)])
                );
                let rest: Vec<Component> = cc.collect();
                assert_eq!(rest.len(), 2);
                assert!(rest.iter().all(Component::is_singleton));
                assert_eq!(rest[0].members(), &[e[0].id()]);

                let scoped = ConnectedComponents::scoped(tx, &[e[1].id(), e[3].id()])?;
                assert_eq!(scoped.count(), 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn parent_tree_matches_computed_component() {
        let store = RedbStore::in_memory().unwrap();
        let config = StitchConfig::default();
        store
            .execute(|tx| {
                let ds = DataSourceFactory::register(tx, "s")?;
                let e: Vec<Entity> = (0..3)
                    .map(|_| Entity::create(tx, ds))
                    .collect::<Result<_, _>>()?;
                e[0].set(tx, &config, StitchKey::N_Name, "A".into())?;
                e[1].set(tx, &config, StitchKey::N_Name, Value::strings(&["A", "B"]))?;
                e[2].set(tx, &config, StitchKey::N_Name, "B".into())?;

                let root = e[2].node().root(tx)?;
                let persisted = Component::from_parent_tree(tx, root)?;
                let computed = ConnectedComponents::compute(tx)?.next().unwrap();
                assert_eq!(persisted.members(), computed.members());
                assert_eq!(persisted.id(), computed.id());
                Ok(())
            })
            .unwrap();
    }
}
