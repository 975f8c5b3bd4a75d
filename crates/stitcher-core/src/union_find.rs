//! In-memory union-find over node ids.
//!
//! Used for the global component pass and for resolution-scoped
//! equivalence classes. Ranks are set sizes: on union the larger set's
//! root becomes the parent (the first argument's root on ties) and the
//! ranks are summed.

use crate::types::NodeId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parent: BTreeMap<NodeId, NodeId>,
    rank: BTreeMap<NodeId, u64>,
}

impl UnionFind {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.parent.clear();
        self.rank.clear();
    }

    /// Ensure `node` is tracked. Returns true when it is a root.
    pub fn add(&mut self, node: NodeId) -> bool {
        self.find_or_insert(node) == node
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.parent.contains_key(&node)
    }

    /// Root of `node`, or `None` when the node is not tracked.
    #[must_use]
    pub fn root(&self, node: NodeId) -> Option<NodeId> {
        let mut current = *self.parent.get(&node)?;
        loop {
            match self.parent.get(&current) {
                Some(next) if *next != current => current = *next,
                _ => return Some(current),
            }
        }
    }

    /// True when both nodes are tracked and joined.
    #[must_use]
    pub fn connected(&self, p: NodeId, q: NodeId) -> bool {
        match (self.root(p), self.root(q)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Join the sets of `p` and `q`, returning the surviving root.
    pub fn union(&mut self, p: NodeId, q: NodeId) -> NodeId {
        let i = self.find_or_insert(p);
        let j = self.find_or_insert(q);
        if i == j {
            return i;
        }
        let ri = self.rank.get(&i).copied().unwrap_or(1);
        let rj = self.rank.get(&j).copied().unwrap_or(1);
        let (parent, child) = if ri >= rj { (i, j) } else { (j, i) };
        self.parent.insert(child, parent);
        self.rank.insert(parent, ri.saturating_add(rj));
        parent
    }

    /// Every tracked set, largest first, then by lowest member. Members
    /// are ascending.
    #[must_use]
    pub fn components(&self) -> Vec<Vec<NodeId>> {
        let mut sets: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in self.parent.keys() {
            if let Some(root) = self.root(*node) {
                sets.entry(root).or_default().push(*node);
            }
        }
        let mut out: Vec<Vec<NodeId>> = sets.into_values().collect();
        out.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    fn find_or_insert(&mut self, node: NodeId) -> NodeId {
        if let Some(root) = self.root(node) {
            return root;
        }
        self.parent.insert(node, node);
        self.rank.insert(node, 1);
        node
    }
}
