//! # Clique Enumeration
//!
//! Maximal cliques of entities over a fixed node set, one stitch key at a
//! time. Each key gets its own bitset adjacency built from the key's
//! relationships among exactly the input nodes, and Bron–Kerbosch (no
//! pivot) runs over it. A clique found under several keys is reported
//! once with every key that produced it.
//!
//! Enumeration is deterministic: keys are taken in declaration order and
//! nodes in input order.

use crate::entity::Entity;
use crate::primitives::{DEFAULT_MIN_CLIQUE_SIZE, short_key};
use crate::stitch_key::StitchKey;
use crate::store::GraphTxn;
use crate::types::{NodeId, Scalar, StitchError};
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, BTreeSet};

/// A maximal set of pairwise-stitched entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clique {
    id: String,
    members: Vec<NodeId>,
    values: BTreeMap<StitchKey, Vec<Scalar>>,
}

impl Clique {
    fn new(members: Vec<NodeId>, values: BTreeMap<StitchKey, Vec<Scalar>>) -> Self {
        let mut sorted = members;
        sorted.sort();
        let mut hasher = blake3::Hasher::new();
        for member in &sorted {
            hasher.update(&member.0.to_le_bytes());
        }
        Self {
            id: short_key(&hasher.finalize()),
            members: sorted,
            values,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
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
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.binary_search(&node).is_ok()
    }

    /// Keys under which this clique is complete.
    pub fn keys(&self) -> impl Iterator<Item = StitchKey> + '_ {
        self.values.keys().copied()
    }

    /// Dominant values per key. A single element means that value links
    /// every pair of members.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<StitchKey, Vec<Scalar>> {
        &self.values
    }

    /// Sum over keys of priority times value count, scaled by size.
    #[must_use]
    pub fn weight(&self) -> u64 {
        let per_member: u64 = self
            .values
            .iter()
            .map(|(key, values)| u64::from(key.priority()) * values.len() as u64)
            .sum();
        per_member * self.members.len() as u64
    }

    /// True when the strongest key of this clique is at least as strong
    /// as the strongest of `keys`.
    #[must_use]
    pub fn subordinate(&self, keys: &[StitchKey]) -> bool {
        let mine = self.keys().map(StitchKey::priority).max();
        let theirs = keys.iter().map(|k| k.priority()).max();
        match (mine, theirs) {
            (Some(a), Some(b)) => a >= b,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Receives cliques during enumeration. Returning false stops it.
pub trait CliqueVisitor {
    fn clique(&mut self, clique: &Clique) -> bool;
}

impl<F: FnMut(&Clique) -> bool> CliqueVisitor for F {
    fn clique(&mut self, clique: &Clique) -> bool {
        self(clique)
    }
}

/// Clique enumeration over a fixed node set.
#[derive(Debug, Clone)]
pub struct CliqueEnumeration {
    nodes: Vec<NodeId>,
    min_size: usize,
}

impl CliqueEnumeration {
    #[must_use]
    pub fn new(nodes: &[NodeId]) -> Self {
        let mut seen = BTreeSet::new();
        Self {
            nodes: nodes.iter().copied().filter(|n| seen.insert(*n)).collect(),
            min_size: DEFAULT_MIN_CLIQUE_SIZE,
        }
    }

    /// Raise the smallest emitted clique size; never below three.
    #[must_use]
    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size.max(DEFAULT_MIN_CLIQUE_SIZE);
        self
    }

    /// Restrict enumeration to `subset`, keeping input order.
    #[must_use]
    pub fn subclique(&self, subset: &[NodeId]) -> Self {
        let keep: BTreeSet<NodeId> = subset.iter().copied().collect();
        Self {
            nodes: self.nodes.iter().copied().filter(|n| keep.contains(n)).collect(),
            min_size: self.min_size,
        }
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Enumerate cliques under `keys`. Returns false when the visitor
    /// stopped the enumeration.
    pub fn enumerate<T, V>(
        &self,
        tx: &T,
        keys: &[StitchKey],
        visitor: &mut V,
    ) -> Result<bool, StitchError>
    where
        T: GraphTxn,
        V: CliqueVisitor + ?Sized,
    {
        let keys: BTreeSet<StitchKey> = keys.iter().copied().collect();
        let position: BTreeMap<NodeId, u32> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (*n, i as u32))
            .collect();

        // stitches among the input nodes: (key, lower pos, upper pos) -> values
        let mut edges: BTreeMap<(StitchKey, u32, u32), BTreeSet<Scalar>> = BTreeMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let i = i as u32;
            for stitch in Entity::open(tx, *node)?.stitches(tx)? {
                if !keys.contains(&stitch.key) {
                    continue;
                }
                let Some(j) = position.get(&stitch.other).copied() else {
                    continue;
                };
                if i < j {
                    edges.entry((stitch.key, i, j)).or_default().insert(stitch.value);
                }
            }
        }

        // member positions -> index into `found`, in discovery order
        let mut seen: BTreeMap<Vec<u32>, usize> = BTreeMap::new();
        let mut found: Vec<(Vec<u32>, BTreeMap<StitchKey, Vec<Scalar>>)> = Vec::new();

        for key in &keys {
            let mut adjacency = vec![RoaringBitmap::new(); self.nodes.len()];
            for (k, i, j) in edges.keys() {
                if k == key {
                    adjacency[*i as usize].insert(*j);
                    adjacency[*j as usize].insert(*i);
                }
            }

            let mut cliques = Vec::new();
            let all: RoaringBitmap = (0..self.nodes.len() as u32).collect();
            bron_kerbosch(
                &adjacency,
                &mut Vec::new(),
                all,
                RoaringBitmap::new(),
                self.min_size,
                &mut cliques,
            );

            for mut members in cliques {
                members.sort_unstable();
                let values = dominant_values(&edges, *key, &members);
                let slot = *seen.entry(members.clone()).or_insert_with(|| {
                    found.push((members, BTreeMap::new()));
                    found.len() - 1
                });
                if let Some((_, per_key)) = found.get_mut(slot) {
                    per_key.insert(*key, values);
                }
            }
        }

        tracing::debug!(nodes = self.nodes.len(), cliques = found.len(), "cliques enumerated");
        for (members, values) in found {
            let ids = members.iter().map(|p| self.nodes[*p as usize]).collect();
            if !visitor.clique(&Clique::new(ids, values)) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Bron–Kerbosch without pivoting; `r` is the growing clique, `p` the
/// candidates and `x` the excluded set.
fn bron_kerbosch(
    adjacency: &[RoaringBitmap],
    r: &mut Vec<u32>,
    mut p: RoaringBitmap,
    mut x: RoaringBitmap,
    min_size: usize,
    out: &mut Vec<Vec<u32>>,
) {
    if p.is_empty() && x.is_empty() {
        if r.len() >= min_size {
            out.push(r.clone());
        }
        return;
    }
    for v in p.clone().iter() {
        let neighbors = &adjacency[v as usize];
        r.push(v);
        bron_kerbosch(adjacency, r, &p & neighbors, &x & neighbors, min_size, out);
        r.pop();
        p.remove(v);
        x.insert(v);
    }
}

/// Values of `key` linking the clique's pairs. A value present on every
/// pair is returned alone; otherwise all values by descending pair count.
fn dominant_values(
    edges: &BTreeMap<(StitchKey, u32, u32), BTreeSet<Scalar>>,
    key: StitchKey,
    members: &[u32],
) -> Vec<Scalar> {
    let mut tally: BTreeMap<&Scalar, usize> = BTreeMap::new();
    for (a, i) in members.iter().enumerate() {
        for j in &members[a + 1..] {
            if let Some(values) = edges.get(&(key, *i, *j)) {
                for value in values {
                    *tally.entry(value).or_insert(0) += 1;
                }
            }
        }
    }
    let pairs = members.len() * members.len().saturating_sub(1) / 2;
    if let Some((value, _)) = tally.iter().find(|(_, count)| **count == pairs) {
        return vec![(*value).clone()];
    }
    let mut ranked: Vec<(&Scalar, usize)> = tally.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.into_iter().map(|(v, _)| v.clone()).collect()
}
