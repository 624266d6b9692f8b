// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory model store: typed nodes and counted relation tuples.
//!
//! The store is mutated only by applying [`Change`] tokens produced from a
//! validated batch (see [`crate::delta`]). Every change is exactly
//! invertible, which is what makes rollback replay restore the store
//! bit-for-bit.
use std::collections::BTreeMap;
use std::sync::Arc;

use blake3::Hasher;
use rustc_hash::FxHashMap;

use crate::ident::{Hash, NodeId, RelationId, TypeId};
use crate::schema::Schema;

/// Materialised record for a single node.
///
/// Invariants
/// - `types` is sorted, deduplicated, and never changes after creation.
/// - A deleted node keeps its record as a tombstone (`alive == false`) until
///   the history that could resurrect it is pruned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    /// Type tags, sorted ascending.
    pub types: Vec<TypeId>,
    /// `false` once the node has been deleted (tombstone).
    pub alive: bool,
}

impl NodeRecord {
    /// Returns `true` if the node carries type tag `ty`.
    #[must_use]
    pub fn has_type(&self, ty: TypeId) -> bool {
        self.types.binary_search(&ty).is_ok()
    }
}

/// One signed unit of change applied to the store and pushed into the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// A node enters or leaves the live set.
    Node {
        /// Node handle.
        node: NodeId,
        /// The node's type tags (one type token is derived per tag).
        types: Vec<TypeId>,
        /// Lifecycle transition.
        op: NodeOp,
    },
    /// A relation tuple count changes by `diff`.
    Tuple {
        /// Relation type.
        relation: RelationId,
        /// Ordered node tuple.
        nodes: Vec<NodeId>,
        /// Signed multiplicity change.
        diff: i64,
    },
}

/// Node lifecycle transitions.
///
/// `Delete` only tombstones the record; `Uncreate` (the inverse of `Create`,
/// used by rollback) removes it entirely so the store returns to its exact
/// prior contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeOp {
    /// A new node is created.
    Create,
    /// A live node is tombstoned.
    Delete,
    /// A tombstoned node is revived (inverse of `Delete`).
    Undelete,
    /// A created node is removed without a trace (inverse of `Create`).
    Uncreate,
}

impl NodeOp {
    /// Signed multiplicity of the type tokens this transition produces.
    #[must_use]
    pub const fn diff(self) -> i64 {
        match self {
            Self::Create | Self::Undelete => 1,
            Self::Delete | Self::Uncreate => -1,
        }
    }

    /// The transition that undoes this one.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Create => Self::Uncreate,
            Self::Uncreate => Self::Create,
            Self::Delete => Self::Undelete,
            Self::Undelete => Self::Delete,
        }
    }
}

impl Change {
    /// Returns the change that exactly undoes this one.
    #[must_use]
    pub fn inverse(&self) -> Self {
        match self {
            Self::Node { node, types, op } => Self::Node {
                node: *node,
                types: types.clone(),
                op: op.inverse(),
            },
            Self::Tuple {
                relation,
                nodes,
                diff,
            } => Self::Tuple {
                relation: *relation,
                nodes: nodes.clone(),
                diff: -diff,
            },
        }
    }
}

/// Nodes and relation tuples of one model instance.
#[derive(Debug, Clone)]
pub struct ModelStore {
    schema: Arc<Schema>,
    pub(crate) nodes: BTreeMap<NodeId, NodeRecord>,
    /// `relation -> (node tuple -> count)`; entries with count 0 are removed.
    pub(crate) tuples: BTreeMap<RelationId, BTreeMap<Vec<NodeId>, u64>>,
    /// Number of distinct live tuples mentioning each node.
    incidence: FxHashMap<NodeId, u64>,
    next_node: u64,
}

impl ModelStore {
    /// Creates an empty store for `schema`.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            nodes: BTreeMap::new(),
            tuples: BTreeMap::new(),
            incidence: FxHashMap::default(),
            next_node: 0,
        }
    }

    /// The schema this store enforces.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the node record (live or tombstoned) for `id`.
    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    /// Returns `true` if `id` names a live node.
    #[must_use]
    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.alive)
    }

    /// Iterates live nodes in ascending id order.
    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &NodeRecord)> {
        self.nodes
            .iter()
            .filter(|(_, r)| r.alive)
            .map(|(id, r)| (*id, r))
    }

    /// Returns the current count of a relation tuple (0 when absent).
    #[must_use]
    pub fn tuple_count(&self, relation: RelationId, nodes: &[NodeId]) -> u64 {
        self.tuples
            .get(&relation)
            .and_then(|m| m.get(nodes))
            .copied()
            .unwrap_or(0)
    }

    /// Iterates the present tuples of `relation` with their counts.
    pub fn tuples_of(&self, relation: RelationId) -> impl Iterator<Item = (&[NodeId], u64)> {
        self.tuples
            .get(&relation)
            .into_iter()
            .flatten()
            .map(|(k, c)| (k.as_slice(), *c))
    }

    /// Number of distinct live tuples that mention `id`.
    #[must_use]
    pub fn incidence(&self, id: NodeId) -> u64 {
        self.incidence.get(&id).copied().unwrap_or(0)
    }

    /// Reserves a fresh node handle. Handles are never reissued.
    pub(crate) fn allocate_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    /// Applies a single validated change.
    ///
    /// Callers must only pass changes produced by batch validation (or their
    /// exact inverses); a change that would drive a count negative is a
    /// logic error and is caught by a debug assertion.
    pub(crate) fn apply(&mut self, change: &Change) {
        match change {
            Change::Node { node, types, op } => match op {
                NodeOp::Create => {
                    self.nodes.insert(
                        *node,
                        NodeRecord {
                            types: types.clone(),
                            alive: true,
                        },
                    );
                }
                NodeOp::Uncreate => {
                    self.nodes.remove(node);
                }
                NodeOp::Delete | NodeOp::Undelete => {
                    if let Some(rec) = self.nodes.get_mut(node) {
                        debug_assert_eq!(
                            rec.alive,
                            *op == NodeOp::Delete,
                            "bad lifecycle transition for {node}"
                        );
                        rec.alive = *op == NodeOp::Undelete;
                    }
                }
            },
            Change::Tuple {
                relation,
                nodes,
                diff,
            } => {
                let bucket = self.tuples.entry(*relation).or_default();
                let before = bucket.get(nodes).copied().unwrap_or(0);
                let after = i128::from(before) + i128::from(*diff);
                debug_assert!(after >= 0, "tuple count underflow");
                let after = u64::try_from(after).unwrap_or(0);
                if after == 0 {
                    bucket.remove(nodes);
                    if bucket.is_empty() {
                        self.tuples.remove(relation);
                    }
                } else {
                    bucket.insert(nodes.clone(), after);
                }
                match (before == 0, after == 0) {
                    (true, false) => self.bump_incidence(nodes, 1),
                    (false, true) => self.bump_incidence(nodes, -1),
                    _ => {}
                }
            }
        }
    }

    fn bump_incidence(&mut self, nodes: &[NodeId], delta: i64) {
        let mut seen: Vec<NodeId> = nodes.to_vec();
        seen.sort_unstable();
        seen.dedup();
        for n in seen {
            let slot = self.incidence.entry(n).or_insert(0);
            *slot = slot.saturating_add_signed(delta);
            if *slot == 0 {
                self.incidence.remove(&n);
            }
        }
    }

    /// Physically removes tombstones for `nodes` that are still dead.
    ///
    /// Called when the history that could resurrect them has been pruned.
    pub(crate) fn purge_tombstones(&mut self, nodes: &[NodeId]) -> usize {
        let mut purged = 0;
        for n in nodes {
            if self.nodes.get(n).is_some_and(|r| !r.alive) {
                self.nodes.remove(n);
                purged += 1;
            }
        }
        purged
    }

    /// Iterates every present fact as an insertion [`Change`].
    ///
    /// Node facts come first (ascending id), then tuples (ascending relation,
    /// then tuple). Used to seed the memories of a freshly attached pattern.
    pub(crate) fn facts(&self) -> impl Iterator<Item = Change> + '_ {
        let nodes = self.live_nodes().map(|(id, rec)| Change::Node {
            node: id,
            types: rec.types.clone(),
            op: NodeOp::Create,
        });
        let tuples = self.tuples.iter().flat_map(|(rel, bucket)| {
            bucket.iter().map(move |(nodes, count)| Change::Tuple {
                relation: *rel,
                nodes: nodes.clone(),
                diff: i64::try_from(*count).unwrap_or(i64::MAX),
            })
        });
        nodes.chain(tuples)
    }
}

/// Computes the canonical state root of a store.
///
/// The root covers the observable contents only: live nodes and present
/// tuples. The handle allocator's high-water mark and tombstones are
/// excluded, so a rolled-back store hashes equal to its earlier self even
/// when history pruning has purged tombstones in between.
///
/// Encoding (all integers little-endian):
/// - `b"state:"`;
/// - live node count, then every live node in ascending id order: id, tag
///   count, tags;
/// - every relation bucket in ascending relation order: relation id, tuple
///   count, then each tuple in ascending order: arity, node ids, count.
///
/// Changing this encoding changes every state root and must be treated as a
/// breaking change.
pub(crate) fn compute_state_root(store: &ModelStore) -> Hash {
    let mut h = Hasher::new();
    h.update(b"state:");
    let live = store.nodes.values().filter(|r| r.alive).count();
    h.update(&(live as u64).to_le_bytes());
    for (id, rec) in store.live_nodes() {
        h.update(&id.0.to_le_bytes());
        h.update(&(rec.types.len() as u64).to_le_bytes());
        for t in &rec.types {
            h.update(&t.0.to_le_bytes());
        }
    }
    h.update(&(store.tuples.len() as u64).to_le_bytes());
    for (rel, bucket) in &store.tuples {
        h.update(&rel.0.to_le_bytes());
        h.update(&(bucket.len() as u64).to_le_bytes());
        for (nodes, count) in bucket {
            h.update(&(nodes.len() as u64).to_le_bytes());
            for n in nodes {
                h.update(&n.0.to_le_bytes());
            }
            h.update(&count.to_le_bytes());
        }
    }
    h.finalize().into()
}
