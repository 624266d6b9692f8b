// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-instance memories of a matching network.
//!
//! Every count here is a signed multiset count. Entries whose count returns
//! to zero are removed, so replaying the inverse of a token sequence leaves
//! each memory structurally equal to its earlier self.
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use super::plan::{Aggregate, NetworkPlan, NodeKind};
use crate::ident::{Tuple, Value};

/// Signed multiset of tuples bucketed by join key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct KeyedBag {
    buckets: FxHashMap<Tuple, FxHashMap<Tuple, i64>>,
}

impl KeyedBag {
    pub(crate) fn add(&mut self, key: Tuple, tuple: Tuple, diff: i64) {
        let bucket = self.buckets.entry(key.clone()).or_default();
        let slot = bucket.entry(tuple.clone()).or_insert(0);
        *slot += diff;
        if *slot == 0 {
            bucket.remove(&tuple);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }

    /// Tuples stored under `key` with their counts.
    pub(crate) fn bucket(&self, key: &[Value]) -> Vec<(Tuple, i64)> {
        self.buckets
            .get(key)
            .map(|b| b.iter().map(|(t, c)| (t.clone(), *c)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.values().map(FxHashMap::len).sum()
    }
}

/// Inner members of one aggregation group.
///
/// `distinct`, `sum` and `values` track the members with a positive count;
/// they are updated only on 0↔positive transitions of a member. `sum` wraps
/// on overflow so that each removal exactly undoes its insertion. `values`
/// counts members per aggregated integer and is kept only for min/max.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Group {
    members: FxHashMap<Tuple, i64>,
    distinct: i64,
    sum: i64,
    values: BTreeMap<i64, u64>,
}

impl Group {
    pub(crate) fn value(&self, aggregate: Aggregate) -> Option<i64> {
        match aggregate {
            Aggregate::Count => Some(self.distinct),
            Aggregate::Sum { .. } => Some(self.sum),
            Aggregate::Min { .. } => self.values.keys().next().copied(),
            Aggregate::Max { .. } => self.values.keys().next_back().copied(),
        }
    }

    pub(crate) fn update(&mut self, member: Tuple, diff: i64, aggregate: Aggregate) {
        let summand = aggregate
            .column()
            .and_then(|column| member.get(column).copied())
            .and_then(Value::as_int)
            .unwrap_or(0);
        let ordered = matches!(aggregate, Aggregate::Min { .. } | Aggregate::Max { .. });
        let slot = self.members.entry(member.clone()).or_insert(0);
        let before = *slot;
        *slot += diff;
        let after = *slot;
        if after == 0 {
            self.members.remove(&member);
        }
        match (before > 0, after > 0) {
            (false, true) => {
                self.distinct += 1;
                self.sum = self.sum.wrapping_add(summand);
                if ordered {
                    *self.values.entry(summand).or_insert(0) += 1;
                }
            }
            (true, false) => {
                self.distinct -= 1;
                self.sum = self.sum.wrapping_sub(summand);
                if ordered {
                    if let Some(n) = self.values.get_mut(&summand) {
                        *n -= 1;
                        if *n == 0 {
                            self.values.remove(&summand);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// State of a single plan node in one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeMemory {
    /// Alpha and compute nodes keep nothing.
    Stateless,
    Join {
        left: KeyedBag,
        right: KeyedBag,
    },
    Negation {
        left: KeyedBag,
        /// Inner match count per key.
        inner: FxHashMap<Tuple, i64>,
    },
    Aggregation {
        left: KeyedBag,
        groups: FxHashMap<Tuple, Group>,
    },
}

impl NodeMemory {
    fn entries(&self) -> usize {
        match self {
            Self::Stateless => 0,
            Self::Join { left, right } => left.len() + right.len(),
            Self::Negation { left, inner } => left.len() + inner.len(),
            Self::Aggregation { left, groups } => {
                left.len() + groups.values().map(|g| g.members.len()).sum::<usize>()
            }
        }
    }
}

/// Memory tables of one attached pattern, indexed like its plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NetworkMemory {
    pub(crate) nodes: Vec<NodeMemory>,
}

impl NetworkMemory {
    pub(crate) fn new(plan: &NetworkPlan) -> Self {
        let nodes = plan
            .nodes
            .iter()
            .map(|n| match n.kind {
                NodeKind::Alpha { .. } | NodeKind::Compute { .. } => NodeMemory::Stateless,
                NodeKind::Join { .. } => NodeMemory::Join {
                    left: KeyedBag::default(),
                    right: KeyedBag::default(),
                },
                NodeKind::Negation { .. } => NodeMemory::Negation {
                    left: KeyedBag::default(),
                    inner: FxHashMap::default(),
                },
                NodeKind::Aggregation { .. } => NodeMemory::Aggregation {
                    left: KeyedBag::default(),
                    groups: FxHashMap::default(),
                },
            })
            .collect();
        Self { nodes }
    }

    /// Total number of stored entries across all nodes.
    pub(crate) fn entries(&self) -> usize {
        self.nodes.iter().map(NodeMemory::entries).sum()
    }
}
