// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Token propagation through one instance's network memories.
//!
//! Every activation computes the exact signed change of its output,
//! `f(new) - f(old)`, and hands it to its consumers before the next input
//! token is taken. Because each node kind is linear in its inputs (joins are
//! bilinear, compute nodes map tuple by tuple, negation and aggregation
//! recompute per key), the final memories and match set depend only on the
//! net input, never on the order in which the tokens of a batch arrive.
//!
//! Two ordering rules are fixed:
//! - a beta node computes its outputs against the opposite memory *before*
//!   storing the incoming token;
//! - a producer delivers to its edges in declaration order, completing each
//!   delivery depth-first.
use tracing::trace;

use super::memory::{NetworkMemory, NodeMemory};
use super::plan::{all_hold, Column, NetworkPlan, NodeKind, PlanIndex, Port, Source};
use crate::ident::{Tuple, Value};
use crate::match_set::MatchSet;
use crate::store::Change;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

fn key(tuple: &[Value], cols: &[usize]) -> Tuple {
    cols.iter().map(|&c| tuple[c]).collect()
}

fn combine(output: &[Column], left: &[Value], right: &[Value]) -> Tuple {
    output
        .iter()
        .map(|c| match *c {
            Column::Left(i) => left[i],
            Column::Right(i) => right[i],
        })
        .collect()
}

fn extend(tuple: &[Value], value: i64) -> Tuple {
    let mut out = Vec::with_capacity(tuple.len() + 1);
    out.extend_from_slice(tuple);
    out.push(Value::Int(value));
    out
}

/// Drives store changes through a plan, updating `memory` and `sink`.
pub(crate) struct Propagator<'a> {
    plan: &'a NetworkPlan,
    memory: &'a mut NetworkMemory,
    sink: &'a mut MatchSet,
    activations: usize,
}

impl<'a> Propagator<'a> {
    pub(crate) fn new(
        plan: &'a NetworkPlan,
        memory: &'a mut NetworkMemory,
        sink: &'a mut MatchSet,
    ) -> Self {
        Self {
            plan,
            memory,
            sink,
            activations: 0,
        }
    }

    /// Beta activations performed so far.
    pub(crate) fn activations(&self) -> usize {
        self.activations
    }

    /// Pushes one store change. Node changes enter as one token per type tag.
    pub(crate) fn push(&mut self, change: &Change) {
        match change {
            Change::Node { node, types, op } => {
                for ty in types {
                    self.enter(Source::Type(*ty), &[Value::Node(*node)], op.diff());
                }
            }
            Change::Tuple {
                relation,
                nodes,
                diff,
            } => {
                let tuple: Tuple = nodes.iter().map(|n| Value::Node(*n)).collect();
                self.enter(Source::Relation(*relation), &tuple, *diff);
            }
        }
    }

    fn enter(&mut self, source: Source, tuple: &[Value], diff: i64) {
        let plan = self.plan;
        for &alpha in plan.alphas_for(source) {
            if let NodeKind::Alpha { checks, .. } = &plan.nodes[alpha].kind {
                if all_hold(checks, tuple) {
                    self.emit(alpha, tuple, diff);
                }
            }
        }
    }

    fn emit(&mut self, from: PlanIndex, tuple: &[Value], diff: i64) {
        let plan = self.plan;
        for edge in &plan.nodes[from].edges {
            let projected = edge.project(tuple);
            match edge.port {
                Port::Sink => self.sink.apply(projected, diff),
                Port::Left(n) => self.activate(n, Side::Left, projected, diff),
                Port::Right(n) => self.activate(n, Side::Right, projected, diff),
            }
        }
    }

    fn activate(&mut self, index: PlanIndex, side: Side, tuple: Tuple, diff: i64) {
        trace!(node = index, ?side, diff, "activate");
        self.activations += 1;
        let plan = self.plan;
        let out = match (&plan.nodes[index].kind, &mut self.memory.nodes[index]) {
            (
                NodeKind::Join {
                    left_key,
                    right_key,
                    output,
                    checks,
                },
                NodeMemory::Join { left, right },
            ) => {
                let mut out = Vec::new();
                match side {
                    Side::Left => {
                        let k = key(&tuple, left_key);
                        for (r, c) in right.bucket(&k) {
                            let joined = combine(output, &tuple, &r);
                            if all_hold(checks, &joined) {
                                out.push((joined, diff * c));
                            }
                        }
                        left.add(k, tuple, diff);
                    }
                    Side::Right => {
                        let k = key(&tuple, right_key);
                        for (l, c) in left.bucket(&k) {
                            let joined = combine(output, &l, &tuple);
                            if all_hold(checks, &joined) {
                                out.push((joined, c * diff));
                            }
                        }
                        right.add(k, tuple, diff);
                    }
                }
                out
            }
            (NodeKind::Compute { formula, checks }, _) => formula
                .eval(&tuple)
                .map(|value| extend(&tuple, value))
                .filter(|extended| all_hold(checks, extended))
                .map(|extended| vec![(extended, diff)])
                .unwrap_or_default(),
            (
                NodeKind::Negation {
                    left_key,
                    right_key,
                },
                NodeMemory::Negation { left, inner },
            ) => match side {
                Side::Left => {
                    let k = key(&tuple, left_key);
                    let blocked = inner.get(&k).is_some_and(|c| *c > 0);
                    let out = if blocked {
                        Vec::new()
                    } else {
                        vec![(tuple.clone(), diff)]
                    };
                    left.add(k, tuple, diff);
                    out
                }
                Side::Right => {
                    let k = key(&tuple, right_key);
                    let before = inner.get(&k).copied().unwrap_or(0);
                    let after = before + diff;
                    if after == 0 {
                        inner.remove(&k);
                    } else {
                        inner.insert(k.clone(), after);
                    }
                    if (before > 0) == (after > 0) {
                        Vec::new()
                    } else {
                        let sign = if after > 0 { -1 } else { 1 };
                        left.bucket(&k)
                            .into_iter()
                            .map(|(l, c)| (l, sign * c))
                            .collect()
                    }
                }
            },
            (
                NodeKind::Aggregation {
                    left_key,
                    right_key,
                    aggregate,
                    checks,
                },
                NodeMemory::Aggregation { left, groups },
            ) => match side {
                Side::Left => {
                    let k = key(&tuple, left_key);
                    let value = groups
                        .get(&k)
                        .map_or(aggregate.empty_value(), |g| g.value(*aggregate));
                    let out = value
                        .map(|v| extend(&tuple, v))
                        .filter(|extended| all_hold(checks, extended))
                        .map(|extended| vec![(extended, diff)])
                        .unwrap_or_default();
                    left.add(k, tuple, diff);
                    out
                }
                Side::Right => {
                    let k = key(&tuple, right_key);
                    let group = groups.entry(k.clone()).or_default();
                    let before = group.value(*aggregate);
                    group.update(tuple, diff, *aggregate);
                    let after = group.value(*aggregate);
                    if group.is_empty() {
                        groups.remove(&k);
                    }
                    let mut out = Vec::new();
                    if before != after {
                        for (l, c) in left.bucket(&k) {
                            if let Some(old) = before.map(|v| extend(&l, v)) {
                                if all_hold(checks, &old) {
                                    out.push((old, -c));
                                }
                            }
                            if let Some(new) = after.map(|v| extend(&l, v)) {
                                if all_hold(checks, &new) {
                                    out.push((new, c));
                                }
                            }
                        }
                    }
                    out
                }
            },
            // Plan and memory are built from the same arena; alpha nodes are
            // never the target of an edge.
            _ => Vec::new(),
        };
        for (t, d) in out {
            self.emit(index, &t, d);
        }
    }
}
