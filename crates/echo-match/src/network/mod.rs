// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Matching network: immutable plans, per-instance memories, propagation.
mod memory;
mod plan;
mod propagate;

pub(crate) use memory::NetworkMemory;
pub use plan::{
    Aggregate, ArithOp, Check, Column, Edge, Formula, NetworkPlan, NodeKind, Operand, PlanIndex,
    PlanNode, Port, Source,
};
pub(crate) use propagate::Propagator;
