// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable matching-network plan.
//!
//! A plan is an arena of [`PlanNode`]s addressed by index. Edges point from
//! a producer to a consumer port; several producers may feed the same port
//! (that is how clause unions are expressed). Per-instance memories live in
//! [`super::memory::NetworkMemory`], indexed the same way, so a plan never
//! holds instance data and can be shared across threads behind an `Arc`.
use core::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::ident::{RelationId, TypeId, Value};
use crate::pattern::CmpOp;
use crate::schema::Schema;

/// Index of a node in a [`NetworkPlan`].
pub type PlanIndex = usize;

/// Origin of the tokens an alpha node filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    /// Tuples of a relation, one column per position.
    Relation(RelationId),
    /// Live nodes carrying a type tag, as single-column tuples.
    Type(TypeId),
}

/// Operand of a [`Check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Column of the tuple under test.
    Column(usize),
    /// Constant value.
    Const(Value),
}

impl Operand {
    fn resolve(self, tuple: &[Value]) -> Option<Value> {
        match self {
            Self::Column(i) => tuple.get(i).copied(),
            Self::Const(v) => Some(v),
        }
    }
}

/// Column-level predicate evaluated on a single tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Check {
    /// Left operand.
    pub left: Operand,
    /// Operator.
    pub op: CmpOp,
    /// Right operand.
    pub right: Operand,
}

impl Check {
    /// Evaluates the predicate on `tuple`.
    ///
    /// Ordering operators only hold between two integers; the compiler
    /// guarantees that by sort checking, so a mixed pair evaluates to
    /// `false`.
    #[must_use]
    pub fn holds(&self, tuple: &[Value]) -> bool {
        let (Some(l), Some(r)) = (self.left.resolve(tuple), self.right.resolve(tuple)) else {
            return false;
        };
        match self.op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            op => match (l, r) {
                (Value::Int(a), Value::Int(b)) => match op {
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    _ => a >= b,
                },
                _ => false,
            },
        }
    }
}

pub(crate) fn all_hold(checks: &[Check], tuple: &[Value]) -> bool {
    checks.iter().all(|c| c.holds(tuple))
}

/// Integer operator of a [`Formula`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division truncating toward zero.
    Div,
}

impl ArithOp {
    /// Applies the operator; `None` on overflow or division by zero.
    #[must_use]
    pub const fn apply(self, a: i64, b: i64) -> Option<i64> {
        match self {
            Self::Add => a.checked_add(b),
            Self::Sub => a.checked_sub(b),
            Self::Mul => a.checked_mul(b),
            Self::Div => a.checked_div(b),
        }
    }
}

/// Integer expression over the columns of a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Formula {
    /// Column or constant.
    Operand(Operand),
    /// Binary operator applied to two subformulas.
    Apply {
        /// Operator.
        op: ArithOp,
        /// Left subformula.
        left: Box<Formula>,
        /// Right subformula.
        right: Box<Formula>,
    },
}

impl Formula {
    /// Evaluates on `tuple`; `None` if an operand is not an integer or an
    /// operation is undefined.
    #[must_use]
    pub fn eval(&self, tuple: &[Value]) -> Option<i64> {
        match self {
            Self::Operand(o) => o.resolve(tuple).and_then(Value::as_int),
            Self::Apply { op, left, right } => op.apply(left.eval(tuple)?, right.eval(tuple)?),
        }
    }
}

/// Column of a join output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Column of the left tuple.
    Left(usize),
    /// Column of the right tuple.
    Right(usize),
}

/// Aggregate function as compiled into an aggregation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Number of distinct inner members.
    Count,
    /// Sum of the integer at `column` of each distinct inner member,
    /// wrapping on overflow.
    Sum {
        /// Column of the member tuple holding the summand.
        column: usize,
    },
    /// Smallest integer at `column` among the distinct inner members.
    Min {
        /// Column of the member tuple holding the value.
        column: usize,
    },
    /// Largest integer at `column` among the distinct inner members.
    Max {
        /// Column of the member tuple holding the value.
        column: usize,
    },
}

impl Aggregate {
    /// Member column carrying the aggregated integer.
    #[must_use]
    pub const fn column(self) -> Option<usize> {
        match self {
            Self::Count => None,
            Self::Sum { column } | Self::Min { column } | Self::Max { column } => Some(column),
        }
    }

    /// Value of a group without members; `None` when undefined.
    #[must_use]
    pub const fn empty_value(self) -> Option<i64> {
        match self {
            Self::Count | Self::Sum { .. } => Some(0),
            Self::Min { .. } | Self::Max { .. } => None,
        }
    }
}

/// Closed set of network node kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Stateless filter over one token source.
    Alpha {
        /// Token origin.
        source: Source,
        /// Static filter (constants, repeated variables, local comparisons).
        checks: Vec<Check>,
    },
    /// Equi-join of two streams on key columns.
    Join {
        /// Key columns of left tuples.
        left_key: Vec<usize>,
        /// Key columns of right tuples.
        right_key: Vec<usize>,
        /// Output layout.
        output: Vec<Column>,
        /// Filter applied to each combined tuple.
        checks: Vec<Check>,
    },
    /// Stateless map extending each tuple with the value of a formula.
    /// Tuples on which the formula is undefined are dropped.
    Compute {
        /// Computed column.
        formula: Formula,
        /// Filter applied to each extended tuple.
        checks: Vec<Check>,
    },
    /// Passes left tuples whose key has no right-hand match.
    Negation {
        /// Key columns of left tuples.
        left_key: Vec<usize>,
        /// Key columns of right tuples.
        right_key: Vec<usize>,
    },
    /// Extends left tuples with an aggregate over the right-hand members
    /// sharing their key.
    Aggregation {
        /// Key columns of left tuples.
        left_key: Vec<usize>,
        /// Key columns of right (member) tuples.
        right_key: Vec<usize>,
        /// Aggregate function.
        aggregate: Aggregate,
        /// Filter applied to each extended output tuple.
        checks: Vec<Check>,
    },
}

/// Consumer side of an [`Edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    /// Left input of a beta node.
    Left(PlanIndex),
    /// Right input of a beta node.
    Right(PlanIndex),
    /// The pattern's match set.
    Sink,
}

/// Directed connection from a producer node to a consumer port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Consumer.
    pub port: Port,
    /// Columns forwarded, in order; `None` forwards the tuple unchanged.
    pub projection: Option<Vec<usize>>,
}

impl Edge {
    pub(crate) fn project(&self, tuple: &[Value]) -> Vec<Value> {
        match &self.projection {
            None => tuple.to_vec(),
            Some(cols) => cols.iter().map(|&c| tuple[c]).collect(),
        }
    }
}

/// One node of the plan arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    /// Node behaviour.
    pub kind: NodeKind,
    /// Outgoing edges in delivery order.
    pub edges: Vec<Edge>,
}

/// Immutable network compiled from one pattern.
///
/// Invariants
/// - Every edge points to a node with a larger index, so the arena order is
///   a topological order.
/// - Only alpha nodes are entered from outside; `routes` lists them per
///   token source in ascending index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPlan {
    pub(crate) nodes: Vec<PlanNode>,
    pub(crate) routes: FxHashMap<Source, Vec<PlanIndex>>,
    pub(crate) arity: usize,
}

impl NetworkPlan {
    /// Number of nodes in the arena.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of alpha nodes (distinct source/filter pairs).
    #[must_use]
    pub fn alpha_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Alpha { .. }))
            .count()
    }

    /// Returns the node at `index`.
    pub fn node(&self, index: PlanIndex) -> Option<&PlanNode> {
        self.nodes.get(index)
    }

    /// Number of columns in a match binding.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Alpha nodes entered by tokens from `source`.
    pub(crate) fn alphas_for(&self, source: Source) -> &[PlanIndex] {
        self.routes.get(&source).map_or(&[][..], Vec::as_slice)
    }

    /// Human-readable listing of the arena, one node per line.
    #[must_use]
    pub fn describe(&self, schema: &Schema) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let _ = write!(out, "#{i} ");
            match &node.kind {
                NodeKind::Alpha { source, checks } => {
                    match source {
                        Source::Relation(r) => {
                            let name = schema.relation_decl(*r).map_or("?", |d| d.name.as_str());
                            let _ = write!(out, "alpha {name}");
                        }
                        Source::Type(t) => {
                            let _ = write!(out, "alpha :{}", schema.type_name(*t).unwrap_or("?"));
                        }
                    }
                    if !checks.is_empty() {
                        let _ = write!(out, " checks={}", checks.len());
                    }
                }
                NodeKind::Join {
                    left_key, right_key, ..
                } => {
                    let _ = write!(out, "join {left_key:?}={right_key:?}");
                }
                NodeKind::Compute { checks, .. } => {
                    let _ = write!(out, "compute");
                    if !checks.is_empty() {
                        let _ = write!(out, " checks={}", checks.len());
                    }
                }
                NodeKind::Negation {
                    left_key,
                    right_key,
                } => {
                    let _ = write!(out, "not {left_key:?}={right_key:?}");
                }
                NodeKind::Aggregation {
                    left_key,
                    right_key,
                    aggregate,
                    ..
                } => {
                    let _ = write!(out, "agg {aggregate:?} {left_key:?}={right_key:?}");
                }
            }
            let targets: Vec<String> = node
                .edges
                .iter()
                .map(|e| match e.port {
                    Port::Left(n) => format!("L#{n}"),
                    Port::Right(n) => format!("R#{n}"),
                    Port::Sink => "sink".to_owned(),
                })
                .collect();
            let _ = writeln!(out, " -> {}", targets.join(","));
        }
        out
    }
}
