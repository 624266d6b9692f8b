// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Network construction from normalized clauses.
//!
//! Each clause becomes a left-deep chain of joins over its positive atoms,
//! followed by its negations and aggregations in declaration order. An
//! assignment becomes a compute node as soon as its inputs are bound. A
//! comparison becomes a [`Check`] on the first node at which all its
//! variables are bound. Alpha nodes are shared across the whole pattern per
//! distinct (source, filter) pair.
//!
//! The body of a negation or aggregation that refers to variables of the
//! enclosing clause beyond its own atoms is joined with the enclosing
//! stream first, so those variables are bound inside it.
use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use super::normalize::{NAgg, NExpr, NLit, NTerm, Normalized, VarId};
use super::{CompileError, JoinOrder};
use crate::ident::Value;
use crate::network::{
    Aggregate, Check, Column, Edge, Formula, NetworkPlan, NodeKind, Operand, PlanIndex, PlanNode,
    Port, Source,
};
use crate::pattern::CmpOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sort {
    Node,
    Int,
}

/// Output of a subnetwork: the producing node and the variable at each
/// column (`None` for constant or shadowed columns).
#[derive(Debug, Clone)]
struct Stream {
    node: PlanIndex,
    layout: Vec<Option<VarId>>,
}

impl Stream {
    fn position(&self, v: VarId) -> Option<usize> {
        self.layout.iter().position(|c| *c == Some(v))
    }

    fn vars(&self) -> BTreeSet<VarId> {
        self.layout.iter().flatten().copied().collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    left: NTerm,
    op: CmpOp,
    right: NTerm,
}

impl Pending {
    fn vars(&self) -> impl Iterator<Item = VarId> {
        [self.left, self.right].into_iter().filter_map(|t| match t {
            NTerm::Var(v) => Some(v),
            NTerm::Const(_) => None,
        })
    }

    fn to_check(self, layout: &[Option<VarId>]) -> Option<Check> {
        Some(Check {
            left: operand(self.left, layout)?,
            op: self.op,
            right: operand(self.right, layout)?,
        })
    }
}

fn operand(term: NTerm, layout: &[Option<VarId>]) -> Option<Operand> {
    match term {
        NTerm::Const(v) => Some(Operand::Const(v)),
        NTerm::Var(v) => layout
            .iter()
            .position(|c| *c == Some(v))
            .map(Operand::Column),
    }
}

/// `None` while some variable of `expr` is unbound under `layout`.
fn to_formula(expr: &NExpr, layout: &[Option<VarId>]) -> Option<Formula> {
    match expr {
        NExpr::Term(t) => operand(*t, layout).map(Formula::Operand),
        NExpr::Apply(op, l, r) => Some(Formula::Apply {
            op: *op,
            left: Box::new(to_formula(l, layout)?),
            right: Box::new(to_formula(r, layout)?),
        }),
    }
}

/// Layout and checks after appending a computed column for `result`. A
/// bound variable or a constant turns into an equality check on it.
fn bind_result(layout: &[Option<VarId>], result: NTerm) -> (Vec<Option<VarId>>, Vec<Check>) {
    let column = layout.len();
    let existing = operand(result, layout);
    let mut out = layout.to_vec();
    out.push(match (result, existing) {
        (NTerm::Var(v), None) => Some(v),
        _ => None,
    });
    let checks = existing
        .map(|left| Check {
            left,
            op: CmpOp::Eq,
            right: Operand::Column(column),
        })
        .into_iter()
        .collect();
    (out, checks)
}

/// Every variable mentioned by `lits`, nested bodies included.
fn mentioned<'l>(lits: impl IntoIterator<Item = &'l NLit>, out: &mut BTreeSet<VarId>) {
    fn term(t: NTerm, out: &mut BTreeSet<VarId>) {
        if let NTerm::Var(v) = t {
            out.insert(v);
        }
    }
    for lit in lits {
        match lit {
            NLit::Atom { args, .. } => args.iter().for_each(|a| term(*a, out)),
            NLit::Compare { left, right, .. } => {
                term(*left, out);
                term(*right, out);
            }
            NLit::Assign { target, expr } => {
                term(*target, out);
                let mut vars = Vec::new();
                expr.collect_vars(&mut vars);
                out.extend(vars);
            }
            NLit::Not(body) => mentioned(body, out),
            NLit::Aggregate {
                result,
                aggregator,
                body,
            } => {
                term(*result, out);
                if let Some(t) = aggregator.operand() {
                    term(t, out);
                }
                mentioned(body, out);
            }
        }
    }
}

/// Moves every pending comparison that is fully bound under `layout` into
/// `checks`.
fn place(pending: &mut Vec<Pending>, layout: &[Option<VarId>], checks: &mut Vec<Check>) {
    pending.retain(|p| match p.to_check(layout) {
        Some(check) => {
            checks.push(check);
            false
        }
        None => true,
    });
}

pub(super) struct Builder<'a> {
    pattern: &'a str,
    names: &'a [String],
    order: JoinOrder,
    sorts: Vec<Option<Sort>>,
    nodes: Vec<PlanNode>,
    alphas: FxHashMap<(Source, Vec<Check>), PlanIndex>,
}

impl<'a> Builder<'a> {
    pub(super) fn new(pattern: &'a str, names: &'a [String], order: JoinOrder) -> Self {
        Self {
            pattern,
            names,
            order,
            sorts: Vec::new(),
            nodes: Vec::new(),
            alphas: FxHashMap::default(),
        }
    }

    pub(super) fn build(mut self, normalized: &Normalized) -> Result<NetworkPlan, CompileError> {
        for clause in &normalized.clauses {
            self.sorts = vec![None; self.names.len()];
            self.infer_sorts(clause)?;
            self.check_sorts(clause)?;
            let stream = self.conjunction(clause, None)?;
            let mut projection = Vec::with_capacity(normalized.parameters.len());
            for &p in &normalized.parameters {
                let col = stream
                    .position(p)
                    .ok_or_else(|| CompileError::UnboundParameter {
                        pattern: self.pattern.to_owned(),
                        parameter: self.name(p),
                    })?;
                projection.push(col);
            }
            self.connect(stream.node, Port::Sink, Some(projection));
        }
        let mut routes: FxHashMap<Source, Vec<PlanIndex>> = FxHashMap::default();
        for (i, node) in self.nodes.iter().enumerate() {
            if let NodeKind::Alpha { source, .. } = node.kind {
                routes.entry(source).or_default().push(i);
            }
        }
        Ok(NetworkPlan {
            nodes: self.nodes,
            routes,
            arity: normalized.parameters.len(),
        })
    }

    fn name(&self, v: VarId) -> String {
        self.names.get(v).cloned().unwrap_or_default()
    }

    fn sort_mismatch(&self, term: NTerm) -> CompileError {
        CompileError::SortMismatch {
            pattern: self.pattern.to_owned(),
            term: match term {
                NTerm::Var(v) => self.name(v),
                NTerm::Const(c) => c.to_string(),
            },
        }
    }

    fn assign(&mut self, term: NTerm, sort: Sort) -> Result<(), CompileError> {
        if let NTerm::Var(v) = term {
            let current = self.sorts[v];
            if current.is_some_and(|s| s != sort) {
                return Err(self.sort_mismatch(term));
            }
            self.sorts[v] = Some(sort);
        } else if sort_of_const(term) != Some(sort) {
            return Err(self.sort_mismatch(term));
        }
        Ok(())
    }

    fn infer_sorts(&mut self, lits: &[NLit]) -> Result<(), CompileError> {
        for lit in lits {
            match lit {
                NLit::Atom { args, .. } => {
                    for a in args {
                        self.assign(*a, Sort::Node)?;
                    }
                }
                NLit::Assign { target, expr } => {
                    self.assign(*target, Sort::Int)?;
                    self.assign_expr(expr)?;
                }
                NLit::Not(body) => self.infer_sorts(body)?,
                NLit::Aggregate { result, body, .. } => {
                    self.infer_sorts(body)?;
                    self.assign(*result, Sort::Int)?;
                }
                NLit::Compare { .. } => {}
            }
        }
        Ok(())
    }

    fn assign_expr(&mut self, expr: &NExpr) -> Result<(), CompileError> {
        match expr {
            NExpr::Term(t) => self.assign(*t, Sort::Int),
            NExpr::Apply(_, l, r) => {
                self.assign_expr(l)?;
                self.assign_expr(r)
            }
        }
    }

    fn sort_of(&self, term: NTerm) -> Option<Sort> {
        match term {
            NTerm::Var(v) => self.sorts[v],
            NTerm::Const(_) => sort_of_const(term),
        }
    }

    fn check_sorts(&self, lits: &[NLit]) -> Result<(), CompileError> {
        for lit in lits {
            match lit {
                NLit::Compare { left, op, right } => {
                    let (ls, rs) = (self.sort_of(*left), self.sort_of(*right));
                    if let (Some(a), Some(b)) = (ls, rs) {
                        if a != b {
                            return Err(self.sort_mismatch(*right));
                        }
                    }
                    if op.is_ordering() {
                        for (t, s) in [(*left, ls), (*right, rs)] {
                            if s == Some(Sort::Node) {
                                return Err(self.sort_mismatch(t));
                            }
                        }
                    }
                }
                NLit::Not(body) => self.check_sorts(body)?,
                NLit::Aggregate {
                    aggregator, body, ..
                } => {
                    if let Some(t) = aggregator.operand() {
                        if self.sort_of(t) == Some(Sort::Node) {
                            return Err(self.sort_mismatch(t));
                        }
                    }
                    self.check_sorts(body)?;
                }
                NLit::Atom { .. } | NLit::Assign { .. } => {}
            }
        }
        Ok(())
    }

    fn unbound(
        &self,
        mut vars: impl Iterator<Item = VarId>,
        layout: &[Option<VarId>],
    ) -> CompileError {
        let var = vars
            .find(|v| !layout.contains(&Some(*v)))
            .map(|v| self.name(v))
            .unwrap_or_default();
        CompileError::UnboundVariable {
            pattern: self.pattern.to_owned(),
            variable: var,
        }
    }

    fn push_node(&mut self, kind: NodeKind) -> PlanIndex {
        self.nodes.push(PlanNode {
            kind,
            edges: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn connect(&mut self, from: PlanIndex, port: Port, projection: Option<Vec<usize>>) {
        self.nodes[from].edges.push(Edge { port, projection });
    }

    /// Compiles a conjunction into a stream binding every variable of its
    /// positive atoms plus its aggregate and assignment results.
    ///
    /// `outer` is the enclosing stream of a negated or aggregated body. It
    /// is joined in when the body mentions outer variables its own atoms
    /// leave unbound.
    fn conjunction(
        &mut self,
        lits: &[NLit],
        outer: Option<&Stream>,
    ) -> Result<Stream, CompileError> {
        let mut atoms: Vec<(Source, &[NTerm])> = Vec::new();
        let mut pending: Vec<Pending> = Vec::new();
        let mut rest: Vec<&NLit> = Vec::new();
        for lit in lits {
            match lit {
                NLit::Atom { source, args } => atoms.push((*source, args.as_slice())),
                NLit::Compare { left, op, right } => pending.push(Pending {
                    left: *left,
                    op: *op,
                    right: *right,
                }),
                NLit::Assign { .. } | NLit::Not(_) | NLit::Aggregate { .. } => rest.push(lit),
            }
        }
        if atoms.is_empty() {
            return Err(CompileError::EmptyClause {
                pattern: self.pattern.to_owned(),
            });
        }

        let mut stream: Option<Stream> = None;
        for i in order_atoms(self.order, &atoms) {
            let (source, args) = atoms[i];
            let alpha = self.alpha(source, args, &mut pending);
            stream = Some(match stream {
                None => alpha,
                Some(left) => self.join(left, alpha, &mut pending),
            });
        }
        let Some(mut stream) = stream else {
            return Err(CompileError::EmptyClause {
                pattern: self.pattern.to_owned(),
            });
        };

        if let Some(outer) = outer {
            let mut used: BTreeSet<VarId> = pending.iter().flat_map(Pending::vars).collect();
            mentioned(rest.iter().copied(), &mut used);
            let bound = stream.vars();
            if used
                .iter()
                .any(|v| !bound.contains(v) && outer.position(*v).is_some())
            {
                stream = self.join(outer.clone(), stream, &mut pending);
            }
        }

        let mut deferred: Vec<(NTerm, &NExpr)> = Vec::new();
        for lit in rest {
            stream = self.settle(stream, &mut deferred, &mut pending);
            stream = match lit {
                NLit::Assign { target, expr } => {
                    deferred.push((*target, expr));
                    stream
                }
                NLit::Not(body) => self.negation(stream, body)?,
                NLit::Aggregate {
                    result,
                    aggregator,
                    body,
                } => self.aggregation(stream, *result, aggregator, body, &mut pending)?,
                NLit::Atom { .. } | NLit::Compare { .. } => stream,
            };
        }
        stream = self.settle(stream, &mut deferred, &mut pending);
        if let Some((_, expr)) = deferred.first() {
            let mut vars = Vec::new();
            expr.collect_vars(&mut vars);
            return Err(self.unbound(vars.into_iter(), &stream.layout));
        }
        if let Some(p) = pending.first() {
            return Err(self.unbound(p.vars(), &stream.layout));
        }
        Ok(stream)
    }

    /// Compiles every deferred assignment whose inputs are bound, repeating
    /// until none is ready.
    fn settle(
        &mut self,
        mut stream: Stream,
        deferred: &mut Vec<(NTerm, &NExpr)>,
        pending: &mut Vec<Pending>,
    ) -> Stream {
        while let Some((i, formula)) = deferred
            .iter()
            .enumerate()
            .find_map(|(i, (_, e))| to_formula(e, &stream.layout).map(|f| (i, f)))
        {
            let (target, _) = deferred.remove(i);
            let (layout, mut checks) = bind_result(&stream.layout, target);
            place(pending, &layout, &mut checks);
            let node = self.push_node(NodeKind::Compute { formula, checks });
            self.connect(stream.node, Port::Left(node), None);
            stream = Stream { node, layout };
        }
        stream
    }

    fn alpha(&mut self, source: Source, args: &[NTerm], pending: &mut Vec<Pending>) -> Stream {
        let layout: Vec<Option<VarId>> = args
            .iter()
            .map(|a| match a {
                NTerm::Var(v) => Some(*v),
                NTerm::Const(_) => None,
            })
            .collect();
        let mut checks = Vec::new();
        for (i, a) in args.iter().enumerate() {
            match a {
                NTerm::Const(c) => checks.push(Check {
                    left: Operand::Column(i),
                    op: CmpOp::Eq,
                    right: Operand::Const(*c),
                }),
                NTerm::Var(v) => {
                    if let Some(first) = layout[..i].iter().position(|c| *c == Some(*v)) {
                        checks.push(Check {
                            left: Operand::Column(first),
                            op: CmpOp::Eq,
                            right: Operand::Column(i),
                        });
                    }
                }
            }
        }
        place(pending, &layout, &mut checks);
        let key = (source, checks);
        let node = if let Some(&existing) = self.alphas.get(&key) {
            existing
        } else {
            let idx = self.push_node(NodeKind::Alpha {
                source,
                checks: key.1.clone(),
            });
            self.alphas.insert(key, idx);
            idx
        };
        Stream { node, layout }
    }

    fn join(&mut self, left: Stream, right: Stream, pending: &mut Vec<Pending>) -> Stream {
        let left_vars = left.vars();
        let right_vars = right.vars();
        let shared: Vec<VarId> = left_vars.intersection(&right_vars).copied().collect();
        let left_key = shared.iter().filter_map(|v| left.position(*v)).collect();
        let right_key = shared.iter().filter_map(|v| right.position(*v)).collect();

        let mut output = Vec::new();
        let mut layout = Vec::new();
        for (i, c) in left.layout.iter().enumerate() {
            if let Some(v) = c {
                if left.position(*v) == Some(i) {
                    output.push(Column::Left(i));
                    layout.push(Some(*v));
                }
            }
        }
        for (j, c) in right.layout.iter().enumerate() {
            if let Some(v) = c {
                if right.position(*v) == Some(j) && !left_vars.contains(v) {
                    output.push(Column::Right(j));
                    layout.push(Some(*v));
                }
            }
        }
        let mut checks = Vec::new();
        place(pending, &layout, &mut checks);
        let node = self.push_node(NodeKind::Join {
            left_key,
            right_key,
            output,
            checks,
        });
        self.connect(left.node, Port::Left(node), None);
        self.connect(right.node, Port::Right(node), None);
        Stream { node, layout }
    }

    /// Key shared between an outer stream and an inner subnetwork, plus the
    /// inner-only variables.
    fn split(outer: &Stream, inner: &Stream) -> (Vec<VarId>, Vec<VarId>) {
        inner
            .vars()
            .into_iter()
            .partition(|v| outer.position(*v).is_some())
    }

    /// Column of the aggregated variable within a member tuple.
    fn member_column(&self, term: NTerm, member: &[VarId]) -> Result<usize, CompileError> {
        let column = match term {
            NTerm::Var(v) => member.iter().position(|m| *m == v),
            NTerm::Const(_) => None,
        };
        column.ok_or_else(|| CompileError::UnboundVariable {
            pattern: self.pattern.to_owned(),
            variable: match term {
                NTerm::Var(v) => self.name(v),
                NTerm::Const(c) => c.to_string(),
            },
        })
    }

    fn negation(&mut self, outer: Stream, body: &[NLit]) -> Result<Stream, CompileError> {
        let inner = self.conjunction(body, Some(&outer))?;
        let (shared, _) = Self::split(&outer, &inner);
        let left_key = shared.iter().filter_map(|v| outer.position(*v)).collect();
        let projection = shared.iter().filter_map(|v| inner.position(*v)).collect();
        let node = self.push_node(NodeKind::Negation {
            left_key,
            right_key: (0..shared.len()).collect(),
        });
        self.connect(outer.node, Port::Left(node), None);
        self.connect(inner.node, Port::Right(node), Some(projection));
        Ok(Stream {
            node,
            layout: outer.layout,
        })
    }

    fn aggregation(
        &mut self,
        outer: Stream,
        result: NTerm,
        aggregator: &NAgg,
        body: &[NLit],
        pending: &mut Vec<Pending>,
    ) -> Result<Stream, CompileError> {
        let inner = self.conjunction(body, Some(&outer))?;
        let (shared, locals) = Self::split(&outer, &inner);
        let member: Vec<VarId> = shared.iter().chain(locals.iter()).copied().collect();
        let aggregate = match aggregator {
            NAgg::Count => Aggregate::Count,
            NAgg::Sum(t) => Aggregate::Sum {
                column: self.member_column(*t, &member)?,
            },
            NAgg::Min(t) => Aggregate::Min {
                column: self.member_column(*t, &member)?,
            },
            NAgg::Max(t) => Aggregate::Max {
                column: self.member_column(*t, &member)?,
            },
        };
        let left_key = shared.iter().filter_map(|v| outer.position(*v)).collect();
        let projection = member.iter().filter_map(|v| inner.position(*v)).collect();

        let (layout, mut checks) = bind_result(&outer.layout, result);
        place(pending, &layout, &mut checks);
        let node = self.push_node(NodeKind::Aggregation {
            left_key,
            right_key: (0..shared.len()).collect(),
            aggregate,
            checks,
        });
        self.connect(outer.node, Port::Left(node), None);
        self.connect(inner.node, Port::Right(node), Some(projection));
        Ok(Stream { node, layout })
    }
}

const fn sort_of_const(term: NTerm) -> Option<Sort> {
    match term {
        NTerm::Const(Value::Node(_)) => Some(Sort::Node),
        NTerm::Const(Value::Int(_)) => Some(Sort::Int),
        NTerm::Var(_) => None,
    }
}

/// Number of filtering positions of an atom: constants and repeated
/// variables.
fn filters(args: &[NTerm]) -> usize {
    let mut seen = BTreeSet::new();
    args.iter()
        .filter(|a| match a {
            NTerm::Const(_) => true,
            NTerm::Var(v) => !seen.insert(*v),
        })
        .count()
}

/// Join order over the positive atoms of a conjunction.
///
/// `Greedy` starts from the most filtered atom, then repeatedly picks the
/// atom sharing the most variables with those already joined (then the
/// most filtered); ties go to the earlier declaration.
fn order_atoms(order: JoinOrder, atoms: &[(Source, &[NTerm])]) -> Vec<usize> {
    match order {
        JoinOrder::Declaration => (0..atoms.len()).collect(),
        JoinOrder::Greedy => {
            let mut remaining: Vec<usize> = (0..atoms.len()).collect();
            let mut bound: BTreeSet<VarId> = BTreeSet::new();
            let mut out = Vec::with_capacity(atoms.len());
            while !remaining.is_empty() {
                let score = |i: usize| {
                    let args = atoms[i].1;
                    let vars: BTreeSet<VarId> = args
                        .iter()
                        .filter_map(|a| match a {
                            NTerm::Var(v) => Some(*v),
                            NTerm::Const(_) => None,
                        })
                        .collect();
                    (vars.intersection(&bound).count(), filters(args))
                };
                let mut best = 0;
                for (slot, &i) in remaining.iter().enumerate().skip(1) {
                    if score(i) > score(remaining[best]) {
                        best = slot;
                    }
                }
                let chosen = remaining.remove(best);
                for a in atoms[chosen].1 {
                    if let NTerm::Var(v) = a {
                        bound.insert(*v);
                    }
                }
                out.push(chosen);
            }
            out
        }
    }
}
