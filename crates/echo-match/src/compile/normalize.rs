// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Name resolution and disjunctive normal form.
//!
//! Calls are inlined with fresh variables for the callee's locals, so every
//! clause that reaches the network builder mentions only atoms,
//! comparisons, assignments, negations and aggregations over resolved
//! sources.
use rustc_hash::FxHashMap;

use super::CompileError;
use crate::ident::Value;
use crate::network::Source;
use crate::network::ArithOp;
use crate::pattern::{Aggregator, Body, CmpOp, Expr, Literal, Pattern, Term};
use crate::schema::Schema;

/// Index of a variable in [`Normalized::names`].
pub(super) type VarId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum NTerm {
    Var(VarId),
    Const(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum NExpr {
    Term(NTerm),
    Apply(ArithOp, Box<NExpr>, Box<NExpr>),
}

impl NExpr {
    pub(super) fn collect_vars(&self, out: &mut Vec<VarId>) {
        match self {
            Self::Term(NTerm::Var(v)) => out.push(*v),
            Self::Term(NTerm::Const(_)) => {}
            Self::Apply(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum NAgg {
    Count,
    Sum(NTerm),
    Min(NTerm),
    Max(NTerm),
}

impl NAgg {
    /// The aggregated inner term, if any.
    pub(super) const fn operand(&self) -> Option<NTerm> {
        match self {
            Self::Count => None,
            Self::Sum(t) | Self::Min(t) | Self::Max(t) => Some(*t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum NLit {
    Atom {
        source: Source,
        args: Vec<NTerm>,
    },
    Compare {
        left: NTerm,
        op: CmpOp,
        right: NTerm,
    },
    Assign {
        target: NTerm,
        expr: NExpr,
    },
    Not(Vec<NLit>),
    Aggregate {
        result: NTerm,
        aggregator: NAgg,
        body: Vec<NLit>,
    },
}

/// A pattern flattened into clauses over numbered variables.
///
/// Parameters occupy variables `0..parameters.len()` in every clause.
#[derive(Debug)]
pub(super) struct Normalized {
    pub(super) names: Vec<String>,
    pub(super) parameters: Vec<VarId>,
    pub(super) clauses: Vec<Vec<NLit>>,
}

type Scope = FxHashMap<String, NTerm>;
type Alternatives = Vec<Vec<NLit>>;

struct Expander<'s> {
    schema: &'s Schema,
    names: Vec<String>,
}

pub(super) fn normalize(schema: &Schema, pattern: &Pattern) -> Result<Normalized, CompileError> {
    check_parameters(pattern)?;
    let mut ex = Expander {
        schema,
        names: Vec::new(),
    };
    let parameters: Vec<VarId> = pattern
        .parameters
        .iter()
        .map(|p| ex.fresh(p))
        .collect();
    let mut clauses = Vec::new();
    for body in &pattern.clauses {
        let mut scope: Scope = pattern
            .parameters
            .iter()
            .cloned()
            .zip(parameters.iter().map(|v| NTerm::Var(*v)))
            .collect();
        clauses.extend(ex.body(body, &mut scope)?);
    }
    Ok(Normalized {
        names: ex.names,
        parameters,
        clauses,
    })
}

fn check_parameters(pattern: &Pattern) -> Result<(), CompileError> {
    for (i, p) in pattern.parameters.iter().enumerate() {
        if p == "_" {
            return Err(CompileError::UnboundParameter {
                pattern: pattern.name.clone(),
                parameter: p.clone(),
            });
        }
        if pattern.parameters[..i].contains(p) {
            return Err(CompileError::DuplicateParameter {
                pattern: pattern.name.clone(),
                parameter: p.clone(),
            });
        }
    }
    Ok(())
}

fn push_all(alts: &mut Alternatives, lit: &NLit) {
    for alt in alts.iter_mut() {
        alt.push(lit.clone());
    }
}

impl Expander<'_> {
    fn fresh(&mut self, name: &str) -> VarId {
        self.names.push(name.to_owned());
        self.names.len() - 1
    }

    fn term(&mut self, scope: &mut Scope, term: &Term) -> NTerm {
        match term {
            Term::Var(name) => {
                if let Some(t) = scope.get(name) {
                    return *t;
                }
                let t = NTerm::Var(self.fresh(name));
                scope.insert(name.clone(), t);
                t
            }
            Term::Any => NTerm::Var(self.fresh("_")),
            Term::Node(n) => NTerm::Const(Value::Node(*n)),
            Term::Int(i) => NTerm::Const(Value::Int(*i)),
        }
    }

    fn terms(&mut self, scope: &mut Scope, terms: &[Term]) -> Vec<NTerm> {
        terms.iter().map(|t| self.term(scope, t)).collect()
    }

    fn expr(&mut self, scope: &mut Scope, expr: &Expr) -> NExpr {
        let (op, l, r) = match expr {
            Expr::Term(t) => return NExpr::Term(self.term(scope, t)),
            Expr::Add(l, r) => (ArithOp::Add, l, r),
            Expr::Sub(l, r) => (ArithOp::Sub, l, r),
            Expr::Mul(l, r) => (ArithOp::Mul, l, r),
            Expr::Div(l, r) => (ArithOp::Div, l, r),
        };
        let l = self.expr(scope, l);
        let r = self.expr(scope, r);
        NExpr::Apply(op, Box::new(l), Box::new(r))
    }

    fn body(&mut self, body: &Body, scope: &mut Scope) -> Result<Alternatives, CompileError> {
        let mut alts: Alternatives = vec![Vec::new()];
        for literal in &body.literals {
            match literal {
                Literal::Atom { relation, args } => {
                    let id = self
                        .schema
                        .relation(relation)
                        .ok_or_else(|| CompileError::UnknownRelation(relation.clone()))?;
                    let expected = self.schema.relation_decl(id).map_or(0, |d| d.arity());
                    if args.len() != expected {
                        return Err(CompileError::ArityMismatch {
                            relation: relation.clone(),
                            expected,
                            found: args.len(),
                        });
                    }
                    let args = self.terms(scope, args);
                    push_all(
                        &mut alts,
                        &NLit::Atom {
                            source: Source::Relation(id),
                            args,
                        },
                    );
                }
                Literal::Type { type_name, arg } => {
                    let ty = self
                        .schema
                        .node_type(type_name)
                        .ok_or_else(|| CompileError::UnknownType(type_name.clone()))?;
                    let arg = self.term(scope, arg);
                    push_all(
                        &mut alts,
                        &NLit::Atom {
                            source: Source::Type(ty),
                            args: vec![arg],
                        },
                    );
                }
                Literal::Compare { left, op, right } => {
                    let left = self.term(scope, left);
                    let right = self.term(scope, right);
                    push_all(
                        &mut alts,
                        &NLit::Compare {
                            left,
                            op: *op,
                            right,
                        },
                    );
                }
                Literal::Assign { var, expr } => {
                    let expr = self.expr(scope, expr);
                    let target = self.term(scope, &Term::from(var.as_str()));
                    push_all(&mut alts, &NLit::Assign { target, expr });
                }
                Literal::Call { pattern, args } => {
                    if args.len() != pattern.parameters.len() {
                        return Err(CompileError::CallArity {
                            pattern: pattern.name.clone(),
                            expected: pattern.parameters.len(),
                            found: args.len(),
                        });
                    }
                    let actuals = self.terms(scope, args);
                    let callee = self.call(pattern, &actuals)?;
                    let mut next = Vec::with_capacity(alts.len() * callee.len());
                    for alt in &alts {
                        for c in &callee {
                            let mut joined = alt.clone();
                            joined.extend(c.iter().cloned());
                            next.push(joined);
                        }
                    }
                    alts = next;
                }
                Literal::Not(inner) => {
                    // ¬(A ∨ B) = ¬A ∧ ¬B
                    for alt in self.body(inner, scope)? {
                        push_all(&mut alts, &NLit::Not(alt));
                    }
                }
                Literal::Aggregate {
                    result,
                    aggregator,
                    body,
                } => {
                    let mut inner = self.body(body, scope)?;
                    let Some(inner_body) = inner.pop().filter(|_| inner.is_empty()) else {
                        return Err(CompileError::DisjunctiveAggregate {
                            result: result.clone(),
                        });
                    };
                    let mut operand = |var: &String| self.term(scope, &Term::from(var.as_str()));
                    let aggregator = match aggregator {
                        Aggregator::Count => NAgg::Count,
                        Aggregator::Sum(var) => NAgg::Sum(operand(var)),
                        Aggregator::Min(var) => NAgg::Min(operand(var)),
                        Aggregator::Max(var) => NAgg::Max(operand(var)),
                    };
                    let result = self.term(scope, &Term::from(result.as_str()));
                    push_all(
                        &mut alts,
                        &NLit::Aggregate {
                            result,
                            aggregator,
                            body: inner_body,
                        },
                    );
                }
            }
        }
        Ok(alts)
    }

    fn call(&mut self, callee: &Pattern, actuals: &[NTerm]) -> Result<Alternatives, CompileError> {
        check_parameters(callee)?;
        let mut out = Vec::new();
        for body in &callee.clauses {
            let mut scope: Scope = callee
                .parameters
                .iter()
                .cloned()
                .zip(actuals.iter().copied())
                .collect();
            out.extend(self.body(body, &mut scope)?);
        }
        Ok(out)
    }
}
