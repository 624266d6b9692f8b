// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Declarative pattern bodies, as produced by a front end.
//!
//! Patterns reference relations and node types by name; resolution and all
//! well-formedness checks happen in [`crate::compile_pattern`]. A pattern is
//! a disjunction of clauses; each clause is a conjunction of literals.
//!
//! ```
//! use echo_match::Pattern;
//!
//! let reply_to_not_friend = Pattern::builder("replyToNotFriend")
//!     .parameters(["x", "y"])
//!     .clause(|c| {
//!         c.atom("replyTo", ["x", "y"])
//!             .atom("author", ["x", "xa"])
//!             .atom("author", ["y", "ya"])
//!             .ne("xa", "ya")
//!             .not(|n| n.atom("friend", ["xa", "ya"]))
//!     })
//!     .build();
//! assert_eq!(reply_to_not_friend.clauses.len(), 1);
//! ```
//!
//! Integer terms can be computed from bound ones with [`Expr`]:
//!
//! ```
//! use echo_match::{Expr, Pattern};
//!
//! let busy = Pattern::builder("busy")
//!     .parameters(["a", "score"])
//!     .clause(|c| {
//!         c.has_type("Person", "a")
//!             .count("posts", |b| b.atom("author", ["_", "a"]))
//!             .count("likes", |b| b.atom("likes", ["a", "_"]))
//!             .assign("score", Expr::from("posts") * 2_i64 + "likes")
//!     })
//!     .build();
//! assert_eq!(busy.clauses[0].literals.len(), 4);
//! ```
use core::ops;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ident::NodeId;

/// Argument of a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Named variable.
    Var(String),
    /// Anonymous variable; every occurrence is distinct.
    Any,
    /// Node constant.
    Node(NodeId),
    /// Integer constant.
    Int(i64),
}

impl From<&str> for Term {
    fn from(name: &str) -> Self {
        if name == "_" {
            Self::Any
        } else {
            Self::Var(name.to_owned())
        }
    }
}

impl From<String> for Term {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<NodeId> for Term {
    fn from(n: NodeId) -> Self {
        Self::Node(n)
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `≠`
    Ne,
    /// `<` (integers only)
    Lt,
    /// `≤` (integers only)
    Le,
    /// `>` (integers only)
    Gt,
    /// `≥` (integers only)
    Ge,
}

impl CmpOp {
    /// Returns `true` for the ordering operators.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        !matches!(self, Self::Eq | Self::Ne)
    }
}

/// Integer expression over terms.
///
/// Evaluation uses checked arithmetic: a binding whose expression
/// overflows or divides by zero has no value and produces no match.
/// Division truncates toward zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// Variable or integer constant.
    Term(Term),
    /// `left + right`
    Add(Box<Expr>, Box<Expr>),
    /// `left - right`
    Sub(Box<Expr>, Box<Expr>),
    /// `left * right`
    Mul(Box<Expr>, Box<Expr>),
    /// `left / right`
    Div(Box<Expr>, Box<Expr>),
}

impl From<Term> for Expr {
    fn from(term: Term) -> Self {
        Self::Term(term)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Self::Term(Term::from(name))
    }
}

impl From<i64> for Expr {
    fn from(i: i64) -> Self {
        Self::Term(Term::Int(i))
    }
}

macro_rules! expr_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<R: Into<Expr>> ops::$trait<R> for Expr {
            type Output = Self;

            fn $method(self, rhs: R) -> Self {
                Self::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

expr_op!(Add, add, Add);
expr_op!(Sub, sub, Sub);
expr_op!(Mul, mul, Mul);
expr_op!(Div, div, Div);

/// Aggregate function over the matches of a subpattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregator {
    /// Number of distinct inner bindings.
    Count,
    /// Sum of an integer inner variable over distinct inner bindings.
    ///
    /// The sum wraps on `i64` overflow. Wrapping keeps every insertion
    /// exactly reversible by the matching retraction, so rollback restores
    /// the same value.
    Sum(String),
    /// Smallest value of an integer inner variable. Groups without inner
    /// matches have no minimum, so their outer bindings do not match.
    Min(String),
    /// Largest value of an integer inner variable. Groups without inner
    /// matches have no maximum, so their outer bindings do not match.
    Max(String),
}

/// One conjunct of a clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    /// The relation holds for the argument tuple.
    Atom {
        /// Relation name.
        relation: String,
        /// One term per relation position.
        args: Vec<Term>,
    },
    /// The argument is a live node carrying the type tag.
    Type {
        /// Node type name.
        type_name: String,
        /// Constrained term.
        arg: Term,
    },
    /// Comparison between two terms.
    Compare {
        /// Left operand.
        left: Term,
        /// Operator.
        op: CmpOp,
        /// Right operand.
        right: Term,
    },
    /// Positive call of another pattern; arguments bind its parameters.
    Call {
        /// Callee.
        pattern: Arc<Pattern>,
        /// One term per callee parameter.
        args: Vec<Term>,
    },
    /// No match of the subpattern agrees with the outer binding.
    Not(Body),
    /// Binds `var` to the value of `expr`; if `var` is already bound the
    /// literal holds when both agree.
    Assign {
        /// Variable receiving the value.
        var: String,
        /// Integer expression over bound terms.
        expr: Expr,
    },
    /// Binds `result` to an aggregate over the subpattern's matches, grouped
    /// by the variables it shares with the enclosing clause.
    Aggregate {
        /// Variable receiving the aggregate value.
        result: String,
        /// Aggregate function.
        aggregator: Aggregator,
        /// Aggregated subpattern.
        body: Body,
    },
}

/// A conjunction of literals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Conjuncts in declaration order.
    pub literals: Vec<Literal>,
}

/// Named declarative query: parameters plus a disjunction of clauses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    /// Pattern name (diagnostics only).
    pub name: String,
    /// Variables bound in every match, in binding order.
    pub parameters: Vec<String>,
    /// Alternative bodies; the match set is their union.
    pub clauses: Vec<Body>,
}

impl Pattern {
    /// Starts a pattern declaration.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PatternBuilder {
        PatternBuilder {
            pattern: Self {
                name: name.into(),
                parameters: Vec::new(),
                clauses: Vec::new(),
            },
        }
    }
}

/// Chained builder for [`Pattern`].
#[derive(Debug)]
pub struct PatternBuilder {
    pattern: Pattern,
}

impl PatternBuilder {
    /// Declares the pattern parameters.
    #[must_use]
    pub fn parameters<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pattern.parameters = params.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a clause built by `f`.
    #[must_use]
    pub fn clause(mut self, f: impl FnOnce(BodyBuilder) -> BodyBuilder) -> Self {
        self.pattern.clauses.push(f(BodyBuilder::default()).body);
        self
    }

    /// Finishes the declaration.
    #[must_use]
    pub fn build(self) -> Pattern {
        self.pattern
    }
}

/// Chained builder for a [`Body`].
#[derive(Debug, Default)]
pub struct BodyBuilder {
    body: Body,
}

fn terms<I, T>(args: I) -> Vec<Term>
where
    I: IntoIterator<Item = T>,
    T: Into<Term>,
{
    args.into_iter().map(Into::into).collect()
}

impl BodyBuilder {
    /// Adds an arbitrary literal.
    #[must_use]
    pub fn literal(mut self, literal: Literal) -> Self {
        self.body.literals.push(literal);
        self
    }

    /// `relation(args...)`
    #[must_use]
    pub fn atom<I, T>(self, relation: &str, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Term>,
    {
        self.literal(Literal::Atom {
            relation: relation.to_owned(),
            args: terms(args),
        })
    }

    /// `type_name(arg)`
    #[must_use]
    pub fn has_type(self, type_name: &str, arg: impl Into<Term>) -> Self {
        self.literal(Literal::Type {
            type_name: type_name.to_owned(),
            arg: arg.into(),
        })
    }

    /// `left op right`
    #[must_use]
    pub fn compare(self, left: impl Into<Term>, op: CmpOp, right: impl Into<Term>) -> Self {
        self.literal(Literal::Compare {
            left: left.into(),
            op,
            right: right.into(),
        })
    }

    /// `left = right`
    #[must_use]
    pub fn eq(self, left: impl Into<Term>, right: impl Into<Term>) -> Self {
        self.compare(left, CmpOp::Eq, right)
    }

    /// `left ≠ right`
    #[must_use]
    pub fn ne(self, left: impl Into<Term>, right: impl Into<Term>) -> Self {
        self.compare(left, CmpOp::Ne, right)
    }

    /// `var = expr`
    #[must_use]
    pub fn assign(self, var: &str, expr: impl Into<Expr>) -> Self {
        self.literal(Literal::Assign {
            var: var.to_owned(),
            expr: expr.into(),
        })
    }

    /// `pattern(args...)`
    #[must_use]
    pub fn call<I, T>(self, pattern: &Arc<Pattern>, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Term>,
    {
        self.literal(Literal::Call {
            pattern: Arc::clone(pattern),
            args: terms(args),
        })
    }

    /// `¬(body)`
    #[must_use]
    pub fn not(self, f: impl FnOnce(Self) -> Self) -> Self {
        let body = f(Self::default()).body;
        self.literal(Literal::Not(body))
    }

    /// `result = count { body }`
    #[must_use]
    pub fn count(self, result: &str, f: impl FnOnce(Self) -> Self) -> Self {
        let body = f(Self::default()).body;
        self.literal(Literal::Aggregate {
            result: result.to_owned(),
            aggregator: Aggregator::Count,
            body,
        })
    }

    /// `result = sum(var) { body }`
    #[must_use]
    pub fn sum(self, result: &str, var: &str, f: impl FnOnce(Self) -> Self) -> Self {
        let body = f(Self::default()).body;
        self.literal(Literal::Aggregate {
            result: result.to_owned(),
            aggregator: Aggregator::Sum(var.to_owned()),
            body,
        })
    }

    /// `result = min(var) { body }`
    #[must_use]
    pub fn min(self, result: &str, var: &str, f: impl FnOnce(Self) -> Self) -> Self {
        let body = f(Self::default()).body;
        self.literal(Literal::Aggregate {
            result: result.to_owned(),
            aggregator: Aggregator::Min(var.to_owned()),
            body,
        })
    }

    /// `result = max(var) { body }`
    #[must_use]
    pub fn max(self, result: &str, var: &str, f: impl FnOnce(Self) -> Self) -> Self {
        let body = f(Self::default()).body;
        self.literal(Literal::Aggregate {
            result: result.to_owned(),
            aggregator: Aggregator::Max(var.to_owned()),
            body,
        })
    }
}
