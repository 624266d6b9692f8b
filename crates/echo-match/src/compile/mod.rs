// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pattern compiler: declarative patterns to immutable network plans.
//!
//! Compilation runs in two passes. [`normalize`] resolves names against the
//! schema and expands calls and disjunctions into flat clauses; [`build`]
//! sort-checks each clause and wires it into one shared [`NetworkPlan`].
//! Every error is reported here; an attached pattern never fails at match
//! time.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::ident::{short_hash, Hash};
use crate::network::NetworkPlan;
use crate::pattern::Pattern;
use crate::schema::Schema;

mod build;
mod normalize;

/// A pattern was rejected at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// An atom names a relation the schema does not declare.
    #[error("unknown relation: {0}")]
    UnknownRelation(String),
    /// A type literal names a node type the schema does not declare.
    #[error("unknown node type: {0}")]
    UnknownType(String),
    /// An atom has the wrong number of arguments.
    #[error("arity mismatch for {relation}: expected {expected}, found {found}")]
    ArityMismatch {
        /// Relation name.
        relation: String,
        /// Declared arity.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },
    /// A call has the wrong number of arguments.
    #[error("call of {pattern}: expected {expected} argument(s), found {found}")]
    CallArity {
        /// Callee name.
        pattern: String,
        /// Callee parameter count.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },
    /// A parameter is not bound by the positive part of some clause.
    #[error("{pattern}: parameter {parameter} is not bound by every clause")]
    UnboundParameter {
        /// Pattern name.
        pattern: String,
        /// Parameter name.
        parameter: String,
    },
    /// A comparison, assignment input or aggregate argument uses a variable
    /// that is never bound positively.
    #[error("{pattern}: variable {variable} is not bound")]
    UnboundVariable {
        /// Pattern name.
        pattern: String,
        /// Variable name.
        variable: String,
    },
    /// A parameter name is declared twice.
    #[error("{pattern}: duplicate parameter {parameter}")]
    DuplicateParameter {
        /// Pattern name.
        pattern: String,
        /// Parameter name.
        parameter: String,
    },
    /// A term is used both as a node and as an integer, or an ordering
    /// comparison is applied to nodes.
    #[error("{pattern}: sort mismatch at {term}")]
    SortMismatch {
        /// Pattern name.
        pattern: String,
        /// Offending variable name or constant.
        term: String,
    },
    /// A conjunction has no positive atom to enumerate bindings from.
    #[error("{pattern}: clause has no positive atom")]
    EmptyClause {
        /// Pattern name.
        pattern: String,
    },
    /// An aggregate ranges over a body that expands to several clauses.
    #[error("aggregate {result} ranges over a disjunction")]
    DisjunctiveAggregate {
        /// Aggregate result variable.
        result: String,
    },
}

/// Strategy for ordering the joins of a clause.
///
/// Only the shape of the network (and therefore memory size and speed)
/// depends on this choice; match sets never do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOrder {
    /// Most filtered atom first, then greatest variable overlap.
    #[default]
    Greedy,
    /// Atoms in declaration order.
    Declaration,
}

/// A pattern compiled against one schema.
///
/// Cloning is cheap: the plan is shared behind an `Arc` and never mutated,
/// so it may be attached to any number of instances on any thread.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    name: String,
    parameters: Vec<String>,
    plan: Arc<NetworkPlan>,
    schema_digest: Hash,
}

impl CompiledPattern {
    /// Pattern name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter names in binding order.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// The compiled network.
    #[must_use]
    pub fn plan(&self) -> &NetworkPlan {
        &self.plan
    }

    /// Digest of the schema the pattern was compiled against.
    #[must_use]
    pub fn schema_digest(&self) -> Hash {
        self.schema_digest
    }

    pub(crate) fn shared_plan(&self) -> Arc<NetworkPlan> {
        Arc::clone(&self.plan)
    }
}

/// Compiles `pattern` with the default join ordering.
///
/// # Errors
/// Returns [`CompileError`] for unknown names, arity or sort errors, and
/// unsafe variables.
pub fn compile_pattern(schema: &Schema, pattern: &Pattern) -> Result<CompiledPattern, CompileError> {
    compile_pattern_with(schema, pattern, JoinOrder::default())
}

/// Compiles `pattern` with an explicit join ordering.
///
/// # Errors
/// See [`compile_pattern`].
#[instrument(skip_all, fields(pattern = %pattern.name, ?order))]
pub fn compile_pattern_with(
    schema: &Schema,
    pattern: &Pattern,
    order: JoinOrder,
) -> Result<CompiledPattern, CompileError> {
    let normalized = normalize::normalize(schema, pattern)?;
    let plan = build::Builder::new(&pattern.name, &normalized.names, order).build(&normalized)?;
    debug!(
        clauses = normalized.clauses.len(),
        nodes = plan.node_count(),
        alphas = plan.alpha_count(),
        schema = %short_hash(&schema.digest()),
        "compiled pattern"
    );
    Ok(CompiledPattern {
        name: pattern.name.clone(),
        parameters: pattern.parameters.clone(),
        plan: Arc::new(plan),
        schema_digest: schema.digest(),
    })
}
