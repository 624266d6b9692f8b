// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! echo-match: incremental graph pattern matching over typed, versioned models.
//!
//! A [`ModelInstance`] holds a typed graph (nodes with type tags, counted
//! n-ary relation tuples) and keeps the match sets of attached patterns
//! current as transactions commit. Patterns are compiled once into an
//! immutable network plan ([`compile_pattern`]) that any number of
//! instances, on any number of threads, can attach.
//!
//! ```
//! use std::sync::Arc;
//! use echo_match::{compile_pattern, ModelInstance, Pattern, Schema, Value};
//!
//! let schema = Arc::new(
//!     Schema::builder()
//!         .node_type("Person")
//!         .relation("friend", &["Person", "Person"])
//!         .build()
//!         .unwrap(),
//! );
//! let person = schema.node_type("Person").unwrap();
//! let friend = schema.relation("friend").unwrap();
//! let mutual = Pattern::builder("mutual")
//!     .parameters(["a", "b"])
//!     .clause(|c| c.atom("friend", ["a", "b"]).atom("friend", ["b", "a"]))
//!     .build();
//!
//! let mut model = ModelInstance::new(Arc::clone(&schema));
//! let h = model.attach(&compile_pattern(&schema, &mutual).unwrap()).unwrap();
//!
//! let mut tx = model.begin();
//! let a = tx.create_node(&[person]);
//! let b = tx.create_node(&[person]);
//! tx.insert(friend, &[a, b]);
//! tx.insert(friend, &[b, a]);
//! tx.commit().unwrap();
//!
//! assert!(model
//!     .contains_match(h, &[Value::Node(a), Value::Node(b)])
//!     .unwrap());
//! ```
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod compile;
mod config;
mod delta;
mod history;
mod ident;
mod instance;
mod match_set;
/// Matching-network plans (inspection only; plans are built by the compiler).
pub mod network;
mod pattern;
mod retention;
mod schema;
mod store;
mod tx;

// Re-exports for stable public API
/// Pattern compiler.
pub use compile::{compile_pattern, compile_pattern_with, CompileError, CompiledPattern, JoinOrder};
/// Engine config and its storage port.
pub use config::{
    ConfigError, ConfigService, ConfigStore, DirConfigStore, EngineConfig, MemoryConfigStore,
};
/// Validated edit batches and their errors.
pub use delta::{Batch, ConsistencyError};
/// Rollback errors.
pub use history::VersionConflict;
/// Identifiers and the value domain.
pub use ident::{Hash, NodeId, RelationId, Tuple, TypeId, Value, Version};
/// Model instances and pattern handles.
pub use instance::{AttachError, HandleError, ModelInstance, PatternHandle, SubscriptionId};
/// Match sets and subscription events.
pub use match_set::{MatchEvent, MatchSet, Subscriber};
/// Declarative pattern model.
pub use pattern::{
    Aggregator, Body, BodyBuilder, CmpOp, Expr, Literal, Pattern, PatternBuilder, Term,
};
/// History retention.
pub use retention::RetentionPolicy;
/// Schema declarations.
pub use schema::{RelationDecl, Schema, SchemaBuilder, SchemaError};
/// Committed model contents.
pub use store::{Change, ModelStore, NodeOp, NodeRecord};
/// Transactions.
pub use tx::{Transaction, TxId};
