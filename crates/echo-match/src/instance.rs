// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Model instances: store, attached patterns, history, subscriptions.
//!
//! An instance is the unit of isolation. It owns its store, the memories
//! and match sets of every attached pattern, and its commit history; it
//! shares nothing with other instances except immutable compiled plans.
//! All mutation goes through `&mut self`, so one instance processes one
//! transaction at a time and instances may live on different threads.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::compile::{compile_pattern_with, CompileError, CompiledPattern};
use crate::config::EngineConfig;
use crate::delta::{validate, ConsistencyError, Edit};
use crate::history::{History, VersionConflict};
use crate::ident::{short_hash, Hash, NodeId, RelationId, TypeId, Value, Version};
use crate::match_set::{MatchEvent, MatchSet, Subscriber};
use crate::network::{NetworkMemory, NetworkPlan, Propagator};
use crate::pattern::Pattern;
use crate::schema::Schema;
use crate::store::{compute_state_root, Change, ModelStore};
use crate::tx::{Transaction, TxId};

static NEXT_LINEAGE: AtomicU64 = AtomicU64::new(1);

/// Handle of a pattern attached to an instance.
///
/// Handles stay valid on forks of the instance they were issued by. Slots
/// are drawn from a counter shared by the whole lineage, so handles issued
/// after a fork never collide across siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternHandle {
    lineage: u64,
    slot: u64,
}

impl core::fmt::Display for PatternHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "p{}.{}", self.lineage, self.slot)
    }
}

/// Handle of a subscription, for [`ModelInstance::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A compiled pattern cannot be attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    /// The pattern was compiled against a different schema.
    #[error("pattern {pattern} was compiled against schema {found}, instance uses {expected}")]
    SchemaMismatch {
        /// Pattern name.
        pattern: String,
        /// Short digest of the instance schema.
        expected: String,
        /// Short digest of the pattern's schema.
        found: String,
    },
}

/// A pattern handle does not name a pattern attached to this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// Issued by an unrelated instance, or detached.
    #[error("unknown pattern handle {0}")]
    UnknownPattern(PatternHandle),
}

struct Attached {
    name: String,
    plan: Arc<NetworkPlan>,
    memory: NetworkMemory,
    matches: MatchSet,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

impl Attached {
    fn fork(&self) -> Self {
        Self {
            name: self.name.clone(),
            plan: Arc::clone(&self.plan),
            memory: self.memory.clone(),
            matches: self.matches.clone(),
            subscribers: Vec::new(),
        }
    }
}

/// One typed model with its live pattern matches.
pub struct ModelInstance {
    lineage: u64,
    config: EngineConfig,
    store: ModelStore,
    history: History,
    patterns: BTreeMap<PatternHandle, Attached>,
    next_slot: Arc<AtomicU64>,
    next_subscription: u64,
    next_tx: u64,
}

impl core::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModelInstance")
            .field("lineage", &self.lineage)
            .field("version", &self.history.current())
            .field("oldest", &self.history.oldest())
            .field("patterns", &self.patterns.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModelInstance {
    /// Creates an empty instance at [`Version::INITIAL`] with default config.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_config(schema, EngineConfig::default())
    }

    /// Creates an empty instance with an explicit config.
    #[must_use]
    pub fn with_config(schema: Arc<Schema>, config: EngineConfig) -> Self {
        Self {
            lineage: NEXT_LINEAGE.fetch_add(1, Ordering::Relaxed),
            config,
            store: ModelStore::new(schema),
            history: History::default(),
            patterns: BTreeMap::new(),
            next_slot: Arc::new(AtomicU64::new(0)),
            next_subscription: 0,
            next_tx: 1,
        }
    }

    /// The instance config.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The schema enforced by this instance.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        self.store.schema()
    }

    /// Read access to the committed model.
    #[must_use]
    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Compiles `pattern` against this instance's schema using its join
    /// order setting.
    ///
    /// # Errors
    /// See [`crate::compile_pattern`].
    pub fn compile(&self, pattern: &Pattern) -> Result<CompiledPattern, CompileError> {
        compile_pattern_with(self.schema(), pattern, self.config.join_order)
    }

    /// Opens a transaction.
    pub fn begin(&mut self) -> Transaction<'_> {
        let id = TxId::from_raw(self.next_tx);
        self.next_tx += 1;
        Transaction::new(self, id)
    }

    pub(crate) fn allocate_node(&mut self) -> NodeId {
        self.store.allocate_node()
    }

    #[instrument(skip_all, fields(tx = %tx, edits = edits.len()))]
    pub(crate) fn commit_edits(
        &mut self,
        tx: TxId,
        edits: &[Edit],
    ) -> Result<Version, ConsistencyError> {
        let batch = validate(&self.store, edits)
            .inspect_err(|err| debug!(error = %err, "commit rejected"))?;
        for change in batch.changes() {
            self.store.apply(change);
        }
        let activations = self.propagate(batch.changes());
        let tokens = batch.changes().len();
        let version = self.history.record(batch);

        let settled = self.history.prune(self.config.retention);
        if !settled.is_empty() {
            let purged = self.store.purge_tombstones(&settled);
            debug!(
                oldest = %self.history.oldest(),
                retained = self.history.len(),
                purged,
                "pruned history"
            );
        }

        let events = self.publish(version);
        debug!(%version, tokens, activations, events, "committed");
        Ok(version)
    }

    /// Pushes `changes` through every attached network in attach order.
    fn propagate(&mut self, changes: &[Change]) -> usize {
        let mut activations = 0;
        for attached in self.patterns.values_mut() {
            let mut p = Propagator::new(&attached.plan, &mut attached.memory, &mut attached.matches);
            for change in changes {
                p.push(change);
            }
            activations += p.activations();
        }
        activations
    }

    /// Nets the pending events of every pattern and notifies subscribers.
    fn publish(&mut self, version: Version) -> usize {
        let mut total = 0;
        for attached in self.patterns.values_mut() {
            let events: Vec<MatchEvent> = attached.matches.take_events();
            if events.is_empty() {
                continue;
            }
            total += events.len();
            for (_, callback) in &mut attached.subscribers {
                callback(version, &events);
            }
        }
        total
    }

    /// Restores the model and every attached match set to `target`.
    ///
    /// The inverse of every batch committed since `target` is replayed
    /// newest first, so stores and network memories return to exactly
    /// their state at `target`. Subscribers receive the netted events under
    /// `target`. Rolling back to the current version is a no-op.
    ///
    /// # Errors
    /// Returns [`VersionConflict`] if `target` has been pruned or is not an
    /// ancestor of the current version; the instance is unchanged then.
    #[instrument(skip(self), fields(from = %self.history.current()))]
    pub fn rollback(&mut self, target: Version) -> Result<(), VersionConflict> {
        let depth = self
            .history
            .depth_of(target)
            .inspect_err(|err| debug!(error = %err, "rollback rejected"))?;
        let mut tokens = 0;
        for _ in 0..depth {
            let Some(batch) = self.history.pop() else {
                break;
            };
            let inverse: Vec<Change> = batch.inverse().collect();
            for change in &inverse {
                self.store.apply(change);
            }
            self.propagate(&inverse);
            tokens += inverse.len();
        }
        let events = self.publish(target);
        debug!(%target, undone = depth, tokens, events, "rolled back");
        Ok(())
    }

    /// Attaches a compiled pattern and seeds it from the current model.
    ///
    /// Seeding produces no events; the initial matches are visible through
    /// [`ModelInstance::current_matches`].
    ///
    /// # Errors
    /// Returns [`AttachError::SchemaMismatch`] if the pattern was compiled
    /// against another schema.
    #[instrument(skip_all, fields(pattern = compiled.name()))]
    pub fn attach(&mut self, compiled: &CompiledPattern) -> Result<PatternHandle, AttachError> {
        let expected = self.schema().digest();
        if compiled.schema_digest() != expected {
            return Err(AttachError::SchemaMismatch {
                pattern: compiled.name().to_owned(),
                expected: short_hash(&expected),
                found: short_hash(&compiled.schema_digest()),
            });
        }
        let plan = compiled.shared_plan();
        let mut memory = NetworkMemory::new(&plan);
        let mut matches = MatchSet::default();
        {
            let mut p = Propagator::new(&plan, &mut memory, &mut matches);
            for fact in self.store.facts() {
                p.push(&fact);
            }
        }
        let _ = matches.take_events();

        let handle = PatternHandle {
            lineage: self.lineage,
            slot: self.next_slot.fetch_add(1, Ordering::Relaxed),
        };
        debug!(
            %handle,
            matches = matches.len(),
            entries = memory.entries(),
            "attached"
        );
        self.patterns.insert(
            handle,
            Attached {
                name: compiled.name().to_owned(),
                plan,
                memory,
                matches,
                subscribers: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn attached(&self, handle: PatternHandle) -> Result<&Attached, HandleError> {
        self.patterns
            .get(&handle)
            .ok_or(HandleError::UnknownPattern(handle))
    }

    /// Removes a pattern together with its memories and subscriptions.
    ///
    /// # Errors
    /// [`HandleError::UnknownPattern`] if the handle is not attached.
    pub fn detach(&mut self, handle: PatternHandle) -> Result<(), HandleError> {
        let attached = self
            .patterns
            .remove(&handle)
            .ok_or(HandleError::UnknownPattern(handle))?;
        debug!(%handle, pattern = %attached.name, "detached");
        Ok(())
    }

    /// Current bindings of a pattern as of the latest committed version.
    ///
    /// # Errors
    /// [`HandleError::UnknownPattern`] if the handle is not attached.
    pub fn current_matches(&self, handle: PatternHandle) -> Result<&MatchSet, HandleError> {
        self.attached(handle).map(|a| &a.matches)
    }

    /// Number of present bindings of a pattern.
    ///
    /// # Errors
    /// [`HandleError::UnknownPattern`] if the handle is not attached.
    pub fn match_count(&self, handle: PatternHandle) -> Result<usize, HandleError> {
        self.current_matches(handle).map(MatchSet::len)
    }

    /// Returns `true` if `binding` is a current match of the pattern.
    ///
    /// # Errors
    /// [`HandleError::UnknownPattern`] if the handle is not attached.
    pub fn contains_match(
        &self,
        handle: PatternHandle,
        binding: &[Value],
    ) -> Result<bool, HandleError> {
        self.current_matches(handle).map(|m| m.contains(binding))
    }

    /// Number of entries held in the pattern's network memories.
    ///
    /// # Errors
    /// [`HandleError::UnknownPattern`] if the handle is not attached.
    pub fn memory_entries(&self, handle: PatternHandle) -> Result<usize, HandleError> {
        self.attached(handle).map(|a| a.memory.entries())
    }

    /// Registers a callback receiving the netted events of every later
    /// commit or rollback that changes the pattern's match set.
    ///
    /// Callbacks run synchronously before `commit`/`rollback` returns, in
    /// attach order of their patterns and registration order within one
    /// pattern. They receive event data only; the instance stays mutably
    /// borrowed while they run.
    ///
    /// # Errors
    /// [`HandleError::UnknownPattern`] if the handle is not attached.
    pub fn subscribe<F>(
        &mut self,
        handle: PatternHandle,
        callback: F,
    ) -> Result<SubscriptionId, HandleError>
    where
        F: FnMut(Version, &[MatchEvent]) + Send + 'static,
    {
        let attached = self
            .patterns
            .get_mut(&handle)
            .ok_or(HandleError::UnknownPattern(handle))?;
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        attached.subscribers.push((id, Box::new(callback)));
        Ok(id)
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for attached in self.patterns.values_mut() {
            if let Some(pos) = attached.subscribers.iter().position(|(s, _)| *s == id) {
                drop(attached.subscribers.remove(pos));
                return true;
            }
        }
        false
    }

    /// Creates an independent copy sharing only compiled plans.
    ///
    /// The fork starts at the same version with the same history, memories
    /// and match sets, and accepts the same pattern handles. It has no
    /// subscriptions. Pattern slots and versions keep coming from counters
    /// shared with the parent, so later handles and versions are unique
    /// across the lineage.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            lineage: self.lineage,
            config: self.config,
            store: self.store.clone(),
            history: self.history.clone(),
            patterns: self
                .patterns
                .iter()
                .map(|(h, a)| (*h, a.fork()))
                .collect(),
            next_slot: Arc::clone(&self.next_slot),
            next_subscription: self.next_subscription,
            next_tx: self.next_tx,
        }
    }

    /// Latest committed version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.history.current()
    }

    /// Oldest version still reachable by [`ModelInstance::rollback`].
    #[must_use]
    pub fn oldest_retained(&self) -> Version {
        self.history.oldest()
    }

    /// Canonical digest of the committed model contents.
    #[must_use]
    pub fn state_root(&self) -> Hash {
        compute_state_root(&self.store)
    }

    /// Type tags of a live node.
    #[must_use]
    pub fn node_types(&self, node: NodeId) -> Option<&[TypeId]> {
        self.store
            .node(node)
            .filter(|r| r.alive)
            .map(|r| r.types.as_slice())
    }

    /// Returns `true` if `node` is live in the committed model.
    #[must_use]
    pub fn is_live(&self, node: NodeId) -> bool {
        self.store.is_live(node)
    }

    /// Committed count of a relation tuple.
    #[must_use]
    pub fn tuple_count(&self, relation: RelationId, nodes: &[NodeId]) -> u64 {
        self.store.tuple_count(relation, nodes)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::compile::compile_pattern;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .node_type("Person")
                .relation("friend", &["Person", "Person"])
                .build()
                .unwrap(),
        )
    }

    fn mutual() -> Pattern {
        Pattern::builder("mutual")
            .parameters(["a", "b"])
            .clause(|c| c.atom("friend", ["a", "b"]).atom("friend", ["b", "a"]))
            .build()
    }

    #[test]
    fn rollback_restores_network_memories_exactly() {
        let schema = schema();
        let friend = schema.relation("friend").unwrap();
        let person = schema.node_type("Person").unwrap();
        let mut inst = ModelInstance::new(Arc::clone(&schema));
        let h = inst.attach(&compile_pattern(&schema, &mutual()).unwrap()).unwrap();

        let mut tx = inst.begin();
        let a = tx.create_node(&[person]);
        let b = tx.create_node(&[person]);
        tx.insert(friend, &[a, b]);
        let v1 = tx.commit().unwrap();
        let before = inst.patterns[&h].memory.clone();

        let mut tx = inst.begin();
        tx.insert(friend, &[b, a]);
        tx.insert(friend, &[a, b]);
        tx.commit().unwrap();
        assert_eq!(inst.match_count(h).unwrap(), 2);

        inst.rollback(v1).unwrap();
        assert_eq!(inst.patterns[&h].memory, before);
        assert_eq!(inst.match_count(h).unwrap(), 0);
    }

    #[test]
    fn handles_from_other_lineages_are_rejected() {
        let schema = schema();
        let compiled = compile_pattern(&schema, &mutual()).unwrap();
        let mut one = ModelInstance::new(Arc::clone(&schema));
        let two = ModelInstance::new(Arc::clone(&schema));
        let h = one.attach(&compiled).unwrap();
        assert_eq!(
            two.current_matches(h).unwrap_err(),
            HandleError::UnknownPattern(h)
        );
        assert!(one.fork().current_matches(h).is_ok());
    }

    #[test]
    fn attach_refuses_foreign_schema() {
        let other = Schema::builder()
            .node_type("Person")
            .node_type("Post")
            .relation("friend", &["Person", "Person"])
            .build()
            .unwrap();
        let compiled = compile_pattern(&other, &mutual()).unwrap();
        let mut inst = ModelInstance::new(schema());
        assert!(matches!(
            inst.attach(&compiled),
            Err(AttachError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn failed_commit_leaves_version_and_root() {
        let schema = schema();
        let friend = schema.relation("friend").unwrap();
        let mut inst = ModelInstance::new(Arc::clone(&schema));
        let root = inst.state_root();
        let mut tx = inst.begin();
        let ghost = tx.create_node(&[]);
        tx.insert(friend, &[ghost, ghost]);
        assert!(matches!(
            tx.commit(),
            Err(ConsistencyError::TypeMismatch { .. })
        ));
        assert_eq!(inst.version(), Version::INITIAL);
        assert_eq!(inst.state_root(), root);
        assert!(!inst.is_live(ghost));
    }

    /// Commits `a`,`b` as one-way friends with `mutual` attached, then runs
    /// `bad` in a transaction that also carries a valid edit.
    fn rejected_commit(
        bad: impl FnOnce(&mut Transaction<'_>, NodeId, NodeId),
    ) -> ConsistencyError {
        let schema = schema();
        let friend = schema.relation("friend").unwrap();
        let person = schema.node_type("Person").unwrap();
        let mut inst = ModelInstance::new(Arc::clone(&schema));
        let h = inst.attach(&compile_pattern(&schema, &mutual()).unwrap()).unwrap();
        let mut tx = inst.begin();
        let a = tx.create_node(&[person]);
        let b = tx.create_node(&[person]);
        tx.insert(friend, &[a, b]);
        let v1 = tx.commit().unwrap();
        let root = inst.state_root();

        let mut tx = inst.begin();
        tx.insert(friend, &[b, a]);
        let extra = tx.create_node(&[person]);
        bad(&mut tx, a, b);
        let err = tx.commit().unwrap_err();

        assert_eq!(inst.version(), v1);
        assert_eq!(inst.state_root(), root);
        assert_eq!(inst.tuple_count(friend, &[b, a]), 0);
        assert_eq!(inst.match_count(h).unwrap(), 0);
        assert!(!inst.is_live(extra));
        err
    }

    #[test]
    fn arity_violation_rejects_the_whole_batch() {
        let err = rejected_commit(|tx, a, b| tx.insert(RelationId(0), &[a, b, a]));
        assert_eq!(
            err,
            ConsistencyError::ArityMismatch {
                relation: "friend".into(),
                expected: 2,
                found: 3,
            }
        );
    }

    #[test]
    fn undeclared_relation_rejects_the_whole_batch() {
        let err = rejected_commit(|tx, a, b| tx.insert(RelationId(99), &[a, b]));
        assert_eq!(err, ConsistencyError::UnknownRelation(RelationId(99)));
    }

    #[test]
    fn unissued_node_rejects_the_whole_batch() {
        let err = rejected_commit(|tx, a, _| tx.insert(RelationId(0), &[a, NodeId(999)]));
        assert_eq!(err, ConsistencyError::UnknownNode(NodeId(999)));
    }
}
