// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Transactions: staged edit batches against one model instance.

use tracing::debug;

use crate::delta::{ConsistencyError, Edit};
use crate::ident::{NodeId, RelationId, TypeId, Version};
use crate::instance::ModelInstance;

/// Thin wrapper around a transaction identifier.
///
/// Issued by [`ModelInstance::begin`] in increasing order per instance;
/// used to correlate log events of one transaction.
///
/// # Invariants
/// - Zero (`TxId(0)`) is never issued.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct TxId(u64);

impl TxId {
    /// Constructs a `TxId` from a raw `u64` value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for TxId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open transaction.
///
/// Edits are only staged; queries keep observing the last committed version
/// until [`Transaction::commit`] succeeds. The transaction holds the
/// instance's unique borrow, so at most one is open per instance and no
/// other instance API can run while it is open. Dropping it without
/// committing discards every staged edit.
#[derive(Debug)]
#[must_use = "a transaction does nothing until committed"]
pub struct Transaction<'a> {
    instance: &'a mut ModelInstance,
    id: TxId,
    edits: Vec<Edit>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(instance: &'a mut ModelInstance, id: TxId) -> Self {
        Self {
            instance,
            id,
            edits: Vec::new(),
        }
    }

    /// This transaction's identifier.
    #[must_use]
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Number of staged edits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Returns `true` when nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Stages creation of a node carrying `types` and returns its handle.
    ///
    /// The handle is reserved immediately and is usable in later edits of
    /// the same transaction. If the transaction does not commit, the handle
    /// is burned, never reissued.
    pub fn create_node(&mut self, types: &[TypeId]) -> NodeId {
        let node = self.instance.allocate_node();
        self.edits.push(Edit::CreateNode {
            node,
            types: types.to_vec(),
        });
        node
    }

    /// Stages deletion of `node`. At commit the node must be live and no
    /// tuple may still mention it.
    pub fn delete_node(&mut self, node: NodeId) {
        self.edits.push(Edit::DeleteNode { node });
    }

    /// Stages one insertion of the tuple `relation(nodes..)`.
    pub fn insert(&mut self, relation: RelationId, nodes: &[NodeId]) {
        self.edits.push(Edit::Insert {
            relation,
            nodes: nodes.to_vec(),
        });
    }

    /// Stages one retraction of the tuple `relation(nodes..)`.
    pub fn delete(&mut self, relation: RelationId, nodes: &[NodeId]) {
        self.edits.push(Edit::Delete {
            relation,
            nodes: nodes.to_vec(),
        });
    }

    /// Validates and applies the staged batch atomically.
    ///
    /// On success every attached match set reflects the new version and
    /// subscribers have been notified before this returns.
    ///
    /// # Errors
    /// Returns [`ConsistencyError`] if any staged edit violates the schema or
    /// the multiset discipline; nothing is applied in that case.
    pub fn commit(self) -> Result<Version, ConsistencyError> {
        self.instance.commit_edits(self.id, &self.edits)
    }

    /// Discards the staged edits.
    pub fn abort(self) {
        debug!(tx = %self.id, edits = self.edits.len(), "transaction aborted");
    }
}
