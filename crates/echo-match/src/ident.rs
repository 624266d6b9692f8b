// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types and the value domain shared by the store and the network.
use serde::{Deserialize, Serialize};

/// Canonical 256-bit digest used for state roots and schema identity.
pub type Hash = [u8; 32];

/// Stable integer handle for a node in a model instance.
///
/// Handles are issued from a monotonically increasing counter and are never
/// reissued, even after the node is deleted and its tombstone purged.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Returns the raw handle value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Compact identifier for a declared node type tag.
///
/// Assigned by [`crate::Schema`] in declaration order; only meaningful
/// relative to the schema that issued it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// Compact identifier for a declared relation type.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct RelationId(pub u32);

/// Identifier of a committed model state.
///
/// Versions are issued monotonically per instance lineage. Rolling back does
/// not rewind the counter, so a version number identifies at most one state.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// The empty state every instance starts from.
    pub const INITIAL: Self = Self(0);

    /// Returns the raw version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A single column value flowing through the matching network.
///
/// Relation tuples only ever carry nodes; integers appear as aggregate
/// results and as comparison constants.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Value {
    /// A node handle.
    Node(NodeId),
    /// An integer (aggregate result or constant).
    Int(i64),
}

impl Value {
    /// Returns the node handle if this value is a node.
    #[must_use]
    pub const fn as_node(self) -> Option<NodeId> {
        match self {
            Self::Node(n) => Some(n),
            Self::Int(_) => None,
        }
    }

    /// Returns the integer if this value is an integer.
    #[must_use]
    pub const fn as_int(self) -> Option<i64> {
        match self {
            Self::Node(_) => None,
            Self::Int(i) => Some(i),
        }
    }
}

impl From<NodeId> for Value {
    fn from(n: NodeId) -> Self {
        Self::Node(n)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Node(n) => write!(f, "{n}"),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

/// Ordered tuple of column values (a token payload or a match binding).
pub type Tuple = Vec<Value>;

/// Returns the first eight bytes of a digest as lowercase hex, for logs.
pub(crate) fn short_hash(h: &Hash) -> String {
    hex::encode(&h[..8])
}
