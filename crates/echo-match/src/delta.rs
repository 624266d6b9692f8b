// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Edit batches: staging, atomic validation, and canonical token order.
//!
//! A transaction stages [`Edit`]s; at commit the whole batch is validated
//! against the base store and consolidated into a [`Batch`] of net
//! [`Change`]s. Nothing is applied unless every check passes.
//!
//! Canonical order of a batch (fixed, independent of staging order):
//! 1. tuple retractions (ascending relation, then tuple);
//! 2. node deletions (ascending id);
//! 3. node creations (ascending id);
//! 4. tuple insertions (ascending relation, then tuple).
//!
//! Every prefix of this order is itself a consistent store state, so no
//! memory in the network ever observes a negative count.
use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::ident::{NodeId, RelationId, TypeId};
use crate::store::{Change, ModelStore, NodeOp};

/// A model edit violated the schema or the multiset discipline.
///
/// Whenever this is returned from a commit, the store is left at its
/// pre-transaction version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    /// The relation id is not declared in the schema.
    #[error("unknown relation: {0:?}")]
    UnknownRelation(RelationId),
    /// A node was created with a type tag the schema does not declare.
    #[error("unknown node type: {0:?}")]
    UnknownType(TypeId),
    /// Tuple length differs from the relation's declared arity.
    #[error("arity mismatch for {relation}: expected {expected}, found {found}")]
    ArityMismatch {
        /// Relation name.
        relation: String,
        /// Declared arity.
        expected: usize,
        /// Supplied tuple length.
        found: usize,
    },
    /// A tuple position holds a node lacking the declared type tag.
    #[error("type mismatch for {relation} at position {position}: {node} lacks {expected}")]
    TypeMismatch {
        /// Relation name.
        relation: String,
        /// Offending position.
        position: usize,
        /// Offending node.
        node: NodeId,
        /// Required type name.
        expected: String,
    },
    /// The node handle was never issued by this instance.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    /// The node has been deleted (or is deleted twice in one batch).
    #[error("node already deleted: {0}")]
    NodeDeleted(NodeId),
    /// The node would be deleted while live tuples still mention it.
    #[error("node {node} still referenced by {tuples} tuple(s)")]
    NodeInUse {
        /// Node being deleted.
        node: NodeId,
        /// Live tuples that would dangle.
        tuples: u64,
    },
    /// More retractions than prior insertions of a tuple.
    #[error("negative multiplicity for {relation}{nodes:?}: count would be {count}")]
    NegativeMultiplicity {
        /// Relation name.
        relation: String,
        /// Offending tuple.
        nodes: Vec<NodeId>,
        /// Resulting (negative) count.
        count: i128,
    },
}

/// One staged model edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Edit {
    CreateNode { node: NodeId, types: Vec<TypeId> },
    DeleteNode { node: NodeId },
    Insert { relation: RelationId, nodes: Vec<NodeId> },
    Delete { relation: RelationId, nodes: Vec<NodeId> },
}

/// A validated, consolidated edit batch in canonical token order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    changes: Vec<Change>,
}

impl Batch {
    /// The net changes in canonical order.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Returns `true` if the batch has no net effect.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Inverse tokens in reverse order; replaying them undoes the batch.
    pub fn inverse(&self) -> impl Iterator<Item = Change> + '_ {
        self.changes.iter().rev().map(Change::inverse)
    }

    /// Nodes tombstoned by this batch.
    pub(crate) fn deleted_nodes(&self) -> Vec<NodeId> {
        self.changes
            .iter()
            .filter_map(|c| match c {
                Change::Node {
                    node,
                    op: NodeOp::Delete,
                    ..
                } => Some(*node),
                _ => None,
            })
            .collect()
    }
}

/// Validates `edits` against `base` and consolidates them into a [`Batch`].
///
/// The result depends only on the multiset of edits, never on their order.
pub(crate) fn validate(base: &ModelStore, edits: &[Edit]) -> Result<Batch, ConsistencyError> {
    let schema = base.schema();

    let mut created: BTreeMap<NodeId, Vec<TypeId>> = BTreeMap::new();
    for edit in edits {
        if let Edit::CreateNode { node, types } = edit {
            if let Some(bad) = types.iter().find(|t| t.0 as usize >= schema.type_count()) {
                return Err(ConsistencyError::UnknownType(*bad));
            }
            let mut types = types.clone();
            types.sort_unstable();
            types.dedup();
            created.insert(*node, types);
        }
    }

    let mut deleted: BTreeSet<NodeId> = BTreeSet::new();
    for edit in edits {
        if let Edit::DeleteNode { node } = edit {
            if !deleted.insert(*node) {
                return Err(ConsistencyError::NodeDeleted(*node));
            }
            if !created.contains_key(node) {
                match base.node(*node) {
                    None => return Err(ConsistencyError::UnknownNode(*node)),
                    Some(rec) if !rec.alive => return Err(ConsistencyError::NodeDeleted(*node)),
                    Some(_) => {}
                }
            }
        }
    }

    let node_types = |n: NodeId| -> Result<&[TypeId], ConsistencyError> {
        if let Some(types) = created.get(&n) {
            return Ok(types);
        }
        match base.node(n) {
            None => Err(ConsistencyError::UnknownNode(n)),
            Some(rec) if !rec.alive => Err(ConsistencyError::NodeDeleted(n)),
            Some(rec) => Ok(&rec.types),
        }
    };

    let mut net: BTreeMap<(RelationId, Vec<NodeId>), i64> = BTreeMap::new();
    for edit in edits {
        let (relation, nodes, diff) = match edit {
            Edit::Insert { relation, nodes } => (*relation, nodes, 1),
            Edit::Delete { relation, nodes } => (*relation, nodes, -1),
            Edit::CreateNode { .. } | Edit::DeleteNode { .. } => continue,
        };
        let Some(decl) = schema.relation_decl(relation) else {
            return Err(ConsistencyError::UnknownRelation(relation));
        };
        if decl.arity() != nodes.len() {
            return Err(ConsistencyError::ArityMismatch {
                relation: decl.name.clone(),
                expected: decl.arity(),
                found: nodes.len(),
            });
        }
        for (position, (&node, &required)) in nodes.iter().zip(&decl.params).enumerate() {
            if node_types(node)?.binary_search(&required).is_err() {
                return Err(ConsistencyError::TypeMismatch {
                    relation: decl.name.clone(),
                    position,
                    node,
                    expected: schema.type_name(required).unwrap_or("?").to_owned(),
                });
            }
        }
        *net.entry((relation, nodes.clone())).or_insert(0) += diff;
        if let (true, [x, y]) = (decl.symmetric, nodes.as_slice()) {
            if x != y {
                *net.entry((relation, vec![*y, *x])).or_insert(0) += diff;
            }
        }
    }
    net.retain(|_, d| *d != 0);

    // Post-state incidence deltas, so deletions can be checked for dangling tuples.
    let mut incidence_delta: BTreeMap<NodeId, i64> = BTreeMap::new();
    for ((relation, nodes), diff) in &net {
        let before = i128::from(base.tuple_count(*relation, nodes));
        let after = before + i128::from(*diff);
        if after < 0 {
            let relation = schema
                .relation_decl(*relation)
                .map_or_else(String::new, |d| d.name.clone());
            return Err(ConsistencyError::NegativeMultiplicity {
                relation,
                nodes: nodes.clone(),
                count: after,
            });
        }
        let step = match (before == 0, after == 0) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        };
        if step != 0 {
            let mut distinct = nodes.clone();
            distinct.sort_unstable();
            distinct.dedup();
            for n in distinct {
                *incidence_delta.entry(n).or_insert(0) += step;
            }
        }
    }
    for &node in &deleted {
        let live = i128::from(base.incidence(node))
            + i128::from(incidence_delta.get(&node).copied().unwrap_or(0));
        if live > 0 {
            return Err(ConsistencyError::NodeInUse {
                node,
                tuples: u64::try_from(live).unwrap_or(u64::MAX),
            });
        }
    }

    let mut changes = Vec::with_capacity(net.len() + created.len() + deleted.len());
    for ((relation, nodes), diff) in &net {
        if *diff < 0 {
            changes.push(Change::Tuple {
                relation: *relation,
                nodes: nodes.clone(),
                diff: *diff,
            });
        }
    }
    for &node in &deleted {
        if created.contains_key(&node) {
            continue;
        }
        let types = base.node(node).map(|r| r.types.clone()).unwrap_or_default();
        changes.push(Change::Node {
            node,
            types,
            op: NodeOp::Delete,
        });
    }
    for (node, types) in created {
        if deleted.contains(&node) {
            continue;
        }
        changes.push(Change::Node {
            node,
            types,
            op: NodeOp::Create,
        });
    }
    for ((relation, nodes), diff) in net {
        if diff > 0 {
            changes.push(Change::Tuple {
                relation,
                nodes,
                diff,
            });
        }
    }
    Ok(Batch { changes })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use std::sync::Arc;

    use super::*;
    use crate::schema::Schema;

    struct Fixture {
        store: ModelStore,
        person: TypeId,
        post: TypeId,
        friend: RelationId,
        author: RelationId,
    }

    fn fixture() -> Fixture {
        let schema = Schema::builder()
            .node_type("Person")
            .node_type("Post")
            .relation("friend", &["Person", "Person"])
            .relation("author", &["Post", "Person"])
            .build()
            .unwrap();
        Fixture {
            person: schema.node_type("Person").unwrap(),
            post: schema.node_type("Post").unwrap(),
            friend: schema.relation("friend").unwrap(),
            author: schema.relation("author").unwrap(),
            store: ModelStore::new(Arc::new(schema)),
        }
    }

    fn commit(store: &mut ModelStore, edits: &[Edit]) -> Result<Batch, ConsistencyError> {
        let batch = validate(store, edits)?;
        for c in batch.changes() {
            store.apply(c);
        }
        Ok(batch)
    }

    #[test]
    fn nodes_created_in_batch_may_be_used_in_any_order() {
        let mut f = fixture();
        let a = f.store.allocate_node();
        let b = f.store.allocate_node();
        let edits = vec![
            Edit::Insert {
                relation: f.friend,
                nodes: vec![a, b],
            },
            Edit::CreateNode {
                node: b,
                types: vec![f.person],
            },
            Edit::CreateNode {
                node: a,
                types: vec![f.person],
            },
        ];
        let batch = commit(&mut f.store, &edits).unwrap();
        assert_eq!(batch.changes().len(), 3);
        assert!(matches!(batch.changes()[0], Change::Node { .. }));
        assert!(matches!(batch.changes()[2], Change::Tuple { diff: 1, .. }));
        assert_eq!(f.store.tuple_count(f.friend, &[a, b]), 1);
    }

    #[test]
    fn type_mismatch_aborts_whole_batch() {
        let mut f = fixture();
        let a = f.store.allocate_node();
        let p = f.store.allocate_node();
        let edits = vec![
            Edit::CreateNode {
                node: a,
                types: vec![f.person],
            },
            Edit::CreateNode {
                node: p,
                types: vec![f.post],
            },
            Edit::Insert {
                relation: f.author,
                nodes: vec![a, p],
            },
        ];
        let err = commit(&mut f.store, &edits).unwrap_err();
        assert!(matches!(err, ConsistencyError::TypeMismatch { position: 0, .. }));
        assert!(f.store.node(a).is_none(), "no partial apply");
    }

    #[test]
    fn retraction_below_zero_is_rejected_not_clamped() {
        let mut f = fixture();
        let a = f.store.allocate_node();
        commit(
            &mut f.store,
            &[Edit::CreateNode {
                node: a,
                types: vec![f.person],
            }],
        )
        .unwrap();
        let ins = Edit::Insert {
            relation: f.friend,
            nodes: vec![a, a],
        };
        let del = Edit::Delete {
            relation: f.friend,
            nodes: vec![a, a],
        };
        commit(&mut f.store, &[ins.clone(), ins]).unwrap();
        let err = commit(&mut f.store, &[del.clone(), del.clone(), del]).unwrap_err();
        assert!(matches!(
            err,
            ConsistencyError::NegativeMultiplicity { count: -1, .. }
        ));
        assert_eq!(f.store.tuple_count(f.friend, &[a, a]), 2);
    }

    #[test]
    fn deleting_referenced_node_is_rejected() {
        let mut f = fixture();
        let a = f.store.allocate_node();
        let b = f.store.allocate_node();
        commit(
            &mut f.store,
            &[
                Edit::CreateNode {
                    node: a,
                    types: vec![f.person],
                },
                Edit::CreateNode {
                    node: b,
                    types: vec![f.person],
                },
                Edit::Insert {
                    relation: f.friend,
                    nodes: vec![a, b],
                },
            ],
        )
        .unwrap();
        let err = commit(&mut f.store, &[Edit::DeleteNode { node: b }]).unwrap_err();
        assert_eq!(err, ConsistencyError::NodeInUse { node: b, tuples: 1 });
        // Retracting the tuple in the same batch makes the deletion legal.
        commit(
            &mut f.store,
            &[
                Edit::DeleteNode { node: b },
                Edit::Delete {
                    relation: f.friend,
                    nodes: vec![a, b],
                },
            ],
        )
        .unwrap();
        assert!(!f.store.is_live(b));
    }

    #[test]
    fn insert_then_delete_in_one_batch_cancels() {
        let mut f = fixture();
        let a = f.store.allocate_node();
        commit(
            &mut f.store,
            &[Edit::CreateNode {
                node: a,
                types: vec![f.person],
            }],
        )
        .unwrap();
        let batch = validate(
            &f.store,
            &[
                Edit::Delete {
                    relation: f.friend,
                    nodes: vec![a, a],
                },
                Edit::Insert {
                    relation: f.friend,
                    nodes: vec![a, a],
                },
            ],
        )
        .unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn symmetric_relations_mirror_each_edit() {
        let schema = Schema::builder()
            .node_type("Person")
            .symmetric_relation("friend", &["Person", "Person"])
            .build()
            .unwrap();
        let person = schema.node_type("Person").unwrap();
        let friend = schema.relation("friend").unwrap();
        let mut store = ModelStore::new(Arc::new(schema));
        let a = store.allocate_node();
        let b = store.allocate_node();
        commit(
            &mut store,
            &[
                Edit::CreateNode {
                    node: a,
                    types: vec![person],
                },
                Edit::CreateNode {
                    node: b,
                    types: vec![person],
                },
                Edit::Insert {
                    relation: friend,
                    nodes: vec![a, b],
                },
                Edit::Insert {
                    relation: friend,
                    nodes: vec![a, a],
                },
            ],
        )
        .unwrap();
        assert_eq!(store.tuple_count(friend, &[b, a]), 1);
        assert_eq!(store.tuple_count(friend, &[a, a]), 1, "self loops are not doubled");
        commit(
            &mut store,
            &[Edit::Delete {
                relation: friend,
                nodes: vec![b, a],
            }],
        )
        .unwrap();
        assert_eq!(store.tuple_count(friend, &[a, b]), 0);
    }
}
