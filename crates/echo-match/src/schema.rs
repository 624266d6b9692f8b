// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Declared node types and relation signatures.
//!
//! A [`Schema`] is immutable once built and is shared (via `Arc`) by every
//! model instance and every pattern compiled against it.
use std::collections::BTreeMap;

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ident::{Hash, RelationId, TypeId};

/// Errors raised while declaring a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A node type with this name was already declared.
    #[error("duplicate node type: {0}")]
    DuplicateType(String),
    /// A relation with this name was already declared.
    #[error("duplicate relation: {0}")]
    DuplicateRelation(String),
    /// A relation parameter names a node type that was never declared.
    #[error("relation {relation} references unknown node type {type_name}")]
    UnknownType {
        /// Relation being declared.
        relation: String,
        /// Offending type name.
        type_name: String,
    },
    /// A symmetric relation must be binary with both positions of one type.
    #[error("symmetric relation {0} must have two positions of the same type")]
    SymmetricSignature(String),
    /// More declarations than a 32-bit id can address.
    #[error("declaration #{0} exceeds the 32-bit id space")]
    TooManyDeclarations(usize),
}

/// Declared signature of one relation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDecl {
    /// Relation name.
    pub name: String,
    /// Required type tag of the node at each position; the length is the arity.
    pub params: Vec<TypeId>,
    /// Binary relation that is its own opposite: every edit of `r(a, b)` is
    /// mirrored onto `r(b, a)`.
    pub symmetric: bool,
}

impl RelationDecl {
    /// Number of node positions in a tuple of this relation.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Immutable set of node types and relation signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    types: Vec<String>,
    types_by_name: BTreeMap<String, TypeId>,
    relations: Vec<RelationDecl>,
    relations_by_name: BTreeMap<String, RelationId>,
    digest: Hash,
}

impl Schema {
    /// Starts a new schema declaration.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Looks up a node type by name.
    pub fn node_type(&self, name: &str) -> Option<TypeId> {
        self.types_by_name.get(name).copied()
    }

    /// Returns the declared name of a node type.
    pub fn type_name(&self, ty: TypeId) -> Option<&str> {
        self.types.get(ty.0 as usize).map(String::as_str)
    }

    /// Looks up a relation by name.
    pub fn relation(&self, name: &str) -> Option<RelationId> {
        self.relations_by_name.get(name).copied()
    }

    /// Returns the declaration of a relation.
    pub fn relation_decl(&self, id: RelationId) -> Option<&RelationDecl> {
        self.relations.get(id.0 as usize)
    }

    /// Iterates relation declarations in id order.
    pub fn relations(&self) -> impl Iterator<Item = (RelationId, &RelationDecl)> {
        (0_u32..)
            .zip(self.relations.iter())
            .map(|(i, d)| (RelationId(i), d))
    }

    /// Number of declared node types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Content digest of the declarations.
    ///
    /// Two schemas with the same declarations in the same order share a
    /// digest; compiled patterns are only attachable to instances whose
    /// schema digest matches the one they were compiled against.
    #[must_use]
    pub fn digest(&self) -> Hash {
        self.digest
    }
}

fn declaration_id(i: usize) -> Result<u32, SchemaError> {
    u32::try_from(i).map_err(|_| SchemaError::TooManyDeclarations(i))
}

/// Incremental builder for [`Schema`].
///
/// Errors are deferred to [`SchemaBuilder::build`] so declarations can be
/// chained.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<String>,
    relations: Vec<(String, Vec<String>, bool)>,
}

impl SchemaBuilder {
    /// Declares a node type tag.
    #[must_use]
    pub fn node_type(mut self, name: impl Into<String>) -> Self {
        self.types.push(name.into());
        self
    }

    /// Declares a relation whose positions require the given node types.
    #[must_use]
    pub fn relation(mut self, name: impl Into<String>, params: &[&str]) -> Self {
        self.relations.push((
            name.into(),
            params.iter().map(|p| (*p).to_owned()).collect(),
            false,
        ));
        self
    }

    /// Declares a binary relation that is its own opposite.
    #[must_use]
    pub fn symmetric_relation(mut self, name: impl Into<String>, params: &[&str]) -> Self {
        self.relations.push((
            name.into(),
            params.iter().map(|p| (*p).to_owned()).collect(),
            true,
        ));
        self
    }

    /// Validates the declarations and freezes the schema.
    ///
    /// # Errors
    /// Returns [`SchemaError`] on duplicate names, relations that reference
    /// undeclared node types, or more types or relations than fit a `u32` id.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut types_by_name = BTreeMap::new();
        for (i, name) in self.types.iter().enumerate() {
            if types_by_name
                .insert(name.clone(), TypeId(declaration_id(i)?))
                .is_some()
            {
                return Err(SchemaError::DuplicateType(name.clone()));
            }
        }
        let mut relations = Vec::with_capacity(self.relations.len());
        let mut relations_by_name = BTreeMap::new();
        for (i, (name, params, symmetric)) in self.relations.into_iter().enumerate() {
            let mut resolved = Vec::with_capacity(params.len());
            for p in params {
                let Some(&ty) = types_by_name.get(&p) else {
                    return Err(SchemaError::UnknownType {
                        relation: name,
                        type_name: p,
                    });
                };
                resolved.push(ty);
            }
            if symmetric && !matches!(resolved.as_slice(), [a, b] if a == b) {
                return Err(SchemaError::SymmetricSignature(name));
            }
            if relations_by_name
                .insert(name.clone(), RelationId(declaration_id(i)?))
                .is_some()
            {
                return Err(SchemaError::DuplicateRelation(name));
            }
            relations.push(RelationDecl {
                name,
                params: resolved,
                symmetric,
            });
        }
        let digest = compute_digest(&self.types, &relations);
        Ok(Schema {
            types: self.types,
            types_by_name,
            relations,
            relations_by_name,
            digest,
        })
    }
}

fn compute_digest(types: &[String], relations: &[RelationDecl]) -> Hash {
    let mut h = Hasher::new();
    h.update(b"schema:");
    h.update(&(types.len() as u64).to_le_bytes());
    for t in types {
        h.update(&(t.len() as u64).to_le_bytes());
        h.update(t.as_bytes());
    }
    h.update(&(relations.len() as u64).to_le_bytes());
    for r in relations {
        h.update(&(r.name.len() as u64).to_le_bytes());
        h.update(r.name.as_bytes());
        h.update(&(r.params.len() as u64).to_le_bytes());
        for p in &r.params {
            h.update(&p.0.to_le_bytes());
        }
        h.update(&[u8::from(r.symmetric)]);
    }
    h.finalize().into()
}
