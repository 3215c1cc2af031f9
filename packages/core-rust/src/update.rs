//! Field-operator maps describing an update.

use std::collections::BTreeMap;

use crate::types::{Pointer, Value};

/// One operation against one (possibly dotted) field path.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(Value),
    /// Adds to the stored number, or sets it when absent.
    Increment(Value),
    /// Appends every value.
    Add(Vec<Value>),
    /// Appends the values not already present.
    AddUnique(Vec<Value>),
    /// Removes every occurrence of each value.
    Remove(Vec<Value>),
    /// Applied only when an upsert inserts.
    SetOnInsert(Value),
    Delete,
    AddRelation(Vec<Pointer>),
    RemoveRelation(Vec<Pointer>),
}

impl UpdateOp {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set(_) => "Set",
            Self::Increment(_) => "Increment",
            Self::Add(_) => "Add",
            Self::AddUnique(_) => "AddUnique",
            Self::Remove(_) => "Remove",
            Self::SetOnInsert(_) => "SetOnInsert",
            Self::Delete => "Delete",
            Self::AddRelation(_) => "AddRelation",
            Self::RemoveRelation(_) => "RemoveRelation",
        }
    }
}

/// Field path to operation. Ordered so compiled output is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOperatorMap(BTreeMap<String, UpdateOp>);

impl UpdateOperatorMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn op(mut self, path: &str, op: UpdateOp) -> Self {
        self.0.insert(path.to_string(), op);
        self
    }

    #[must_use]
    pub fn set(self, path: &str, value: impl Into<Value>) -> Self {
        self.op(path, UpdateOp::Set(value.into()))
    }

    #[must_use]
    pub fn increment(self, path: &str, amount: impl Into<Value>) -> Self {
        self.op(path, UpdateOp::Increment(amount.into()))
    }

    #[must_use]
    pub fn set_on_insert(self, path: &str, value: impl Into<Value>) -> Self {
        self.op(path, UpdateOp::SetOnInsert(value.into()))
    }

    #[must_use]
    pub fn delete(self, path: &str) -> Self {
        self.op(path, UpdateOp::Delete)
    }

    pub fn insert(&mut self, path: &str, op: UpdateOp) {
        self.0.insert(path.to_string(), op);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &UpdateOp)> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The field name a path writes to (the part before the first dot).
    #[must_use]
    pub fn root_field(path: &str) -> &str {
        path.split('.').next().unwrap_or(path)
    }
}

impl FromIterator<(String, UpdateOp)> for UpdateOperatorMap {
    fn from_iter<T: IntoIterator<Item = (String, UpdateOp)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a UpdateOperatorMap {
    type Item = (&'a String, &'a UpdateOp);
    type IntoIter = std::collections::btree_map::Iter<'a, String, UpdateOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
