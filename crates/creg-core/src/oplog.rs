//! Causally ordered operation logs.
//!
//! Every write accepted anywhere in the cluster becomes an immutable
//! [`Operation`]: the accepting replica's version vector right after the write,
//! plus the written value. Logs keep operations in ascending total order
//! (lexicographic on the vector, which extends the causal order), so the last
//! entry is always the write that wins, and union of logs is idempotent and
//! commutative.

use crate::clock::VersionVector;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Register payload.
pub type Value = u64;

/// What a read of an empty log returns.
pub const DEFAULT_VALUE: Value = 0;

/// A write, stamped with the version vector it was accepted at.
///
/// Ordering compares the vector first; `data` only separates two records that
/// carry the same vector.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Operation {
    pub version_vector: VersionVector,
    pub data: Value,
}

impl Operation {
    pub fn new(version_vector: VersionVector, data: Value) -> Self {
        Self {
            version_vector,
            data,
        }
    }

    /// Causal comparison with the lexicographic tiebreak for concurrent writes.
    pub fn causal_cmp(&self, other: &Operation) -> Ordering {
        self.version_vector
            .causal_cmp(&other.version_vector)
            .then_with(|| self.data.cmp(&other.data))
    }
}

/// Insert `op` keeping `log` ascending. Equal entries land next to each other.
pub fn insert_sorted(log: &mut Vec<Operation>, op: Operation) {
    let index = log.partition_point(|existing| existing < &op);
    log.insert(index, op);
}

/// Union of two sorted logs, without duplicates.
pub fn merge_logs(left: &[Operation], right: &[Operation]) -> Vec<Operation> {
    let mut merged = left.to_vec();
    for op in right {
        insert_sorted(&mut merged, op.clone());
    }
    merged.dedup();
    merged
}

/// Value of the maximal operation, or [`DEFAULT_VALUE`] for an empty log.
pub fn current_value(log: &[Operation]) -> Value {
    log.last().map(|op| op.data).unwrap_or(DEFAULT_VALUE)
}

/// A sorted, duplicate-free log of applied operations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationLog {
    entries: Vec<Operation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one operation. Returns false when it was already present.
    pub fn insert(&mut self, op: Operation) -> bool {
        let index = self.entries.partition_point(|existing| existing < &op);
        if self.entries.get(index) == Some(&op) {
            return false;
        }
        self.entries.insert(index, op);
        true
    }

    /// Union with a batch of operations.
    pub fn merge(&mut self, ops: &[Operation]) {
        self.entries = merge_logs(&self.entries, ops);
    }

    pub fn contains(&self, op: &Operation) -> bool {
        self.entries.binary_search(op).is_ok()
    }

    pub fn current_value(&self) -> Value {
        current_value(&self.entries)
    }

    /// The winning operation, if any write has been applied.
    pub fn latest(&self) -> Option<&Operation> {
        self.entries.last()
    }

    pub fn as_slice(&self) -> &[Operation] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Operation> for OperationLog {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut log = OperationLog::new();
        for op in iter {
            log.insert(op);
        }
        log
    }
}
