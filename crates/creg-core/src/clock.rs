//! Version vectors for causal bookkeeping between replicas.
//!
//! A version vector holds one counter per replica, indexed by replica id.
//! Component `i` only ever grows when replica `i` accepts a local write, and
//! every merge takes the pointwise maximum, so each component is monotone
//! everywhere it is observed.
//!
//! Two orders are defined over vectors:
//!
//! - **Dominance** (`a ≥ b` pointwise), the causal partial order used to decide
//!   whether a request's dependencies are visible.
//! - **Lexicographic order**, a total order that extends dominance. It drives
//!   sorted insertion into operation logs and picks the winner between
//!   concurrent writes.
//!
//! Components beyond a vector's length read as zero.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Index of a replica within the fixed cluster membership.
pub type ReplicaId = usize;

/// A fixed-length vector of per-replica counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(Vec<u64>);

impl VersionVector {
    /// The all-zero vector for a cluster of `replicas` members.
    pub fn zero(replicas: usize) -> Self {
        VersionVector(vec![0; replicas])
    }

    /// Wrap raw counters.
    pub fn from_counters(counters: impl Into<Vec<u64>>) -> Self {
        VersionVector(counters.into())
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the zero-length vector.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Counter for `replica`, zero when out of range.
    pub fn get(&self, replica: ReplicaId) -> u64 {
        self.0.get(replica).copied().unwrap_or(0)
    }

    /// Bump the counter owned by `replica`, returning the new value.
    ///
    /// # Panics
    ///
    /// Panics if `replica` is not a component of this vector.
    pub fn increment(&mut self, replica: ReplicaId) -> u64 {
        self.0[replica] += 1;
        self.0[replica]
    }

    /// Raw counters.
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.0.iter()
    }

    /// Sum of all counters: the number of writes this vector has seen.
    pub fn total_operations(&self) -> u64 {
        self.0.iter().sum()
    }

    /// `self[i] >= other[i]` for every component.
    pub fn dominates(&self, other: &VersionVector) -> bool {
        let width = self.len().max(other.len());
        (0..width).all(|i| self.get(i) >= other.get(i))
    }

    /// Dominates and differs.
    pub fn strictly_dominates(&self, other: &VersionVector) -> bool {
        self.dominates(other) && self != other
    }

    /// Neither vector dominates the other.
    pub fn is_concurrent_with(&self, other: &VersionVector) -> bool {
        !self.dominates(other) && !other.dominates(self)
    }

    /// Pointwise maximum, in place.
    pub fn merge(&mut self, other: &VersionVector) {
        if other.len() > self.len() {
            self.0.resize(other.len(), 0);
        }
        for (mine, theirs) in self.0.iter_mut().zip(other.iter()) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// Pointwise maximum without modifying `self`.
    pub fn merged_with(&self, other: &VersionVector) -> VersionVector {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Whether `candidate` is the next write this vector can absorb.
    ///
    /// Exactly one component `k` must satisfy `candidate[k] == self[k] + 1`,
    /// and every other component must already be covered
    /// (`candidate[i] <= self[i]`). Such a write is the immediate successor of
    /// what this replica has seen from its origin, with all of its other
    /// dependencies already applied.
    pub fn is_causally_ready(&self, candidate: &VersionVector) -> bool {
        let width = self.len().max(candidate.len());
        let mut next_from = None;
        for i in 0..width {
            let (local, theirs) = (self.get(i), candidate.get(i));
            if theirs <= local {
                continue;
            }
            if theirs == local + 1 && next_from.is_none() {
                next_from = Some(i);
            } else {
                return false;
            }
        }
        next_from.is_some()
    }

    /// Lexicographic comparison: the first differing component decides.
    pub fn lex_cmp(&self, other: &VersionVector) -> Ordering {
        let width = self.len().max(other.len());
        (0..width)
            .map(|i| self.get(i).cmp(&other.get(i)))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Domination-aware comparison: causal order where it exists, the
    /// lexicographic tiebreak between concurrent vectors.
    pub fn causal_cmp(&self, other: &VersionVector) -> Ordering {
        match (self.dominates(other), other.dominates(self)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.lex_cmp(other),
        }
    }
}

impl PartialOrd for VersionVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The total order used for log placement.
impl Ord for VersionVector {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lex_cmp(other).then_with(|| self.len().cmp(&other.len()))
    }
}

impl From<Vec<u64>> for VersionVector {
    fn from(counters: Vec<u64>) -> Self {
        VersionVector(counters)
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, counter) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", counter)?;
        }
        write!(f, "]")
    }
}
