// File: `crates/creg-core/src/lib.rs`
//! Causal register core: version vectors and operation logs.
//!
//! Everything here is a pure function or a plain value type; the replica
//! state machine in `creg-replica` is built on top of these.

pub mod clock;
pub mod oplog;

pub use clock::{ReplicaId, VersionVector};
pub use oplog::{
    current_value, insert_sorted, merge_logs, Operation, OperationLog, Value, DEFAULT_VALUE,
};
