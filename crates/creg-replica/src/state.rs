//! Replica state for causal delivery and incremental gossip.
//!
//! Each replica `i` keeps:
//!
//! - **Clock** `Cᵢ`: the version vector of every write applied here.
//! - **Performed** `Lᵢ`: every applied operation, ascending; the register value
//!   is the data of its maximum.
//! - **Own writes** `Wᵢ`: append-only log of writes accepted at `i`.
//! - **Pending** `Pᵢ`: gossiped operations whose causal predecessors have not
//!   arrived yet.
//! - **Cursors** `Aᵢ[j]`: how much of `Wᵢ` peer `j` has acknowledged.
//! - **Parked** `Uᵢ`: client requests whose dependency vector `Cᵢ` does not
//!   yet dominate.
//!
//! ```text
//! on local write v:       Cᵢ[i] += 1; op := (Cᵢ, v); Lᵢ ∪= {op}; Wᵢ.push(op)
//! on gossip ops:          Pᵢ ∪= ops \ {covered by Cᵢ}
//!                         while ∃p ∈ Pᵢ ready against Cᵢ:
//!                             Lᵢ ∪= {p}; Cᵢ := Cᵢ ⊔ p.vv; Pᵢ -= {p}
//! on ack(n) from j:       Aᵢ[j] := max(Aᵢ[j], n)
//! on tick, for j ≠ i:     send Wᵢ[Aᵢ[j]..] to j
//! ```
//!
//! Nothing here is persisted; a restarted replica starts from zero.

use crate::message::ClientRequest;
use creg_core::{merge_logs, Operation, OperationLog, ReplicaId, Value, VersionVector};
use tracing::{debug, warn};

/// A client request waiting for its dependencies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParkedRequest {
    pub request: ClientRequest,
    /// Gossip tick count when the request was parked.
    pub parked_at: u64,
}

/// All mutable state of one replica.
#[derive(Clone, Debug)]
pub struct ReplicaState {
    pub(crate) id: ReplicaId,
    pub(crate) replica_count: usize,
    pub(crate) vector_clock: VersionVector,
    pub(crate) operations_performed: OperationLog,
    pub(crate) my_operations: Vec<Operation>,
    pub(crate) pending_operations: Vec<Operation>,
    pub(crate) gossip_acknowledgements: Vec<usize>,
    pub(crate) unsatisfied_requests: Vec<ParkedRequest>,
    pub(crate) ticks: u64,
    pub(crate) request_ttl_ticks: Option<u64>,
}

impl ReplicaState {
    /// Fresh state for replica `id` in a cluster of `replica_count`.
    ///
    /// Parked requests wait indefinitely unless a TTL is set with
    /// [`ReplicaState::with_request_ttl`].
    ///
    /// # Panics
    ///
    /// Panics if `id >= replica_count`.
    pub fn new(id: ReplicaId, replica_count: usize) -> Self {
        assert!(
            id < replica_count,
            "replica id {} outside a cluster of {}",
            id,
            replica_count
        );
        Self {
            id,
            replica_count,
            vector_clock: VersionVector::zero(replica_count),
            operations_performed: OperationLog::new(),
            my_operations: Vec::new(),
            pending_operations: Vec::new(),
            gossip_acknowledgements: vec![0; replica_count],
            unsatisfied_requests: Vec::new(),
            ticks: 0,
            request_ttl_ticks: None,
        }
    }

    /// Reject parked requests once they have waited more than `ttl` ticks.
    pub fn with_request_ttl(mut self, ttl: Option<u64>) -> Self {
        self.request_ttl_ticks = ttl;
        self
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    pub fn clock(&self) -> &VersionVector {
        &self.vector_clock
    }

    pub fn operations_performed(&self) -> &OperationLog {
        &self.operations_performed
    }

    pub fn my_operations(&self) -> &[Operation] {
        &self.my_operations
    }

    pub fn pending_operations(&self) -> &[Operation] {
        &self.pending_operations
    }

    pub fn gossip_acknowledgements(&self) -> &[usize] {
        &self.gossip_acknowledgements
    }

    pub fn unsatisfied_requests(&self) -> &[ParkedRequest] {
        &self.unsatisfied_requests
    }

    pub fn request_ttl_ticks(&self) -> Option<u64> {
        self.request_ttl_ticks
    }

    /// Gossip ticks seen so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Current register value.
    pub fn current_value(&self) -> Value {
        self.operations_performed.current_value()
    }

    /// Count of buffered out-of-order operations
    pub fn pending_count(&self) -> usize {
        self.pending_operations.len()
    }

    /// Accept a client write: bump our own clock component and log the
    /// operation. Returns the clock right after the write.
    pub(crate) fn apply_local_write(&mut self, data: Value) -> VersionVector {
        self.vector_clock.increment(self.id);
        let op = Operation::new(self.vector_clock.clone(), data);
        self.operations_performed.insert(op.clone());
        self.my_operations.push(op);
        self.drain_pending();
        self.vector_clock.clone()
    }

    /// Buffer gossiped operations and apply every one that becomes causally
    /// ready. Returns how many were applied.
    pub(crate) fn receive_operations(&mut self, ops: Vec<Operation>) -> usize {
        let mut fresh = Vec::with_capacity(ops.len());
        for op in ops {
            if op.version_vector.len() != self.replica_count {
                warn!(
                    replica = self.id,
                    vector = %op.version_vector,
                    "dropping gossiped operation with malformed version vector"
                );
                continue;
            }
            if self.vector_clock.dominates(&op.version_vector) {
                continue;
            }
            fresh.push(op);
        }
        fresh.sort();
        self.pending_operations = merge_logs(&self.pending_operations, &fresh);
        self.drain_pending()
    }

    /// Apply pending operations to a fixed point.
    ///
    /// Each application advances the clock, which may make further pending
    /// entries ready, so the scan restarts until nothing applies.
    fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let clock = &self.vector_clock;
            self.pending_operations
                .retain(|op| !clock.dominates(&op.version_vector));

            let Some(index) = self
                .pending_operations
                .iter()
                .position(|op| self.vector_clock.is_causally_ready(&op.version_vector))
            else {
                break;
            };

            let op = self.pending_operations.remove(index);
            self.vector_clock.merge(&op.version_vector);
            self.operations_performed.insert(op);
            applied += 1;
        }
        if applied > 0 {
            debug!(
                replica = self.id,
                applied,
                pending = self.pending_operations.len(),
                clock = %self.vector_clock,
                "applied gossiped operations"
            );
        }
        applied
    }

    /// Advance `peer`'s cursor. Out-of-range peers and our own id are ignored.
    pub(crate) fn acknowledge(&mut self, peer: ReplicaId, acked_index: usize) -> bool {
        if peer >= self.replica_count || peer == self.id {
            return false;
        }
        let acked_index = acked_index.min(self.my_operations.len());
        let cursor = &mut self.gossip_acknowledgements[peer];
        *cursor = (*cursor).max(acked_index);
        true
    }

    /// Our own writes that `peer` has not acknowledged yet.
    pub fn unacked_suffix(&self, peer: ReplicaId) -> &[Operation] {
        let total = self.my_operations.len();
        let cursor = self
            .gossip_acknowledgements
            .get(peer)
            .copied()
            .unwrap_or(total)
            .min(total);
        &self.my_operations[cursor..]
    }

    pub(crate) fn park(&mut self, request: ClientRequest) {
        debug!(
            replica = self.id,
            client = request.client_id,
            dependency = %request.dependency_vector,
            clock = %self.vector_clock,
            "parking request until its dependencies arrive"
        );
        self.unsatisfied_requests.push(ParkedRequest {
            request,
            parked_at: self.ticks,
        });
    }
}
