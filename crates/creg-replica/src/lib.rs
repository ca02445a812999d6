//! Causal Register replica - the causal-consistency and anti-entropy engine
//!
//! This crate implements everything a replica decides on its own:
//! - Dependency checks for client requests (session guarantees)
//! - Gossip of each replica's own writes, with per-peer ack cursors
//! - Causal delivery of gossiped writes, buffering the out-of-order ones
//! - Parking of requests whose dependencies have not arrived yet
//!
//! # Protocol
//!
//! ```text
//! On client request r at replica i:
//!   if Cᵢ ≥ r.deps:  serve (read current value / accept write), reply
//!   else:            park r
//!
//! On tick at replica i, for each peer j:
//!   send Wᵢ[Aᵢ[j]..] to j, claiming |Wᵢ|
//!
//! On push(ops, n) from peer j:
//!   buffer ops, apply every causally ready one to a fixed point
//!   ack(n) to j
//!   retry parked requests
//!
//! On ack(n) from peer j:
//!   Aᵢ[j] := max(Aᵢ[j], n)
//! ```
//!
//! # Example
//!
//! ```rust
//! use creg_replica::{ClientRequest, Cluster};
//! use creg_core::VersionVector;
//!
//! let mut cluster = Cluster::new(2);
//! cluster.submit(0, ClientRequest::write(1, 5, VersionVector::zero(2)));
//! cluster.full_sync_round();
//!
//! assert_eq!(cluster.replica(1).current_value(), 5);
//! assert!(cluster.is_converged());
//! ```

pub mod cluster;
pub mod error;
pub mod message;
pub mod processor;
pub mod session;
pub mod state;

pub use cluster::{Cluster, NetworkConfig, SimulatedNetwork};
pub use error::{ProtocolError, Result, UnknownSemantic};
pub use message::{
    ClientId, ClientRequest, Destination, GossipAck, GossipPush, Message, OperationType,
    Rejection, ServerReply,
};
pub use processor::{process, validate_request};
pub use session::{Session, SessionSemantic};
pub use state::{ParkedRequest, ReplicaState};
