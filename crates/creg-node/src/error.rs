//! Error types for the replica driver and its transports.

use creg_core::ReplicaId;
use creg_replica::{ClientId, ProtocolError};
use thiserror::Error;

/// Failures delivering a single message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer not found: replica {0}")]
    PeerNotFound(ReplicaId),

    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("Message has no destination")]
    NoDestination,
}

/// Errors surfaced by nodes, clients and configuration loading.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Request rejected: {0}")]
    Rejected(ProtocolError),

    #[error("No reply within {0} ms")]
    Timeout(u64),

    #[error("Unknown replica: {0}")]
    UnknownReplica(ReplicaId),
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
