//! The message envelope exchanged between clients and replicas.
//!
//! | kind | message         | direction              |
//! |------|-----------------|------------------------|
//! | 0    | `ClientRequest` | client → replica       |
//! | 1    | `GossipPush`    | replica → replica      |
//! | 2    | `GossipAck`     | replica → replica      |
//! | 3    | `GossipTick`    | timer → own replica    |
//! | 4    | `ServerReply`   | replica → client       |
//! | 5    | `Rejected`      | replica → client       |

use crate::error::ProtocolError;
use creg_core::{Operation, ReplicaId, Value, VersionVector};
use serde::{Deserialize, Serialize};

/// Stable identity of a client session.
pub type ClientId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Read,
    Write,
}

/// A read or write, gated on the client's dependency vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub client_id: ClientId,
    pub operation_type: OperationType,
    /// Ignored for reads.
    pub write_value: Value,
    /// The request may only be served once the replica clock dominates this.
    pub dependency_vector: VersionVector,
    /// Per-session sequence number, echoed back in the reply.
    #[serde(default)]
    pub request_id: u64,
}

impl ClientRequest {
    pub fn read(client_id: ClientId, dependency_vector: VersionVector) -> Self {
        Self {
            client_id,
            operation_type: OperationType::Read,
            write_value: 0,
            dependency_vector,
            request_id: 0,
        }
    }

    pub fn write(client_id: ClientId, value: Value, dependency_vector: VersionVector) -> Self {
        Self {
            client_id,
            operation_type: OperationType::Write,
            write_value: value,
            dependency_vector,
            request_id: 0,
        }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = request_id;
        self
    }
}

/// The unacknowledged suffix of a replica's own writes, sent to one peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipPush {
    pub from_replica: ReplicaId,
    pub to_replica: ReplicaId,
    pub operations: Vec<Operation>,
    /// Length of the sender's own log when the push was built; the receiver
    /// acks this index.
    pub high_water_index: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipAck {
    pub from_replica: ReplicaId,
    pub to_replica: ReplicaId,
    pub acked_index: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReply {
    pub operation_type: OperationType,
    /// The register value for reads, the written value for writes.
    pub data: Value,
    pub version_vector: VersionVector,
    pub replying_replica: ReplicaId,
    pub client_id: ClientId,
    /// The `request_id` of the request this answers.
    #[serde(default)]
    pub request_id: u64,
}

/// A request the replica refuses to serve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub client_id: ClientId,
    pub replying_replica: ReplicaId,
    #[serde(default)]
    pub request_id: u64,
    pub reason: ProtocolError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    ClientRequest(ClientRequest),
    GossipPush(GossipPush),
    GossipAck(GossipAck),
    GossipTick,
    ServerReply(ServerReply),
    Rejected(Rejection),
}

/// Where an outbound message has to be delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Replica(ReplicaId),
    Client(ClientId),
}

impl Message {
    /// Numeric discriminant of the envelope.
    pub fn kind(&self) -> u8 {
        match self {
            Message::ClientRequest(_) => 0,
            Message::GossipPush(_) => 1,
            Message::GossipAck(_) => 2,
            Message::GossipTick => 3,
            Message::ServerReply(_) => 4,
            Message::Rejected(_) => 5,
        }
    }

    /// Routing target for messages a replica emits.
    ///
    /// Client requests and ticks are inbound-only and have no destination.
    pub fn destination(&self) -> Option<Destination> {
        match self {
            Message::GossipPush(push) => Some(Destination::Replica(push.to_replica)),
            Message::GossipAck(ack) => Some(Destination::Replica(ack.to_replica)),
            Message::ServerReply(reply) => Some(Destination::Client(reply.client_id)),
            Message::Rejected(rejection) => Some(Destination::Client(rejection.client_id)),
            Message::ClientRequest(_) | Message::GossipTick => None,
        }
    }

    /// The replica a peer-to-peer or reply message came from.
    pub fn source_replica(&self) -> Option<ReplicaId> {
        match self {
            Message::GossipPush(push) => Some(push.from_replica),
            Message::GossipAck(ack) => Some(ack.from_replica),
            Message::ServerReply(reply) => Some(reply.replying_replica),
            Message::Rejected(rejection) => Some(rejection.replying_replica),
            Message::ClientRequest(_) | Message::GossipTick => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kinds() {
        let request = Message::ClientRequest(ClientRequest::read(1, VersionVector::zero(2)));
        assert_eq!(request.kind(), 0);
        assert_eq!(request.destination(), None);
        assert_eq!(Message::GossipTick.kind(), 3);

        let ack = Message::GossipAck(GossipAck {
            from_replica: 1,
            to_replica: 0,
            acked_index: 4,
        });
        assert_eq!(ack.kind(), 2);
        assert_eq!(ack.destination(), Some(Destination::Replica(0)));
        assert_eq!(ack.source_replica(), Some(1));
    }

    #[test]
    fn test_reply_routes_to_client() {
        let reply = Message::ServerReply(ServerReply {
            operation_type: OperationType::Write,
            data: 3,
            version_vector: VersionVector::from_counters(vec![1, 0]),
            replying_replica: 0,
            client_id: 42,
            request_id: 3,
        });
        assert_eq!(reply.destination(), Some(Destination::Client(42)));
    }

    #[test]
    fn test_wire_format_is_tagged_by_kind() {
        let json = serde_json::to_string(&Message::GossipTick).unwrap();
        assert_eq!(json, r#"{"kind":"gossip_tick"}"#);

        let rejected = Message::Rejected(Rejection {
            client_id: 7,
            replying_replica: 2,
            request_id: 11,
            reason: ProtocolError::EmptyDependencyVector,
        });
        let json = serde_json::to_string(&rejected).unwrap();
        assert!(json.contains(r#""kind":"rejected""#));
        assert!(json.contains(r#""code":"empty_dependency_vector""#));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rejected);
    }

    #[test]
    fn test_request_id_defaults_when_absent() {
        let json = r#"{"kind":"client_request","client_id":4,"operation_type":"read","write_value":0,"dependency_vector":[0,0]}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(
            message,
            Message::ClientRequest(ClientRequest::read(4, VersionVector::zero(2)))
        );

        let request = ClientRequest::write(4, 9, VersionVector::zero(2)).with_request_id(6);
        let json = serde_json::to_string(&Message::ClientRequest(request)).unwrap();
        assert!(json.contains(r#""request_id":6"#));
    }
}
