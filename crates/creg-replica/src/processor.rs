//! The request processor: one inbound message in, outbound messages out.
//!
//! [`process`] is the whole replica protocol. It mutates the [`ReplicaState`]
//! it is given and returns the messages to send, and it never performs I/O,
//! so every transition can be driven directly from tests.

use crate::error::ProtocolError;
use crate::message::{
    ClientRequest, GossipAck, GossipPush, Message, OperationType, Rejection, ServerReply,
};
use crate::state::ReplicaState;
use tracing::{debug, warn};

impl ReplicaState {
    /// Run one message through the processor.
    pub fn handle(&mut self, message: Message) -> Vec<Message> {
        process(self, message)
    }
}

/// Apply `message` to `state`, returning the outbound messages.
pub fn process(state: &mut ReplicaState, message: Message) -> Vec<Message> {
    match message {
        Message::ClientRequest(request) => on_client_request(state, request),
        Message::GossipPush(push) => on_gossip_push(state, push),
        Message::GossipAck(ack) => {
            on_gossip_ack(state, &ack);
            Vec::new()
        }
        Message::GossipTick => on_gossip_tick(state),
        Message::ServerReply(_) | Message::Rejected(_) => {
            debug!(replica = state.id, "ignoring client-bound message");
            Vec::new()
        }
    }
}

/// A request is well-formed when its dependency vector has one component per
/// replica.
pub fn validate_request(state: &ReplicaState, request: &ClientRequest) -> Result<(), ProtocolError> {
    let found = request.dependency_vector.len();
    if found == 0 {
        return Err(ProtocolError::EmptyDependencyVector);
    }
    if found != state.replica_count {
        return Err(ProtocolError::DependencyLengthMismatch {
            expected: state.replica_count,
            found,
        });
    }
    Ok(())
}

fn on_client_request(state: &mut ReplicaState, request: ClientRequest) -> Vec<Message> {
    if let Err(reason) = validate_request(state, &request) {
        warn!(
            replica = state.id,
            client = request.client_id,
            %reason,
            "rejecting malformed client request"
        );
        return vec![Message::Rejected(Rejection {
            client_id: request.client_id,
            replying_replica: state.id,
            request_id: request.request_id,
            reason,
        })];
    }

    match try_serve(state, &request) {
        Some(reply) => vec![reply],
        None => {
            state.park(request);
            Vec::new()
        }
    }
}

/// Serve `request` if the clock dominates its dependencies.
fn try_serve(state: &mut ReplicaState, request: &ClientRequest) -> Option<Message> {
    if !state.vector_clock.dominates(&request.dependency_vector) {
        return None;
    }

    let (data, version_vector) = match request.operation_type {
        OperationType::Read => (state.current_value(), state.vector_clock.clone()),
        OperationType::Write => {
            let clock = state.apply_local_write(request.write_value);
            (request.write_value, clock)
        }
    };

    Some(Message::ServerReply(ServerReply {
        operation_type: request.operation_type,
        data,
        version_vector,
        replying_replica: state.id,
        client_id: request.client_id,
        request_id: request.request_id,
    }))
}

fn on_gossip_push(state: &mut ReplicaState, push: GossipPush) -> Vec<Message> {
    if push.operations.is_empty() {
        return Vec::new();
    }

    state.receive_operations(push.operations);

    let mut outbound = vec![Message::GossipAck(GossipAck {
        from_replica: state.id,
        to_replica: push.from_replica,
        acked_index: push.high_water_index,
    })];
    outbound.extend(retry_unsatisfied(state));
    outbound
}

/// Re-check parked requests in arrival order; the ones still blocked stay
/// parked.
fn retry_unsatisfied(state: &mut ReplicaState) -> Vec<Message> {
    let parked = std::mem::take(&mut state.unsatisfied_requests);
    let mut replies = Vec::new();
    for entry in parked {
        match try_serve(state, &entry.request) {
            Some(reply) => replies.push(reply),
            None => state.unsatisfied_requests.push(entry),
        }
    }
    replies
}

fn on_gossip_ack(state: &mut ReplicaState, ack: &GossipAck) {
    if !state.acknowledge(ack.from_replica, ack.acked_index) {
        debug!(
            replica = state.id,
            peer = ack.from_replica,
            "ignoring ack from unknown peer"
        );
    }
}

fn on_gossip_tick(state: &mut ReplicaState) -> Vec<Message> {
    state.ticks += 1;
    let mut outbound = expire_parked(state);

    let high_water_index = state.my_operations.len();
    for peer in (0..state.replica_count).filter(|&peer| peer != state.id) {
        let suffix = state.unacked_suffix(peer);
        if suffix.is_empty() {
            continue;
        }
        outbound.push(Message::GossipPush(GossipPush {
            from_replica: state.id,
            to_replica: peer,
            operations: suffix.to_vec(),
            high_water_index,
        }));
    }
    outbound
}

/// Reject parked requests that have outlived the TTL.
fn expire_parked(state: &mut ReplicaState) -> Vec<Message> {
    let Some(ttl) = state.request_ttl_ticks else {
        return Vec::new();
    };

    let now = state.ticks;
    let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.unsatisfied_requests)
        .into_iter()
        .partition(|entry| now.saturating_sub(entry.parked_at) > ttl);
    state.unsatisfied_requests = waiting;

    expired
        .into_iter()
        .map(|entry| {
            warn!(
                replica = state.id,
                client = entry.request.client_id,
                dependency = %entry.request.dependency_vector,
                "parked request expired"
            );
            Message::Rejected(Rejection {
                client_id: entry.request.client_id,
                replying_replica: state.id,
                request_id: entry.request.request_id,
                reason: ProtocolError::RequestExpired { ticks: ttl },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use creg_core::VersionVector;

    fn vv(counters: &[u64]) -> VersionVector {
        VersionVector::from_counters(counters.to_vec())
    }

    fn reply(messages: &[Message]) -> &ServerReply {
        match messages {
            [Message::ServerReply(reply)] => reply,
            other => panic!("expected a single reply, got {:?}", other),
        }
    }

    #[test]
    fn test_write_then_read_single_replica() {
        let mut state = ReplicaState::new(0, 1);

        let out = state.handle(Message::ClientRequest(ClientRequest::write(1, 10, vv(&[0]))));
        let written = reply(&out);
        assert_eq!(written.operation_type, OperationType::Write);
        assert_eq!(written.version_vector, vv(&[1]));
        assert_eq!(written.client_id, 1);

        let out = state.handle(Message::ClientRequest(ClientRequest::read(1, vv(&[0]))));
        let read = reply(&out);
        assert_eq!(read.data, 10);
        assert_eq!(read.version_vector, vv(&[1]));
    }

    #[test]
    fn test_empty_dependency_vector_is_rejected() {
        let mut state = ReplicaState::new(0, 2);
        let out = state.handle(Message::ClientRequest(ClientRequest::read(
            9,
            VersionVector::default(),
        )));
        assert_eq!(
            out,
            vec![Message::Rejected(Rejection {
                client_id: 9,
                replying_replica: 0,
                request_id: 0,
                reason: ProtocolError::EmptyDependencyVector,
            })]
        );
        assert!(state.unsatisfied_requests().is_empty());
    }

    #[test]
    fn test_wrong_width_dependency_vector_is_rejected() {
        let mut state = ReplicaState::new(0, 2);
        let out = state.handle(Message::ClientRequest(ClientRequest::write(9, 1, vv(&[0, 0, 0]))));
        assert!(matches!(
            out.as_slice(),
            [Message::Rejected(Rejection {
                reason: ProtocolError::DependencyLengthMismatch { expected: 2, found: 3 },
                ..
            })]
        ));
        assert_eq!(state.clock(), &vv(&[0, 0]));
    }

    #[test]
    fn test_unsatisfied_request_is_parked_then_served_after_gossip() {
        let mut state = ReplicaState::new(1, 2);
        let out = state.handle(Message::ClientRequest(ClientRequest::read(5, vv(&[1, 0]))));
        assert!(out.is_empty());
        assert_eq!(state.unsatisfied_requests().len(), 1);

        let out = state.handle(Message::GossipPush(GossipPush {
            from_replica: 0,
            to_replica: 1,
            operations: vec![creg_core::Operation::new(vv(&[1, 0]), 42)],
            high_water_index: 1,
        }));

        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0],
            Message::GossipAck(GossipAck {
                from_replica: 1,
                to_replica: 0,
                acked_index: 1,
            })
        );
        match &out[1] {
            Message::ServerReply(reply) => {
                assert_eq!(reply.client_id, 5);
                assert_eq!(reply.data, 42);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(state.unsatisfied_requests().is_empty());
    }

    #[test]
    fn test_empty_push_is_a_no_op() {
        let mut state = ReplicaState::new(1, 2);
        let out = state.handle(Message::GossipPush(GossipPush {
            from_replica: 0,
            to_replica: 1,
            operations: Vec::new(),
            high_water_index: 0,
        }));
        assert!(out.is_empty());
    }

    #[test]
    fn test_tick_pushes_unacked_suffix_to_each_peer() {
        let mut state = ReplicaState::new(0, 3);
        state.handle(Message::ClientRequest(ClientRequest::write(1, 1, vv(&[0, 0, 0]))));
        state.handle(Message::ClientRequest(ClientRequest::write(1, 2, vv(&[0, 0, 0]))));
        state.handle(Message::GossipAck(GossipAck {
            from_replica: 2,
            to_replica: 0,
            acked_index: 1,
        }));

        let out = state.handle(Message::GossipTick);
        assert_eq!(out.len(), 2);
        for message in &out {
            let Message::GossipPush(push) = message else {
                panic!("expected gossip, got {:?}", message);
            };
            assert_eq!(push.high_water_index, 2);
            match push.to_replica {
                1 => assert_eq!(push.operations.len(), 2),
                2 => assert_eq!(push.operations.len(), 1),
                other => panic!("pushed to {}", other),
            }
        }

        // Fully acknowledged peers get nothing.
        for peer in [1, 2] {
            state.handle(Message::GossipAck(GossipAck {
                from_replica: peer,
                to_replica: 0,
                acked_index: 2,
            }));
        }
        assert!(state.handle(Message::GossipTick).is_empty());
    }

    #[test]
    fn test_parked_request_expires_after_ttl() {
        let mut state = ReplicaState::new(0, 2).with_request_ttl(Some(2));
        state.handle(Message::ClientRequest(
            ClientRequest::read(3, vv(&[0, 1])).with_request_id(8),
        ));

        assert!(state.handle(Message::GossipTick).is_empty());
        assert!(state.handle(Message::GossipTick).is_empty());
        let out = state.handle(Message::GossipTick);
        assert_eq!(
            out,
            vec![Message::Rejected(Rejection {
                client_id: 3,
                replying_replica: 0,
                request_id: 8,
                reason: ProtocolError::RequestExpired { ticks: 2 },
            })]
        );
        assert!(state.unsatisfied_requests().is_empty());
    }

    #[test]
    fn test_parked_request_without_ttl_waits() {
        let mut state = ReplicaState::new(0, 2);
        state.handle(Message::ClientRequest(ClientRequest::read(3, vv(&[0, 1]))));
        for _ in 0..100 {
            assert!(state.handle(Message::GossipTick).is_empty());
        }
        assert_eq!(state.unsatisfied_requests().len(), 1);
    }
}
