//! Async session client.
//!
//! Wraps a [`Session`] and a transport: each call sends one request to the
//! chosen replica, waits for its reply and folds the reply's vector into the
//! session.
//!
//! Replies are matched on the request's sequence number. A reply that turns
//! up after its request timed out is discarded instead of being taken as the
//! answer to whatever request is in flight.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result, TransportError};
use crate::transport::{MemoryNetwork, Transport};
use creg_core::{ReplicaId, Value};
use creg_replica::{ClientId, ClientRequest, Message, ServerReply, Session, SessionSemantic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// One client session talking to the cluster.
pub struct SessionClient<T: Transport> {
    session: Session,
    transport: Arc<T>,
    replies: mpsc::Receiver<Message>,
    reply_timeout: Duration,
}

impl SessionClient<MemoryNetwork> {
    /// Register a reply mailbox on `network` and start a session over it.
    ///
    /// The cluster size and reply timeout come from `config`.
    pub fn connect_memory(
        network: &MemoryNetwork,
        client_id: ClientId,
        semantic: SessionSemantic,
        config: &NodeConfig,
    ) -> Self {
        let replies = network.register_client(client_id);
        Self::new(
            Session::new(client_id, semantic, config.replica_count),
            Arc::new(network.clone()),
            replies,
            config.reply_timeout(),
        )
    }
}

impl<T: Transport> SessionClient<T> {
    pub fn new(
        session: Session,
        transport: Arc<T>,
        replies: mpsc::Receiver<Message>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            session,
            transport,
            replies,
            reply_timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn client_id(&self) -> ClientId {
        self.session.client_id()
    }

    pub fn semantic(&self) -> SessionSemantic {
        self.session.semantic()
    }

    /// Read the register at `replica`.
    pub async fn read(&mut self, replica: ReplicaId) -> Result<ServerReply> {
        let request = self.session.read_request();
        self.execute(replica, request).await
    }

    /// Write `value` at `replica`. The reply carries the write's vector.
    pub async fn write(&mut self, replica: ReplicaId, value: Value) -> Result<ServerReply> {
        let request = self.session.write_request(value);
        self.execute(replica, request).await
    }

    async fn execute(&mut self, replica: ReplicaId, request: ClientRequest) -> Result<ServerReply> {
        let client = request.client_id;
        let request_id = request.request_id;
        let operation_type = request.operation_type;
        self.transport
            .send_to_replica(replica, Message::ClientRequest(request))
            .await?;

        let deadline = tokio::time::Instant::now() + self.reply_timeout;
        loop {
            let message = tokio::time::timeout_at(deadline, self.replies.recv())
                .await
                .map_err(|_| NodeError::Timeout(self.reply_timeout.as_millis() as u64))?
                .ok_or(TransportError::Disconnected)?;
            match message {
                Message::ServerReply(reply)
                    if reply.client_id == client
                        && reply.request_id == request_id
                        && reply.operation_type == operation_type =>
                {
                    self.session.observe(&reply);
                    return Ok(reply);
                }
                Message::Rejected(rejection)
                    if rejection.client_id == client && rejection.request_id == request_id =>
                {
                    return Err(NodeError::Rejected(rejection.reason));
                }
                Message::ServerReply(stale) => {
                    debug!(
                        client,
                        expected = request_id,
                        got = stale.request_id,
                        "discarding reply to an abandoned request"
                    );
                }
                Message::Rejected(stale) => {
                    debug!(
                        client,
                        expected = request_id,
                        got = stale.request_id,
                        "discarding rejection of an abandoned request"
                    );
                }
                other => {
                    debug!(client, kind = other.kind(), "ignoring unexpected message");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfigBuilder;
    use crate::node::ReplicaNode;
    use creg_core::VersionVector;
    use creg_replica::{OperationType, ProtocolError};

    fn client_config(replica_count: usize, reply_timeout_ms: u64) -> NodeConfig {
        NodeConfigBuilder::new()
            .replica(0, replica_count)
            .reply_timeout(reply_timeout_ms)
            .build()
            .unwrap()
    }

    fn spawn_single(network: &MemoryNetwork) -> crate::node::NodeHandle {
        let config = NodeConfigBuilder::new().replica(0, 1).build().unwrap();
        let node = Arc::new(ReplicaNode::new(config, Arc::new(network.clone())).unwrap());
        let inbound = network.register_replica(0);
        node.spawn(inbound)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let network = MemoryNetwork::new(16);
        let handle = spawn_single(&network);
        let mut client = SessionClient::connect_memory(
            &network,
            1,
            SessionSemantic::Causal,
            &client_config(1, 1000),
        );

        let clock = client.write(0, 10).await.unwrap().version_vector;
        assert_eq!(clock, VersionVector::from_counters(vec![1]));
        assert_eq!(client.session().last_write(), &clock);

        let read = client.read(0).await.unwrap();
        assert_eq!(read.data, 10);
        assert_eq!(client.session().last_read(), &clock);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejection_surfaces_as_error() {
        let network = MemoryNetwork::new(16);
        let handle = spawn_single(&network);
        // Sessions sized for three replicas send vectors the node rejects.
        let mut client = SessionClient::connect_memory(
            &network,
            2,
            SessionSemantic::Eventual,
            &client_config(3, 1000),
        );

        match client.read(0).await {
            Err(NodeError::Rejected(ProtocolError::DependencyLengthMismatch {
                expected: 1,
                found: 3,
            })) => {}
            other => panic!("unexpected {:?}", other),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_replica() {
        let network = MemoryNetwork::new(16);
        let mut client = SessionClient::connect_memory(
            &network,
            1,
            SessionSemantic::Eventual,
            &client_config(2, 50),
        );
        assert!(matches!(
            client.read(1).await,
            Err(NodeError::Transport(TransportError::PeerNotFound(1)))
        ));
    }

    #[tokio::test]
    async fn test_timeout_when_nobody_answers() {
        let network = MemoryNetwork::new(16);
        let _inbound = network.register_replica(0);
        let mut client = SessionClient::connect_memory(
            &network,
            1,
            SessionSemantic::Eventual,
            &client_config(1, 20),
        );
        assert!(matches!(client.read(0).await, Err(NodeError::Timeout(20))));
    }

    #[tokio::test]
    async fn test_stale_reply_is_not_taken_for_the_next_one() {
        let network = MemoryNetwork::new(16);
        let handle = spawn_single(&network);
        let mut client = SessionClient::connect_memory(
            &network,
            4,
            SessionSemantic::Causal,
            &client_config(1, 1000),
        );

        // A late answer to an earlier read sits in the mailbox first.
        network
            .send_to_client(
                4,
                Message::ServerReply(ServerReply {
                    operation_type: OperationType::Read,
                    data: 99,
                    version_vector: VersionVector::from_counters(vec![7]),
                    replying_replica: 0,
                    client_id: 4,
                    request_id: 0,
                }),
            )
            .await
            .unwrap();

        let reply = client.write(0, 5).await.unwrap();
        assert_eq!(reply.operation_type, OperationType::Write);
        assert_eq!(reply.request_id, client.session().last_request_id());
        assert_eq!(reply.version_vector, VersionVector::from_counters(vec![1]));
        assert_eq!(client.session().last_read(), &VersionVector::zero(1));
        assert_eq!(client.session().last_write(), &reply.version_vector);

        handle.shutdown().await;
    }
}
