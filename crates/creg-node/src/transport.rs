//! Transport abstraction and an in-memory implementation.

use crate::error::TransportError;
use async_trait::async_trait;
use creg_core::ReplicaId;
use creg_replica::{ClientId, Destination, Message};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Moves messages to replicas and clients.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a message to a replica.
    async fn send_to_replica(
        &self,
        replica: ReplicaId,
        message: Message,
    ) -> Result<(), TransportError>;

    /// Send a message to a client.
    async fn send_to_client(&self, client: ClientId, message: Message)
        -> Result<(), TransportError>;

    /// Route a message by its destination.
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        match message.destination() {
            Some(Destination::Replica(replica)) => self.send_to_replica(replica, message).await,
            Some(Destination::Client(client)) => self.send_to_client(client, message).await,
            None => Err(TransportError::NoDestination),
        }
    }
}

type Mailboxes<K> = Arc<RwLock<HashMap<K, mpsc::Sender<Message>>>>;

/// In-process network of replica and client mailboxes, for tests and demos.
///
/// Cloning shares the same mailboxes.
#[derive(Clone)]
pub struct MemoryNetwork {
    capacity: usize,
    replicas: Mailboxes<ReplicaId>,
    clients: Mailboxes<ClientId>,
    isolated: Arc<RwLock<BTreeSet<ReplicaId>>>,
}

impl MemoryNetwork {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            replicas: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            isolated: Arc::new(RwLock::new(BTreeSet::new())),
        }
    }

    /// Create the inbound mailbox for `replica`, replacing any previous one.
    pub fn register_replica(&self, replica: ReplicaId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.replicas.write().insert(replica, tx);
        rx
    }

    /// Create the reply mailbox for `client`, replacing any previous one.
    pub fn register_client(&self, client: ClientId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.clients.write().insert(client, tx);
        rx
    }

    /// Drop gossip to and from `replica` until [`MemoryNetwork::heal`].
    /// Client traffic still flows.
    pub fn isolate(&self, replica: ReplicaId) {
        self.isolated.write().insert(replica);
    }

    pub fn heal(&self) {
        self.isolated.write().clear();
    }

    fn is_cut(&self, to: ReplicaId, message: &Message) -> bool {
        let isolated = self.isolated.read();
        isolated.contains(&to)
            || message
                .source_replica()
                .is_some_and(|from| isolated.contains(&from))
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new(1024)
    }
}

async fn deliver<K: std::hash::Hash + Eq>(
    mailboxes: &Mailboxes<K>,
    key: &K,
    message: Message,
) -> Result<bool, TransportError> {
    let tx = {
        let mailboxes = mailboxes.read();
        mailboxes.get(key).cloned()
    };
    match tx {
        Some(tx) => {
            tx.send(message)
                .await
                .map_err(|_| TransportError::Disconnected)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn send_to_replica(
        &self,
        replica: ReplicaId,
        message: Message,
    ) -> Result<(), TransportError> {
        if message.source_replica().is_some() && self.is_cut(replica, &message) {
            return Err(TransportError::SendFailed(format!(
                "replica {} is partitioned",
                replica
            )));
        }
        if deliver(&self.replicas, &replica, message).await? {
            Ok(())
        } else {
            Err(TransportError::PeerNotFound(replica))
        }
    }

    async fn send_to_client(
        &self,
        client: ClientId,
        message: Message,
    ) -> Result<(), TransportError> {
        if deliver(&self.clients, &client, message).await? {
            Ok(())
        } else {
            Err(TransportError::ClientNotFound(client))
        }
    }
}
