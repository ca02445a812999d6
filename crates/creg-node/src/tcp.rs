//! TCP transport: one JSON message per line.
//!
//! A replica accepts connections from peers and clients alike. Peers are
//! dialed lazily on first send and the writer is cached by replica id; a
//! writer that fails is evicted so the next send redials. A client's
//! connection is remembered the first time one of its requests arrives, and
//! replies go back over it until that connection closes.

use crate::config::ClusterConfig;
use crate::error::{Result, TransportError};
use crate::node::{NodeHandle, ReplicaNode};
use crate::transport::Transport;
use async_trait::async_trait;
use creg_core::ReplicaId;
use creg_replica::{ClientId, Message};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// Encode `message` as a single line.
pub fn encode_line(message: &Message) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

pub fn decode_line(line: &str) -> Result<Message> {
    Ok(serde_json::from_str(line.trim_end())?)
}

async fn write_message(writer: &SharedWriter, message: &Message) -> std::result::Result<(), TransportError> {
    let line = encode_line(message).map_err(|e| TransportError::SendFailed(e.to_string()))?;
    let mut writer = writer.lock().await;
    writer
        .write_all(&line)
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Insert `writer` unless `key` already has one; return the one in the table.
fn insert_if_absent<K: std::hash::Hash + Eq>(
    table: &RwLock<HashMap<K, SharedWriter>>,
    key: K,
    writer: SharedWriter,
) -> SharedWriter {
    Arc::clone(table.write().entry(key).or_insert(writer))
}

/// Transport used by a replica node.
pub struct TcpTransport {
    local: ReplicaId,
    cluster: ClusterConfig,
    peers: RwLock<HashMap<ReplicaId, SharedWriter>>,
    clients: RwLock<HashMap<ClientId, SharedWriter>>,
}

impl TcpTransport {
    pub fn new(local: ReplicaId, cluster: ClusterConfig) -> Self {
        Self {
            local,
            cluster,
            peers: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> ReplicaId {
        self.local
    }

    /// Remember where `client`'s replies go. The first connection wins.
    fn register_client(&self, client: ClientId, writer: SharedWriter) {
        insert_if_absent(&self.clients, client, writer);
    }

    /// Forget every client whose replies went over `writer`.
    fn release_connection(&self, writer: &SharedWriter) {
        self.clients.write().retain(|_, w| !Arc::ptr_eq(w, writer));
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.read().len()
    }

    pub fn connected_peers(&self) -> usize {
        self.peers.read().len()
    }

    async fn peer_writer(&self, replica: ReplicaId) -> std::result::Result<SharedWriter, TransportError> {
        let cached = self.peers.read().get(&replica).cloned();
        if let Some(writer) = cached {
            return Ok(writer);
        }
        let addr = self
            .cluster
            .address(replica)
            .map_err(|_| TransportError::PeerNotFound(replica))?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::SendFailed(format!("dial {}: {}", addr, e)))?;
        stream.set_nodelay(true).ok();
        let (_, write) = stream.into_split();
        debug!(replica = self.local, peer = replica, %addr, "dialed peer");
        Ok(insert_if_absent(
            &self.peers,
            replica,
            Arc::new(tokio::sync::Mutex::new(write)),
        ))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send_to_replica(
        &self,
        replica: ReplicaId,
        message: Message,
    ) -> std::result::Result<(), TransportError> {
        let writer = self.peer_writer(replica).await?;
        let result = write_message(&writer, &message).await;
        if result.is_err() {
            let mut peers = self.peers.write();
            if peers.get(&replica).is_some_and(|w| Arc::ptr_eq(w, &writer)) {
                peers.remove(&replica);
            }
        }
        result
    }

    async fn send_to_client(
        &self,
        client: ClientId,
        message: Message,
    ) -> std::result::Result<(), TransportError> {
        let writer = self
            .clients
            .read()
            .get(&client)
            .cloned()
            .ok_or(TransportError::ClientNotFound(client))?;
        write_message(&writer, &message).await
    }
}

/// Read lines from one accepted connection into the node's inbound channel.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    transport: Arc<TcpTransport>,
    inbound: mpsc::Sender<Message>,
) {
    stream.set_nodelay(true).ok();
    let (read, write) = stream.into_split();
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(write));
    let mut lines = BufReader::new(read).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let message = match decode_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, error = %e, "dropping undecodable line");
                continue;
            }
        };
        if let Message::ClientRequest(request) = &message {
            transport.register_client(request.client_id, Arc::clone(&writer));
        }
        if inbound.send(message).await.is_err() {
            break;
        }
    }
    transport.release_connection(&writer);
    debug!(%peer, "connection closed");
}

/// Accept connections until the listener fails.
pub async fn accept_loop(
    listener: TcpListener,
    transport: Arc<TcpTransport>,
    inbound: mpsc::Sender<Message>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(
                    stream,
                    peer,
                    Arc::clone(&transport),
                    inbound.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        }
    }
}

/// Start `node` on `listener`: accept loop, inbound loop and gossip timer.
pub fn serve(node: Arc<ReplicaNode<TcpTransport>>, listener: TcpListener) -> NodeHandle {
    let (tx, rx) = mpsc::channel(node.config().channel_capacity);
    let transport = Arc::clone(node.transport());
    if let Ok(addr) = listener.local_addr() {
        info!(replica = node.id(), %addr, "listening");
    }
    let mut handle = node.spawn(rx);
    handle.push(tokio::spawn(accept_loop(listener, transport, tx)));
    handle
}

/// Bind the address the cluster file lists for `replica` and serve it.
pub async fn bind_and_serve(
    node: Arc<ReplicaNode<TcpTransport>>,
    cluster: &ClusterConfig,
) -> Result<NodeHandle> {
    let addr = cluster.address(node.id())?;
    let listener = TcpListener::bind(addr).await?;
    Ok(serve(node, listener))
}

/// Client side of the TCP protocol: dials replicas lazily and forwards every
/// line they send back into one reply channel.
pub struct TcpClientTransport {
    cluster: ClusterConfig,
    servers: RwLock<HashMap<ReplicaId, SharedWriter>>,
    replies: mpsc::Sender<Message>,
}

impl TcpClientTransport {
    pub fn new(cluster: ClusterConfig, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let transport = Self {
            cluster,
            servers: RwLock::new(HashMap::new()),
            replies: tx,
        };
        (transport, rx)
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    async fn server_writer(&self, replica: ReplicaId) -> std::result::Result<SharedWriter, TransportError> {
        let cached = self.servers.read().get(&replica).cloned();
        if let Some(writer) = cached {
            return Ok(writer);
        }
        let addr = self
            .cluster
            .address(replica)
            .map_err(|_| TransportError::PeerNotFound(replica))?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::SendFailed(format!("dial {}: {}", addr, e)))?;
        stream.set_nodelay(true).ok();
        let (read, write) = stream.into_split();
        tokio::spawn(forward_replies(read, addr, self.replies.clone()));
        Ok(insert_if_absent(
            &self.servers,
            replica,
            Arc::new(tokio::sync::Mutex::new(write)),
        ))
    }
}

async fn forward_replies(read: OwnedReadHalf, addr: SocketAddr, replies: mpsc::Sender<Message>) {
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match decode_line(&line) {
            Ok(message) => {
                if replies.send(message).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(%addr, error = %e, "dropping undecodable reply"),
        }
    }
    debug!(%addr, "server connection closed");
}

#[async_trait]
impl Transport for TcpClientTransport {
    async fn send_to_replica(
        &self,
        replica: ReplicaId,
        message: Message,
    ) -> std::result::Result<(), TransportError> {
        let writer = self.server_writer(replica).await?;
        let result = write_message(&writer, &message).await;
        if result.is_err() {
            self.servers.write().remove(&replica);
        }
        result
    }

    async fn send_to_client(
        &self,
        client: ClientId,
        _message: Message,
    ) -> std::result::Result<(), TransportError> {
        Err(TransportError::ClientNotFound(client))
    }
}
