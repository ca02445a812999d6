//! Causal Register node - async driver, transports and clients
//!
//! The replica protocol itself lives in `creg-replica` and never touches the
//! network. This crate runs it:
//!
//! - [`node`] - a [`ReplicaNode`] owning one replica's state behind a mutex,
//!   with an inbound loop and a gossip timer
//! - [`transport`] - the [`Transport`] trait and an in-memory network
//! - [`tcp`] - newline-delimited JSON over TCP, for real deployments
//! - [`client`] - an async [`SessionClient`] that tracks session guarantees
//! - [`config`] - node settings and the shared cluster file
//!
//! # Example
//!
//! ```rust
//! use creg_node::prelude::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let network = MemoryNetwork::new(64);
//! let config = NodeConfigBuilder::new().replica(0, 1).build().unwrap();
//! let node = Arc::new(ReplicaNode::new(config.clone(), Arc::new(network.clone())).unwrap());
//! let handle = node.spawn(network.register_replica(0));
//!
//! let mut client =
//!     SessionClient::connect_memory(&network, 7, SessionSemantic::ReadYourWrites, &config);
//! client.write(0, 42).await.unwrap();
//! assert_eq!(client.read(0).await.unwrap().data, 42);
//!
//! handle.shutdown().await;
//! # });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod tcp;
pub mod transport;

pub use client::SessionClient;
pub use config::{ClusterConfig, NodeConfig, NodeConfigBuilder, ServerEntry};
pub use error::{NodeError, Result, TransportError};
pub use node::{NodeHandle, ReplicaNode};
pub use tcp::{accept_loop, bind_and_serve, serve, TcpClientTransport, TcpTransport};
pub use transport::{MemoryNetwork, Transport};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::SessionClient;
    pub use crate::config::{ClusterConfig, NodeConfig, NodeConfigBuilder};
    pub use crate::error::NodeError;
    pub use crate::node::{NodeHandle, ReplicaNode};
    pub use crate::transport::{MemoryNetwork, Transport};
    pub use creg_replica::{SessionSemantic, ServerReply};
}
