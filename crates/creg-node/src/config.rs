//! Node and cluster configuration.

use crate::error::{NodeError, Result};
use creg_core::ReplicaId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Configuration for one replica node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    /// This replica's index in the cluster.
    pub replica_id: ReplicaId,
    /// Number of replicas; every vector has this many components.
    pub replica_count: usize,
    /// How often the gossip timer fires (in milliseconds).
    pub gossip_interval_ms: u64,
    /// Gossip ticks a parked request may wait before it is rejected.
    /// `None` waits forever.
    pub request_ttl_ticks: Option<u64>,
    /// Capacity of inbound and reply channels.
    pub channel_capacity: usize,
    /// How long a client waits for a reply (in milliseconds).
    pub reply_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            replica_id: 0,
            replica_count: 1,
            gossip_interval_ms: 50,
            request_ttl_ticks: Some(500),
            channel_capacity: 1024,
            reply_timeout_ms: 5000,
        }
    }
}

impl NodeConfig {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_count == 0 {
            return Err(NodeError::Config("replica_count must be positive".into()));
        }
        if self.replica_id >= self.replica_count {
            return Err(NodeError::Config(format!(
                "replica_id {} outside a cluster of {}",
                self.replica_id, self.replica_count
            )));
        }
        if self.gossip_interval_ms == 0 {
            return Err(NodeError::Config("gossip_interval_ms must be positive".into()));
        }
        if self.channel_capacity == 0 {
            return Err(NodeError::Config("channel_capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn replica(mut self, id: ReplicaId, count: usize) -> Self {
        self.config.replica_id = id;
        self.config.replica_count = count;
        self
    }

    pub fn gossip_interval(mut self, ms: u64) -> Self {
        self.config.gossip_interval_ms = ms;
        self
    }

    pub fn request_ttl(mut self, ticks: Option<u64>) -> Self {
        self.config.request_ttl_ticks = ticks;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn reply_timeout(mut self, ms: u64) -> Self {
        self.config.reply_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Result<NodeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One replica's listening endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub network: String,
    pub address: String,
}

/// The `{"servers": [...]}` file shared by every node and client.
///
/// Replica ids are positions in `servers`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub servers: Vec<ServerEntry>,
}

impl ClusterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClusterConfig = serde_json::from_str(json)?;
        if config.servers.is_empty() {
            return Err(NodeError::Config("cluster has no servers".into()));
        }
        if let Some(entry) = config.servers.iter().find(|s| s.network != "tcp") {
            return Err(NodeError::Config(format!(
                "unsupported network {:?} for {}",
                entry.network, entry.address
            )));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// `count` replicas on consecutive loopback ports.
    pub fn localhost(count: usize, base_port: u16) -> Self {
        Self {
            servers: (0..count)
                .map(|i| ServerEntry {
                    network: "tcp".to_string(),
                    address: format!("127.0.0.1:{}", base_port as usize + i),
                })
                .collect(),
        }
    }

    /// Shift every port by `offset`, so several clusters can share a host.
    pub fn with_port_offset(mut self, offset: u16) -> Result<Self> {
        for entry in &mut self.servers {
            let addr: SocketAddr = entry
                .address
                .parse()
                .map_err(|e| NodeError::Config(format!("bad address {}: {}", entry.address, e)))?;
            let port = addr.port().checked_add(offset).ok_or_else(|| {
                NodeError::Config(format!("port offset {} overflows {}", offset, entry.address))
            })?;
            entry.address = SocketAddr::new(addr.ip(), port).to_string();
        }
        Ok(self)
    }

    pub fn replica_count(&self) -> usize {
        self.servers.len()
    }

    pub fn address(&self, replica: ReplicaId) -> Result<SocketAddr> {
        let entry = self
            .servers
            .get(replica)
            .ok_or(NodeError::UnknownReplica(replica))?;
        entry
            .address
            .parse()
            .map_err(|e| NodeError::Config(format!("bad address {}: {}", entry.address, e)))
    }

    /// Node settings for `replica` with every other knob at its default.
    pub fn node_config(&self, replica: ReplicaId) -> Result<NodeConfig> {
        NodeConfigBuilder::new()
            .replica(replica, self.replica_count())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_builder() {
        let config = NodeConfigBuilder::new()
            .replica(2, 3)
            .gossip_interval(10)
            .request_ttl(None)
            .channel_capacity(16)
            .reply_timeout(250)
            .build()
            .unwrap();

        assert_eq!(config.replica_id, 2);
        assert_eq!(config.replica_count, 3);
        assert_eq!(config.gossip_interval(), Duration::from_millis(10));
        assert_eq!(config.request_ttl_ticks, None);
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.reply_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_node_config() {
        assert!(NodeConfigBuilder::new().replica(3, 3).build().is_err());
        assert!(NodeConfigBuilder::new().replica(0, 0).build().is_err());
        assert!(NodeConfigBuilder::new().gossip_interval(0).build().is_err());
    }

    #[test]
    fn test_cluster_config_from_json() {
        let json = r#"{"servers":[
            {"network":"tcp","address":"127.0.0.1:7000"},
            {"network":"tcp","address":"127.0.0.1:7001"}
        ]}"#;
        let config = ClusterConfig::from_json(json).unwrap().with_port_offset(100).unwrap();

        assert_eq!(config.replica_count(), 2);
        assert_eq!(config.address(1).unwrap(), "127.0.0.1:7101".parse().unwrap());
        assert!(matches!(config.address(2), Err(NodeError::UnknownReplica(2))));
        assert_eq!(config.node_config(1).unwrap().replica_count, 2);
    }

    #[test]
    fn test_cluster_config_rejects_bad_input() {
        assert!(ClusterConfig::from_json(r#"{"servers":[]}"#).is_err());
        assert!(ClusterConfig::from_json(r#"{"servers":[{"network":"udp","address":"x"}]}"#).is_err());
        assert!(ClusterConfig::from_json("not json").is_err());
        assert!(ClusterConfig::localhost(1, 65535).with_port_offset(1).is_err());
    }

    #[test]
    fn test_localhost_cluster() {
        let config = ClusterConfig::localhost(3, 7000);
        assert_eq!(config.address(2).unwrap().port(), 7002);
    }
}
