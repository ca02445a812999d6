//! The replica driver.
//!
//! A [`ReplicaNode`] owns one [`ReplicaState`] behind a single mutex. Inbound
//! messages and gossip ticks go through the same path: lock, run the
//! processor, unlock, then hand the outbound batch to a spawned task. The lock
//! is never held across an `.await`.

use crate::config::NodeConfig;
use crate::error::Result;
use crate::transport::Transport;
use creg_core::{ReplicaId, Value, VersionVector};
use creg_replica::{Message, ReplicaState};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Drives one replica over a transport.
pub struct ReplicaNode<T: Transport> {
    config: NodeConfig,
    state: Arc<Mutex<ReplicaState>>,
    transport: Arc<T>,
}

impl<T: Transport> ReplicaNode<T> {
    pub fn new(config: NodeConfig, transport: Arc<T>) -> Result<Self> {
        config.validate()?;
        let state = ReplicaState::new(config.replica_id, config.replica_count)
            .with_request_ttl(config.request_ttl_ticks);
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(state)),
            transport,
        })
    }

    pub fn id(&self) -> ReplicaId {
        self.config.replica_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Read the state under the lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&ReplicaState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn clock(&self) -> VersionVector {
        self.with_state(|state| state.clock().clone())
    }

    pub fn current_value(&self) -> Value {
        self.with_state(|state| state.current_value())
    }

    /// Run `message` through the processor and send whatever it produces.
    ///
    /// Returns the task sending the outbound batch, if there was one.
    pub fn dispatch(&self, message: Message) -> Option<JoinHandle<()>> {
        let outbound = {
            let mut state = self.state.lock();
            state.handle(message)
        };
        self.send_all(outbound)
    }

    /// Fire the gossip timer once.
    pub fn tick(&self) -> Option<JoinHandle<()>> {
        self.dispatch(Message::GossipTick)
    }

    fn send_all(&self, outbound: Vec<Message>) -> Option<JoinHandle<()>> {
        if outbound.is_empty() {
            return None;
        }
        let transport = Arc::clone(&self.transport);
        let replica = self.id();
        Some(tokio::spawn(async move {
            for message in outbound {
                let kind = message.kind();
                if let Err(e) = transport.send(message).await {
                    warn!(replica, kind, error = %e, "dropping outbound message");
                }
            }
        }))
    }

    /// Feed every inbound message to the processor until the channel closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<Message>) {
        while let Some(message) = inbound.recv().await {
            debug!(replica = self.id(), kind = message.kind(), "inbound");
            self.dispatch(message);
        }
        debug!(replica = self.id(), "inbound channel closed");
    }

    /// Tick forever at the configured gossip interval.
    pub async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.tick();
        }
    }

    /// Start the inbound loop and the gossip timer.
    pub fn spawn(self: Arc<Self>, inbound: mpsc::Receiver<Message>) -> NodeHandle {
        info!(
            replica = self.id(),
            replicas = self.config.replica_count,
            gossip_interval_ms = self.config.gossip_interval_ms,
            "replica started"
        );
        let run = tokio::spawn(Arc::clone(&self).run(inbound));
        let gossip = tokio::spawn(self.gossip_loop());
        NodeHandle {
            tasks: vec![run, gossip],
        }
    }
}

/// Background tasks of a running node.
pub struct NodeHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Stop every task and wait for them to finish.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        join_all(self.tasks).await;
    }
}
