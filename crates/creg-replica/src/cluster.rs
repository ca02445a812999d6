//! A deterministic, single-threaded cluster for exercising the protocol.
//!
//! Replicas talk through a [`SimulatedNetwork`] that can lose, duplicate and
//! reorder messages. Nothing is delivered until the caller drains the network,
//! so tests control exactly which gossip has been seen where.

use crate::message::{ClientId, ClientRequest, Destination, Message};
use crate::state::ReplicaState;
use creg_core::ReplicaId;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// How badly the simulated network treats gossip.
///
/// Only replica-to-replica traffic (pushes and acks) is affected; client
/// requests and replies bypass the network entirely.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Chance that a push or ack is dropped. Dropped messages are kept aside
    /// for [`SimulatedNetwork::retransmit_lost`].
    pub loss_rate: f64,
    /// Chance that a push or ack is delivered twice.
    pub dup_rate: f64,
    /// Chance that a message is delivered before everything already queued,
    /// e.g. an ack overtaking the push it answers or a later push overtaking
    /// an earlier one.
    pub reorder_rate: f64,
}

impl NetworkConfig {
    /// Gossip is dropped with probability `loss_rate` and otherwise delivered
    /// in order.
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    /// Loss, duplication and reordering together.
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.1,
            dup_rate: 0.2,
            reorder_rate: 0.3,
        }
    }
}

/// Replica-to-replica messages in flight.
#[derive(Debug)]
pub struct SimulatedNetwork {
    in_flight: VecDeque<Message>,
    lost: Vec<Message>,
    config: NetworkConfig,
    isolated: BTreeSet<ReplicaId>,
    rng_state: u64,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            in_flight: VecDeque::new(),
            lost: Vec::new(),
            config,
            isolated: BTreeSet::new(),
            rng_state: 0x5eed,
        }
    }

    /// Next fault decision in `[0, 1)`. The stream is fixed by the seed so a
    /// failing schedule replays exactly (splitmix64).
    fn next_random(&mut self) -> f64 {
        self.rng_state = self.rng_state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.rng_state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        (z >> 11) as f64 / (1u64 << 53) as f64
    }

    fn is_cut(&self, msg: &Message) -> bool {
        let to = match msg.destination() {
            Some(Destination::Replica(id)) => Some(id),
            _ => None,
        };
        [msg.source_replica(), to]
            .into_iter()
            .flatten()
            .any(|id| self.isolated.contains(&id))
    }

    pub fn send(&mut self, msg: Message) {
        if self.is_cut(&msg) || self.next_random() < self.config.loss_rate {
            self.lost.push(msg);
            return;
        }
        if self.next_random() < self.config.dup_rate {
            self.in_flight.push_back(msg.clone());
        }
        if self.next_random() < self.config.reorder_rate {
            self.in_flight.push_front(msg);
        } else {
            self.in_flight.push_back(msg);
        }
    }

    pub fn receive(&mut self) -> Option<Message> {
        self.in_flight.pop_front()
    }

    /// Requeue everything that was lost. Messages still crossing a partition
    /// are lost again.
    pub fn retransmit_lost(&mut self) {
        let lost = std::mem::take(&mut self.lost);
        for msg in lost {
            self.send(msg);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn lost_count(&self) -> usize {
        self.lost.len()
    }
}

/// A whole cluster of replica state machines plus their network.
#[derive(Debug)]
pub struct Cluster {
    replicas: Vec<ReplicaState>,
    network: SimulatedNetwork,
    client_inbox: HashMap<ClientId, Vec<Message>>,
}

impl Cluster {
    /// Create a cluster of `n` replicas over a perfect network.
    pub fn new(n: usize) -> Self {
        Self::with_network(n, NetworkConfig::default())
    }

    pub fn with_network(n: usize, config: NetworkConfig) -> Self {
        Self {
            replicas: (0..n).map(|id| ReplicaState::new(id, n)).collect(),
            network: SimulatedNetwork::new(config),
            client_inbox: HashMap::new(),
        }
    }

    /// Give every replica the same parked-request TTL.
    pub fn with_request_ttl(mut self, ttl: Option<u64>) -> Self {
        self.replicas = self
            .replicas
            .into_iter()
            .map(|r| r.with_request_ttl(ttl))
            .collect();
        self
    }

    pub fn replica(&self, id: ReplicaId) -> &ReplicaState {
        &self.replicas[id]
    }

    pub fn replica_mut(&mut self, id: ReplicaId) -> &mut ReplicaState {
        &mut self.replicas[id]
    }

    pub fn replicas(&self) -> &[ReplicaState] {
        &self.replicas
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Hand a message straight to a replica's processor and route its output.
    pub fn deliver(&mut self, replica: ReplicaId, msg: Message) {
        let outbound = self.replicas[replica].handle(msg);
        self.route(outbound);
    }

    /// Submit a client request to `replica`.
    pub fn submit(&mut self, replica: ReplicaId, request: ClientRequest) {
        self.deliver(replica, Message::ClientRequest(request));
    }

    fn route(&mut self, outbound: Vec<Message>) {
        for msg in outbound {
            match msg.destination() {
                Some(Destination::Replica(_)) => self.network.send(msg),
                Some(Destination::Client(client)) => {
                    self.client_inbox.entry(client).or_default().push(msg)
                }
                None => {}
            }
        }
    }

    /// Replies delivered to `client` since the last call.
    pub fn take_replies(&mut self, client: ClientId) -> Vec<Message> {
        self.client_inbox.remove(&client).unwrap_or_default()
    }

    /// Fire the gossip timer on one replica.
    pub fn tick(&mut self, replica: ReplicaId) {
        self.deliver(replica, Message::GossipTick);
    }

    pub fn tick_all(&mut self) {
        for id in 0..self.replicas.len() {
            self.tick(id);
        }
    }

    /// Deliver one in-flight message. Returns false when the network is idle.
    pub fn process_one(&mut self) -> bool {
        let Some(msg) = self.network.receive() else {
            return false;
        };
        if let Some(Destination::Replica(to)) = msg.destination() {
            if to < self.replicas.len() {
                self.deliver(to, msg);
            }
        }
        true
    }

    pub fn drain_network(&mut self) {
        while self.process_one() {}
    }

    /// Tick every replica, then deliver everything (pushes and acks).
    pub fn full_sync_round(&mut self) {
        self.tick_all();
        self.drain_network();
    }

    pub fn retransmit_and_process(&mut self) {
        self.network.retransmit_lost();
        self.drain_network();
    }

    /// Cut `replica` off from every peer until [`Cluster::heal`].
    pub fn isolate(&mut self, replica: ReplicaId) {
        self.network.isolated.insert(replica);
    }

    pub fn heal(&mut self) {
        self.network.isolated.clear();
    }

    /// All replicas hold the same clock, log and nothing pending.
    pub fn is_converged(&self) -> bool {
        let Some(first) = self.replicas.first() else {
            return true;
        };
        self.replicas.iter().all(|r| {
            r.clock() == first.clock()
                && r.operations_performed() == first.operations_performed()
                && r.pending_count() == 0
        })
    }

    /// Run sync rounds until converged, up to `max_rounds`.
    pub fn sync_until_converged(&mut self, max_rounds: usize) -> bool {
        for _ in 0..max_rounds {
            if self.is_converged() {
                return true;
            }
            self.full_sync_round();
            self.retransmit_and_process();
        }
        self.is_converged()
    }

    /// Total buffered out-of-order operations across all replicas
    pub fn total_pending(&self) -> usize {
        self.replicas.iter().map(|r| r.pending_count()).sum()
    }
}
