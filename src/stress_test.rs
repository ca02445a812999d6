use async_stream::stream;
use creg_node::{MemoryNetwork, NodeConfigBuilder, NodeError, NodeHandle, ReplicaNode, SessionClient};
use creg_replica::SessionSemantic;
use futures::future::join_all;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which replica a client talks to for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Client `c` always uses replica `c mod n`.
    Pinned,
    /// Every `switch_every` operations the client moves to a random replica.
    GossipRandom { switch_every: usize },
    /// Writes go to replica 0, reads round-robin by client id.
    PrimaryBackup,
}

impl Placement {
    pub fn name(&self) -> String {
        match self {
            Placement::Pinned => "pinned".to_string(),
            Placement::GossipRandom { switch_every } => format!("random/{}", switch_every),
            Placement::PrimaryBackup => "primary-backup".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Workload {
    pub replicas: usize,
    pub clients: usize,
    pub ops_per_client: usize,
    /// Percentage of operations that are writes.
    pub write_percent: u32,
    pub semantic: SessionSemantic,
    pub placement: Placement,
    pub gossip_interval_ms: u64,
}

/// Statistics collected during stress testing
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub workload: String,
    pub completed: usize,
    pub failed: usize,
    pub total_time: Duration,
    pub avg_latency: Duration,
    pub ops_per_second: f64,
    pub converged: bool,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Stress Test Statistics                        ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Workload:                  {:>30} ║", self.workload);
        println!("║  Completed Operations:      {:>30} ║", self.completed);
        println!("║  Failed Operations:         {:>30} ║", self.failed);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Latency:           {:>28}µs ║", self.avg_latency.as_micros());
        println!("║  Operations/Second:         {:>30.0} ║", self.ops_per_second);
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Read { replica: usize },
    Write { replica: usize, value: u64 },
}

/// Generator that yields one client's operations
fn operation_generator(client: usize, workload: Workload, seed: u64) -> impl Stream<Item = Op> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = workload.replicas;
        let mut current = client % n;
        for index in 0..workload.ops_per_client {
            let is_write = rng.gen_range(0..100) < workload.write_percent;
            let replica = match workload.placement {
                Placement::Pinned => client % n,
                Placement::GossipRandom { switch_every } => {
                    if index % switch_every.max(1) == 0 {
                        current = rng.gen_range(0..n);
                    }
                    current
                }
                Placement::PrimaryBackup if is_write => 0,
                Placement::PrimaryBackup => client % n,
            };
            if is_write {
                yield Op::Write { replica, value: rng.gen_range(1..=100) };
            } else {
                yield Op::Read { replica };
            }
        }
    }
}

#[derive(Default)]
struct ClientStats {
    completed: usize,
    failed: usize,
    latency: Duration,
}

async fn run_client(mut client: SessionClient<MemoryNetwork>, ops: impl Stream<Item = Op>) -> ClientStats {
    let mut stats = ClientStats::default();
    let mut ops = Box::pin(ops);
    while let Some(op) = ops.next().await {
        let start = Instant::now();
        let result: Result<(), NodeError> = match op {
            Op::Read { replica } => client.read(replica).await.map(|_| ()),
            Op::Write { replica, value } => client.write(replica, value).await.map(|_| ()),
        };
        stats.latency += start.elapsed();
        match result {
            Ok(()) => stats.completed += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(client = client.client_id(), error = %e, "operation failed");
            }
        }
    }
    stats
}

async fn wait_converged(nodes: &[Arc<ReplicaNode<MemoryNetwork>>], limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        let first = nodes[0].clock();
        if nodes.iter().all(|node| node.clock() == first) {
            return nodes.iter().all(|node| node.current_value() == nodes[0].current_value());
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Run `workload` against an in-memory cluster.
pub async fn stress_test_workload(workload: Workload) -> Result<StressTestStats, NodeError> {
    let label = format!("{} {}", workload.semantic, workload.placement.name());
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║  {:<58}║", format!("Session Stress Test: {}", label));
    println!("║  {:<58}║", format!(
        "Replicas: {} | Clients: {} | Ops/Client: {} | Writes: {}%",
        workload.replicas, workload.clients, workload.ops_per_client, workload.write_percent
    ));
    println!("╚════════════════════════════════════════════════════════════╝");

    let network = MemoryNetwork::new(4096);
    let mut nodes = Vec::with_capacity(workload.replicas);
    let mut handles: Vec<NodeHandle> = Vec::with_capacity(workload.replicas);
    for id in 0..workload.replicas {
        let config = NodeConfigBuilder::new()
            .replica(id, workload.replicas)
            .gossip_interval(workload.gossip_interval_ms)
            .reply_timeout(10_000)
            .build()?;
        let node = Arc::new(ReplicaNode::new(config, Arc::new(network.clone()))?);
        handles.push(Arc::clone(&node).spawn(network.register_replica(id)));
        nodes.push(node);
    }

    println!("\n[Phase 1/2] Running client sessions...");
    let start = Instant::now();
    let tasks: Vec<_> = (0..workload.clients)
        .map(|c| {
            let client =
                SessionClient::connect_memory(&network, c as u64, workload.semantic, nodes[0].config());
            let ops = operation_generator(c, workload.clone(), 0xC0FFEE + c as u64);
            tokio::spawn(run_client(client, ops))
        })
        .collect();

    let mut totals = ClientStats::default();
    for stats in join_all(tasks).await.into_iter().flatten() {
        totals.completed += stats.completed;
        totals.failed += stats.failed;
        totals.latency += stats.latency;
    }
    let total_time = start.elapsed();
    println!("[Phase 1/2] ✓ Completed");

    println!("[Phase 2/2] Waiting for gossip to converge...");
    let converged = wait_converged(&nodes, Duration::from_secs(5)).await;
    println!("[Phase 2/2] ✓ Completed");

    for handle in handles {
        handle.shutdown().await;
    }

    let attempted = (totals.completed + totals.failed).max(1);
    Ok(StressTestStats {
        workload: label,
        completed: totals.completed,
        failed: totals.failed,
        total_time,
        avg_latency: totals.latency / attempted as u32,
        ops_per_second: totals.completed as f64 / total_time.as_secs_f64(),
        converged,
    })
}

/// Every session semantic under the same workload.
pub async fn stress_test_semantics(
    replicas: usize,
    clients: usize,
    ops_per_client: usize,
) -> Result<Vec<StressTestStats>, NodeError> {
    let mut all = Vec::new();
    for semantic in SessionSemantic::ALL {
        let stats = stress_test_workload(Workload {
            replicas,
            clients,
            ops_per_client,
            write_percent: 50,
            semantic,
            placement: Placement::GossipRandom { switch_every: 10 },
            gossip_interval_ms: 5,
        })
        .await?;
        stats.print();
        all.push(stats);
    }
    Ok(all)
}

/// Causal sessions under each placement policy.
pub async fn stress_test_placements(
    replicas: usize,
    clients: usize,
    ops_per_client: usize,
) -> Result<(), NodeError> {
    println!("\n{:<24} {:>12} {:>14} {:>10}", "Placement", "Ops/s", "Latency (µs)", "Failed");
    println!("{}", "─".repeat(64));
    for placement in [
        Placement::Pinned,
        Placement::GossipRandom { switch_every: 1 },
        Placement::GossipRandom { switch_every: 25 },
        Placement::PrimaryBackup,
    ] {
        let stats = stress_test_workload(Workload {
            replicas,
            clients,
            ops_per_client,
            write_percent: 25,
            semantic: SessionSemantic::Causal,
            placement,
            gossip_interval_ms: 5,
        })
        .await?;
        println!(
            "{:<24} {:>12.0} {:>14} {:>10}",
            placement.name(),
            stats.ops_per_second,
            stats.avg_latency.as_micros(),
            stats.failed
        );
    }
    Ok(())
}
