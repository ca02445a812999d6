//! # creg
//!
//! Command line front end for the causal register.
//!
//! `serve` runs one replica of a cluster described by a JSON file, `client`
//! issues session-guaranteed reads and writes against it, and `demo`,
//! `conflict` and `partition` replay the protocol on a simulated in-process
//! cluster so every gossip step can be watched.
//!
//! ```text
//! config.json: {"servers":[{"network":"tcp","address":"127.0.0.1:7000"}, ...]}
//!
//! creg serve  --config config.json --replica 0
//! creg client --config config.json --semantic causal --id 1 write 0 42
//! creg client --config config.json --semantic causal --id 1 read 2
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use creg_core::VersionVector;
use creg_node::{
    bind_and_serve, ClusterConfig, NodeConfig, NodeConfigBuilder, NodeError, ReplicaNode,
    SessionClient, TcpClientTransport, TcpTransport,
};
use creg_replica::{
    ClientRequest, Cluster, Message, ReplicaState, ServerReply, Session, SessionSemantic,
};
use tracing_subscriber::EnvFilter;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "creg")]
#[command(about = "Gossip-replicated register with session guarantees")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one replica over TCP
    Serve {
        /// Cluster file listing every replica's address
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        /// Index of this replica in the cluster file
        #[arg(long)]
        replica: usize,
        /// Added to every port in the cluster file
        #[arg(long, default_value_t = 0)]
        port_offset: u16,
        /// Gossip timer period in milliseconds
        #[arg(long, default_value_t = 50)]
        gossip_interval_ms: u64,
        /// Gossip ticks a parked request may wait (0 waits forever)
        #[arg(long, default_value_t = 500)]
        request_ttl: u64,
    },
    /// Send requests to a running cluster
    Client {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long, default_value_t = 0)]
        port_offset: u16,
        /// Client id; replies are routed by it
        #[arg(long, default_value_t = 1)]
        id: u64,
        /// eventual, monotonic-reads, monotonic-writes, read-your-writes,
        /// writes-follow-reads, causal (or 0-5)
        #[arg(long, default_value = "causal")]
        semantic: SessionSemantic,
        /// Print raw replies as JSON
        #[arg(long)]
        json: bool,
        /// Reply timeout; defaults to the node configuration's
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Operations run in order within one session, e.g. `write 0 42 read 2`
        #[arg(required = true, num_args = 1..)]
        ops: Vec<String>,
    },
    /// Basic demo: a write travels by gossip, sessions wait for what they saw
    Demo,
    /// Concurrent writes on 3 replicas: every delivery order picks the same winner
    Conflict,
    /// Network partition: parked requests expire, the cluster heals and converges
    Partition,
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn gossip_arrow(label: &str) {
    println!("  {} {}", "──gossip──▶".bright_cyan(), label.dimmed());
}

fn show_replica(replica: &ReplicaState) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Replica {}", replica.id()).bright_yellow().to_string()
    );
    println!("  ├{}┤", border);
    let rows = [
        ("clock", replica.clock().to_string()),
        ("value", replica.current_value().to_string()),
        ("applied", replica.operations_performed().len().to_string()),
        ("pending", replica.pending_count().to_string()),
        ("parked", replica.unsatisfied_requests().len().to_string()),
    ];
    for (label, value) in rows {
        let padded = format!("{:<10} {:>31}", label, value);
        println!("  │ {} │", padded);
    }
    println!("  └{}┘", border);
}

fn show_cluster(cluster: &Cluster) {
    for replica in cluster.replicas() {
        show_replica(replica);
    }
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL REPLICAS CONVERGED: same clock, same log, same value"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE: replicas differ".bright_red().bold()
        );
    }
}

fn show_outcome(client: &str, messages: &[Message]) {
    if messages.is_empty() {
        step(&format!(
            "{}: {}",
            client,
            "parked, dependencies not yet visible".yellow()
        ));
    }
    for message in messages {
        match message {
            Message::ServerReply(reply) => step(&format!(
                "{}: {:?} → {} at {} from replica {}",
                client,
                reply.operation_type,
                reply.data.to_string().bright_white().bold(),
                reply.version_vector,
                reply.replying_replica
            )),
            Message::Rejected(rejection) => step(&format!(
                "{}: {} ({})",
                client,
                "rejected".bright_red(),
                rejection.reason
            )),
            _ => {}
        }
    }
}

fn observe_all(session: &mut Session, messages: &[Message]) {
    for message in messages {
        if let Message::ServerReply(reply) = message {
            session.observe(reply);
        }
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

fn run_demo() {
    header("DEMO: Gossip propagation and session guarantees");

    section("Phase 1: alice writes 5 on replica 0");
    let mut cluster = Cluster::new(3);
    let mut alice = Session::new(1, SessionSemantic::ReadYourWrites, 3);
    cluster.submit(0, alice.write_request(5));
    let replies = cluster.take_replies(1);
    show_outcome("alice", &replies);
    observe_all(&mut alice, &replies);

    section("Phase 2: alice reads on replica 2 before any gossip");
    cluster.submit(2, alice.read_request());
    show_outcome("alice", &cluster.take_replies(1));
    show_cluster(&cluster);

    section("Phase 3: one gossip round");
    cluster.full_sync_round();
    gossip_arrow("replica 0 pushes its unacknowledged writes to 1 and 2");
    let replies = cluster.take_replies(1);
    show_outcome("alice (parked read retried)", &replies);
    observe_all(&mut alice, &replies);

    section("Phase 4: an eventual reader sees the same value anywhere");
    let mut bob = Session::new(2, SessionSemantic::Eventual, 3);
    for replica in 0..3 {
        cluster.submit(replica, bob.read_request());
        show_outcome(&format!("bob @ {}", replica), &cluster.take_replies(2));
    }

    show_cluster(&cluster);
    convergence_result(cluster.is_converged());
}

// ─── Conflict ──────────────────────────────────────────────────────────────

fn run_conflict() {
    header("CONFLICT: Concurrent writes, order-independent winner");

    let writes = [(0, 100), (1, 200), (2, 300)];
    let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 2, 0]];
    let mut winners = Vec::new();

    for order in orders {
        section(&format!("Gossip order: replicas {:?}", order));
        let mut cluster = Cluster::new(3);
        for (replica, value) in writes {
            cluster.submit(replica, ClientRequest::write(0, value, VersionVector::zero(3)));
            step(&format!("replica {} writes {}", replica, value));
        }
        for replica in order {
            cluster.tick(replica);
            cluster.drain_network();
            gossip_arrow(&format!("replica {} pushed", replica));
        }
        let value = cluster.replica(0).current_value();
        step(&format!(
            "every replica reads {} (greatest vector {})",
            value.to_string().bright_white().bold(),
            cluster
                .replica(0)
                .operations_performed()
                .latest()
                .map(|op| op.version_vector.to_string())
                .unwrap_or_default()
        ));
        convergence_result(cluster.is_converged());
        winners.push(value);
    }

    section("Result");
    let same = winners.windows(2).all(|w| w[0] == w[1]);
    step(&format!("winners per order: {:?}", winners));
    convergence_result(same);
}

// ─── Partition ─────────────────────────────────────────────────────────────

fn run_partition() {
    header("PARTITION: Split, expire, heal, converge");

    let mut cluster = Cluster::new(3).with_request_ttl(Some(3));

    section("Phase 1: replica 2 is cut off");
    cluster.isolate(2);
    let mut carol = Session::new(3, SessionSemantic::Causal, 3);
    cluster.submit(0, carol.write_request(1));
    let replies = cluster.take_replies(3);
    show_outcome("carol", &replies);
    observe_all(&mut carol, &replies);
    cluster.submit(2, ClientRequest::write(4, 2, VersionVector::zero(3)));
    show_outcome("dave @ 2", &cluster.take_replies(4));

    section("Phase 2: carol's causal read on replica 2 waits, then expires");
    cluster.submit(2, carol.read_request());
    show_outcome("carol", &cluster.take_replies(3));
    for round in 1..=4 {
        cluster.full_sync_round();
        gossip_arrow(&format!("round {} (replica 2 unreachable)", round));
    }
    show_outcome("carol", &cluster.take_replies(3));
    show_cluster(&cluster);

    section("Phase 3: heal and resync");
    cluster.heal();
    let converged = cluster.sync_until_converged(10);
    gossip_arrow("unacknowledged suffixes resent");
    cluster.submit(2, carol.read_request());
    show_outcome("carol", &cluster.take_replies(3));

    show_cluster(&cluster);
    convergence_result(converged);
}

// ─── Network commands ──────────────────────────────────────────────────────

fn load_cluster(path: &PathBuf, port_offset: u16) -> Result<ClusterConfig, NodeError> {
    ClusterConfig::load(path)?.with_port_offset(port_offset)
}

async fn run_serve(
    config: PathBuf,
    replica: usize,
    port_offset: u16,
    gossip_interval_ms: u64,
    request_ttl: u64,
) -> Result<(), NodeError> {
    let cluster = load_cluster(&config, port_offset)?;
    let node_config = NodeConfigBuilder::new()
        .replica(replica, cluster.replica_count())
        .gossip_interval(gossip_interval_ms)
        .request_ttl((request_ttl > 0).then_some(request_ttl))
        .build()?;
    let transport = Arc::new(TcpTransport::new(replica, cluster.clone()));
    let node = Arc::new(ReplicaNode::new(node_config, transport)?);
    let handle = bind_and_serve(Arc::clone(&node), &cluster).await?;

    println!(
        "{} replica {} of {} on {}",
        "▸".bright_yellow(),
        replica.to_string().bold(),
        cluster.replica_count(),
        cluster.address(replica)?.to_string().bright_cyan()
    );

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    println!(
        "{} stopped at clock {} with value {}",
        "▸".bright_yellow(),
        node.clock(),
        node.current_value()
    );
    Ok(())
}

enum ClientOp {
    Read { replica: usize },
    Write { replica: usize, value: u64 },
}

fn parse_ops(words: &[String]) -> Result<Vec<ClientOp>, String> {
    let mut ops = Vec::new();
    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        let mut number = |what: &str| -> Result<u64, String> {
            let raw = iter
                .next()
                .ok_or_else(|| format!("`{}` needs a {}", word, what))?;
            raw.parse()
                .map_err(|_| format!("`{}` is not a valid {}", raw, what))
        };
        match word.as_str() {
            "read" | "r" => ops.push(ClientOp::Read {
                replica: number("replica")? as usize,
            }),
            "write" | "w" => {
                let replica = number("replica")? as usize;
                let value = number("value")?;
                ops.push(ClientOp::Write { replica, value });
            }
            other => return Err(format!("unknown operation `{}`", other)),
        }
    }
    Ok(ops)
}

fn print_reply(reply: &ServerReply, json: bool) -> Result<(), NodeError> {
    if json {
        println!("{}", serde_json::to_string(reply)?);
    } else {
        println!(
            "  {} {:?} {} at {} from replica {}",
            "•".bright_green(),
            reply.operation_type,
            reply.data.to_string().bright_white().bold(),
            reply.version_vector,
            reply.replying_replica
        );
    }
    Ok(())
}

async fn run_client(
    config: PathBuf,
    port_offset: u16,
    id: u64,
    semantic: SessionSemantic,
    json: bool,
    timeout_ms: Option<u64>,
    ops: Vec<String>,
) -> Result<(), NodeError> {
    let ops = parse_ops(&ops).map_err(NodeError::Config)?;
    let cluster = load_cluster(&config, port_offset)?;
    let session = Session::new(id, semantic, cluster.replica_count());
    let (transport, replies) = TcpClientTransport::new(cluster, 64);
    let reply_timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| NodeConfig::default().reply_timeout());
    let mut client = SessionClient::new(session, Arc::new(transport), replies, reply_timeout);

    for op in ops {
        let reply = match op {
            ClientOp::Read { replica } => client.read(replica).await?,
            ClientOp::Write { replica, value } => client.write(replica, value).await?,
        };
        print_reply(&reply, json)?;
    }
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            config,
            replica,
            port_offset,
            gossip_interval_ms,
            request_ttl,
        } => run_serve(config, replica, port_offset, gossip_interval_ms, request_ttl).await,
        Commands::Client {
            config,
            port_offset,
            id,
            semantic,
            json,
            timeout_ms,
            ops,
        } => run_client(config, port_offset, id, semantic, json, timeout_ms, ops).await,
        Commands::Demo => {
            run_demo();
            Ok(())
        }
        Commands::Conflict => {
            run_conflict();
            Ok(())
        }
        Commands::Partition => {
            run_partition();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("  {} {}", "!".bright_red(), e);
            ExitCode::FAILURE
        }
    }
}
