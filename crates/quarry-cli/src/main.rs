//! quarry - command-line entry point of the distributed SAT solver.

use clap::Parser;
use crossbeam_channel::unbounded;
use quarry_base::{Config, NodeId, TaskResult};
use quarry_broker::{Broker, NodeRegistry, Verdict};
use quarry_broker::compute_node::Description;
use quarry_cdcl::{EngineRegistry, FormulaSource};
use quarry_net::{PeerQueues, Reactor};
use quarry_protocol::{Hello, PROTOCOL_VERSION};
use quarry_task::TaskStore;
use quarry_worker::{ExecContext, WorkerPool};
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EXIT_SAT: i32 = 10;
const EXIT_UNSAT: i32 = 20;
const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 1;
const EXIT_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "Distributed cube-and-conquer SAT solver"
)]
struct Cli {
    /// Input DIMACS CNF file, or '-' for stdin. Not used with --daemon.
    input: Option<PathBuf>,

    /// Number of worker threads (default: hardware concurrency)
    #[arg(long)]
    workers: Option<usize>,

    /// TCP listen port for the message transport
    #[arg(long, default_value_t = 18001)]
    tcp_port: u16,

    /// UDP listen port for announcements
    #[arg(long, default_value_t = 18001)]
    udp_port: u16,

    /// Run as a daemon: no local formula, serve work pushed by peers
    #[arg(long)]
    daemon: bool,

    /// Node name announced to peers
    #[arg(long)]
    name: Option<String>,

    /// Peer to connect to as HOST:PORT (repeatable)
    #[arg(long = "connect", value_name = "HOST:PORT")]
    connect: Vec<String>,

    /// Split to this cube depth before solving leaves (0 = adaptive)
    #[arg(long, default_value_t = 0)]
    cube_depth: u8,

    /// Lookahead timeout per split, in milliseconds
    #[arg(long, default_value_t = 5000, value_name = "MS")]
    initial_split_timeout: u64,

    /// Log verbosity
    #[arg(long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "fatal"])]
    log_level: String,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_USAGE;
        }
    };

    // "fatal" is the loudest-only setting; tracing calls it "error".
    let level = match cli.log_level.as_str() {
        "fatal" => "error",
        other => other,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();

    if cli.daemon && cli.input.is_some() {
        eprintln!("error: --daemon does not take an input file");
        return EXIT_USAGE;
    }
    if !cli.daemon && cli.input.is_none() {
        eprintln!("error: an input file is required (or '-' for stdin)");
        return EXIT_USAGE;
    }

    let mut connect = Vec::new();
    for spec in &cli.connect {
        match resolve_peer(spec) {
            Some(addr) => connect.push(addr),
            None => {
                eprintln!("error: cannot resolve peer address '{spec}'");
                return EXIT_USAGE;
            }
        }
    }

    let config = Arc::new(Config {
        name: cli
            .name
            .clone()
            .unwrap_or_else(|| format!("quarry-{}", std::process::id())),
        workers: cli.workers.unwrap_or_else(quarry_base::config::available_workers),
        tcp_port: cli.tcp_port,
        udp_port: cli.udp_port,
        daemon: cli.daemon,
        connect,
        cube_depth: cli.cube_depth,
        initial_split_timeout: Duration::from_millis(cli.initial_split_timeout),
        ..Config::default()
    });

    let source = match &cli.input {
        None => None,
        Some(path) if path.as_os_str() == "-" => {
            let mut blob = Vec::new();
            if let Err(e) = std::io::stdin().read_to_end(&mut blob) {
                eprintln!("error: cannot read stdin: {e}");
                return EXIT_ERROR;
            }
            Some(FormulaSource::Blob(blob))
        }
        Some(path) => Some(FormulaSource::File(path.clone())),
    };

    match run_node(config, source) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            eprintln!("error: {e}");
            EXIT_ERROR
        }
    }
}

fn run_node(config: Arc<Config>, source: Option<FormulaSource>) -> quarry_base::Result<i32> {
    let local_id = generate_node_id();
    tracing::info!(
        id = local_id,
        name = %config.name,
        workers = config.workers,
        daemon = config.daemon,
        "quarry node starting"
    );

    let (store_tx, store_rx) = unbounded();
    let store = Arc::new(TaskStore::new(config.queue_soft_bound(), store_tx));
    let engines = Arc::new(EngineRegistry::new());
    let queues = Arc::new(PeerQueues::new(config.ack_timeout));

    let hello = Hello {
        version: PROTOCOL_VERSION,
        peer_id: local_id,
        workers: config.workers as u32,
        tcp_port: config.tcp_port,
        udp_port: config.udp_port,
        name: config.name.clone(),
        // Peers fill the host in from the address they see us on.
        host: String::new(),
        daemon: config.daemon,
    };
    let registry = Arc::new(NodeRegistry::new(
        local_id,
        Description::from_hello(&hello, Some("localhost".to_string())),
        Arc::clone(&queues),
    ));

    let (net_tx, net_rx) = unbounded();
    let reactor = Reactor::spawn(
        Arc::clone(&config),
        hello,
        Arc::clone(&queues),
        net_tx,
    )?;

    let (verdict_tx, verdict_rx) = unbounded();
    let mut broker = Broker::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&engines),
        Arc::clone(&registry),
        Arc::clone(&queues),
        reactor.handle(),
        net_rx,
        store_rx,
        verdict_tx,
    );

    if let Some(source) = source {
        broker.ingest_formula(source)?;
    }
    for &addr in &config.connect {
        reactor.connect(addr);
    }

    let pool = WorkerPool::spawn(ExecContext {
        store: Arc::clone(&store),
        engines,
        config: Arc::clone(&config),
    });
    let broker_thread = std::thread::Builder::new()
        .name("quarry-broker".to_string())
        .spawn(move || broker.run())?;

    let code = match verdict_rx.recv() {
        Ok(Verdict::Result { result, witness }) => report_verdict(result, witness),
        Ok(Verdict::Shutdown) => {
            tracing::info!("daemon shutting down");
            EXIT_OK
        }
        Ok(Verdict::TransportFailed) => {
            eprintln!("error: transport failed to start");
            EXIT_ERROR
        }
        Err(_) => {
            tracing::error!("broker exited without a verdict");
            EXIT_ERROR
        }
    };

    // Give the Offline/End frames a moment on the wire, then tear down.
    std::thread::sleep(Duration::from_millis(100));
    pool.shutdown();
    reactor.shutdown();
    let _ = broker_thread.join();
    Ok(code)
}

fn report_verdict(result: TaskResult, witness: Option<Vec<i32>>) -> i32 {
    match result {
        TaskResult::Sat => {
            println!("s SATISFIABLE");
            if let Some(model) = witness {
                let line = model
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("v {line} 0");
            }
            EXIT_SAT
        }
        TaskResult::Unsat => {
            println!("s UNSATISFIABLE");
            EXIT_UNSAT
        }
        _ => {
            println!("s UNKNOWN");
            EXIT_OK
        }
    }
}

fn resolve_peer(spec: &str) -> Option<SocketAddr> {
    if let Ok(addr) = spec.parse::<SocketAddr>() {
        return Some(addr);
    }
    spec.to_socket_addrs().ok()?.next()
}

/// A node id unique enough for a LAN: wall-clock nanoseconds stirred with
/// the process id.
fn generate_node_id() -> NodeId {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1);
    (nanos << 16) | (u64::from(std::process::id()) & 0xFFFF)
}
