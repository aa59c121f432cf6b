//! memwire tracer - Listener side of the channel
//!
//! Stand-in for a simulator: waits for one controller, then streams a
//! synthetic sequence of memory accesses while polling (non-blocking) for
//! placement directives between ticks. After the last access it half-closes
//! the channel and drains the remaining directives.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin memwire_tracer -- --id 4242 --count 10000 --batch 64
//! ```

use std::process;
use std::time::Instant;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memwire::network::{Listener, Socket};
use memwire::protocol::{AccessKind, AnyMessage, Array, MBind, MemAccess};
use memwire::{ChannelConfig, Error};

#[derive(Parser, Debug)]
#[command(name = "memwire_tracer")]
#[command(about = "Stream synthetic memory accesses to a controller")]
struct Args {
    /// Rendezvous id shared with the controller (default: MEMWIRE_ID or the pid)
    #[arg(long)]
    id: Option<u32>,

    /// Directory holding the rendezvous socket
    #[arg(long)]
    socket_dir: Option<std::path::PathBuf>,

    /// Number of accesses to emit
    #[arg(long, default_value_t = 1000)]
    count: u64,

    /// Group accesses into arrays of this size (0 sends them one by one).
    /// Each array takes 17 + 31 * batch bytes of the controller's --buffer.
    #[arg(long, default_value_t = 0)]
    batch: usize,

    /// Number of NUMA nodes to spread accesses over
    #[arg(long, default_value_t = 2)]
    nodes: u8,

    /// Number of hardware threads issuing accesses
    #[arg(long, default_value_t = 4)]
    threads: u32,

    /// Seed for the synthetic address stream
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
}

/// Deterministic synthetic access generator
struct AccessGenerator {
    state: u64,
    tick: u64,
    nodes: u8,
    threads: u32,
}

impl AccessGenerator {
    fn new(seed: u64, nodes: u8, threads: u32) -> Self {
        Self {
            state: seed,
            tick: 0,
            nodes: nodes.max(1),
            threads: threads.max(1),
        }
    }

    fn next_access(&mut self) -> MemAccess {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let hash = self.state;
        self.tick += 1 + (hash >> 60);

        let kind = match hash % 3 {
            0 => AccessKind::Read,
            1 => AccessKind::Write,
            _ => AccessKind::ReadWrite,
        };
        // Cache-line aligned addresses in a 1 GiB window
        let address = 0x7f00_0000_0000 + ((hash >> 16) & 0x3fff_ffc0);
        MemAccess::new(
            kind,
            self.tick,
            address,
            ((hash >> 8) % self.nodes as u64) as u8,
            ((hash >> 24) % self.threads as u64) as u32,
        )
    }
}

/// Tracer statistics
#[derive(Default)]
struct Stats {
    sent: u64,
    directives: u64,
}

fn handle_directive(msg: AnyMessage, stats: &mut Stats) {
    match msg {
        AnyMessage::MBind(bind) => log_directive(&bind, stats),
        AnyMessage::MBindArray(binds) => {
            for bind in &binds {
                log_directive(bind, stats);
            }
        }
        other => warn!(message_type = ?other.message_type(), "ignoring unexpected message"),
    }
}

fn log_directive(bind: &MBind, stats: &mut Stats) {
    stats.directives += 1;
    info!(
        address = %format!("{:#x}", bind.address),
        size = bind.size,
        nodes = ?bind.nodes().collect::<Vec<_>>(),
        mode = ?bind.mode,
        flags = ?bind.flags,
        "received MBind"
    );
}

/// Drain every directive already waiting without blocking.
fn poll_directives(socket: &mut Socket, buffer: &mut [u8], stats: &mut Stats) -> memwire::Result<()> {
    loop {
        match socket.receive(buffer, false) {
            Ok(msg) => handle_directive(msg, stats),
            Err(e) if e.is_would_block() => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn run(args: &Args, mut socket: Socket) -> memwire::Result<Stats> {
    let mut generator = AccessGenerator::new(args.seed, args.nodes, args.threads);
    let mut buffer = vec![0u8; 4096];
    let mut stats = Stats::default();
    let start = Instant::now();

    if args.batch == 0 {
        for _ in 0..args.count {
            socket.send(&generator.next_access())?;
            stats.sent += 1;
            poll_directives(&mut socket, &mut buffer, &mut stats)?;
        }
    } else {
        let mut remaining = args.count;
        while remaining > 0 {
            let n = remaining.min(args.batch as u64);
            let batch: Array<MemAccess> = (0..n).map(|_| generator.next_access()).collect();
            socket.send(&batch)?;
            debug!(len = batch.len(), "sent batch");
            stats.sent += n;
            remaining -= n;
            poll_directives(&mut socket, &mut buffer, &mut stats)?;
        }
    }

    socket.shutdown_send()?;
    info!(
        sent = stats.sent,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "all accesses sent, draining directives"
    );

    loop {
        match socket.receive(&mut buffer, true) {
            Ok(msg) => handle_directive(msg, &mut stats),
            Err(Error::Closed) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(stats)
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = ChannelConfig::from_env();
    if let Some(id) = args.id {
        config.id = id;
    }
    if let Some(dir) = &args.socket_dir {
        config.socket_dir = dir.clone();
    }

    // Channel setup failures are fatal
    let socket = match Listener::bind(&config).and_then(Listener::accept_one) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "channel setup failed");
            process::exit(1);
        }
    };

    match run(&args, socket) {
        Ok(stats) => info!(
            sent = stats.sent,
            directives = stats.directives,
            "tracer finished"
        ),
        Err(e) => {
            error!(error = %e, "tracer error");
            process::exit(1);
        }
    }
}
