//! memwire controller - Connector side of the channel
//!
//! Receives memory-access telemetry from the listening simulator, logs each
//! record, and every `--every` accesses answers with an `MBind` directive
//! binding one page at the last observed address.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin memwire_controller -- --id 4242 --every 100
//! ```

use std::process;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memwire::network::{connect, Socket, MAX_MESSAGE_LEN};
use memwire::protocol::{AnyMessage, MBind, MBindFlags, MemAccess, MemPolicyMode};
use memwire::{ChannelConfig, Error};

#[derive(Parser, Debug)]
#[command(name = "memwire_controller")]
#[command(about = "Receive memory accesses and reply with NUMA placement directives")]
struct Args {
    /// Rendezvous id shared with the listener (default: MEMWIRE_ID or the pid)
    #[arg(long)]
    id: Option<u32>,

    /// Directory holding the rendezvous socket
    #[arg(long)]
    socket_dir: Option<std::path::PathBuf>,

    /// Send a directive after this many accesses
    #[arg(long, default_value_t = 100)]
    every: u64,

    /// Size in bytes of each bound range
    #[arg(long, default_value_t = 4096)]
    range: u64,

    /// Node mask for directives
    #[arg(long, default_value_t = 1)]
    node_mask: u64,

    /// Receive buffer capacity in bytes; the largest batch the tracer may
    /// send. Defaults to the transport's message size limit.
    #[arg(long, default_value_t = MAX_MESSAGE_LEN as usize)]
    buffer: usize,
}

/// Controller statistics
#[derive(Default)]
struct Stats {
    accesses: u64,
    batches: u64,
    directives: u64,
}

fn run(args: &Args, mut socket: Socket) -> memwire::Result<Stats> {
    let mut buffer = vec![0u8; args.buffer];
    let mut stats = Stats::default();

    loop {
        let accesses: Vec<MemAccess> = match socket.receive(&mut buffer, true) {
            Ok(AnyMessage::MemAccess(access)) => vec![access],
            Ok(AnyMessage::MemAccessArray(batch)) => {
                stats.batches += 1;
                batch.into_vec()
            }
            Ok(AnyMessage::EmptyArray) => continue,
            Ok(other) => {
                warn!(message_type = ?other.message_type(), "unexpected message, stopping");
                break;
            }
            Err(Error::Closed) => {
                info!("simulator closed the channel");
                break;
            }
            Err(e) => return Err(e),
        };

        for access in accesses {
            stats.accesses += 1;
            info!(
                tick = access.tick,
                address = %format!("{:#x}", access.address),
                numa_node = access.numa_node,
                thread_id = access.thread_id,
                kind = ?access.kind,
                "received MemAccess"
            );

            if stats.accesses % args.every == 0 {
                let directive = MBind::new(
                    access.address,
                    args.range,
                    args.node_mask,
                    MemPolicyMode::Bind,
                    MBindFlags::MOVE,
                );
                socket.send(&directive)?;
                socket.flush()?;
                stats.directives += 1;
            }
        }
    }

    socket.close()?;
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
    if args.every == 0 {
        error!("--every must be at least 1");
        process::exit(2);
    }

    let mut config = ChannelConfig::from_env();
    if let Some(id) = args.id {
        config.id = id;
    }
    if let Some(dir) = &args.socket_dir {
        config.socket_dir = dir.clone();
    }

    // Without a listener there is nothing to control
    let socket = match connect(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot reach simulator");
            process::exit(1);
        }
    };

    match run(&args, socket) {
        Ok(stats) => info!(
            accesses = stats.accesses,
            batches = stats.batches,
            directives = stats.directives,
            "controller finished"
        ),
        Err(e) => {
            error!(error = %e, "controller error");
            process::exit(1);
        }
    }
}
