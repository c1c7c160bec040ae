//! # SZG Relay
//!
//! A graphics peer that holds a scene graph and relays it between other peers.
//!
//! ## Usage
//!
//! ```bash
//! szg_relay --config relay.toml --listen 0.0.0.0:6001 --connect hub=10.0.0.2:6001
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use szg_networking::config::{PeerLinkSettings, SzgConfig};
use szg_networking::logging::init_logging;
use szg_networking::{GraphicsPeer, NetError, NetResult};

struct Args {
    config: Option<String>,
    listen: Option<String>,
    name: Option<String>,
    connect: Vec<PeerLinkSettings>,
    duration: Option<Duration>,
    status_every: Duration,
}

fn usage() {
    println!("Usage: szg_relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>          TOML configuration");
    println!("  -l, --listen <ADDR>          Listen address (overrides peer.bind_address)");
    println!("  -n, --name <NAME>            Peer name (overrides peer.name)");
    println!("      --connect <LABEL=ADDR>   Connect to a peer and relay to it; repeatable");
    println!("  -d, --duration <SECS>        Run for N seconds then exit");
    println!("  -s, --status <SECS>          Log connections every N seconds (default: 10)");
    println!("  -h, --help                   Show this help");
}

fn parse_args() -> Result<Option<Args>, String> {
    let mut args = Args {
        config: None,
        listen: None,
        name: None,
        connect: Vec::new(),
        duration: None,
        status_every: Duration::from_secs(10),
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let mut value = || it.next().ok_or_else(|| format!("{flag} needs a value"));
        match flag.as_str() {
            "--config" | "-c" => args.config = Some(value()?),
            "--listen" | "-l" => args.listen = Some(value()?),
            "--name" | "-n" => args.name = Some(value()?),
            "--connect" => {
                let spec = value()?;
                let (label, address) = spec
                    .split_once('=')
                    .ok_or_else(|| format!("--connect expects LABEL=ADDR, got '{spec}'"))?;
                args.connect.push(PeerLinkSettings { label: label.into(), address: address.into(), relay: true });
            }
            "--duration" | "-d" => {
                let secs: u64 = value()?.parse().map_err(|e| format!("--duration: {e}"))?;
                args.duration = Some(Duration::from_secs(secs));
            }
            "--status" | "-s" => {
                let secs: u64 = value()?.parse().map_err(|e| format!("--status: {e}"))?;
                args.status_every = Duration::from_secs(secs.max(1));
            }
            "--help" | "-h" => {
                usage();
                return Ok(None);
            }
            other => return Err(format!("unknown option '{other}'")),
        }
    }
    Ok(Some(args))
}

fn run(args: Args) -> NetResult<()> {
    let mut config = match &args.config {
        Some(path) => SzgConfig::load(path)?,
        None => SzgConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.peer.bind_address = listen;
    }
    if let Some(name) = args.name {
        config.peer.name = name;
    }
    config.peer.connect.extend(args.connect);
    init_logging(&config.logging)?;

    let peer = GraphicsPeer::new(config.peer.peer_config());
    let bound = peer.listen(config.peer.address()?)?;
    tracing::info!(target: "szg::relay", "relay '{}' listening on {bound}", peer.name());

    for link in &config.peer.connect {
        let addr: SocketAddr = link
            .address
            .parse()
            .map_err(|e| NetError::Config(format!("peer '{}' address '{}': {e}", link.label, link.address)))?;
        match peer.connect_to_peer(&link.label, addr) {
            Ok(_) => {
                peer.set_relay(&link.label, link.relay);
                tracing::info!(target: "szg::relay", "connected to '{}' at {addr}", link.label);
            }
            Err(err) => tracing::error!(target: "szg::relay", "cannot reach '{}' at {addr}: {err}", link.label),
        }
    }

    let started = Instant::now();
    let mut last_status = Instant::now();
    loop {
        std::thread::sleep(Duration::from_millis(100));
        if args.duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        if last_status.elapsed() >= args.status_every {
            last_status = Instant::now();
            tracing::info!(
                target: "szg::relay",
                "{} nodes\n{}",
                peer.database().node_count(),
                peer.print_connections()
            );
        }
    }

    peer.stop();
    tracing::info!(target: "szg::relay", "relay stopped after {:?}", started.elapsed());
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("szg_relay: {message}");
            usage();
            return ExitCode::FAILURE;
        }
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("szg_relay: {err}");
            ExitCode::FAILURE
        }
    }
}
