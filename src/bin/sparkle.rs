//! Sparkle daemon binary
//!
//! Loads configuration and the host keypair, then creates or joins an
//! overlay network and runs the link-layer event loop.

use clap::Parser;
use sparkle::{event_channel, Config, LinkEvent, LinkLayer, RsaKeyPair};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Sparkle overlay network daemon
#[derive(Parser, Debug)]
#[command(name = "sparkle", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Create a new network instead of joining one
    #[arg(long, conflicts_with = "join")]
    create: bool,

    /// Local IPv4 address other peers will reach us at (with --create)
    #[arg(long, value_name = "ADDR", requires = "create")]
    address: Option<Ipv4Addr>,

    /// Bootstrap endpoint to join through, as ADDR:PORT
    #[arg(long, value_name = "ENDPOINT")]
    join: Option<SocketAddrV4>,

    /// Skip NAT detection and register as behind NAT
    #[arg(long)]
    behind_nat: bool,

    /// UDP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Network divisor for a created network (overrides config)
    #[arg(long, value_name = "D")]
    network_divisor: Option<u8>,

    /// Host RSA key file (overrides config)
    #[arg(long, value_name = "FILE")]
    key_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    // Load configuration
    let (mut config, loaded_path) = if let Some(path) = &args.config {
        match Config::load_file(path) {
            Ok(config) => (config, Some(path.clone())),
            Err(e) => {
                error!("failed to load configuration from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    match &loaded_path {
        Some(path) => info!(path = %path.display(), "loaded config file"),
        None => info!("no config file found, using defaults"),
    }

    if let Some(port) = args.port {
        config.node.port = port;
    }
    if let Some(divisor) = args.network_divisor {
        config.node.network_divisor = divisor;
    }
    if let Some(key_file) = args.key_file.clone() {
        config.identity.key_file = Some(key_file);
    }

    // Host keypair
    let key_path = config.identity.key_file_path();
    let host_key = match RsaKeyPair::load_or_generate(&key_path, config.identity.key_length) {
        Ok(pair) => pair,
        Err(e) => {
            error!("host keypair unavailable: {}", e);
            std::process::exit(1);
        }
    };

    let (event_tx, mut event_rx) = event_channel();
    let mut link = LinkLayer::new(config, host_key, event_tx);

    // Bring the node up
    let result = if args.create {
        let Some(address) = args.address else {
            error!("--create requires --address");
            std::process::exit(1);
        };
        link.create_network(address).await
    } else if let Some(bootstrap) = args.join {
        link.join_network(bootstrap, args.behind_nat).await
    } else {
        error!("either --create or --join is required");
        std::process::exit(1);
    };

    if let Err(e) = result {
        error!("bringing up the overlay failed: {}", e);
        std::process::exit(1);
    }

    // Event logger
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                LinkEvent::Joined(identity) => {
                    info!("overlay membership established:");
                    info!("    endpoint: {}", identity.endpoint);
                    info!("  overlay ip: {}", identity.overlay.ip());
                    info!(" overlay mac: {}", identity.overlay.mac());
                    info!("        role: {}", if identity.is_master { "master" } else { "slave" });
                    info!("  behind nat: {}", identity.is_behind_nat);
                }
                LinkEvent::JoinFailed => {
                    error!("join failed");
                    std::process::exit(1);
                }
                LinkEvent::ReadyForShutdown => {
                    info!("link layer ready for shutdown");
                    break;
                }
                LinkEvent::Data { source, overlay_ip, payload } => {
                    // Frame consumers (a TAP device, a tunnel) hook in here.
                    info!(
                        %source,
                        overlay_ip = ?overlay_ip,
                        bytes = payload.len(),
                        "data frame received"
                    );
                }
            }
        }
    });

    info!("sparkle running, press Ctrl+C to exit");

    tokio::select! {
        _ = link.run() => {
            warn!("link layer loop exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Graceful exit: notify a master (or reincarnate a successor) and
    // give pending negotiations a bounded window to drain.
    link.exit_network().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), link.run()).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), event_task).await;

    info!("sparkle shutdown complete");
}
