// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! n2n supernode
//!
//! Rendezvous/forwarding server for a layer-2 peer-to-peer overlay
//! network: edge nodes register their MAC address under a named
//! community, and the supernode forwards unicast packets and floods
//! broadcast/multicast packets between registered edges.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default edge port (7654)
//! n2n-supernode
//!
//! # Custom edge port, verbose logging
//! n2n-supernode --port 7655 -vv
//!
//! # Enable multi-supernode coordination with two seed peers
//! n2n-supernode --sn-port 7755 --peer 10.0.0.2:7755 --peer 10.0.0.3:7755
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use n2n_supernode::{Config, EventLoop};

/// n2n supernode - rendezvous and forwarding server for the overlay network
#[derive(Parser, Debug)]
#[command(name = "n2n-supernode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Edge UDP port to listen on
    #[arg(short = 'l', long, default_value_t = 7654)]
    port: u16,

    /// Run in the foreground (the only supported mode - daemonization is
    /// not implemented)
    #[arg(short, long, default_value_t = true)]
    foreground: bool,

    /// Increase verbosity (repeatable: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Inter-supernode (SNM) port. Enables the multi-supernode coordinator.
    #[arg(short = 's', long)]
    sn_port: Option<u16>,

    /// Seed peer supernode, as `ip:port` (repeatable)
    #[arg(short = 'i', long = "peer")]
    peers: Vec<SocketAddr>,

    /// Load configuration from a JSON file instead of the flags above
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => EnvFilter::new("n2n_supernode=info"),
        1 => EnvFilter::new("n2n_supernode=debug"),
        _ => EnvFilter::new("n2n_supernode=trace"),
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let config = if let Some(path) = args.config {
        info!(path = %path.display(), "loading configuration from file");
        Config::from_file(&path)?
    } else {
        Config {
            port: args.port,
            foreground: args.foreground,
            verbosity: args.verbose,
            sn_port: args.sn_port,
            peers: args.peers,
            ..Default::default()
        }
    };

    config.validate()?;

    info!("+----------------------------------------------------+");
    info!(
        "|  n2n supernode v{:<35} |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  edge port : {:<38} |", config.port);
    info!("|  mgmt port : {:<38} |", config.mgmt_port());
    info!(
        "|  sn port   : {:<38} |",
        config
            .sn_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );
    info!("+----------------------------------------------------+");

    let mut event_loop = EventLoop::new(&config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handle = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("shutdown signal received");
        shutdown_handle.store(true, Ordering::Relaxed);
    })?;

    let result = event_loop.run(&shutdown);
    event_loop.purge_all();

    if let Err(e) = &result {
        error!(error = %e, "supernode event loop terminated with an error");
    }
    result?;

    info!("supernode stopped");
    Ok(())
}
