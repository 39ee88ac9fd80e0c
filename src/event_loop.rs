// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The single-threaded, readiness-driven event loop: owns every socket and
//! every mutable table (edge registry, statistics, coordinator) and drives
//! them to completion on the calling thread.
//!
//! Modeled on `hdds`'s mio-based multicast listener
//! (`core/discovery/multicast/listener.rs`), but without the dedicated
//! receiver thread - there is exactly one thread in this process's steady
//! state, per the concurrency model.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::coordinator::SupernodeCoordinator;
use crate::dispatcher::EdgeDispatcher;
use crate::error::SupernodeError;
use crate::mgmt::MgmtEndpoint;
use crate::registry::{now_secs, EdgeRegistry, Stats};

const EDGE_TOKEN: Token = Token(0);
const MGMT_TOKEN: Token = Token(1);
const SNM_TOKEN: Token = Token(2);

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Purge threshold is twice the advertised registration lifetime, matching
/// the reference's tolerance for one missed re-registration.
const REGISTRATION_PURGE_FACTOR: u64 = 2;

/// Owns every socket and table; runs the supernode to completion.
pub struct EventLoop {
    edge_socket: UdpSocket,
    mgmt_socket: UdpSocket,
    snm_socket: Option<UdpSocket>,
    registry: EdgeRegistry,
    stats: Stats,
    coordinator: Option<SupernodeCoordinator>,
    registration_lifetime_secs: u64,
}

impl EventLoop {
    /// Bind every socket named in the configuration and, if a coordinator
    /// port is set, load its persisted state and send its startup requests.
    pub fn new(config: &Config) -> Result<Self, SupernodeError> {
        config
            .validate()
            .map_err(SupernodeError::Config)?;

        let now = now_secs();

        let edge_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
        let edge_socket = UdpSocket::bind(edge_addr)?;

        let mgmt_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.mgmt_port());
        let mgmt_socket = UdpSocket::bind(mgmt_addr)?;

        let (snm_socket, coordinator) = match config.sn_port {
            Some(sn_port) => {
                let snm_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), sn_port);
                let socket = UdpSocket::bind(snm_addr)?;
                let local_snm_addr = socket.local_addr()?;
                let (coordinator, outbound) = SupernodeCoordinator::start(
                    local_snm_addr,
                    &config.peers,
                    Path::new(&config.state_dir),
                    sn_port,
                    now,
                )?;
                for (dest, datagram) in outbound {
                    if let Err(e) = socket.send_to(&datagram, dest) {
                        warn!(%dest, error = %e, "failed to send startup SNM request");
                    }
                }
                (Some(socket), Some(coordinator))
            }
            None => (None, None),
        };

        info!(
            edge_port = config.port,
            mgmt_port = config.mgmt_port(),
            sn_port = ?config.sn_port,
            "supernode sockets bound"
        );

        Ok(Self {
            edge_socket,
            mgmt_socket,
            snm_socket,
            registry: EdgeRegistry::new(),
            stats: Stats::new(now),
            coordinator,
            registration_lifetime_secs: config.registration_lifetime_secs,
        })
    }

    /// Run until `shutdown` is set. Registers every socket once with
    /// `Interest::READABLE`, then polls with a 10-second timeout, draining
    /// each readable socket in a loop until `WouldBlock`. Purge and the
    /// discovery tick run on every wakeup, timeout or not.
    pub fn run(&mut self, shutdown: &Arc<AtomicBool>) -> Result<(), SupernodeError> {
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(16);

        poll.registry()
            .register(&mut self.edge_socket, EDGE_TOKEN, Interest::READABLE)?;
        poll.registry()
            .register(&mut self.mgmt_socket, MGMT_TOKEN, Interest::READABLE)?;
        if let Some(snm_socket) = &mut self.snm_socket {
            poll.registry()
                .register(snm_socket, SNM_TOKEN, Interest::READABLE)?;
        }

        let mut buf = vec![0u8; crate::wire::MAX_DATAGRAM_SIZE];

        while !shutdown.load(Ordering::Relaxed) {
            match poll.poll(&mut events, Some(IDLE_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                match event.token() {
                    EDGE_TOKEN => self.drain_edge(&mut buf)?,
                    MGMT_TOKEN => self.drain_mgmt(&mut buf)?,
                    SNM_TOKEN => self.drain_snm(&mut buf)?,
                    _ => {}
                }
            }

            self.run_maintenance();
        }

        Ok(())
    }

    fn drain_edge(&mut self, buf: &mut [u8]) -> Result<(), SupernodeError> {
        loop {
            let (len, src) = match self.edge_socket.recv_from(buf) {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    error!(error = %e, "edge socket receive failed, terminating loop");
                    return Err(e.into());
                }
            };
            EdgeDispatcher::handle_datagram(
                &self.edge_socket,
                src,
                &buf[..len],
                &mut self.registry,
                &mut self.stats,
                self.coordinator.as_ref(),
            );
        }
    }

    fn drain_mgmt(&mut self, buf: &mut [u8]) -> Result<(), SupernodeError> {
        loop {
            let (_len, src) = match self.mgmt_socket.recv_from(buf) {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    error!(error = %e, "management socket receive failed, terminating loop");
                    return Err(e.into());
                }
            };
            MgmtEndpoint::handle_datagram(
                &self.mgmt_socket,
                src,
                &self.registry,
                &self.stats,
                now_secs(),
            );
        }
    }

    fn drain_snm(&mut self, buf: &mut [u8]) -> Result<(), SupernodeError> {
        let Some(snm_socket) = &self.snm_socket else {
            return Ok(());
        };
        loop {
            let (len, src) = match snm_socket.recv_from(buf) {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    error!(error = %e, "SNM socket receive failed, terminating loop");
                    return Err(e.into());
                }
            };
            self.handle_snm_datagram(src, &buf[..len]);
        }
    }

    fn handle_snm_datagram(&mut self, src: SocketAddr, buf: &[u8]) {
        use crate::wire::{SnmHeader, SnmType};

        let Some(coordinator) = self.coordinator.as_mut() else {
            return;
        };
        let mut cursor = std::io::Cursor::new(buf);
        let header = match SnmHeader::read(&mut cursor) {
            Ok(h) => h,
            Err(e) => {
                warn!(%src, error = %e, "malformed SNM datagram");
                self.stats.errors += 1;
                return;
            }
        };
        let body = &buf[SnmHeader::SIZE..];

        let result = match header.ty {
            SnmType::ReqList => coordinator.handle_req(src, &header, body),
            SnmType::RspList => coordinator.handle_info(src, body),
            SnmType::Adv => coordinator.handle_adv(src, &header, body),
        };

        let outbound = match result {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!(%src, error = %e, "coordinator rejected SNM message");
                self.stats.errors += 1;
                return;
            }
        };

        let Some(snm_socket) = &self.snm_socket else {
            return;
        };
        for (dest, datagram) in outbound {
            if let Err(e) = snm_socket.send_to(&datagram, dest) {
                warn!(%dest, error = %e, "failed to send SNM reply");
                self.stats.errors += 1;
            }
        }
    }

    fn run_maintenance(&mut self) {
        let now = now_secs();
        let purged = self
            .registry
            .purge(now, self.registration_lifetime_secs * REGISTRATION_PURGE_FACTOR);
        if purged > 0 {
            info!(purged, "expired stale edge registrations");
        }

        if let (Some(coordinator), Some(snm_socket)) =
            (self.coordinator.as_mut(), self.snm_socket.as_ref())
        {
            let outbound = coordinator.discovery_tick(now);
            for (dest, datagram) in outbound {
                if let Err(e) = snm_socket.send_to(&datagram, dest) {
                    warn!(%dest, error = %e, "failed to send discovery tick message");
                    self.stats.errors += 1;
                }
            }
        }
    }

    /// Drop every edge registration unconditionally. Called once on
    /// graceful shutdown.
    pub fn purge_all(&mut self) {
        let now = now_secs();
        let purged = self.registry.purge(now, 0);
        info!(purged, "purged all edge registrations on shutdown");
    }
}
