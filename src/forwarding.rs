// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Forwarding engine: unicast lookup-and-send, and community broadcast with
//! MAC-based source suppression.

use mio::net::UdpSocket;
use tracing::{trace, warn};

use crate::registry::{EdgeRegistry, Stats};
use crate::wire::{CommunityName, MacAddr};

/// Looks up destinations in the [`EdgeRegistry`] and sends datagrams on the
/// caller-supplied edge socket, updating [`Stats`] as it goes.
pub struct ForwardingEngine;

impl ForwardingEngine {
    /// Unicast: look up `dst_mac`. A miss is a silent policy drop, not an
    /// error - the caller should log it at trace level via [`crate::error::DropReason`].
    pub fn try_forward(
        socket: &UdpSocket,
        registry: &EdgeRegistry,
        stats: &mut Stats,
        dst_mac: &MacAddr,
        datagram: &[u8],
        now: u64,
    ) -> bool {
        let Some(record) = registry.find_by_mac(dst_mac) else {
            return false;
        };

        match socket.send_to(datagram, record.sock) {
            Ok(_) => {
                stats.fwd += 1;
                stats.last_fwd = Some(now);
                true
            }
            Err(e) => {
                warn!(dst = %record.sock, error = %e, "forward send failed");
                stats.errors += 1;
                false
            }
        }
    }

    /// Broadcast to every edge in `community` except `src_mac`. Every
    /// successful send increments `broadcast`; every failed send increments
    /// `errors`, but one failure never aborts the fan-out.
    pub fn try_broadcast(
        socket: &UdpSocket,
        registry: &EdgeRegistry,
        stats: &mut Stats,
        community: &CommunityName,
        src_mac: &MacAddr,
        datagram: &[u8],
    ) -> usize {
        let mut sent = 0;
        for record in registry.iter() {
            if &record.community != community || &record.mac == src_mac {
                continue;
            }
            match socket.send_to(datagram, record.sock) {
                Ok(_) => {
                    stats.broadcast += 1;
                    sent += 1;
                }
                Err(e) => {
                    warn!(dst = %record.sock, error = %e, "broadcast send failed");
                    stats.errors += 1;
                }
            }
        }
        trace!(community = %community.trimmed(), sent, "community broadcast complete");
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use std::time::Duration;

    fn bound_socket() -> UdpSocket {
        let std_socket =
            std::net::UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)))
                .unwrap();
        UdpSocket::from_std(std_socket)
    }

    /// mio sockets are always non-blocking; these tests run on real loopback
    /// sockets without an event loop driving readiness, so poll `recv_from`
    /// with a short sleep until the datagram lands instead.
    fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 2048];
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, _)) => return buf[..len].to_vec(),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("recv_from failed: {e}"),
            }
        }
    }

    fn mac(b: u8) -> MacAddr {
        MacAddr([b, b, b, b, b, b])
    }

    #[test]
    fn unicast_forward_reaches_destination_and_updates_stats() {
        let sender = bound_socket();
        let dest = bound_socket();
        let mut registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);

        registry.upsert(
            CommunityName::new("acme"),
            mac(0xbb),
            dest.local_addr().unwrap(),
            0,
        );

        let ok = ForwardingEngine::try_forward(
            &sender,
            &registry,
            &mut stats,
            &mac(0xbb),
            b"hello edge",
            10,
        );

        assert!(ok);
        assert_eq!(stats.fwd, 1);
        assert_eq!(stats.last_fwd, Some(10));
        assert_eq!(recv(&dest), b"hello edge");
    }

    #[test]
    fn unicast_forward_unknown_mac_is_a_silent_miss() {
        let sender = bound_socket();
        let registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);

        let ok = ForwardingEngine::try_forward(
            &sender,
            &registry,
            &mut stats,
            &mac(0xcc),
            b"hi",
            5,
        );

        assert!(!ok);
        assert_eq!(stats.fwd, 0);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn broadcast_reaches_same_community_and_suppresses_source() {
        let sender = bound_socket();
        let a = bound_socket();
        let b = bound_socket();
        let c = bound_socket();
        let other = bound_socket();
        let mut registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);

        let acme = CommunityName::new("acme");
        registry.upsert(acme, mac(0xaa), a.local_addr().unwrap(), 0);
        registry.upsert(acme, mac(0xbb), b.local_addr().unwrap(), 0);
        registry.upsert(acme, mac(0xcc), c.local_addr().unwrap(), 0);
        registry.upsert(
            CommunityName::new("other"),
            mac(0xdd),
            other.local_addr().unwrap(),
            0,
        );

        let sent = ForwardingEngine::try_broadcast(
            &sender,
            &registry,
            &mut stats,
            &acme,
            &mac(0xaa),
            b"flood",
        );

        assert_eq!(sent, 2);
        assert_eq!(stats.broadcast, 2);
        assert_eq!(recv(&b), b"flood");
        assert_eq!(recv(&c), b"flood");
        assert!(a.recv_from(&mut [0u8; 16]).is_err());
        assert!(other.recv_from(&mut [0u8; 16]).is_err());
    }
}
