// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Edge dispatcher: parses edge-facing UDP datagrams and drives the
//! registration / forwarding / broadcast state machine described in
//! spec.md §4.4.

use std::net::SocketAddr;

use mio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::coordinator::SupernodeCoordinator;
use crate::error::DropReason;
use crate::forwarding::ForwardingEngine;
use crate::registry::{now_secs, EdgeRegistry, Stats};
use crate::wire::{
    flags, Header, PacketBody, PacketCode, RegisterBody, RegisterSuperAckBody, RegisterSuperBody,
    RegisterSuperNakBody, SockAddr,
};

/// Edge-registration lifetime advertised in REGISTER_SUPER_ACK, in seconds.
pub const REG_LIFETIME_SECS: u16 = 120;

/// Parses and acts on a single edge-facing datagram. Holds no state of its
/// own - all mutable state (registry, stats, coordinator) is threaded
/// through by the caller (the event loop), matching the single-threaded
/// ownership model of §5.
pub struct EdgeDispatcher;

impl EdgeDispatcher {
    /// Handle one datagram received on the edge socket from `src`.
    pub fn handle_datagram(
        socket: &UdpSocket,
        src: SocketAddr,
        buf: &[u8],
        registry: &mut EdgeRegistry,
        stats: &mut Stats,
        coordinator: Option<&SupernodeCoordinator>,
    ) {
        let mut cursor = std::io::Cursor::new(buf);
        let header = match Header::read(&mut cursor) {
            Ok(h) => h,
            Err(e) => {
                trace!(error = %e, %src, "{}", DropReason::DecodeFailed);
                stats.errors += 1;
                return;
            }
        };

        if header.ttl < 1 {
            trace!(%src, "{}", DropReason::TtlExpired);
            return;
        }

        let body_start = Header::SIZE;
        if body_start > buf.len() {
            stats.errors += 1;
            return;
        }
        let body = &buf[body_start..];
        let ttl = header.ttl - 1;
        let now = now_secs();

        match header.pc {
            PacketCode::Packet => {
                Self::handle_packet(socket, src, &header, ttl, body, registry, stats)
            }
            PacketCode::Register => {
                Self::handle_register(socket, src, &header, ttl, body, registry, stats)
            }
            PacketCode::RegisterAck => {
                debug!(%src, "ignoring REGISTER_ACK - never routed through the supernode");
            }
            PacketCode::RegisterSuper => Self::handle_register_super(
                socket,
                src,
                &header,
                body,
                registry,
                stats,
                coordinator,
                now,
            ),
            PacketCode::Ping
            | PacketCode::Deregister
            | PacketCode::RegisterSuperAck
            | PacketCode::RegisterSuperNak
            | PacketCode::Federation => {
                trace!(%src, pc = ?header.pc, "no supernode-side handling for this packet code");
            }
        }
    }

    fn handle_packet(
        socket: &UdpSocket,
        src: SocketAddr,
        header: &Header,
        ttl: u8,
        body: &[u8],
        registry: &mut EdgeRegistry,
        stats: &mut Stats,
    ) {
        let parsed = match PacketBody::read(body, header.flags) {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, %src, "{}", DropReason::DecodeFailed);
                stats.errors += 1;
                return;
            }
        };

        let from_supernode = header.has_flag(flags::FROM_SUPERNODE);
        let (out_flags, out_body) = if from_supernode {
            (header.flags, body.to_vec())
        } else {
            let rewritten = PacketBody {
                src_mac: parsed.src_mac,
                dst_mac: parsed.dst_mac,
                sock: Some(SockAddr::from(src)),
                payload: parsed.payload.clone(),
            };
            match encode_body(&rewritten) {
                Some(buf) => (header.flags | flags::SOCKET | flags::FROM_SUPERNODE, buf),
                None => {
                    stats.errors += 1;
                    return;
                }
            }
        };

        let out_header = Header::new(ttl, PacketCode::Packet, out_flags, header.community);
        let Some(datagram) = encode_datagram(&out_header, &out_body) else {
            stats.errors += 1;
            return;
        };

        let now = now_secs();
        if parsed.dst_mac.is_multi_broadcast() {
            ForwardingEngine::try_broadcast(
                socket,
                registry,
                stats,
                &header.community,
                &parsed.src_mac,
                &datagram,
            );
        } else if !ForwardingEngine::try_forward(
            socket,
            registry,
            stats,
            &parsed.dst_mac,
            &datagram,
            now,
        ) {
            trace!(dst = %parsed.dst_mac, "{}", DropReason::UnknownUnicastMac);
        }
    }

    fn handle_register(
        socket: &UdpSocket,
        src: SocketAddr,
        header: &Header,
        ttl: u8,
        body: &[u8],
        registry: &mut EdgeRegistry,
        stats: &mut Stats,
    ) {
        let parsed = match RegisterBody::read(body, header.flags) {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, %src, "{}", DropReason::DecodeFailed);
                stats.errors += 1;
                return;
            }
        };

        if parsed.dst_mac.is_multi_broadcast() {
            trace!(%src, "{}", DropReason::MulticastRegisterDestination);
            return;
        }

        let from_supernode = header.has_flag(flags::FROM_SUPERNODE);
        let (out_flags, out_body) = if from_supernode {
            (header.flags, body.to_vec())
        } else {
            let rewritten = RegisterBody {
                cookie: parsed.cookie,
                src_mac: parsed.src_mac,
                dst_mac: parsed.dst_mac,
                sock: Some(SockAddr::from(src)),
            };
            let mut buf = Vec::new();
            match rewritten.write(&mut buf) {
                Ok(()) => (header.flags | flags::SOCKET | flags::FROM_SUPERNODE, buf),
                Err(_) => {
                    stats.errors += 1;
                    return;
                }
            }
        };

        let out_header = Header::new(ttl, PacketCode::Register, out_flags, header.community);
        let Some(datagram) = encode_datagram(&out_header, &out_body) else {
            stats.errors += 1;
            return;
        };

        let now = now_secs();
        if !ForwardingEngine::try_forward(socket, registry, stats, &parsed.dst_mac, &datagram, now)
        {
            trace!(dst = %parsed.dst_mac, "{}", DropReason::UnknownUnicastMac);
        }
    }

    fn handle_register_super(
        socket: &UdpSocket,
        src: SocketAddr,
        header: &Header,
        body: &[u8],
        registry: &mut EdgeRegistry,
        stats: &mut Stats,
        coordinator: Option<&SupernodeCoordinator>,
        now: u64,
    ) {
        let parsed = match RegisterSuperBody::read(body) {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, %src, "{}", DropReason::DecodeFailed);
                stats.errors += 1;
                return;
            }
        };

        if header.community.is_empty() {
            stats.reg_super_nak += 1;
            let nak = RegisterSuperNakBody {
                cookie: parsed.cookie,
                edge_mac: parsed.edge_mac,
            };
            let mut nak_buf = Vec::new();
            if nak.write(&mut nak_buf).is_ok() {
                let out_header =
                    Header::new(header.ttl, PacketCode::RegisterSuperNak, 0, header.community);
                if let Some(datagram) = encode_datagram(&out_header, &nak_buf) {
                    let _ = socket.send_to(&datagram, src);
                }
            }
            warn!(%src, "rejecting REGISTER_SUPER with empty community name");
            return;
        }

        registry.upsert(header.community, parsed.edge_mac, src, now);

        let sn_bak = coordinator
            .map(|c| c.backup_supernodes_for(&header.community))
            .unwrap_or_default();

        let ack = RegisterSuperAckBody {
            cookie: parsed.cookie,
            edge_mac: parsed.edge_mac,
            lifetime: REG_LIFETIME_SECS,
            sock: SockAddr::from(src),
            sn_bak,
        };
        let mut ack_buf = Vec::new();
        if ack.write(&mut ack_buf).is_err() {
            stats.errors += 1;
            return;
        }
        let out_header =
            Header::new(header.ttl, PacketCode::RegisterSuperAck, 0, header.community);
        let Some(datagram) = encode_datagram(&out_header, &ack_buf) else {
            stats.errors += 1;
            return;
        };

        if let Err(e) = socket.send_to(&datagram, src) {
            warn!(%src, error = %e, "failed to send REGISTER_SUPER_ACK");
            stats.errors += 1;
            return;
        }

        stats.reg_super += 1;
        stats.last_reg_super = Some(now);
        debug!(mac = %parsed.edge_mac, community = %header.community.trimmed(), %src, "registered edge");
    }
}

fn encode_body(body: &PacketBody) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    body.write(&mut out).ok()?;
    Some(out)
}

fn encode_datagram(header: &Header, body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(Header::SIZE + body.len());
    header.write(&mut out).ok()?;
    out.extend_from_slice(body);
    if out.len() > crate::wire::MAX_DATAGRAM_SIZE {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{CommunityName, Cookie, MacAddr};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), port))
    }

    fn bound_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap()
    }

    fn register_super_datagram(community: &str, mac: MacAddr, cookie: [u8; 4]) -> Vec<u8> {
        let header = Header::new(15, PacketCode::RegisterSuper, 0, CommunityName::new(community));
        let body = RegisterSuperBody {
            cookie: Cookie(cookie),
            edge_mac: mac,
            auth: [0; 4],
        };
        let mut body_buf = Vec::new();
        body.write(&mut body_buf).unwrap();
        encode_datagram(&header, &body_buf).unwrap()
    }

    #[test]
    fn register_super_upserts_and_acks() {
        let socket = bound_socket();
        let mut registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let datagram = register_super_datagram("acme", mac, [0xde, 0xad, 0xbe, 0xef]);

        EdgeDispatcher::handle_datagram(
            &socket,
            addr(40000),
            &datagram,
            &mut registry,
            &mut stats,
            None,
        );

        assert_eq!(registry.size(), 1);
        assert_eq!(stats.reg_super, 1);
        assert_eq!(registry.find_by_mac(&mac).unwrap().sock, addr(40000));
    }

    #[test]
    fn register_super_with_empty_community_is_nakked() {
        let socket = bound_socket();
        let mut registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let datagram = register_super_datagram("", mac, [0; 4]);

        EdgeDispatcher::handle_datagram(
            &socket,
            addr(40000),
            &datagram,
            &mut registry,
            &mut stats,
            None,
        );

        assert_eq!(registry.size(), 0);
        assert_eq!(stats.reg_super_nak, 1);
        assert_eq!(stats.reg_super, 0);
    }

    #[test]
    fn ttl_zero_is_dropped_silently() {
        let socket = bound_socket();
        let mut registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);
        let header = Header::new(0, PacketCode::Ping, 0, CommunityName::new("acme"));
        let mut datagram = Vec::new();
        header.write(&mut datagram).unwrap();

        EdgeDispatcher::handle_datagram(
            &socket,
            addr(40000),
            &datagram,
            &mut registry,
            &mut stats,
            None,
        );

        assert_eq!(stats.errors, 0);
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn malformed_header_increments_errors_and_does_not_panic() {
        let socket = bound_socket();
        let mut registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);
        let datagram = [0u8; 2];

        EdgeDispatcher::handle_datagram(
            &socket,
            addr(40000),
            &datagram,
            &mut registry,
            &mut stats,
            None,
        );

        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn packet_rewrite_and_unicast_delivers_to_destination() {
        use std::time::Duration;

        let supernode_socket = bound_socket();
        let b_socket = bound_socket();
        let mut registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);

        let mac_a = MacAddr([0xaa; 6]);
        let mac_b = MacAddr([0xbb; 6]);
        let a_src = addr(40000);
        registry.upsert(
            CommunityName::new("acme"),
            mac_b,
            b_socket.local_addr().unwrap(),
            0,
        );

        let header = Header::new(15, PacketCode::Packet, 0, CommunityName::new("acme"));
        let body = PacketBody {
            src_mac: mac_a,
            dst_mac: mac_b,
            sock: None,
            payload: b"hi".to_vec(),
        };
        let mut body_buf = Vec::new();
        body.write(&mut body_buf).unwrap();
        let datagram = encode_datagram(&header, &body_buf).unwrap();

        EdgeDispatcher::handle_datagram(
            &supernode_socket,
            a_src,
            &datagram,
            &mut registry,
            &mut stats,
            None,
        );

        assert_eq!(stats.fwd, 1);

        let mut buf = [0u8; 2048];
        let (len, _) = loop {
            match b_socket.recv_from(&mut buf) {
                Ok(r) => break r,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("recv_from failed: {e}"),
            }
        };
        let received = &buf[..len];
        let mut cur = std::io::Cursor::new(received);
        let out_header = Header::read(&mut cur).unwrap();
        assert!(out_header.has_flag(flags::FROM_SUPERNODE));
        assert!(out_header.has_flag(flags::SOCKET));
        assert_eq!(out_header.ttl, 14);

        let out_body = PacketBody::read(&received[Header::SIZE..], out_header.flags).unwrap();
        assert_eq!(out_body.src_mac, mac_a);
        assert_eq!(out_body.dst_mac, mac_b);
        assert_eq!(out_body.sock, Some(SockAddr::from(a_src)));
        assert_eq!(out_body.payload, b"hi");
    }

    #[test]
    fn unicast_packet_to_unknown_mac_is_silently_dropped() {
        let socket = bound_socket();
        let mut registry = EdgeRegistry::new();
        let mut stats = Stats::new(0);
        registry.upsert(
            CommunityName::new("acme"),
            MacAddr([0xaa; 6]),
            addr(40000),
            0,
        );

        let header = Header::new(15, PacketCode::Packet, 0, CommunityName::new("acme"));
        let body = PacketBody {
            src_mac: MacAddr([0xaa; 6]),
            dst_mac: MacAddr([0xcc; 6]),
            sock: None,
            payload: b"hi".to_vec(),
        };
        let mut body_buf = Vec::new();
        body.write(&mut body_buf).unwrap();
        let datagram = encode_datagram(&header, &body_buf).unwrap();

        EdgeDispatcher::handle_datagram(
            &socket,
            addr(40000),
            &datagram,
            &mut registry,
            &mut stats,
            None,
        );

        assert_eq!(stats.fwd, 0);
        assert_eq!(stats.errors, 0);
    }
}
