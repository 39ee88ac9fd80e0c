// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Management endpoint: a loopback-only UDP status port. Any datagram
//! received triggers the fixed plain-text status block - the request's
//! contents are ignored.

use std::fmt::Write as _;
use std::net::SocketAddr;

use mio::net::UdpSocket;
use tracing::warn;

use crate::registry::{EdgeRegistry, Stats};

/// Fixed loopback port for the management status endpoint.
pub const MGMT_PORT: u16 = 5645;

pub struct MgmtEndpoint;

impl MgmtEndpoint {
    /// Handle one datagram on the management socket: render and send the
    /// status block back to `src`, regardless of what was received.
    pub fn handle_datagram(
        socket: &UdpSocket,
        src: SocketAddr,
        registry: &EdgeRegistry,
        stats: &Stats,
        now: u64,
    ) {
        let body = render_status(registry, stats, now);
        if let Err(e) = socket.send_to(body.as_bytes(), src) {
            warn!(%src, error = %e, "failed to send management status response");
        }
    }
}

fn render_status(registry: &EdgeRegistry, stats: &Stats, now: u64) -> String {
    let mut out = String::new();
    let last_fwd = stats.last_fwd.map(|t| now.saturating_sub(t));
    let last_reg = stats.last_reg_super.map(|t| now.saturating_sub(t));

    let _ = writeln!(out, "----------------");
    let _ = writeln!(out, "uptime    {}", stats.uptime(now));
    let _ = writeln!(out, "edges     {}", registry.size());
    let _ = writeln!(out, "errors    {}", stats.errors);
    let _ = writeln!(out, "reg_sup   {}", stats.reg_super);
    let _ = writeln!(out, "reg_nak   {}", stats.reg_super_nak);
    let _ = writeln!(out, "fwd       {}", stats.fwd);
    let _ = writeln!(out, "broadcast {}", stats.broadcast);
    match last_fwd {
        Some(age) => {
            let _ = writeln!(out, "last fwd  {age} sec ago");
        }
        None => {
            let _ = writeln!(out, "last fwd  never");
        }
    }
    match last_reg {
        Some(age) => {
            let _ = writeln!(out, "last reg  {age} sec ago");
        }
        None => {
            let _ = writeln!(out, "last reg  never");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{CommunityName, MacAddr};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn sock(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), port))
    }

    #[test]
    fn status_block_has_fixed_field_order() {
        let mut registry = EdgeRegistry::new();
        registry.upsert(CommunityName::new("acme"), MacAddr([1; 6]), sock(40000), 0);
        let mut stats = Stats::new(0);
        stats.fwd = 3;
        stats.last_fwd = Some(2);

        let rendered = render_status(&registry, &stats, 10);
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[0], "----------------");
        assert!(lines[1].starts_with("uptime"));
        assert!(lines[2].starts_with("edges     1"));
        assert!(lines.iter().any(|l| l.starts_with("fwd       3")));
        assert!(lines.iter().any(|l| l.contains("last fwd  8 sec ago")));
    }

    #[test]
    fn never_sent_fields_report_never() {
        let registry = EdgeRegistry::new();
        let stats = Stats::new(0);
        let rendered = render_status(&registry, &stats, 5);
        assert!(rendered.contains("last fwd  never"));
        assert!(rendered.contains("last reg  never"));
    }
}
