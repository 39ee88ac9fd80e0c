// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec for the edge protocol and the inter-supernode management
//! protocol (SNM).
//!
//! # Edge datagram layout
//!
//! ```text
//! +--------+--------+----------------+------------------------------+
//! | ver/ttl|   pc   |     flags      |       community (16)         |
//! | (1)    |  (1)   |      (2)       |                               |
//! +--------+--------+----------------+------------------------------+
//! |                      message body (variable)                    |
//! +-------------------------------------------------------------------+
//! ```
//!
//! All multi-byte integers are network byte order (big-endian). Socket
//! addresses are normalized to host byte order once decoded and are only
//! converted back to network byte order at encode time (see [`SockAddr`]).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

/// Maximum size of any datagram this supernode will read or write.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Errors produced while decoding or encoding a wire message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("datagram truncated: {0}")]
    Truncated(&'static str),

    #[error("unsupported protocol version {0} (expected 2)")]
    BadVersion(u8),

    #[error("unknown packet code {0}")]
    UnknownPacketCode(u8),

    #[error("unknown SNM message type {0}")]
    UnknownSnmType(u16),

    #[error("unknown socket family tag {0}")]
    BadSockFamily(u8),

    #[error("backup supernode list longer than 255 entries")]
    TooManySupernodes,
}

fn truncated(_: io::Error, what: &'static str) -> CodecError {
    CodecError::Truncated(what)
}

/// A 6-byte Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// True if this destination is a broadcast or multicast MAC per Ethernet
    /// conventions: the low bit of the first octet is set, or the address is
    /// the all-ones broadcast address.
    pub fn is_multi_broadcast(&self) -> bool {
        self.0 == [0xff; 6] || (self.0[0] & 0x01) != 0
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let mut buf = [0u8; 6];
        r.read_exact(&mut buf).map_err(|e| truncated(e, "mac"))?;
        Ok(Self(buf))
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_all(&self.0).map_err(|e| truncated(e, "mac"))
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Fixed-width 16-byte community name, null-padded. Compared by full width,
/// matching the reference's `memcmp` over the whole buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommunityName(pub [u8; 16]);

impl CommunityName {
    pub const SIZE: usize = 16;

    /// Build a padded community name from a UTF-8 str, truncating at 16
    /// bytes if necessary.
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; 16];
        let bytes = name.as_bytes();
        let n = bytes.len().min(16);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self(buf)
    }

    /// The name with trailing NUL padding trimmed, as a lossy UTF-8 string.
    pub fn trimmed(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(16);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.trimmed().is_empty()
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let mut buf = [0u8; 16];
        r.read_exact(&mut buf)
            .map_err(|e| truncated(e, "community"))?;
        Ok(Self(buf))
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_all(&self.0)
            .map_err(|e| truncated(e, "community"))
    }
}

/// Opaque 4-byte cookie echoed by REGISTER_SUPER / REGISTER_SUPER_ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie(pub [u8; 4]);

impl Cookie {
    pub fn read<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).map_err(|e| truncated(e, "cookie"))?;
        Ok(Self(buf))
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_all(&self.0).map_err(|e| truncated(e, "cookie"))
    }
}

/// A socket address normalized to host byte order in memory. Converted to
/// and from network byte order exactly once, at the codec boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockAddr {
    V4(Ipv4Addr, u16),
    V6(Ipv6Addr, u16),
}

impl SockAddr {
    const FAMILY_V4: u8 = 4;
    const FAMILY_V6: u8 = 6;

    pub fn port(&self) -> u16 {
        match self {
            Self::V4(_, p) | Self::V6(_, p) => *p,
        }
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let family = r.read_u8().map_err(|e| truncated(e, "sock family"))?;
        match family {
            Self::FAMILY_V4 => {
                let mut octets = [0u8; 4];
                r.read_exact(&mut octets)
                    .map_err(|e| truncated(e, "sock v4 addr"))?;
                let port = r
                    .read_u16::<BigEndian>()
                    .map_err(|e| truncated(e, "sock port"))?;
                Ok(Self::V4(Ipv4Addr::from(octets), port))
            }
            Self::FAMILY_V6 => {
                let mut octets = [0u8; 16];
                r.read_exact(&mut octets)
                    .map_err(|e| truncated(e, "sock v6 addr"))?;
                let port = r
                    .read_u16::<BigEndian>()
                    .map_err(|e| truncated(e, "sock port"))?;
                Ok(Self::V6(Ipv6Addr::from(octets), port))
            }
            other => Err(CodecError::BadSockFamily(other)),
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        match self {
            Self::V4(addr, port) => {
                w.write_u8(Self::FAMILY_V4)
                    .map_err(|e| truncated(e, "sock family"))?;
                w.write_all(&addr.octets())
                    .map_err(|e| truncated(e, "sock v4 addr"))?;
                w.write_u16::<BigEndian>(*port)
                    .map_err(|e| truncated(e, "sock port"))
            }
            Self::V6(addr, port) => {
                w.write_u8(Self::FAMILY_V6)
                    .map_err(|e| truncated(e, "sock family"))?;
                w.write_all(&addr.octets())
                    .map_err(|e| truncated(e, "sock v6 addr"))?;
                w.write_u16::<BigEndian>(*port)
                    .map_err(|e| truncated(e, "sock port"))
            }
        }
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::V4(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => Self::V6(*v6.ip(), v6.port()),
        }
    }
}

impl From<SockAddr> for SocketAddr {
    fn from(addr: SockAddr) -> Self {
        match addr {
            SockAddr::V4(ip, port) => SocketAddr::new(ip.into(), port),
            SockAddr::V6(ip, port) => SocketAddr::new(ip.into(), port),
        }
    }
}

/// Edge-facing packet codes (`pc` field of the common header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCode {
    Ping = 0,
    Register = 1,
    Deregister = 2,
    Packet = 3,
    RegisterAck = 4,
    RegisterSuper = 5,
    RegisterSuperAck = 6,
    RegisterSuperNak = 7,
    Federation = 8,
}

impl TryFrom<u8> for PacketCode {
    type Error = CodecError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => Self::Ping,
            1 => Self::Register,
            2 => Self::Deregister,
            3 => Self::Packet,
            4 => Self::RegisterAck,
            5 => Self::RegisterSuper,
            6 => Self::RegisterSuperAck,
            7 => Self::RegisterSuperNak,
            8 => Self::Federation,
            other => return Err(CodecError::UnknownPacketCode(other)),
        })
    }
}

/// Header flag bits.
pub mod flags {
    /// Set when the packet was forwarded (or originated) by a supernode.
    pub const FROM_SUPERNODE: u16 = 0x0001;
    /// Set when the body carries an originating socket field.
    pub const SOCKET: u16 = 0x0002;
}

/// The common header present on every edge-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub ttl: u8,
    pub pc: PacketCode,
    pub flags: u16,
    pub community: CommunityName,
}

impl Header {
    pub const PROTOCOL_VERSION: u8 = 2;
    pub const SIZE: usize = 1 + 1 + 2 + CommunityName::SIZE;

    pub fn new(ttl: u8, pc: PacketCode, flags: u16, community: CommunityName) -> Self {
        Self {
            version: Self::PROTOCOL_VERSION,
            ttl,
            pc,
            flags,
            community,
        }
    }

    pub fn has_flag(&self, bit: u16) -> bool {
        self.flags & bit != 0
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let ver_ttl = r.read_u8().map_err(|e| truncated(e, "header ver/ttl"))?;
        let version = ver_ttl >> 4;
        let ttl = ver_ttl & 0x0f;
        if version != Self::PROTOCOL_VERSION {
            return Err(CodecError::BadVersion(version));
        }
        let pc = PacketCode::try_from(r.read_u8().map_err(|e| truncated(e, "header pc"))?)?;
        let flags = r
            .read_u16::<BigEndian>()
            .map_err(|e| truncated(e, "header flags"))?;
        let community = CommunityName::read(r)?;
        Ok(Self {
            version,
            ttl,
            pc,
            flags,
            community,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        let ver_ttl = (self.version << 4) | (self.ttl & 0x0f);
        w.write_u8(ver_ttl)
            .map_err(|e| truncated(e, "header ver/ttl"))?;
        w.write_u8(self.pc as u8)
            .map_err(|e| truncated(e, "header pc"))?;
        w.write_u16::<BigEndian>(self.flags)
            .map_err(|e| truncated(e, "header flags"))?;
        self.community.write(w)
    }
}

/// PACKET body: a tunneled Ethernet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBody {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub sock: Option<SockAddr>,
    pub payload: Vec<u8>,
}

impl PacketBody {
    pub fn read(buf: &[u8], header_flags: u16) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let src_mac = MacAddr::read(&mut cur)?;
        let dst_mac = MacAddr::read(&mut cur)?;
        let sock = if header_flags & flags::SOCKET != 0 {
            Some(SockAddr::read(&mut cur)?)
        } else {
            None
        };
        let pos = cur.position() as usize;
        let payload = buf[pos..].to_vec();
        Ok(Self {
            src_mac,
            dst_mac,
            sock,
            payload,
        })
    }

    /// Encode the body. The returned flags include [`flags::SOCKET`] iff
    /// `self.sock` is populated - callers combine this with the header.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.src_mac.write(out)?;
        self.dst_mac.write(out)?;
        if let Some(sock) = &self.sock {
            sock.write(out)?;
        }
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// REGISTER body: an edge's own PING/REGISTER request (pre-dates the
/// multi-supernode protocol, still accepted for wire compatibility).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBody {
    pub cookie: Cookie,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub sock: Option<SockAddr>,
}

impl RegisterBody {
    pub fn read(buf: &[u8], header_flags: u16) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let cookie = Cookie::read(&mut cur)?;
        let src_mac = MacAddr::read(&mut cur)?;
        let dst_mac = MacAddr::read(&mut cur)?;
        let sock = if header_flags & flags::SOCKET != 0 {
            Some(SockAddr::read(&mut cur)?)
        } else {
            None
        };
        Ok(Self {
            cookie,
            src_mac,
            dst_mac,
            sock,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.cookie.write(out)?;
        self.src_mac.write(out)?;
        self.dst_mac.write(out)?;
        if let Some(sock) = &self.sock {
            sock.write(out)?;
        }
        Ok(())
    }
}

/// REGISTER_SUPER body: an edge registering itself with this supernode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSuperBody {
    pub cookie: Cookie,
    pub edge_mac: MacAddr,
    pub auth: [u8; 4],
}

impl RegisterSuperBody {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let cookie = Cookie::read(&mut cur)?;
        let edge_mac = MacAddr::read(&mut cur)?;
        let mut auth = [0u8; 4];
        cur.read_exact(&mut auth)
            .map_err(|e| truncated(e, "register_super auth"))?;
        Ok(Self {
            cookie,
            edge_mac,
            auth,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.cookie.write(out)?;
        self.edge_mac.write(out)?;
        out.extend_from_slice(&self.auth);
        Ok(())
    }
}

/// REGISTER_SUPER_ACK body, including the optional backup-supernode list
/// populated by the coordinator when the community is federated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSuperAckBody {
    pub cookie: Cookie,
    pub edge_mac: MacAddr,
    pub lifetime: u16,
    pub sock: SockAddr,
    pub sn_bak: Vec<SockAddr>,
}

impl RegisterSuperAckBody {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let cookie = Cookie::read(&mut cur)?;
        let edge_mac = MacAddr::read(&mut cur)?;
        let lifetime = cur
            .read_u16::<BigEndian>()
            .map_err(|e| truncated(e, "ack lifetime"))?;
        let sock = SockAddr::read(&mut cur)?;
        let num_sn = cur.read_u8().map_err(|e| truncated(e, "ack num_sn"))?;
        let mut sn_bak = Vec::with_capacity(num_sn as usize);
        for _ in 0..num_sn {
            sn_bak.push(SockAddr::read(&mut cur)?);
        }
        Ok(Self {
            cookie,
            edge_mac,
            lifetime,
            sock,
            sn_bak,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        if self.sn_bak.len() > u8::MAX as usize {
            return Err(CodecError::TooManySupernodes);
        }
        self.cookie.write(out)?;
        self.edge_mac.write(out)?;
        out.write_u16::<BigEndian>(self.lifetime)
            .map_err(|e| truncated(e, "ack lifetime"))?;
        self.sock.write(out)?;
        out.write_u8(self.sn_bak.len() as u8)
            .map_err(|e| truncated(e, "ack num_sn"))?;
        for sn in &self.sn_bak {
            sn.write(out)?;
        }
        Ok(())
    }
}

/// REGISTER_SUPER_NAK body: the minimal rejection echo wired up for the
/// `reg_super_nak` counter (see Design Notes - the reference declares the
/// counter but never increments it; this crate gives it one concrete
/// policy: an empty, post-trim community name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSuperNakBody {
    pub cookie: Cookie,
    pub edge_mac: MacAddr,
}

impl RegisterSuperNakBody {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let cookie = Cookie::read(&mut cur)?;
        let edge_mac = MacAddr::read(&mut cur)?;
        Ok(Self { cookie, edge_mac })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.cookie.write(out)?;
        self.edge_mac.write(out)
    }
}

/// SNM message type (inter-supernode management protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmType {
    ReqList = 0,
    RspList = 1,
    Adv = 2,
}

impl TryFrom<u16> for SnmType {
    type Error = CodecError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => Self::ReqList,
            1 => Self::RspList,
            2 => Self::Adv,
            other => return Err(CodecError::UnknownSnmType(other)),
        })
    }
}

/// SNM header flag bits.
pub mod snm_flags {
    /// Requesting peer supernode list.
    pub const S: u16 = 0x0001;
    /// Requesting community list.
    pub const C: u16 = 0x0002;
    /// Filter by the community-name list carried in the body.
    pub const N: u16 = 0x0004;
    /// Sender wants the reply to advertise back.
    pub const A: u16 = 0x0008;
    /// Request originated from an edge (new-community request).
    pub const E: u16 = 0x0010;
}

/// SNM header: type, flags, and a monotonic sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnmHeader {
    pub ty: SnmType,
    pub flags: u16,
    pub seq: u32,
}

impl SnmHeader {
    pub const SIZE: usize = 2 + 2 + 4;

    pub fn has_flag(&self, bit: u16) -> bool {
        self.flags & bit != 0
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let ty = SnmType::try_from(
            r.read_u16::<BigEndian>()
                .map_err(|e| truncated(e, "snm type"))?,
        )?;
        let flags = r
            .read_u16::<BigEndian>()
            .map_err(|e| truncated(e, "snm flags"))?;
        let seq = r
            .read_u32::<BigEndian>()
            .map_err(|e| truncated(e, "snm seq"))?;
        Ok(Self { ty, flags, seq })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_u16::<BigEndian>(self.ty as u16)
            .map_err(|e| truncated(e, "snm type"))?;
        w.write_u16::<BigEndian>(self.flags)
            .map_err(|e| truncated(e, "snm flags"))?;
        w.write_u32::<BigEndian>(self.seq)
            .map_err(|e| truncated(e, "snm seq"))
    }
}

fn read_community_list<R: Read>(r: &mut R) -> Result<Vec<CommunityName>, CodecError> {
    let count = r.read_u8().map_err(|e| truncated(e, "name list count"))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(CommunityName::read(r)?);
    }
    Ok(out)
}

fn write_community_list<W: Write>(
    w: &mut W,
    names: &[CommunityName],
) -> Result<(), CodecError> {
    if names.len() > u8::MAX as usize {
        return Err(CodecError::TooManySupernodes);
    }
    w.write_u8(names.len() as u8)
        .map_err(|e| truncated(e, "name list count"))?;
    for name in names {
        name.write(w)?;
    }
    Ok(())
}

fn read_sock_list<R: Read>(r: &mut R) -> Result<Vec<SockAddr>, CodecError> {
    let count = r.read_u8().map_err(|e| truncated(e, "sock list count"))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(SockAddr::read(r)?);
    }
    Ok(out)
}

fn write_sock_list<W: Write>(w: &mut W, socks: &[SockAddr]) -> Result<(), CodecError> {
    if socks.len() > u8::MAX as usize {
        return Err(CodecError::TooManySupernodes);
    }
    w.write_u8(socks.len() as u8)
        .map_err(|e| truncated(e, "sock list count"))?;
    for sock in socks {
        sock.write(w)?;
    }
    Ok(())
}

/// One community entry as carried in SNM_INFO / SNM_ADV: the community name,
/// the supernodes known to serve it, and whether it was loaded from the
/// local persisted file (vs. learned dynamically).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmCommunityEntry {
    pub name: CommunityName,
    pub supernodes: Vec<SockAddr>,
    pub persist: bool,
}

impl SnmCommunityEntry {
    fn read<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let name = CommunityName::read(r)?;
        let supernodes = read_sock_list(r)?;
        let persist = r.read_u8().map_err(|e| truncated(e, "persist flag"))? != 0;
        Ok(Self {
            name,
            supernodes,
            persist,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.name.write(w)?;
        write_sock_list(w, &self.supernodes)?;
        w.write_u8(self.persist as u8)
            .map_err(|e| truncated(e, "persist flag"))
    }
}

fn read_community_entries<R: Read>(r: &mut R) -> Result<Vec<SnmCommunityEntry>, CodecError> {
    let count = r.read_u8().map_err(|e| truncated(e, "community count"))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(SnmCommunityEntry::read(r)?);
    }
    Ok(out)
}

fn write_community_entries<W: Write>(
    w: &mut W,
    entries: &[SnmCommunityEntry],
) -> Result<(), CodecError> {
    if entries.len() > u8::MAX as usize {
        return Err(CodecError::TooManySupernodes);
    }
    w.write_u8(entries.len() as u8)
        .map_err(|e| truncated(e, "community count"))?;
    for entry in entries {
        entry.write(w)?;
    }
    Ok(())
}

/// SNM_REQ body: an optional community-name filter (present iff the `N`
/// flag is set on the header; callers are expected to check the flag).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmReqBody {
    pub communities: Vec<CommunityName>,
}

impl SnmReqBody {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let communities = read_community_list(&mut cur)?;
        Ok(Self { communities })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        write_community_list(out, &self.communities)
    }
}

/// SNM_INFO body: the responder's supernode list and community list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmInfoBody {
    pub supernodes: Vec<SockAddr>,
    pub communities: Vec<SnmCommunityEntry>,
}

impl SnmInfoBody {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let supernodes = read_sock_list(&mut cur)?;
        let communities = read_community_entries(&mut cur)?;
        Ok(Self {
            supernodes,
            communities,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        write_sock_list(out, &self.supernodes)?;
        write_community_entries(out, &self.communities)
    }
}

/// SNM_ADV body: the sender's own socket and the communities it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmAdvBody {
    pub sender_sock: SockAddr,
    pub communities: Vec<SnmCommunityEntry>,
}

impl SnmAdvBody {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(buf);
        let sender_sock = SockAddr::read(&mut cur)?;
        let communities = read_community_entries(&mut cur)?;
        Ok(Self {
            sender_sock,
            communities,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.sender_sock.write(out)?;
        write_community_entries(out, &self.communities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community(name: &str) -> CommunityName {
        CommunityName::new(name)
    }

    fn sock4(a: u8, b: u8, c: u8, d: u8, port: u16) -> SockAddr {
        SockAddr::V4(Ipv4Addr::new(a, b, c, d), port)
    }

    #[test]
    fn header_roundtrip() {
        let hdr = Header::new(15, PacketCode::RegisterSuper, flags::SOCKET, community("acme"));
        let mut buf = Vec::new();
        hdr.write(&mut buf).unwrap();
        assert_eq!(buf.len(), Header::SIZE);
        let decoded = Header::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(hdr, decoded);
    }

    #[test]
    fn header_rejects_bad_version() {
        let mut buf = vec![0x10, 0, 0, 0];
        buf.extend_from_slice(&[0u8; 16]);
        let err = Header::read(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, CodecError::BadVersion(1)));
    }

    #[test]
    fn community_name_trims_padding() {
        let name = community("acme");
        assert_eq!(name.trimmed(), "acme");
        assert!(!name.is_empty());
        assert!(CommunityName::new("").is_empty());
    }

    #[test]
    fn mac_multi_broadcast() {
        assert!(MacAddr::BROADCAST.is_multi_broadcast());
        assert!(MacAddr([0x01, 0, 0, 0, 0, 0]).is_multi_broadcast());
        assert!(!MacAddr([0x02, 0, 0, 0, 0, 0]).is_multi_broadcast());
    }

    #[test]
    fn packet_body_roundtrip_with_sock() {
        let body = PacketBody {
            src_mac: MacAddr([1, 2, 3, 4, 5, 6]),
            dst_mac: MacAddr([0xaa; 6]),
            sock: Some(sock4(10, 0, 0, 1, 40000)),
            payload: b"hi".to_vec(),
        };
        let mut buf = Vec::new();
        body.write(&mut buf).unwrap();
        let decoded = PacketBody::read(&buf, flags::SOCKET).unwrap();
        assert_eq!(body, decoded);
    }

    #[test]
    fn packet_body_roundtrip_without_sock() {
        let body = PacketBody {
            src_mac: MacAddr([1, 2, 3, 4, 5, 6]),
            dst_mac: MacAddr([0xaa; 6]),
            sock: None,
            payload: b"payload bytes".to_vec(),
        };
        let mut buf = Vec::new();
        body.write(&mut buf).unwrap();
        let decoded = PacketBody::read(&buf, 0).unwrap();
        assert_eq!(body, decoded);
    }

    #[test]
    fn register_super_ack_roundtrip() {
        let ack = RegisterSuperAckBody {
            cookie: Cookie([0xde, 0xad, 0xbe, 0xef]),
            edge_mac: MacAddr([1, 2, 3, 4, 5, 6]),
            lifetime: 120,
            sock: sock4(10, 0, 0, 1, 40000),
            sn_bak: vec![sock4(10, 0, 0, 2, 7654), sock4(10, 0, 0, 3, 7654)],
        };
        let mut buf = Vec::new();
        ack.write(&mut buf).unwrap();
        let decoded = RegisterSuperAckBody::read(&buf).unwrap();
        assert_eq!(ack, decoded);
    }

    #[test]
    fn register_super_nak_roundtrip() {
        let nak = RegisterSuperNakBody {
            cookie: Cookie([1, 2, 3, 4]),
            edge_mac: MacAddr([1, 2, 3, 4, 5, 6]),
        };
        let mut buf = Vec::new();
        nak.write(&mut buf).unwrap();
        let decoded = RegisterSuperNakBody::read(&buf).unwrap();
        assert_eq!(nak, decoded);
    }

    #[test]
    fn truncated_datagram_fails_closed() {
        let buf = [0u8; 3];
        let err = Header::read(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
    }

    #[test]
    fn snm_req_roundtrip() {
        let req = SnmReqBody {
            communities: vec![community("acme"), community("other")],
        };
        let mut buf = Vec::new();
        req.write(&mut buf).unwrap();
        let decoded = SnmReqBody::read(&buf).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn snm_info_roundtrip() {
        let info = SnmInfoBody {
            supernodes: vec![sock4(10, 0, 0, 2, 7655)],
            communities: vec![SnmCommunityEntry {
                name: community("acme"),
                supernodes: vec![sock4(10, 0, 0, 2, 7655)],
                persist: true,
            }],
        };
        let mut buf = Vec::new();
        info.write(&mut buf).unwrap();
        let decoded = SnmInfoBody::read(&buf).unwrap();
        assert_eq!(info, decoded);
    }

    #[test]
    fn snm_adv_roundtrip() {
        let adv = SnmAdvBody {
            sender_sock: sock4(10, 0, 0, 2, 7655),
            communities: vec![SnmCommunityEntry {
                name: community("acme"),
                supernodes: vec![],
                persist: false,
            }],
        };
        let mut buf = Vec::new();
        adv.write(&mut buf).unwrap();
        let decoded = SnmAdvBody::read(&buf).unwrap();
        assert_eq!(adv, decoded);
    }

    #[test]
    fn sock_addr_roundtrip_v6() {
        let sock = SockAddr::V6(Ipv6Addr::LOCALHOST, 7654);
        let mut buf = Vec::new();
        sock.write(&mut buf).unwrap();
        let decoded = SockAddr::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(sock, decoded);
    }
}
