// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The multi-supernode coordination protocol (SNM): peer discovery,
//! community federation advertisement, and request/response handling.
//!
//! This module owns no socket. Every handler returns the list of
//! `(destination, datagram)` pairs the event loop should send on the SNM
//! socket - all state mutation happens here, all I/O happens at the call
//! site, matching the single-threaded model of §5.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::SupernodeError;
use crate::wire::{
    CommunityName, SnmAdvBody, SnmCommunityEntry, SnmHeader, SnmInfoBody, SnmReqBody, SnmType,
    SockAddr, snm_flags,
};

/// A community is federated once `N2N_MIN_SN_PER_COMM` supernodes are known
/// to serve it.
pub const N2N_MIN_SN_PER_COMM: usize = 2;

/// Cap on how many communities this supernode actively advertises.
pub const N2N_MAX_COMM_PER_SN: usize = 256;

/// Seconds to wait after startup before promoting dynamically-discovered
/// communities and transitioning DISCOVERY -> READY.
pub const N2N_SUPER_DISCOVERY_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Discovery,
    Ready,
}

/// What this supernode knows about a single community.
#[derive(Debug, Clone)]
pub struct CommunityInfo {
    pub name: CommunityName,
    pub supernodes: BTreeSet<SocketAddr>,
    /// Learned from the local persisted file (vs. discovered dynamically
    /// via SNM_INFO/SNM_ADV).
    pub persist: bool,
}

impl CommunityInfo {
    fn is_federated(&self) -> bool {
        self.supernodes.len() >= N2N_MIN_SN_PER_COMM
    }
}

/// Coordinator state: peer supernode set, community tables, and the
/// DISCOVERY/READY state machine.
pub struct SupernodeCoordinator {
    state: CoordinatorState,
    local_snm_addr: SocketAddr,
    seq: u32,
    start_time: u64,
    supernodes: BTreeSet<SocketAddr>,
    communities: Vec<CommunityInfo>,
    snm_file: PathBuf,
    comm_file: PathBuf,
}

impl SupernodeCoordinator {
    /// Load peer supernodes and persisted communities from the port-named
    /// files, merge in any command-line-supplied seed peers, and send an
    /// initial `S`-flagged REQ to every peer. Starts in READY if the loaded
    /// peer list (after the CLI merge) is empty - there is nobody to
    /// discover from.
    pub fn start(
        local_snm_addr: SocketAddr,
        seed_peers: &[SocketAddr],
        state_dir: &Path,
        sn_port: u16,
        now: u64,
    ) -> Result<(Self, Vec<(SocketAddr, Vec<u8>)>), SupernodeError> {
        let snm_file = state_dir.join(format!("SN_SNM_{sn_port}"));
        let comm_file = state_dir.join(format!("SN_COMM_{sn_port}"));

        let mut supernodes = load_supernodes(&snm_file)?;
        let before = supernodes.len();
        for peer in seed_peers {
            supernodes.insert(*peer);
        }
        if supernodes.len() != before {
            save_supernodes(&snm_file, &supernodes)?;
        }

        let communities = load_communities(&comm_file)?;

        let state = if supernodes.is_empty() {
            CoordinatorState::Ready
        } else {
            CoordinatorState::Discovery
        };

        let mut coordinator = Self {
            state,
            local_snm_addr,
            seq: 0,
            start_time: now,
            supernodes,
            communities,
            snm_file,
            comm_file,
        };

        let outbound = coordinator.startup_requests();
        Ok((coordinator, outbound))
    }

    pub fn is_ready(&self) -> bool {
        self.state == CoordinatorState::Ready
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn loopback_guard(&self, addr: SocketAddr) -> bool {
        addr != self.local_snm_addr
    }

    fn peers(&self) -> impl Iterator<Item = &SocketAddr> {
        self.supernodes.iter().filter(|a| self.loopback_guard(**a))
    }

    fn find_community_mut(&mut self, name: &CommunityName) -> Option<&mut CommunityInfo> {
        self.communities.iter_mut().find(|c| &c.name == name)
    }

    fn encode(&self, ty: SnmType, flags: u16, seq: u32, body: &[u8]) -> Vec<u8> {
        let hdr = SnmHeader { ty, flags, seq };
        let mut out = Vec::with_capacity(SnmHeader::SIZE + body.len());
        // Header write never fails on a Vec<u8> sink.
        hdr.write(&mut out).expect("write to Vec is infallible");
        out.extend_from_slice(body);
        out
    }

    fn community_entries(&self) -> Vec<SnmCommunityEntry> {
        self.communities
            .iter()
            .map(|c| SnmCommunityEntry {
                name: c.name,
                supernodes: c.supernodes.iter().copied().map(SockAddr::from).collect(),
                persist: c.persist,
            })
            .collect()
    }

    /// Send an `S`-flagged REQ (peer discovery) to every known peer.
    fn startup_requests(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let body = SnmReqBody::default();
        let mut body_buf = Vec::new();
        if body.write(&mut body_buf).is_err() {
            return Vec::new();
        }
        let peers: Vec<SocketAddr> = self.peers().copied().collect();
        peers
            .into_iter()
            .map(|peer| {
                let seq = self.next_seq();
                (peer, self.encode(SnmType::ReqList, snm_flags::S, seq, &body_buf))
            })
            .collect()
    }

    /// Run once per event loop tick while not READY. Promotes communities
    /// that were only learned via queries (fewer than `N2N_MIN_SN_PER_COMM`
    /// supernodes) into the active advertised set, up to
    /// `N2N_MAX_COMM_PER_SN`, then advertises the resulting list to every
    /// peer and transitions to READY.
    pub fn discovery_tick(&mut self, now: u64) -> Vec<(SocketAddr, Vec<u8>)> {
        if self.is_ready() {
            return Vec::new();
        }
        if now.saturating_sub(self.start_time) < N2N_SUPER_DISCOVERY_INTERVAL {
            return Vec::new();
        }

        for community in self.communities.iter_mut().take(N2N_MAX_COMM_PER_SN) {
            community.persist = true;
        }

        info!("coordinator discovery interval elapsed, transitioning to READY");
        self.state = CoordinatorState::Ready;

        let entries = self.community_entries();
        let peers: Vec<SocketAddr> = self.peers().copied().collect();
        let mut outbound = Vec::with_capacity(peers.len());
        for peer in peers {
            let adv = SnmAdvBody {
                sender_sock: SockAddr::from(self.local_snm_addr),
                communities: entries.clone(),
            };
            let mut body_buf = Vec::new();
            if adv.write(&mut body_buf).is_err() {
                continue;
            }
            let seq = self.next_seq();
            outbound.push((peer, self.encode(SnmType::Adv, snm_flags::A, seq, &body_buf)));
        }
        outbound
    }

    /// Handle an incoming SNM_REQ. Requires READY.
    pub fn handle_req(
        &mut self,
        sender: SocketAddr,
        hdr: &SnmHeader,
        body_buf: &[u8],
    ) -> Result<Vec<(SocketAddr, Vec<u8>)>, SupernodeError> {
        if !self.is_ready() {
            return Err(SupernodeError::NotReady("SNM_REQ before READY"));
        }
        let req = SnmReqBody::read(body_buf)?;

        if hdr.has_flag(snm_flags::A) {
            if hdr.has_flag(snm_flags::E) {
                if let Some(name) = req.communities.first() {
                    let added = self.add_community(*name);
                    if added {
                        self.save_communities()?;
                        let adv_outbound = self.advertise_community(*name);
                        let reply = self.empty_adv_reply(sender);
                        let mut all = adv_outbound;
                        all.push(reply);
                        self.remember_peer(sender)?;
                        return Ok(all);
                    }
                }
                let reply = self.empty_adv_reply(sender);
                self.remember_peer(sender)?;
                return Ok(vec![reply]);
            }
            let reply = self.empty_adv_reply(sender);
            self.remember_peer(sender)?;
            return Ok(vec![reply]);
        }

        let info = SnmInfoBody {
            supernodes: if hdr.has_flag(snm_flags::S) {
                self.supernodes.iter().copied().map(SockAddr::from).collect()
            } else {
                Vec::new()
            },
            communities: if hdr.has_flag(snm_flags::C) {
                self.select_communities(hdr.has_flag(snm_flags::N), &req.communities)
            } else {
                Vec::new()
            },
        };
        let mut body_buf = Vec::new();
        info.write(&mut body_buf)?;
        let seq = self.next_seq();
        self.remember_peer(sender)?;
        Ok(vec![(sender, self.encode(SnmType::RspList, 0, seq, &body_buf))])
    }

    fn select_communities(
        &self,
        filter_by_name: bool,
        names: &[CommunityName],
    ) -> Vec<SnmCommunityEntry> {
        self.communities
            .iter()
            .filter(|c| !filter_by_name || names.contains(&c.name))
            .map(|c| SnmCommunityEntry {
                name: c.name,
                supernodes: c.supernodes.iter().copied().map(SockAddr::from).collect(),
                persist: c.persist,
            })
            .collect()
    }

    fn empty_adv_reply(&mut self, sender: SocketAddr) -> (SocketAddr, Vec<u8>) {
        let adv = SnmAdvBody {
            sender_sock: SockAddr::from(self.local_snm_addr),
            communities: Vec::new(),
        };
        let mut body_buf = Vec::new();
        // An empty community list never fails to encode.
        adv.write(&mut body_buf).expect("empty ADV body always encodes");
        let seq = self.next_seq();
        (sender, self.encode(SnmType::Adv, 0, seq, &body_buf))
    }

    fn advertise_community(&mut self, name: CommunityName) -> Vec<(SocketAddr, Vec<u8>)> {
        let entry = self
            .communities
            .iter()
            .find(|c| c.name == name)
            .map(|c| SnmCommunityEntry {
                name: c.name,
                supernodes: c.supernodes.iter().copied().map(SockAddr::from).collect(),
                persist: c.persist,
            });
        let Some(entry) = entry else {
            return Vec::new();
        };
        let peers: Vec<SocketAddr> = self.peers().copied().collect();
        let mut out = Vec::with_capacity(peers.len());
        for peer in peers {
            let adv = SnmAdvBody {
                sender_sock: SockAddr::from(self.local_snm_addr),
                communities: vec![entry.clone()],
            };
            let mut body_buf = Vec::new();
            if adv.write(&mut body_buf).is_err() {
                continue;
            }
            let seq = self.next_seq();
            out.push((peer, self.encode(SnmType::Adv, snm_flags::A, seq, &body_buf)));
        }
        out
    }

    /// Handle an incoming SNM_INFO. Requires NOT READY.
    pub fn handle_info(
        &mut self,
        sender: SocketAddr,
        body_buf: &[u8],
    ) -> Result<Vec<(SocketAddr, Vec<u8>)>, SupernodeError> {
        if self.is_ready() {
            return Err(SupernodeError::NotReady("SNM_INFO received while READY"));
        }
        let info = SnmInfoBody::read(body_buf)?;

        let mut newly_added = Vec::new();
        for sn in info.supernodes {
            let addr: SocketAddr = sn.into();
            if self.loopback_guard(addr) && self.supernodes.insert(addr) {
                newly_added.push(addr);
            }
        }
        self.remember_peer(sender)?;

        for community in info.communities {
            if community.supernodes.len() < N2N_MIN_SN_PER_COMM {
                continue;
            }
            self.merge_community(community);
        }

        let body = SnmReqBody::default();
        let mut req_buf = Vec::new();
        req_buf.clear();
        let mut outbound = Vec::new();
        if body.write(&mut req_buf).is_ok() {
            for peer in newly_added {
                let seq = self.next_seq();
                outbound.push((peer, self.encode(SnmType::ReqList, snm_flags::S, seq, &req_buf)));
            }
        }
        Ok(outbound)
    }

    /// Handle an incoming SNM_ADV.
    pub fn handle_adv(
        &mut self,
        sender: SocketAddr,
        hdr: &SnmHeader,
        body_buf: &[u8],
    ) -> Result<Vec<(SocketAddr, Vec<u8>)>, SupernodeError> {
        let adv = SnmAdvBody::read(body_buf)?;
        let mut changed = false;
        for community in adv.communities {
            changed |= self.merge_community_with_sender(community, sender);
        }

        if changed && hdr.has_flag(snm_flags::A) {
            let entries = self.community_entries();
            let reply = SnmAdvBody {
                sender_sock: SockAddr::from(self.local_snm_addr),
                communities: entries,
            };
            let mut body_buf = Vec::new();
            reply.write(&mut body_buf)?;
            let seq = self.next_seq();
            return Ok(vec![(sender, self.encode(SnmType::Adv, 0, seq, &body_buf))]);
        }
        Ok(Vec::new())
    }

    /// Backup supernode list for the REGISTER_SUPER_ACK augmentation,
    /// capped at 255 entries (the wire field is one byte wide).
    pub fn backup_supernodes_for(&self, community: &CommunityName) -> Vec<SockAddr> {
        self.communities
            .iter()
            .find(|c| &c.name == community && c.is_federated())
            .map(|c| {
                c.supernodes
                    .iter()
                    .take(u8::MAX as usize)
                    .copied()
                    .map(SockAddr::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn add_community(&mut self, name: CommunityName) -> bool {
        if self.communities.iter().any(|c| c.name == name) {
            return false;
        }
        self.communities.push(CommunityInfo {
            name,
            supernodes: BTreeSet::new(),
            persist: true,
        });
        true
    }

    fn merge_community(&mut self, incoming: SnmCommunityEntry) {
        let supernodes: BTreeSet<SocketAddr> =
            incoming.supernodes.into_iter().map(SocketAddr::from).collect();
        match self.find_community_mut(&incoming.name) {
            Some(existing) => {
                existing.supernodes.extend(supernodes);
            }
            None => self.communities.push(CommunityInfo {
                name: incoming.name,
                supernodes,
                persist: incoming.persist,
            }),
        }
    }

    /// Like [`Self::merge_community`] but also remembers `sender` as a
    /// supernode for the community, and reports whether anything changed.
    fn merge_community_with_sender(
        &mut self,
        incoming: SnmCommunityEntry,
        sender: SocketAddr,
    ) -> bool {
        let mut incoming_supernodes: BTreeSet<SocketAddr> =
            incoming.supernodes.into_iter().map(SocketAddr::from).collect();
        incoming_supernodes.insert(sender);

        match self.find_community_mut(&incoming.name) {
            Some(existing) => {
                let before = existing.supernodes.len();
                existing.supernodes.extend(incoming_supernodes);
                existing.supernodes.len() != before
            }
            None => {
                self.communities.push(CommunityInfo {
                    name: incoming.name,
                    supernodes: incoming_supernodes,
                    persist: incoming.persist,
                });
                true
            }
        }
    }

    fn remember_peer(&mut self, addr: SocketAddr) -> Result<(), SupernodeError> {
        if self.loopback_guard(addr) && self.supernodes.insert(addr) {
            self.save_supernodes()?;
        }
        Ok(())
    }

    fn save_supernodes(&self) -> Result<(), SupernodeError> {
        save_supernodes(&self.snm_file, &self.supernodes)
    }

    fn save_communities(&self) -> Result<(), SupernodeError> {
        save_communities(&self.comm_file, &self.communities)
    }
}

fn load_supernodes(path: &Path) -> Result<BTreeSet<SocketAddr>, SupernodeError> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Ok(BTreeSet::new());
    };
    Ok(content
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect())
}

fn save_supernodes(path: &Path, supernodes: &BTreeSet<SocketAddr>) -> Result<(), SupernodeError> {
    let mut content = String::new();
    for addr in supernodes {
        content.push_str(&addr.to_string());
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn load_communities(path: &Path) -> Result<Vec<CommunityInfo>, SupernodeError> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Ok(Vec::new());
    };
    let mut communities = Vec::new();
    for line in content.lines() {
        let mut fields = line.splitn(3, '\t');
        let (Some(name), Some(_count), Some(addrs)) =
            (fields.next(), fields.next(), fields.next())
        else {
            warn!(line, "skipping malformed community persistence line");
            continue;
        };
        let supernodes: BTreeSet<SocketAddr> = addrs
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        communities.push(CommunityInfo {
            name: CommunityName::new(name),
            supernodes,
            persist: true,
        });
    }
    Ok(communities)
}

fn save_communities(path: &Path, communities: &[CommunityInfo]) -> Result<(), SupernodeError> {
    let mut content = String::new();
    for community in communities.iter().filter(|c| c.persist) {
        let addrs: Vec<String> = community.supernodes.iter().map(|a| a.to_string()).collect();
        content.push_str(&format!(
            "{}\t{}\t{}\n",
            community.name.trimmed(),
            community.supernodes.len(),
            addrs.join(",")
        ));
    }
    std::fs::write(path, content)?;
    debug!(path = %path.display(), "wrote community persistence file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tempfile::tempdir;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), port))
    }

    #[test]
    fn starts_ready_when_no_peers() {
        let dir = tempdir().unwrap();
        let (coord, outbound) =
            SupernodeCoordinator::start(addr(7655), &[], dir.path(), 7655, 0).unwrap();
        assert!(coord.is_ready());
        assert!(outbound.is_empty());
    }

    #[test]
    fn starts_discovery_with_seed_peer_and_sends_req() {
        let dir = tempdir().unwrap();
        let (coord, outbound) =
            SupernodeCoordinator::start(addr(7655), &[addr(9999)], dir.path(), 7655, 0).unwrap();
        assert!(!coord.is_ready());
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].0, addr(9999));
    }

    #[test]
    fn loopback_guard_excludes_self() {
        let dir = tempdir().unwrap();
        let (_coord, outbound) =
            SupernodeCoordinator::start(addr(7655), &[addr(7655)], dir.path(), 7655, 0).unwrap();
        assert!(outbound.is_empty());
    }

    #[test]
    fn discovery_tick_transitions_to_ready_after_interval() {
        let dir = tempdir().unwrap();
        let (mut coord, _) =
            SupernodeCoordinator::start(addr(7655), &[addr(9999)], dir.path(), 7655, 0).unwrap();
        assert!(coord.discovery_tick(5).is_empty());
        assert!(!coord.is_ready());

        let outbound = coord.discovery_tick(N2N_SUPER_DISCOVERY_INTERVAL);
        assert!(coord.is_ready());
        assert_eq!(outbound.len(), 1);
    }

    #[test]
    fn handle_req_before_ready_errors() {
        let dir = tempdir().unwrap();
        let (mut coord, _) =
            SupernodeCoordinator::start(addr(7655), &[addr(9999)], dir.path(), 7655, 0).unwrap();
        let hdr = SnmHeader {
            ty: SnmType::ReqList,
            flags: 0,
            seq: 1,
        };
        let result = coord.handle_req(addr(9999), &hdr, &[0]);
        assert!(matches!(result, Err(SupernodeError::NotReady(_))));
    }

    #[test]
    fn handle_adv_merges_community_and_remembers_sender() {
        let dir = tempdir().unwrap();
        let (mut coord, _) =
            SupernodeCoordinator::start(addr(7655), &[], dir.path(), 7655, 0).unwrap();
        assert!(coord.is_ready());

        let adv = SnmAdvBody {
            sender_sock: SockAddr::from(addr(9999)),
            communities: vec![SnmCommunityEntry {
                name: CommunityName::new("acme"),
                supernodes: vec![],
                persist: true,
            }],
        };
        let mut body = Vec::new();
        adv.write(&mut body).unwrap();
        let hdr = SnmHeader {
            ty: SnmType::Adv,
            flags: 0,
            seq: 1,
        };
        coord.handle_adv(addr(9999), &hdr, &body).unwrap();

        let backups = coord.backup_supernodes_for(&CommunityName::new("acme"));
        // Only one known supernode (the sender) - not yet federated (< MIN).
        assert!(backups.is_empty());
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempdir().unwrap();
        {
            let (mut coord, _) =
                SupernodeCoordinator::start(addr(7655), &[addr(9999)], dir.path(), 7655, 0)
                    .unwrap();
            coord.add_community(CommunityName::new("acme"));
            coord.save_communities().unwrap();
        }
        let (coord2, _) =
            SupernodeCoordinator::start(addr(7655), &[], dir.path(), 7655, 0).unwrap();
        assert!(coord2
            .communities
            .iter()
            .any(|c| c.name.trimmed() == "acme"));
        assert!(coord2.supernodes.contains(&addr(9999)));
    }
}
