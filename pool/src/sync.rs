//! Headers-first synchronization and the block download scheduler (§4.4).
//!
//! Each header `Pool` receives is validated through `Chain`'s
//! `Request::AcceptHeader` (§4.2) before being added to the download
//! queue, so an invalid chain of headers is rejected — and its sender
//! punished — without ever requesting a single block body. `HeaderSync`
//! tracks the elected sync peer and the hash/height of the last header it
//! handed to `Chain`; `BlockDownloadScheduler` walks the resulting queue to
//! keep peers supplied with `getdata` requests.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    time::{Duration, Instant},
};

use primitives::block;

use crate::peer::{Peer, PeerState};

/// How long a sync peer may go without answering a `getheaders` before it's
/// considered stalled and replaced (§4.4).
pub const HEADER_STALL_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// How many blocks may be in flight, across all peers, before headers-first
/// sync backs off and lets downloads catch up (§4.4).
pub const MAX_BLOCKS_IN_FLIGHT: usize = 16;

/// Per-peer parallelism window for block downloads (§4.4).
pub const MAX_BLOCKS_IN_FLIGHT_PER_PEER: usize = 16;

/// Tracks the single elected sync peer and the header skeleton received so
/// far.
pub struct HeaderSync {
    pub sync_peer: Option<SocketAddr>,
    pub tip_height: block::Height,
    pub tip_hash: block::Hash,
    requested_at: Option<Instant>,
}

impl HeaderSync {
    pub fn new(genesis_hash: block::Hash) -> Self {
        HeaderSync {
            sync_peer: None,
            tip_height: block::Height(0),
            tip_hash: genesis_hash,
            requested_at: None,
        }
    }

    /// Picks the connected peer advertising the most work (approximated by
    /// its advertised `best_height`, since this implementation does not
    /// track cumulative chain work per peer) as the new sync peer.
    pub fn elect(&mut self, peers: &HashMap<SocketAddr, Peer>) -> Option<SocketAddr> {
        let elected = peers
            .values()
            .filter(|peer| peer.state.is_post_handshake())
            .max_by_key(|peer| peer.best_height.map(|h| h.0).unwrap_or(0))
            .map(|peer| peer.addr);

        self.sync_peer = elected;
        self.requested_at = elected.map(|_| Instant::now());
        elected
    }

    pub fn note_headers_requested(&mut self) {
        self.requested_at = Some(Instant::now());
    }

    pub fn is_stalled(&self) -> bool {
        self.requested_at
            .map(|since| since.elapsed() > HEADER_STALL_TIMEOUT)
            .unwrap_or(false)
    }

    /// Records a batch of accepted headers, advancing the skeleton tip.
    /// Returns `true` if the batch was full (§4.4: "continue until a
    /// response returns < 2000 entries"), meaning more headers should be
    /// requested immediately.
    pub fn on_headers(&mut self, headers: &[(block::Hash, block::Height)]) -> bool {
        if let Some((hash, height)) = headers.last() {
            self.tip_hash = *hash;
            self.tip_height = *height;
        }
        self.requested_at = Some(Instant::now());
        headers.len() >= net::constants::MAX_HEADERS_PER_MESSAGE
    }
}

/// Schedules `getdata` requests for blocks whose headers are known but whose
/// bodies haven't been fetched yet.
#[derive(Default)]
pub struct BlockDownloadScheduler {
    pending: VecDeque<block::Hash>,
    queued: std::collections::HashSet<block::Hash>,
}

impl BlockDownloadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, hash: block::Hash) {
        if self.queued.insert(hash) {
            self.pending.push_back(hash);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn total_in_flight(peers: &HashMap<SocketAddr, Peer>) -> usize {
        peers.values().map(Peer::in_flight_count).sum()
    }

    /// Assigns as many pending blocks as the in-flight budget allows,
    /// grouping assignments by peer for a single batched `getdata` each.
    pub fn assign(&mut self, peers: &mut HashMap<SocketAddr, Peer>) -> Vec<(SocketAddr, Vec<block::Hash>)> {
        let mut assignments: HashMap<SocketAddr, Vec<block::Hash>> = HashMap::new();

        let mut addrs: Vec<SocketAddr> = peers
            .iter()
            .filter(|(_, peer)| {
                matches!(peer.state, PeerState::Ready | PeerState::Syncing | PeerState::Idle)
            })
            .map(|(addr, _)| *addr)
            .collect();
        addrs.sort();

        let mut total_in_flight = Self::total_in_flight(peers);
        'outer: for addr in addrs {
            let peer = peers.get_mut(&addr).expect("addr came from this map");
            while peer.in_flight_count() < MAX_BLOCKS_IN_FLIGHT_PER_PEER
                && total_in_flight < MAX_BLOCKS_IN_FLIGHT
            {
                let hash = match self.pending.pop_front() {
                    Some(hash) => hash,
                    None => break 'outer,
                };
                self.queued.remove(&hash);
                peer.request_block(hash);
                assignments.entry(addr).or_default().push(hash);
                total_in_flight += 1;
            }
        }

        assignments.into_iter().collect()
    }

    /// Reclaims any block requests that passed their deadline, re-queuing
    /// them for reassignment and returning the offending peers so the
    /// caller can apply a misbehavior penalty.
    pub fn reclaim_expired(&mut self, peers: &mut HashMap<SocketAddr, Peer>) -> Vec<SocketAddr> {
        let now = Instant::now();
        let mut offenders = Vec::new();
        for (addr, peer) in peers.iter_mut() {
            let expired = peer.expired_blocks(now);
            if !expired.is_empty() {
                offenders.push(*addr);
            }
            for hash in expired {
                self.queue(hash);
            }
        }
        offenders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tokio::sync::mpsc;

    fn test_peer(addr: SocketAddr, height: u32) -> Peer {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut peer = Peer::new(addr, crate::peer::Direction::Outbound, tx);
        peer.state = PeerState::Ready;
        peer.best_height = Some(block::Height(height));
        peer
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port))
    }

    #[test]
    fn elects_the_peer_with_highest_reported_height() {
        let mut peers = HashMap::new();
        peers.insert(addr(1), test_peer(addr(1), 100));
        peers.insert(addr(2), test_peer(addr(2), 500));
        let mut sync = HeaderSync::new(block::Hash([0; 32]));
        assert_eq!(sync.elect(&peers), Some(addr(2)));
    }

    #[test]
    fn assigns_pending_blocks_up_to_the_global_budget() {
        let mut peers = HashMap::new();
        peers.insert(addr(1), test_peer(addr(1), 10));
        let mut scheduler = BlockDownloadScheduler::new();
        for i in 0..20u8 {
            scheduler.queue(block::Hash([i; 32]));
        }
        let assignments = scheduler.assign(&mut peers);
        let total: usize = assignments.iter().map(|(_, hashes)| hashes.len()).sum();
        assert_eq!(total, MAX_BLOCKS_IN_FLIGHT);
        assert_eq!(scheduler.pending_count(), 20 - MAX_BLOCKS_IN_FLIGHT);
    }
}
