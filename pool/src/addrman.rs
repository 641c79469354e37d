//! The address manager contract (§4.4 expansion): `Pool` depends on address
//! selection through a narrow trait rather than a concrete on-disk
//! `peers.dat` format, so tests can swap in a fixed address list and the
//! on-disk format can be designed later without touching `Pool` itself.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    time::{Duration, SystemTime},
};

use rand::Rng;

use net::protocol::external::types::PeerServices;

/// A candidate peer address plus the bookkeeping the selection policy needs.
#[derive(Clone, Debug)]
struct AddrEntry {
    services: PeerServices,
    /// `None` until a `good` report comes in: a tried address with no
    /// successful connection yet is still a "new" address for selection
    /// purposes.
    last_success: Option<SystemTime>,
    attempts: u32,
    last_attempt: Option<SystemTime>,
}

/// The capability `Pool` needs from an address manager.
///
/// Mirrors Bitcoin Core's `good`/`attempt`/`select`/`add` surface on
/// `CAddrMan`, narrowed to what outbound connection scheduling actually
/// calls.
pub trait Addrman: Send {
    /// Marks `addr` as having completed a successful handshake just now.
    fn good(&mut self, addr: SocketAddr);

    /// Records a connection attempt to `addr`, successful or not.
    fn attempt(&mut self, addr: SocketAddr);

    /// Picks a candidate outbound address, or `None` if the table is empty.
    ///
    /// `new_bias` in `[0.0, 1.0]` is the probability of preferring an
    /// address that has never completed a handshake ("new") over one that
    /// has ("tried"), matching Core's two-table bias.
    fn select(&mut self, new_bias: f64) -> Option<SocketAddr>;

    /// Adds `addrs`, gossiped to us by `source`, to the table.
    fn add(&mut self, addrs: &[SocketAddr], source: IpAddr);
}

/// An in-memory address table bucketed by the `/16` of the address that
/// introduced each entry, as the original does, sized well below what a
/// persisted `peers.dat` needs since this implementation never persists the
/// table across restarts.
pub struct InMemoryAddrman {
    buckets: HashMap<u16, Vec<SocketAddr>>,
    entries: HashMap<SocketAddr, AddrEntry>,
    max_per_bucket: usize,
}

impl InMemoryAddrman {
    pub fn new() -> Self {
        InMemoryAddrman {
            buckets: HashMap::new(),
            entries: HashMap::new(),
            // Bitcoin Core uses 64 "new" buckets of 64 entries each; this
            // table isn't split into new/tried buckets, so a single, smaller
            // per-/16 cap is enough to bound memory and keep any one source
            // from monopolizing selection.
            max_per_bucket: 32,
        }
    }

    fn bucket_of(addr: &SocketAddr) -> u16 {
        match addr.ip() {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                u16::from_be_bytes([octets[0], octets[1]])
            }
            IpAddr::V6(v6) => {
                let segments = v6.segments();
                segments[0]
            }
        }
    }

    fn insert(&mut self, addr: SocketAddr, services: PeerServices) {
        if self.entries.contains_key(&addr) {
            return;
        }

        let bucket = self.buckets.entry(Self::bucket_of(&addr)).or_default();
        if bucket.len() >= self.max_per_bucket {
            return;
        }
        bucket.push(addr);
        self.entries.insert(
            addr,
            AddrEntry {
                services,
                last_success: None,
                attempts: 0,
                last_attempt: None,
            },
        );
    }
}

impl Default for InMemoryAddrman {
    fn default() -> Self {
        Self::new()
    }
}

impl Addrman for InMemoryAddrman {
    fn good(&mut self, addr: SocketAddr) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.last_success = Some(SystemTime::now());
            entry.attempts = 0;
        }
    }

    fn attempt(&mut self, addr: SocketAddr) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.attempts += 1;
            entry.last_attempt = Some(SystemTime::now());
        }
    }

    fn select(&mut self, new_bias: f64) -> Option<SocketAddr> {
        if self.entries.is_empty() {
            return None;
        }

        let want_new = rand::thread_rng().gen_bool(new_bias.clamp(0.0, 1.0));
        let candidates: Vec<SocketAddr> = self
            .entries
            .iter()
            .filter(|(_, entry)| (entry.last_success.is_some()) != want_new)
            .map(|(addr, _)| *addr)
            .collect();

        let pool = if candidates.is_empty() {
            self.entries.keys().copied().collect::<Vec<_>>()
        } else {
            candidates
        };

        // Addresses that have failed recently are deprioritized by simply
        // being less likely to appear again soon: a caller that fails a
        // `select`ed address should call neither `good` nor `attempt` again
        // until it retries, so repeatedly-failing addresses don't dominate
        // every call the way a retry-backoff table would prevent.
        let recently_failed = |addr: &SocketAddr| {
            self.entries
                .get(addr)
                .map(|e| {
                    e.attempts > 0
                        && e.last_attempt
                            .and_then(|t| t.elapsed().ok())
                            .map(|age| age < Duration::from_secs(60))
                            .unwrap_or(false)
                })
                .unwrap_or(false)
        };
        let fresh: Vec<_> = pool.iter().copied().filter(|a| !recently_failed(a)).collect();
        let pool = if fresh.is_empty() { pool } else { fresh };

        let index = rand::thread_rng().gen_range(0, pool.len());
        Some(pool[index])
    }

    fn add(&mut self, addrs: &[SocketAddr], _source: IpAddr) {
        for addr in addrs {
            self.insert(*addr, PeerServices::NODE_NETWORK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(a: u8, b: u8, c: u8, d: u8) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), 8333))
    }

    #[test]
    fn select_returns_none_when_empty() {
        let mut man = InMemoryAddrman::new();
        assert_eq!(man.select(0.5), None);
    }

    #[test]
    fn add_then_select_returns_an_added_address() {
        let mut man = InMemoryAddrman::new();
        let a = addr(203, 0, 113, 1);
        man.add(&[a], IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(man.select(1.0), Some(a));
    }

    #[test]
    fn bucket_caps_entries_from_the_same_slash_16() {
        let mut man = InMemoryAddrman::new();
        man.max_per_bucket = 2;
        let source = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        man.add(&[addr(203, 0, 1, 1), addr(203, 0, 2, 2), addr(203, 0, 3, 3)], source);
        assert_eq!(man.entries.len(), 2);
    }

    #[test]
    fn good_clears_attempt_count() {
        let mut man = InMemoryAddrman::new();
        let a = addr(203, 0, 113, 7);
        man.add(&[a], IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        man.attempt(a);
        man.attempt(a);
        man.good(a);
        assert_eq!(man.entries[&a].attempts, 0);
        assert!(man.entries[&a].last_success.is_some());
    }
}
