//! Per-peer connection state (§4.4's "state machine per peer").
//!
//! A [`Peer`] never touches a socket directly: outbound messages go onto an
//! `mpsc` channel that whatever owns the actual `TcpStream` (the `node`
//! crate's connection task) drains and writes through [`net::Codec`]. That
//! split is what lets `Pool`'s scheduling logic run in tests against
//! channels instead of real sockets (§8).

use std::{
    collections::HashSet,
    net::SocketAddr,
    time::{Duration, Instant},
};

use tokio::sync::mpsc;

use net::{protocol::external::types::PeerServices, Message};
use primitives::{block, transaction};

/// `CONNECTING → VERSION_SENT → VERACK_WAIT → READY → SYNCING|IDLE →
/// DISCONNECTING`, as laid out in §4.4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    VersionSent,
    VerackWait,
    Ready,
    Syncing,
    Idle,
    Disconnecting,
}

impl PeerState {
    /// Whether a message other than `version`/`verack` is acceptable yet.
    pub fn is_post_handshake(self) -> bool {
        matches!(self, PeerState::Ready | PeerState::Syncing | PeerState::Idle)
    }
}

/// Direction a connection was established in, relevant only to outbound
/// connection-count accounting and address-manager updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One connected peer and everything `Pool` tracks about it.
pub struct Peer {
    pub addr: SocketAddr,
    pub direction: Direction,
    pub state: PeerState,
    pub services: PeerServices,
    pub version: Option<u32>,
    pub user_agent: Option<String>,
    pub best_height: Option<block::Height>,
    pub supports_compact_blocks: bool,
    pub relay_wanted: bool,

    /// Headers requested of this peer but not yet answered, for stall
    /// detection.
    pub headers_requested_at: Option<Instant>,
    /// Blocks this peer has been asked for, each with the deadline by which
    /// a response is expected (§4.4's "1 s + rolling estimate × 0.5").
    pub blocks_in_flight: HashSet<block::Hash>,
    pub block_deadlines: Vec<(block::Hash, Instant)>,

    /// Rolling estimate of this peer's per-block response time, used to set
    /// the next deadline.
    pub response_time_estimate: Duration,

    pub last_activity: Instant,
    sink: mpsc::UnboundedSender<Message>,
}

impl Peer {
    pub fn new(addr: SocketAddr, direction: Direction, sink: mpsc::UnboundedSender<Message>) -> Self {
        Peer {
            addr,
            direction,
            state: PeerState::Connecting,
            services: PeerServices::empty(),
            version: None,
            user_agent: None,
            best_height: None,
            supports_compact_blocks: false,
            relay_wanted: true,
            headers_requested_at: None,
            blocks_in_flight: HashSet::new(),
            block_deadlines: Vec::new(),
            response_time_estimate: Duration::from_secs(1),
            last_activity: Instant::now(),
            sink,
        }
    }

    /// Queues `message` for delivery; drops silently if the connection task
    /// has already torn down the socket (the peer will be reaped on its next
    /// disconnect notification regardless).
    pub fn send(&self, message: Message) {
        let _ = self.sink.send(message);
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn in_flight_count(&self) -> usize {
        self.blocks_in_flight.len()
    }

    pub fn request_block(&mut self, hash: block::Hash) {
        let deadline = Instant::now()
            + Duration::from_secs(1)
            + self.response_time_estimate.mul_f64(0.5);
        self.blocks_in_flight.insert(hash);
        self.block_deadlines.push((hash, deadline));
    }

    pub fn block_received(&mut self, hash: &block::Hash, took: Duration) {
        self.blocks_in_flight.remove(hash);
        self.block_deadlines.retain(|(h, _)| h != hash);
        // Exponential moving average, matching the kind of smoothing the
        // rest of this codebase uses for the mempool's decayed fee buckets.
        self.response_time_estimate =
            (self.response_time_estimate.mul_f64(0.75)) + took.mul_f64(0.25);
    }

    /// Returns every block request past its deadline, removing them from
    /// this peer's in-flight set so the caller can reassign them.
    pub fn expired_blocks(&mut self, now: Instant) -> Vec<block::Hash> {
        let (expired, still_pending): (Vec<_>, Vec<_>) =
            self.block_deadlines.drain(..).partition(|(_, deadline)| now >= *deadline);
        self.block_deadlines = still_pending;
        for (hash, _) in &expired {
            self.blocks_in_flight.remove(hash);
        }
        expired.into_iter().map(|(hash, _)| hash).collect()
    }

    pub fn is_stalled(&self, stall_timeout: Duration) -> bool {
        self.headers_requested_at
            .map(|since| since.elapsed() > stall_timeout)
            .unwrap_or(false)
    }
}

/// A bounded, insertion-ordered set of recently-rejected transaction ids,
/// used to suppress re-requesting an `inv` for a tx we already know is
/// invalid (§4.4's "rolling rejection-cache").
///
/// A true Bloom filter would save memory at the cost of false positives;
/// this implementation uses a plain bounded FIFO set instead, trading a
/// fixed memory ceiling sized for the expected rejection rate for exact
/// membership tests.
pub struct RejectionCache {
    order: std::collections::VecDeque<transaction::Hash>,
    set: HashSet<transaction::Hash>,
    capacity: usize,
}

impl RejectionCache {
    pub fn new(capacity: usize) -> Self {
        RejectionCache {
            order: std::collections::VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn insert(&mut self, txid: transaction::Hash) {
        if self.set.contains(&txid) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.order.push_back(txid);
        self.set.insert(txid);
    }

    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        self.set.contains(txid)
    }
}
