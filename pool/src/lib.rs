//! The peer-to-peer layer (§4.4): connects to outbound peers, accepts
//! inbound ones, negotiates the protocol, and drives headers-first sync,
//! block download, and transaction propagation.
//!
//! `Pool` never owns a socket. Each connection is represented by a
//! [`peer::Peer`] whose outbound half is an `mpsc` channel; whatever owns the
//! real `TcpStream` (the `node` crate's connection task) drains that channel
//! and feeds inbound bytes back in as [`Request::Message`]. This mirrors
//! [`mempool::Mempool`] and [`chain::service::StateService`]'s shape: a
//! single `Inner` behind an async mutex, reached through a
//! `tower::Service<Request>`.

pub mod addrman;
pub mod listener;
pub mod misbehavior;
pub mod peer;
pub mod sync;

use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::sync::{mpsc, Mutex};
use tower::{buffer::Buffer, Service, ServiceExt};

use net::{
    meta_addr::MetaAddr,
    protocol::external::types::{Nonce, PeerServices, ProtocolVersion},
    Message,
};
use primitives::{block, parameters::Network, transaction::Transaction};

use addrman::{Addrman, InMemoryAddrman};
use misbehavior::{MisbehaviorTracker, Verdict};
use peer::{Direction, Peer, PeerState, RejectionCache};
use sync::{BlockDownloadScheduler, HeaderSync};

pub use listener::PoolChainReactor;

/// Target number of outbound connections (§4.4).
pub const DEFAULT_MAX_OUTBOUND: usize = 8;
/// Cap on accepted inbound connections (§4.4).
pub const DEFAULT_MAX_INBOUND: usize = 117;
/// Size of the per-peer transaction rejection cache.
const REJECTION_CACHE_CAPACITY: usize = 50_000;

#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub network: Network,
    pub max_outbound: usize,
    pub max_inbound: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: Network::Mainnet,
            max_outbound: DEFAULT_MAX_OUTBOUND,
            max_inbound: DEFAULT_MAX_INBOUND,
        }
    }
}

/// A snapshot of one peer, for `rpc`'s `getpeerinfo`.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub direction: Direction,
    pub services: PeerServices,
    pub version: Option<u32>,
    pub user_agent: Option<String>,
    pub best_height: Option<block::Height>,
    pub misbehavior_score: u32,
}

/// Connections `Pool` would like its caller to open or close. Neither side
/// owns a socket, so every effect that needs one comes back out this way
/// instead of being performed directly.
#[derive(Clone, Debug, Default)]
pub struct PoolActions {
    pub connect: Vec<SocketAddr>,
    pub disconnect: Vec<SocketAddr>,
}

impl PoolActions {
    fn disconnecting(addr: SocketAddr) -> Self {
        PoolActions {
            connect: Vec::new(),
            disconnect: vec![addr],
        }
    }
}

pub enum Request {
    /// A connection to `addr` was established; `sink` delivers messages to
    /// whatever owns the socket.
    Connected {
        addr: SocketAddr,
        direction: Direction,
        sink: mpsc::UnboundedSender<Message>,
    },
    /// `addr`'s connection was torn down, for whatever reason.
    Disconnected(SocketAddr),
    /// A message arrived from `addr`.
    Message { addr: SocketAddr, message: Message },
    /// Periodic maintenance: stall detection, deadline reassignment, and
    /// topping up outbound connections. The caller (the reactor's timer)
    /// drives this; `Pool` does not run its own clock.
    Tick,
    /// A locally-originated (or mempool-relayed) transaction should be
    /// announced to peers.
    AnnounceTransaction(Arc<Transaction>),
    /// `Chain` completed a reorg; the sync peer's advertised height is
    /// stale relative to the new tip.
    ReElectSyncPeer,
    /// Returns a snapshot of every connected peer.
    GetPeerInfo,
}

pub enum Response {
    Actions(PoolActions),
    PeerInfo(Vec<PeerInfo>),
}

struct Inner {
    config: Config,
    self_nonce: Nonce,
    addrman: Box<dyn Addrman>,
    peers: HashMap<SocketAddr, Peer>,
    misbehavior: MisbehaviorTracker,
    header_sync: HeaderSync,
    download: BlockDownloadScheduler,
    rejections: RejectionCache,
    chain: Buffer<chain::service::StateService, chain::Request>,
    mempool: Buffer<mempool::Mempool, mempool::Request>,
}

impl Inner {
    async fn chain_tip(&self) -> (block::Height, block::Hash) {
        match self.chain.clone().oneshot(chain::Request::Tip).await {
            Ok(chain::Response::Tip(Some(tip))) => tip,
            _ => (
                block::Height(0),
                primitives::parameters::genesis_hash(self.config.network),
            ),
        }
    }

    fn outbound_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.direction == Direction::Outbound)
            .count()
    }

    fn inbound_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.direction == Direction::Inbound)
            .count()
    }

    async fn handle_connected(
        &mut self,
        addr: SocketAddr,
        direction: Direction,
        sink: mpsc::UnboundedSender<Message>,
    ) -> PoolActions {
        if self.misbehavior.is_banned(addr.ip()) {
            return PoolActions::disconnecting(addr);
        }

        let mut peer = Peer::new(addr, direction, sink);
        self.addrman.attempt(addr);

        if direction == Direction::Outbound {
            let (height, _) = self.chain_tip().await;
            peer.send(self.version_message(addr, height));
            peer.state = PeerState::VersionSent;
        }

        self.peers.insert(addr, peer);
        PoolActions::default()
    }

    fn version_message(&self, their_addr: SocketAddr, our_best_height: block::Height) -> Message {
        Message::Version(net::protocol::external::Version::new(
            net::constants::CURRENT_VERSION,
            their_addr,
            PeerServices::NODE_NETWORK,
            PeerServices::NODE_NETWORK,
            their_addr,
            self.self_nonce,
            net::constants::USER_AGENT.to_owned(),
            our_best_height,
            true,
        ))
    }

    fn handle_disconnected(&mut self, addr: SocketAddr) -> PoolActions {
        self.peers.remove(&addr);
        self.misbehavior.forget(addr.ip());
        if self.header_sync.sync_peer == Some(addr) {
            self.header_sync.sync_peer = None;
        }
        PoolActions::default()
    }

    /// Adds `points` to `addr`'s misbehavior score, returning whether it
    /// should be disconnected.
    fn punish(&mut self, addr: SocketAddr, points: u32) -> bool {
        matches!(self.misbehavior.add(addr.ip(), points), Verdict::Ban)
    }

    async fn handle_message(&mut self, addr: SocketAddr, message: Message) -> PoolActions {
        if !self.peers.contains_key(&addr) {
            return PoolActions::default();
        }
        self.peers.get_mut(&addr).unwrap().touch();

        match message {
            Message::Version(version) => self.on_version(addr, version).await,
            Message::Verack => self.on_verack(addr),
            Message::Ping(nonce) => {
                self.peers.get(&addr).unwrap().send(Message::Pong(nonce));
                PoolActions::default()
            }
            Message::Pong(_) => PoolActions::default(),
            Message::Addr(addrs) => {
                let sources: Vec<SocketAddr> = addrs.iter().map(|m: &MetaAddr| m.addr).collect();
                self.addrman.add(&sources, addr.ip());
                PoolActions::default()
            }
            Message::GetAddr => {
                if let Some(sample) = self.addrman.select(0.5) {
                    self.peers
                        .get(&addr)
                        .unwrap()
                        .send(Message::Addr(vec![MetaAddr::new(sample, PeerServices::NODE_NETWORK)]));
                }
                PoolActions::default()
            }
            Message::Headers(headers) => self.on_headers(addr, headers).await,
            Message::Inv(items) => self.on_inv(addr, items).await,
            Message::GetData(items) => self.on_getdata(addr, items).await,
            Message::Block(block) => self.on_block(addr, block).await,
            Message::Tx(tx) => self.on_tx(addr, tx).await,
            Message::NotFound(_) => PoolActions::default(),
            Message::SendCompact(send_compact) => {
                self.peers.get_mut(&addr).unwrap().supports_compact_blocks = send_compact.announce;
                PoolActions::default()
            }
            Message::CompactBlock(compact) => {
                // Short-id reconstruction is out of scope for this
                // implementation; fall back to a full block request, which
                // is always correct even if less bandwidth-efficient.
                self.peers
                    .get(&addr)
                    .unwrap()
                    .send(Message::GetData(vec![net::InventoryHash::Block(block::Hash::from(&compact.header))]));
                PoolActions::default()
            }
            Message::FeeFilter(_) | Message::SendHeaders | Message::GetBlocks(_)
            | Message::GetHeaders(_) | Message::GetBlockTxn(_) | Message::BlockTxn(_)
            | Message::MerkleBlock(_) | Message::FilterLoad { .. } | Message::FilterAdd { .. }
            | Message::FilterClear | Message::Mempool | Message::Reject { .. } => {
                PoolActions::default()
            }
        }
    }

    async fn on_version(&mut self, addr: SocketAddr, version: net::protocol::external::Version) -> PoolActions {
        if version.nonce == self.self_nonce {
            // Connected to ourselves; tear down without penalty.
            return PoolActions::disconnecting(addr);
        }
        if version.version < net::constants::MIN_PEER_VERSION {
            return PoolActions::disconnecting(addr);
        }

        let direction = self.peers[&addr].direction;
        {
            let peer = self.peers.get_mut(&addr).unwrap();
            peer.version = Some(version.version.0);
            peer.services = version.address_from.0;
            peer.user_agent = Some(version.user_agent.clone());
            peer.best_height = Some(version.best_block);
            peer.relay_wanted = version.relay;
        }

        if direction == Direction::Inbound {
            let (height, _) = self.chain_tip().await;
            self.peers.get(&addr).unwrap().send(self.version_message(addr, height));
        }

        let peer = self.peers.get_mut(&addr).unwrap();
        peer.send(Message::Verack);
        peer.send(Message::SendHeaders);
        peer.send(Message::SendCompact(net::protocol::external::SendCompact {
            announce: true,
            version: 1,
        }));
        peer.send(Message::GetAddr);
        peer.state = PeerState::VerackWait;

        self.addrman.good(addr);
        PoolActions::default()
    }

    fn on_verack(&mut self, addr: SocketAddr) -> PoolActions {
        let peer = match self.peers.get_mut(&addr) {
            Some(peer) => peer,
            None => return PoolActions::default(),
        };
        if !matches!(peer.state, PeerState::VersionSent | PeerState::VerackWait) {
            drop(peer);
            if self.punish(addr, misbehavior::SCORE_UNSOLICITED_REPLY) {
                return PoolActions::disconnecting(addr);
            }
            return PoolActions::default();
        }
        peer.state = PeerState::Ready;
        PoolActions::default()
    }

    async fn on_headers(
        &mut self,
        addr: SocketAddr,
        headers: Vec<block::CountedHeader>,
    ) -> PoolActions {
        if self.header_sync.sync_peer != Some(addr) {
            return PoolActions::default();
        }

        let batch_len = headers.len();
        let mut pairs = Vec::with_capacity(batch_len);
        for counted in headers {
            let outcome = match self
                .chain
                .clone()
                .oneshot(chain::Request::AcceptHeader(counted.header))
                .await
            {
                Ok(chain::Response::HeaderAccepted(outcome)) => outcome,
                _ => break,
            };

            match outcome {
                chain::AcceptHeaderOutcome::Accepted { height } => {
                    pairs.push((block::Hash::from(&counted.header), height));
                }
                chain::AcceptHeaderOutcome::Duplicate => continue,
                chain::AcceptHeaderOutcome::Orphan => {
                    // Headers-first sync promises a contiguous locator, so a
                    // mid-batch orphan means this peer skipped ahead; stop
                    // processing the rest of the batch rather than guessing.
                    break;
                }
                chain::AcceptHeaderOutcome::Invalid(_) => {
                    if self.punish(addr, misbehavior::SCORE_INVALID_HEADER) {
                        return PoolActions::disconnecting(addr);
                    }
                    break;
                }
            }
        }

        let batch_was_full = self.header_sync.on_headers(&pairs);
        for (hash, _) in &pairs {
            self.download.queue(*hash);
        }

        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.state = PeerState::Syncing;
        }

        if batch_was_full && pairs.len() == batch_len {
            self.request_more_headers(addr).await;
        }

        PoolActions::default()
    }

    async fn request_more_headers(&mut self, addr: SocketAddr) {
        let locator = match self.chain.clone().oneshot(chain::Request::BlockLocator).await {
            Ok(chain::Response::BlockLocator(locator)) => locator,
            _ => return,
        };

        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.send(Message::GetHeaders(net::protocol::external::GetHeaders {
                block_header_hashes: locator,
                stop_hash: None,
            }));
            self.header_sync.note_headers_requested();
        }
    }

    async fn on_inv(&mut self, addr: SocketAddr, items: Vec<net::InventoryHash>) -> PoolActions {
        let mut wanted = Vec::new();
        for item in items {
            match item {
                net::InventoryHash::Tx(txid) | net::InventoryHash::WitnessTx(txid) => {
                    if self.rejections.contains(&txid) {
                        continue;
                    }
                    let known = matches!(
                        self.mempool.clone().oneshot(mempool::Request::Contains(txid)).await,
                        Ok(mempool::Response::Contains(true))
                    );
                    if !known {
                        wanted.push(net::InventoryHash::Tx(txid));
                    }
                }
                net::InventoryHash::Block(hash) | net::InventoryHash::WitnessBlock(hash) => {
                    self.download.queue(hash);
                }
                _ => {}
            }
        }

        if !wanted.is_empty() {
            if let Some(peer) = self.peers.get(&addr) {
                peer.send(Message::GetData(wanted));
            }
        }

        PoolActions::default()
    }

    async fn on_getdata(&mut self, addr: SocketAddr, items: Vec<net::InventoryHash>) -> PoolActions {
        let peer = match self.peers.get(&addr) {
            Some(peer) => peer,
            None => return PoolActions::default(),
        };

        for item in items {
            match item {
                net::InventoryHash::Tx(txid) | net::InventoryHash::WitnessTx(txid) => {
                    if let Ok(mempool::Response::Transaction(Some(tx))) = self
                        .mempool
                        .clone()
                        .oneshot(mempool::Request::Transaction(txid))
                        .await
                    {
                        peer.send(Message::Tx(tx));
                    }
                }
                net::InventoryHash::Block(hash) | net::InventoryHash::WitnessBlock(hash) => {
                    if let Ok(chain::Response::Block(Some(block))) = self
                        .chain
                        .clone()
                        .oneshot(chain::Request::Block(store::HashOrHeight::Hash(hash)))
                        .await
                    {
                        peer.send(Message::Block(block));
                    }
                }
                _ => {}
            }
        }

        PoolActions::default()
    }

    async fn on_block(&mut self, addr: SocketAddr, block: Arc<primitives::block::Block>) -> PoolActions {
        let hash = block.hash();
        let was_requested = self
            .peers
            .get(&addr)
            .map(|p| p.blocks_in_flight.contains(&hash))
            .unwrap_or(false);

        if !was_requested {
            if self.punish(addr, misbehavior::SCORE_UNSOLICITED_REPLY) {
                return PoolActions::disconnecting(addr);
            }
            return PoolActions::default();
        }

        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.block_received(&hash, peer.response_time_estimate);
        }

        match self
            .chain
            .clone()
            .oneshot(chain::Request::CommitBlock(block))
            .await
        {
            Ok(_) => PoolActions::default(),
            Err(error) => {
                let punishes = error.punishes_peer();
                tracing::debug!(%addr, %error, "block rejected");
                if punishes && self.punish(addr, misbehavior::SCORE_INVALID_BLOCK) {
                    return PoolActions::disconnecting(addr);
                }
                PoolActions::default()
            }
        }
    }

    async fn on_tx(&mut self, addr: SocketAddr, tx: Arc<Transaction>) -> PoolActions {
        let txid = tx.hash();
        match self
            .mempool
            .clone()
            .oneshot(mempool::Request::AddTransaction(tx))
            .await
        {
            Ok(mempool::Response::Added(_)) => PoolActions::default(),
            Ok(mempool::Response::Rejected(_)) => {
                self.rejections.insert(txid);
                PoolActions::default()
            }
            _ => PoolActions::default(),
        }
    }

    async fn tick(&mut self) -> PoolActions {
        let mut disconnect = Vec::new();

        if self.header_sync.sync_peer.is_none() || self.header_sync.is_stalled() {
            if let Some(stalled) = self.header_sync.sync_peer {
                if self.punish(stalled, misbehavior::SCORE_STALL) {
                    disconnect.push(stalled);
                }
            }
            if let Some(elected) = self.header_sync.elect(&self.peers) {
                self.request_more_headers(elected).await;
            }
        }

        for offender in self.download.reclaim_expired(&mut self.peers) {
            if self.punish(offender, misbehavior::SCORE_STALL) {
                disconnect.push(offender);
            }
        }

        for (addr, hashes) in self.download.assign(&mut self.peers) {
            if let Some(peer) = self.peers.get(&addr) {
                peer.send(Message::GetData(
                    hashes.into_iter().map(net::InventoryHash::Block).collect(),
                ));
            }
        }

        let mut connect = Vec::new();
        while self.outbound_count() + connect.len() < self.config.max_outbound {
            match self.addrman.select(0.5) {
                Some(candidate) if !self.peers.contains_key(&candidate) => connect.push(candidate),
                Some(_) => break,
                None => break,
            }
        }

        PoolActions { connect, disconnect }
    }

    async fn reelect_sync_peer(&mut self) -> PoolActions {
        self.header_sync.sync_peer = None;
        if let Some(elected) = self.header_sync.elect(&self.peers) {
            self.request_more_headers(elected).await;
        }
        PoolActions::default()
    }

    fn peer_info(&self) -> Vec<PeerInfo> {
        self.peers
            .values()
            .map(|peer| PeerInfo {
                addr: peer.addr,
                direction: peer.direction,
                services: peer.services,
                version: peer.version,
                user_agent: peer.user_agent.clone(),
                best_height: peer.best_height,
                misbehavior_score: self.misbehavior.score(peer.addr.ip()),
            })
            .collect()
    }
}

/// The peer-to-peer service: owns every connected peer's state machine and
/// drives sync, download, and propagation in reaction to inbound messages
/// and a caller-driven timer tick.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Mutex<Inner>>,
}

impl Pool {
    pub fn new(
        config: Config,
        genesis_hash: block::Hash,
        chain: Buffer<chain::service::StateService, chain::Request>,
        mempool: Buffer<mempool::Mempool, mempool::Request>,
    ) -> Self {
        Pool {
            inner: Arc::new(Mutex::new(Inner {
                config,
                self_nonce: Nonce::random(),
                addrman: Box::new(InMemoryAddrman::new()),
                peers: HashMap::new(),
                misbehavior: MisbehaviorTracker::new(),
                header_sync: HeaderSync::new(genesis_hash),
                download: BlockDownloadScheduler::new(),
                rejections: RejectionCache::new(REJECTION_CACHE_CAPACITY),
                chain,
                mempool,
            })),
        }
    }
}

impl Service<Request> for Pool {
    type Response = Response;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let response = match req {
                Request::Connected { addr, direction, sink } => {
                    Response::Actions(inner.lock().await.handle_connected(addr, direction, sink).await)
                }
                Request::Disconnected(addr) => {
                    Response::Actions(inner.lock().await.handle_disconnected(addr))
                }
                Request::Message { addr, message } => {
                    Response::Actions(inner.lock().await.handle_message(addr, message).await)
                }
                Request::Tick => Response::Actions(inner.lock().await.tick().await),
                Request::AnnounceTransaction(tx) => {
                    let txid = tx.hash();
                    let guard = inner.lock().await;
                    for peer in guard.peers.values() {
                        if peer.relay_wanted {
                            peer.send(Message::Inv(vec![net::InventoryHash::Tx(txid)]));
                        }
                    }
                    Response::Actions(PoolActions::default())
                }
                Request::ReElectSyncPeer => {
                    Response::Actions(inner.lock().await.reelect_sync_peer().await)
                }
                Request::GetPeerInfo => Response::PeerInfo(inner.lock().await.peer_info()),
            };
            Ok(response)
        })
    }
}
