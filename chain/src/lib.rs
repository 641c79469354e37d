//! Chain validation and the non-finalized chain state.
//!
//! `chain` owns every consensus rule (ยง5) and the in-memory tree of
//! candidate chains sitting above the finalized tip (ยง9); it delegates
//! durable storage of whatever has matured past the reorg horizon to
//! [`store`]. Callers (`pool`, `mempool`, `rpc`) talk to it only through the
//! `tower::Service<Request>` in [`service`].

pub mod block;
pub mod error;
pub mod headers;
pub mod listener;
pub mod parameters;
pub mod script;
pub mod service;
pub mod state;
pub mod transaction;

use std::sync::Arc;

use primitives::{
    block::{Block, Hash, Header, Height},
    parameters::Network,
    transaction,
    transparent,
};
use tower::buffer::Buffer;

pub use error::ConsensusError;
pub use headers::AcceptHeaderOutcome;
pub use listener::{ChainEvent, ChainListener, FanOut};

/// The number of confirmations a coinbase output needs before it can be
/// spent.
pub const COINBASE_MATURITY: u32 = 100;

/// A request to the chain state service.
pub enum Request {
    /// Validate and, if valid, commit `block` to the chain.
    CommitBlock(Arc<Block>),
    /// The current best chain tip `(height, hash)`.
    Tip,
    /// The number of blocks between `hash` and the tip, inclusive.
    Depth(Hash),
    /// Look up a block by hash or height.
    Block(store::HashOrHeight),
    /// Look up a transaction by hash.
    Transaction(transaction::Hash),
    /// Look up a single UTXO by outpoint, across both the non-finalized tree
    /// and the finalized store.
    Utxo(transparent::OutPoint),
    /// Wait for a UTXO to arrive, resolving once some block creates it.
    AwaitUtxo(transparent::OutPoint),
    /// Build a block locator from the current best chain tip.
    BlockLocator,
    /// Validate a lone header against §4.2's `acceptHeader` checks and, if
    /// valid, insert it into the header-only tree headers-first sync walks
    /// ahead of block downloads.
    AcceptHeader(Header),
}

/// A response from the chain state service.
pub enum Response {
    Committed(Hash),
    Tip(Option<(Height, Hash)>),
    Depth(Option<u32>),
    Block(Option<Arc<Block>>),
    Transaction(Option<Arc<primitives::transaction::Transaction>>),
    Utxo(Option<store::Utxo>),
    BlockLocator(Vec<Hash>),
    HeaderAccepted(AcceptHeaderOutcome),
}

/// Spawns the chain state service for `network`, given a handle to the
/// already-initialized finalized store.
///
/// Like `store::init`, the returned handle is wrapped in a `Buffer` so it
/// can be cloned freely between `pool`, `mempool`, and `rpc`.
pub async fn init(
    network: Network,
    disk: Buffer<store::service::StateService, store::Request>,
    listeners: FanOut,
) -> Buffer<service::StateService, Request> {
    let tip = match tower::ServiceExt::oneshot(disk.clone(), store::Request::Tip)
        .await
        .expect("store never fails a Tip request")
    {
        store::Response::Tip(Some(tip)) => tip,
        store::Response::Tip(None) => (Height(0), primitives::parameters::genesis_hash(network)),
        _ => unreachable!("Tip request returns Response::Tip"),
    };

    let mut header_tree = headers::HeaderTree::new(network);
    header_tree.set_known_tip(tip);

    Buffer::new(
        service::StateService::new(network, disk, tip, listeners, header_tree),
        32,
    )
}
