//! The persistent chain state: append-only block storage plus an atomically
//! updated UTXO set, with an undo log sufficient to reverse any connected
//! block during a reorg.
//!
//! This crate has no consensus-rule knowledge; it durably records whatever
//! `chain` tells it to. `chain` is responsible for ensuring blocks are
//! committed in valid order.

use std::sync::Arc;

use tokio::sync::oneshot;
use tower::buffer::Buffer;

use primitives::{
    block::{self, Block},
    transaction,
    transparent::{self, Output},
};

mod config;
mod sled_state;
mod util;

pub mod service;

pub use config::Config;
pub use sled_state::FinalizedState;

/// A boxed [`std::error::Error`], matching the error type used throughout
/// the `tower` service stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Selects a block by hash or by height.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HashOrHeight {
    Hash(block::Hash),
    Height(block::Height),
}

impl From<block::Hash> for HashOrHeight {
    fn from(hash: block::Hash) -> Self {
        HashOrHeight::Hash(hash)
    }
}

impl From<block::Height> for HashOrHeight {
    fn from(height: block::Height) -> Self {
        HashOrHeight::Height(height)
    }
}

/// An unspent output, as tracked by the chain state: the output itself,
/// plus the metadata the consensus rules need (the height it was created
/// at, for coinbase maturity, and whether it came from a coinbase).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    pub output: Output,
    pub height: block::Height,
    pub from_coinbase: bool,
}

/// A single entry in a block's undo log: the outpoint a transaction in the
/// block spent, and the [`Utxo`] that spend destroyed, recorded so a future
/// disconnect can recreate it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoOutput {
    pub outpoint: transparent::OutPoint,
    pub spent: Utxo,
}

/// A block queued for commit, together with the channel its submitter is
/// waiting on.
pub struct QueuedBlock {
    pub block: Arc<Block>,
    /// The outputs this block's transactions spent, resolved against the
    /// UTXO set at the parent. `chain` computes this while validating the
    /// block, since it already has to resolve every input.
    pub spent_utxos: Vec<UndoOutput>,
    pub rsp_tx: oneshot::Sender<Result<block::Hash, BoxError>>,
}

/// A request to the state service.
pub enum Request {
    /// Commit `block` to the finalized state, consuming the `spent_utxos`
    /// its inputs destroyed.
    CommitBlock {
        block: Arc<Block>,
        spent_utxos: Vec<UndoOutput>,
    },
    /// Undo the current tip, restoring the outputs it destroyed. Returns
    /// the disconnected block and the outputs that were restored.
    DisconnectTip,
    /// Look up a block by hash or height.
    Block(HashOrHeight),
    /// Look up a transaction by hash.
    Transaction(transaction::Hash),
    /// The current tip `(height, hash)`, if any block has been committed.
    Tip,
    /// The depth (distance from the tip) of the block identified by `hash`.
    Depth(block::Hash),
    /// Look up a single UTXO by outpoint.
    Utxo(transparent::OutPoint),
    /// Wait for a UTXO to arrive, resolving once some block creates it.
    AwaitUtxo(transparent::OutPoint),
    /// Build a block locator from the current tip.
    BlockLocator,
}

/// A response from the state service.
pub enum Response {
    Committed(block::Hash),
    Disconnected {
        block: Arc<Block>,
        restored: Vec<UndoOutput>,
    },
    Block(Option<Arc<Block>>),
    Transaction(Option<Arc<primitives::transaction::Transaction>>),
    Tip(Option<(block::Height, block::Hash)>),
    Depth(Option<u32>),
    Utxo(Option<Utxo>),
    BlockLocator(Vec<block::Hash>),
}

/// Spawns the finalized-state actor for `network`, returning a cloneable,
/// buffered `tower::Service<Request>` handle to it.
///
/// `chain` should hold exactly one clone of the returned handle; `Buffer`
/// makes it safe to also hand clones to read-only callers (e.g. `rpc`)
/// without violating the single-writer requirement of ยง4.1, since all
/// calls are still serialized through one worker task.
pub fn init(
    config: Config,
    network: primitives::parameters::Network,
) -> Buffer<service::StateService, Request> {
    Buffer::new(service::StateService::new(config, network), 1)
}
