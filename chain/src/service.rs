//! The `tower::Service<Request>` surface `pool`, `mempool`, and `rpc` talk
//! to: validates new blocks contextually, tracks competing chains in
//! memory, and hands finalized blocks down to [`store`] as they mature.
//!
//! The non-finalized tree is guarded by an async mutex rather than taken by
//! value out of `&mut self`: `Buffer`'s worker calls `Service::call` once
//! per queued request but does not wait for the returned future before
//! pulling the next one, so anything the future needs to mutate has to live
//! behind shared, not exclusive, ownership.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::sync::Mutex;
use tower::{buffer::Buffer, Service};

use primitives::{
    block::{self, Block},
    parameters::Network,
    transparent,
};
use store::{HashOrHeight, Utxo};

use crate::error::ConsensusError;
use crate::headers::HeaderTree;
use crate::listener::{ChainEvent, ChainListener, FanOut};
use crate::state::NonFinalizedState;
use crate::{Request, Response};

struct Inner {
    network: Network,
    non_finalized: NonFinalizedState,
    disk: Buffer<store::service::StateService, store::Request>,
    listeners: FanOut,
    header_tree: HeaderTree,
}

impl Inner {
    async fn resolve_spent_utxos(
        &mut self,
        block: &Block,
        tip: block::Hash,
    ) -> Result<HashMap<transparent::OutPoint, Utxo>, ConsensusError> {
        let mut resolved = HashMap::new();
        for tx in block.transactions.iter().skip(1) {
            for input in &tx.inputs {
                if let transparent::Input::PrevOut { outpoint, .. } = input {
                    if resolved.contains_key(outpoint) {
                        continue;
                    }
                    let utxo = if let Some(utxo) = self.non_finalized.utxo(&tip, outpoint) {
                        Some(utxo)
                    } else {
                        match self.disk.call(store::Request::Utxo(*outpoint)).await {
                            Ok(store::Response::Utxo(utxo)) => utxo,
                            Ok(_) => unreachable!("Utxo request returns Response::Utxo"),
                            Err(error) => return Err(ConsensusError::IoError(error.to_string())),
                        }
                    };
                    let utxo = utxo.ok_or_else(|| {
                        ConsensusError::Invalid(crate::error::BlockError::Transaction(
                            crate::error::TransactionError::MissingInput(*outpoint),
                        ))
                    })?;
                    resolved.insert(*outpoint, utxo);
                }
            }
        }
        Ok(resolved)
    }

    /// Writes every block that has matured past the reorg horizon down to
    /// `store`, one at a time, oldest first.
    async fn finalize_matured_blocks(&mut self) -> Result<(), ConsensusError> {
        while let Some((block, spent_utxos)) = self.non_finalized.pop_root_if_finalizable() {
            self.disk
                .call(store::Request::CommitBlock { block, spent_utxos })
                .await
                .map_err(|error| ConsensusError::Fatal(error.to_string()))?;

            match self
                .disk
                .call(store::Request::Tip)
                .await
                .map_err(|error| ConsensusError::Fatal(error.to_string()))?
            {
                store::Response::Tip(Some(tip)) => self.non_finalized.set_finalized_tip(tip),
                _ => return Err(ConsensusError::Fatal("finalized state has no tip".into())),
            }
        }
        Ok(())
    }

    async fn commit_block(&mut self, block: Arc<Block>) -> Result<Response, ConsensusError> {
        let hash = block.hash();
        if self.non_finalized.contains(&hash) {
            return Err(ConsensusError::Duplicate);
        }

        let old_tip = self.non_finalized.best_tip().1;
        let spent_utxos = self.resolve_spent_utxos(&block, old_tip).await?;

        let height = self
            .non_finalized
            .next_height(&block.header.previous_block_hash)
            .ok_or(ConsensusError::Orphan)?;

        crate::block::semantic_checks(
            &block,
            self.network,
            &height,
            &hash,
            chrono::Utc::now(),
        )
        .map_err(ConsensusError::Invalid)?;

        crate::script::verify_block_scripts(&block, self.network, height, &spent_utxos)
            .await
            .map_err(ConsensusError::Invalid)?;

        let header = block.header;
        self.non_finalized.commit_block(block, hash, spent_utxos)?;
        // Best-effort: keep the header tree in sync for blocks that arrived
        // without (or ahead of) a `headers` message announcing them, e.g. a
        // locally mined block or a block requested speculatively. A header
        // the tree already has, or one it independently judges invalid,
        // does not affect this commit's outcome either way.
        let _ = self.header_tree.accept(header);

        let new_tip = self.non_finalized.best_tip().1;
        self.emit_tip_change(old_tip, new_tip);

        self.finalize_matured_blocks().await?;

        Ok(Response::Committed(hash))
    }

    /// Fires [`ChainEvent`]s for the move from `old_tip` to `new_tip`:
    /// per-block disconnect/connect events (ยง4.2's reorg procedure), plus a
    /// summary [`ChainEvent::Reorg`] whenever the branch actually changed.
    fn emit_tip_change(&self, old_tip: block::Hash, new_tip: block::Hash) {
        if old_tip == new_tip {
            return;
        }

        let (disconnected, connected) = self.non_finalized.branch_points(old_tip, new_tip);

        for hash in &disconnected {
            if let Some(block) = self.non_finalized.block(hash) {
                let height = block.coinbase_height().expect("connected block has a height");
                self.listeners.notify(ChainEvent::Disconnected {
                    block,
                    hash: *hash,
                    height,
                });
            }
        }

        for hash in &connected {
            if let Some(block) = self.non_finalized.block(hash) {
                let height = block.coinbase_height().expect("connected block has a height");
                self.listeners.notify(ChainEvent::Connected {
                    block,
                    hash: *hash,
                    height,
                });
            }
        }

        if !disconnected.is_empty() {
            self.listeners.notify(ChainEvent::Reorg {
                old_tip,
                new_tip,
                disconnected,
                connected,
            });
        }
    }

    fn lookup(&self, query: HashOrHeight) -> Option<Arc<Block>> {
        match query {
            HashOrHeight::Hash(hash) => self.non_finalized.block(&hash),
            HashOrHeight::Height(_) => self
                .non_finalized
                .resolve(&query)
                .and_then(|hash| self.non_finalized.block(&hash)),
        }
    }
}

/// The chain state service: owns the non-finalized tree and a handle to the
/// finalized disk state.
#[derive(Clone)]
pub struct StateService {
    inner: Arc<Mutex<Inner>>,
}

impl StateService {
    pub fn new(
        network: Network,
        disk: Buffer<store::service::StateService, store::Request>,
        finalized_tip: (block::Height, block::Hash),
        listeners: FanOut,
        header_tree: HeaderTree,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                network,
                non_finalized: NonFinalizedState::new(network, finalized_tip),
                disk,
                listeners,
                header_tree,
            })),
        }
    }
}

impl Service<Request> for StateService {
    type Response = Response;
    type Error = ConsensusError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, ConsensusError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            match req {
                Request::CommitBlock(block) => inner.lock().await.commit_block(block).await,
                Request::Tip => {
                    let tip = inner.lock().await.non_finalized.best_tip();
                    Ok(Response::Tip(Some(tip)))
                }
                Request::Depth(hash) => {
                    let mut guard = inner.lock().await;
                    if let Some(depth) = guard.non_finalized.depth(&hash) {
                        return Ok(Response::Depth(Some(depth)));
                    }
                    match guard.disk.call(store::Request::Depth(hash)).await {
                        Ok(store::Response::Depth(depth)) => Ok(Response::Depth(depth)),
                        Ok(_) => unreachable!(),
                        Err(error) => Err(ConsensusError::IoError(error.to_string())),
                    }
                }
                Request::Block(query) => {
                    let mut guard = inner.lock().await;
                    if let Some(block) = guard.lookup(query) {
                        return Ok(Response::Block(Some(block)));
                    }
                    match guard.disk.call(store::Request::Block(query)).await {
                        Ok(store::Response::Block(block)) => Ok(Response::Block(block)),
                        Ok(_) => unreachable!(),
                        Err(error) => Err(ConsensusError::IoError(error.to_string())),
                    }
                }
                Request::Transaction(hash) => {
                    let mut guard = inner.lock().await;
                    match guard.disk.call(store::Request::Transaction(hash)).await {
                        Ok(store::Response::Transaction(tx)) => Ok(Response::Transaction(tx)),
                        Ok(_) => unreachable!(),
                        Err(error) => Err(ConsensusError::IoError(error.to_string())),
                    }
                }
                Request::Utxo(outpoint) => {
                    let mut guard = inner.lock().await;
                    let tip = guard.non_finalized.best_tip().1;
                    if let Some(utxo) = guard.non_finalized.utxo(&tip, &outpoint) {
                        return Ok(Response::Utxo(Some(utxo)));
                    }
                    match guard.disk.call(store::Request::Utxo(outpoint)).await {
                        Ok(store::Response::Utxo(utxo)) => Ok(Response::Utxo(utxo)),
                        Ok(_) => unreachable!(),
                        Err(error) => Err(ConsensusError::IoError(error.to_string())),
                    }
                }
                Request::AwaitUtxo(outpoint) => {
                    let mut guard = inner.lock().await;
                    match guard.disk.call(store::Request::AwaitUtxo(outpoint)).await {
                        Ok(store::Response::Utxo(utxo)) => Ok(Response::Utxo(utxo)),
                        Ok(_) => unreachable!(),
                        Err(error) => Err(ConsensusError::IoError(error.to_string())),
                    }
                }
                Request::BlockLocator => {
                    // The header tree, not `disk`, is the authoritative tip
                    // for headers-first sync: it advances on every accepted
                    // `headers` message, well ahead of whatever has a
                    // downloaded (let alone finalized) body.
                    let guard = inner.lock().await;
                    Ok(Response::BlockLocator(guard.header_tree.locator()))
                }
                Request::AcceptHeader(header) => {
                    let mut guard = inner.lock().await;
                    let outcome = guard.header_tree.accept(header);
                    Ok(Response::HeaderAccepted(outcome))
                }
            }
        })
    }
}
