//! The `tower::Service<Request>` wrapper around [`FinalizedState`].
//!
//! Reads are synchronous (sled reads don't block meaningfully once warm),
//! so `call` does all its work before returning the future; this matches
//! the reactor's expectation in ยง4.5 that component operations never block
//! on I/O themselves.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tower::Service;

use primitives::parameters::Network;

use crate::{BoxError, Config, FinalizedState, Request, Response};

mod pending_utxos;

pub use pending_utxos::PendingUtxos;

/// The finalized chain state service.
pub struct StateService {
    disk: FinalizedState,
    pending_utxos: PendingUtxos,
}

impl StateService {
    pub fn new(config: Config, network: Network) -> Self {
        Self {
            disk: FinalizedState::new(&config, network),
            pending_utxos: PendingUtxos::default(),
        }
    }

    fn call_mut(&mut self, req: Request) -> Result<Response, BoxError> {
        match req {
            Request::CommitBlock {
                block,
                spent_utxos,
            } => {
                let height = block
                    .coinbase_height()
                    .expect("committed blocks have a height");

                let new_utxos: std::collections::HashMap<_, _> = block
                    .transactions
                    .iter()
                    .flat_map(|tx| {
                        let hash = tx.hash();
                        let from_coinbase = tx.is_coinbase();
                        tx.outputs
                            .iter()
                            .enumerate()
                            .map(move |(index, output)| {
                                (
                                    primitives::transparent::OutPoint {
                                        hash,
                                        index: index as u32,
                                    },
                                    crate::Utxo {
                                        output: output.clone(),
                                        height,
                                        from_coinbase,
                                    },
                                )
                            })
                    })
                    .collect();

                let hash = self.disk.commit_finalized_direct(block, spent_utxos)?;
                self.pending_utxos.check_against(&new_utxos);
                Ok(Response::Committed(hash))
            }
            Request::DisconnectTip => {
                let (block, restored) = self.disk.disconnect_tip()?;
                Ok(Response::Disconnected { block, restored })
            }
            Request::Block(hash_or_height) => {
                Ok(Response::Block(self.disk.block(hash_or_height)?))
            }
            Request::Transaction(hash) => Ok(Response::Transaction(self.disk.transaction(hash)?)),
            Request::Tip => Ok(Response::Tip(self.disk.tip()?)),
            Request::Depth(hash) => Ok(Response::Depth(self.disk.depth(hash)?)),
            Request::Utxo(outpoint) => Ok(Response::Utxo(self.disk.utxo(&outpoint)?)),
            // Handled directly in `call`, which can return a future that
            // resolves later instead of answering synchronously.
            Request::AwaitUtxo(_) => unreachable!("AwaitUtxo is intercepted before call_mut"),
            Request::BlockLocator => Ok(Response::BlockLocator(self.disk.block_locator()?)),
        }
    }
}

impl Service<Request> for StateService {
    type Response = Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.pending_utxos.prune();
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        if let Request::AwaitUtxo(outpoint) = req {
            match self.disk.utxo(&outpoint) {
                Ok(Some(utxo)) => return Box::pin(async move { Ok(Response::Utxo(Some(utxo))) }),
                Ok(None) => {
                    let fut = self.pending_utxos.queue(outpoint);
                    return Box::pin(fut);
                }
                Err(error) => return Box::pin(async move { Err(error) }),
            }
        }

        let result = self.call_mut(req);
        Box::pin(async move { result })
    }
}
