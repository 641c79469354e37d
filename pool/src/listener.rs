//! Bridges `chain`'s synchronous [`ChainListener`](chain::ChainListener) sink
//! to `Pool`'s async `Request`s, the same way `mempool::ChainReactor` does
//! for the mempool service.

use tower::{buffer::Buffer, ServiceExt};

use chain::{ChainEvent, ChainListener};

use crate::{Pool, Request};

/// On a reorg, the elected sync peer's advertised height is no longer
/// trustworthy relative to our new tip, so `Pool` re-elects one on its next
/// tick; per-block `Connected`/`Disconnected` events need no action here
/// since `Pool` only cares about headers/blocks it is actively requesting,
/// not the confirmed chain's contents.
#[derive(Clone)]
pub struct PoolChainReactor {
    pool: Buffer<Pool, Request>,
}

impl PoolChainReactor {
    pub fn new(pool: Buffer<Pool, Request>) -> Self {
        PoolChainReactor { pool }
    }
}

impl ChainListener for PoolChainReactor {
    fn notify(&self, event: ChainEvent) {
        if let ChainEvent::Reorg { .. } = event {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                if let Err(error) = pool.oneshot(Request::ReElectSyncPeer).await {
                    tracing::warn!(%error, "pool failed to react to reorg");
                }
            });
        }
    }
}
