//! Bridges `chain`'s [`ChainListener`](chain::ChainListener) sink to the
//! mempool service: `notify` must not block, so each event is handed off
//! to a spawned task that drives the actual `tower::Service` call.

use tower::{buffer::Buffer, ServiceExt};

use chain::{ChainEvent, ChainListener};

use crate::{Mempool, Request};

/// Registers a mempool handle as a [`ChainListener`]: block connections
/// drop confirmed entries, disconnections re-admit them, matching ยง4.3's
/// "on `onConnect`/`onDisconnect`" contract.
#[derive(Clone)]
pub struct ChainReactor {
    mempool: Buffer<Mempool, Request>,
}

impl ChainReactor {
    pub fn new(mempool: Buffer<Mempool, Request>) -> Self {
        ChainReactor { mempool }
    }
}

impl ChainListener for ChainReactor {
    fn notify(&self, event: ChainEvent) {
        let mempool = self.mempool.clone();
        tokio::spawn(async move {
            let request = match event {
                ChainEvent::Connected { block, .. } => Request::BlockConnected(block),
                ChainEvent::Disconnected { block, .. } => Request::BlockDisconnected(block),
                // Per-block events already drove the connect/disconnect
                // work above; the summary event needs no action here.
                ChainEvent::Reorg { .. } => return,
            };

            if let Err(error) = mempool.oneshot(request).await {
                tracing::warn!(%error, "mempool failed to apply chain event");
            }
        });
    }
}
