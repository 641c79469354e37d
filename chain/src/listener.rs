//! The event sink `pool` and `mempool` subscribe to (ยง9's "dynamic dispatch"
//! design note): chain state changes are a fixed, small capability set, so
//! this is a plain trait plus a fan-out adapter rather than a generic
//! pub/sub bus.

use std::sync::Arc;

use primitives::block::{Block, Hash, Height};

/// A change to the chain state, delivered to every registered
/// [`ChainListener`] in the order it happened.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// `block` was connected to the active chain at `height`.
    Connected {
        block: Arc<Block>,
        hash: Hash,
        height: Height,
    },
    /// `block` was disconnected from the active chain; it was previously at
    /// `height`.
    Disconnected {
        block: Arc<Block>,
        hash: Hash,
        height: Height,
    },
    /// A reorg completed (or was aborted and rolled back): `disconnected`
    /// and `connected` list the hashes that were dis/connected, oldest
    /// first within each list. A [`ChainEvent::Disconnected`]/`Connected`
    /// event was already sent for each entry in these lists before this
    /// summary event; listeners that only care about the net effect of a
    /// reorg (e.g. `pool` re-electing a sync peer) can ignore the
    /// per-block events and act on this one instead.
    Reorg {
        old_tip: Hash,
        new_tip: Hash,
        disconnected: Vec<Hash>,
        connected: Vec<Hash>,
    },
}

/// A sink for [`ChainEvent`]s. Implementations must not block: the caller
/// (the chain service's single writer task) delivers events synchronously
/// as part of committing a block, so a blocking listener would stall the
/// whole chain.
pub trait ChainListener: Send + Sync {
    fn notify(&self, event: ChainEvent);
}

/// Delivers every event to each of a set of listeners, in registration
/// order.
///
/// The node's dependency order (ยง9) builds `chain` before the `mempool`
/// and `pool` that need to listen to it — `chain` hands its `FanOut` to
/// those constructors rather than the reverse, so the set has to support
/// registration after `chain` itself already exists. It is still fixed
/// by the time the node finishes starting up: nothing unregisters a
/// listener at runtime.
#[derive(Clone, Default)]
pub struct FanOut(Arc<std::sync::RwLock<Vec<Arc<dyn ChainListener>>>>);

impl FanOut {
    pub fn new() -> Self {
        FanOut::default()
    }

    /// Adds `listener` to the fan-out set. Intended to be called only
    /// during node startup, before any block is committed.
    pub fn register(&self, listener: Arc<dyn ChainListener>) {
        self.0
            .write()
            .expect("fan-out lock is never held across a panic")
            .push(listener);
    }
}

impl ChainListener for FanOut {
    fn notify(&self, event: ChainEvent) {
        let listeners = self
            .0
            .read()
            .expect("fan-out lock is never held across a panic");
        for listener in listeners.iter() {
            listener.notify(event.clone());
        }
    }
}
