//! Consensus parameters: subsidy constants and hardcoded checkpoints.

pub mod subsidy;

use primitives::block::{Hash, Height};
use primitives::parameters::Network;

/// A hardcoded (height, hash) pair that a candidate chain must match if it
/// reaches that height. Rejecting any other block at a checkpointed height
/// lets the node skip full script verification for everything below the
/// highest checkpoint it has stored.
///
/// We ship no checkpoints of our own: `genesis_hash` already pins height 0,
/// and verifying every block's scripts is cheap enough with batched
/// verification that the added operational risk of a wrong checkpoint isn't
/// worth it. `checkpoints` always returns the single genesis entry.
pub fn checkpoints(network: Network) -> Vec<(Height, Hash)> {
    vec![(Height(0), primitives::parameters::genesis_hash(network))]
}

/// Returns the highest checkpoint at or below `height`, if any.
pub fn highest_checkpoint_below(network: Network, height: Height) -> Option<(Height, Hash)> {
    checkpoints(network)
        .into_iter()
        .filter(|(h, _)| *h <= height)
        .max_by_key(|(h, _)| *h)
}
