//! Block-level consensus checks and the top-level verification entry point.

pub mod check;
pub mod sigops;
pub mod subsidy;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use primitives::{
    block::{Block, Height},
    parameters::Network,
    transaction,
};

use crate::error::BlockError;

/// The maximum number of signature operations (weighted, BIP141-style)
/// permitted per block.
pub const MAX_BLOCK_SIGOPS_COST: u64 = 80_000;

/// The maximum BIP141 block weight (section 4.2 step 1: "serialized size
/// at most consensus max"). Deliberately the same value as
/// `primitives::block::serialize::MAX_BLOCK_BYTES`'s raw-byte cap: Bitcoin's
/// weight limit and its pre-SegWit serialized-size limit share the number
/// 4,000,000, just in different units (weight units here, bytes there).
/// `deserialize_from_buf`'s `take()` enforces the raw-byte cap as a decode-time
/// DOS guard; this is the actual consensus rule, checked against every block
/// regardless of how it was assembled.
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;

/// Performs all context-free checks on `block`: the checks in section 5.1 that
/// depend only on the block's own bytes, not on the rest of the chain.
///
/// Contextual checks (PoW threshold against the previous block, median time
/// past, coinbase height match, checkpoint hashes) are done separately by
/// the non-finalized state once the block's height and ancestors are known.
pub fn semantic_checks(
    block: &Block,
    network: Network,
    height: &Height,
    hash: &primitives::block::Hash,
    now: DateTime<Utc>,
) -> Result<Vec<transaction::Hash>, BlockError> {
    if block.weight() > MAX_BLOCK_WEIGHT {
        return Err(BlockError::TooLarge);
    }

    check::coinbase_is_first(block)?;

    let transaction_hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
    check::merkle_root_validity(block, &transaction_hashes)?;

    check::difficulty_is_valid(&block.header, network, height, hash)?;
    check::time_is_valid_at(&block.header, now, height, hash)?;
    check::witness_commitment_is_valid(block, network, *height)?;

    let sigop_cost = sigops::block_sigop_cost(block);
    if sigop_cost > MAX_BLOCK_SIGOPS_COST {
        return Err(BlockError::TooManySigops);
    }

    for tx in &block.transactions {
        crate::transaction::check::has_inputs_and_outputs(tx)?;
        crate::transaction::check::has_no_duplicate_inputs(tx)?;
    }

    Ok(transaction_hashes)
}

/// Returns `Ok(())` if `block`'s coinbase transaction reports `height` in
/// its scriptSig, as required from BIP34's activation height onward.
pub fn coinbase_height_is_valid(
    block: &Block,
    network: Network,
    height: Height,
) -> Result<(), BlockError> {
    use primitives::parameters::NetworkUpgrade;

    let bip34_height = NetworkUpgrade::BIP34
        .activation_height(network)
        .unwrap_or(Height(0));
    if height < bip34_height {
        return Ok(());
    }

    match block.coinbase_height() {
        Some(reported) if reported == height => Ok(()),
        _ => Err(BlockError::CoinbaseHeightMismatch(height)),
    }
}

/// A block accepted into the non-finalized state, along with the data
/// needed to later write it (and, on reorg, unwrite it) to the finalized
/// store.
#[derive(Clone, Debug)]
pub struct PreparedBlock {
    pub block: Arc<Block>,
    pub hash: primitives::block::Hash,
    pub height: Height,
    pub transaction_hashes: Vec<transaction::Hash>,
}
