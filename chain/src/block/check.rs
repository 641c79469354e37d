//! Consensus check functions

use std::iter::FromIterator;

use chrono::{DateTime, Utc};

use primitives::{
    block::{merkle, Block, Hash, Header, Height},
    parameters::{Network, NetworkUpgrade},
    serialization::sha256d,
    transaction,
    work::difficulty::ExpandedDifficulty,
};

use crate::error::*;

use super::subsidy;

/// The BIP141 witness commitment output script prefix: `OP_RETURN PUSH(36)
/// 0xaa21a9ed`, followed by the 32-byte commitment hash.
const WITNESS_COMMITMENT_HEADER: [u8; 6] = [0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];

/// Returns `Ok(())` if there is exactly one coinbase transaction in `Block`,
/// and that coinbase transaction is the first transaction in the block.
///
/// The first (and only the first) transaction in a block is a coinbase
/// transaction, which collects and spends any miner subsidy and transaction
/// fees paid by transactions included in this block.
pub fn coinbase_is_first(block: &Block) -> Result<(), BlockError> {
    let first = block
        .transactions
        .get(0)
        .ok_or(BlockError::NoTransactions)?;
    let mut rest = block.transactions.iter().skip(1);
    if !first.is_coinbase() {
        return Err(TransactionError::CoinbasePosition)?;
    }
    if rest.any(|tx| tx.contains_coinbase_input()) {
        return Err(TransactionError::CoinbaseInputFound)?;
    }

    Ok(())
}

/// Returns `Ok(())` if `hash` passes:
///   - the target difficulty limit for `network` (PoWLimit), and
///   - the difficulty filter,
/// based on the fields in `header`.
///
/// If the block is invalid, returns an error containing `height` and `hash`.
pub fn difficulty_is_valid(
    header: &Header,
    network: Network,
    height: &Height,
    hash: &Hash,
) -> Result<(), BlockError> {
    let difficulty_threshold = header
        .difficulty_threshold
        .to_expanded()
        .ok_or(BlockError::InvalidDifficulty(*height, *hash))?;

    // Note: the comparisons in this function are u256 integer comparisons.
    // Greater values represent *less* work.

    // The PowLimit check doesn't actually depend on any previous blocks.
    if difficulty_threshold > ExpandedDifficulty::target_difficulty_limit(network) {
        Err(BlockError::TargetDifficultyLimit(
            *height,
            *hash,
            difficulty_threshold,
            network,
            ExpandedDifficulty::target_difficulty_limit(network),
        ))?;
    }

    // The difficulty filter is also context-free. Testnet's "20-minute rule"
    // minimum-difficulty exception is a change to the retarget algorithm
    // itself (see `work::difficulty::calculate_next_difficulty`), not to this
    // filter, so nothing testnet-specific is needed here.
    if hash > &difficulty_threshold {
        Err(BlockError::DifficultyFilter(
            *height,
            *hash,
            difficulty_threshold,
            network,
        ))?;
    }

    Ok(())
}

/// Returns `Ok(())` if the coinbase output total in `block` does not exceed
/// the block subsidy plus `total_fees`, the sum of every other transaction's
/// (inputs - outputs).
pub fn subsidy_is_valid(
    block: &Block,
    network: Network,
    total_fees: primitives::amount::Amount<primitives::amount::NonNegative>,
) -> Result<(), BlockError> {
    let height = block.coinbase_height().ok_or(SubsidyError::NoCoinbase)?;
    let coinbase = block.transactions.get(0).ok_or(SubsidyError::NoCoinbase)?;

    let subsidy = subsidy::general::block_subsidy(height, network)
        .map_err(|_| BlockError::Subsidy(SubsidyError::NoCoinbase))?;

    let coinbase_total: i64 = coinbase.outputs.iter().map(|o| o.value.satoshis()).sum();
    let allowed = subsidy.satoshis() + total_fees.satoshis();

    if coinbase_total > allowed {
        use std::convert::TryFrom;
        return Err(SubsidyError::SubsidyTooHigh {
            actual: primitives::amount::Amount::try_from(coinbase_total.max(0)).unwrap(),
            allowed: primitives::amount::Amount::try_from(allowed.max(0)).unwrap(),
        }
        .into());
    }

    Ok(())
}

/// Returns `Ok(())` if `header.time` is less than or equal to
/// 2 hours in the future, according to the node's local clock (`now`).
///
/// This is a non-deterministic rule, as clocks vary over time, and
/// between different nodes.
///
/// A full validator MUST NOT accept blocks with nTime more than two hours in
/// the future according to its clock. This is not strictly a consensus rule
/// because it is nondeterministic, and clock time varies between nodes. Also
/// note that a block that is rejected by this rule at a given point in time
/// may later be accepted.
///
/// If the header time is invalid, returns an error containing `height` and `hash`.
pub fn time_is_valid_at(
    header: &Header,
    now: DateTime<Utc>,
    height: &Height,
    hash: &Hash,
) -> Result<(), primitives::block::BlockTimeError> {
    header.time_is_valid_at(now, height, hash)
}

/// Check Merkle root validity.
///
/// `transaction_hashes` is a precomputed list of transaction hashes.
pub fn merkle_root_validity(
    block: &Block,
    transaction_hashes: &[transaction::Hash],
) -> Result<(), BlockError> {
    let merkle_root = transaction_hashes.iter().cloned().collect();

    if block.header.merkle_root != merkle_root {
        return Err(BlockError::BadMerkleRoot {
            actual: merkle_root,
            expected: block.header.merkle_root,
        });
    }

    // Bitcoin's transaction Merkle trees are malleable, allowing blocks with
    // duplicate transactions to have the same Merkle root as blocks without
    // duplicate transactions. Duplicate transactions should cause a block to be
    // rejected, as duplicate transactions imply that the block contains a
    // double-spend.  As a defense-in-depth, however, we also check that there
    // are no duplicate transaction hashes, by collecting into a HashSet.
    use std::collections::HashSet;
    if transaction_hashes.len() != transaction_hashes.iter().collect::<HashSet<_>>().len() {
        return Err(BlockError::DuplicateTransaction);
    }

    Ok(())
}

/// Returns `Ok(())` if `block`'s witness commitment (BIP141) matches the
/// witness root of its transactions, once SegWit is active at `height`.
///
/// Before SegWit activation, no commitment is required, regardless of
/// whether any transaction happens to carry witness data.
pub fn witness_commitment_is_valid(
    block: &Block,
    network: Network,
    height: Height,
) -> Result<(), BlockError> {
    let segwit_active = NetworkUpgrade::SegWit
        .activation_height(network)
        .map_or(false, |activation| height >= activation);
    if !segwit_active {
        return Ok(());
    }

    let coinbase = block
        .transactions
        .get(0)
        .ok_or(BlockError::NoTransactions)?;

    let commitment = coinbase.outputs.iter().rev().find_map(|output| {
        let bytes = &output.lock_script.0;
        if bytes.len() == 38 && bytes[0..6] == WITNESS_COMMITMENT_HEADER {
            let mut commitment = [0u8; 32];
            commitment.copy_from_slice(&bytes[6..38]);
            Some(commitment)
        } else {
            None
        }
    });

    let commitment = match commitment {
        Some(commitment) => commitment,
        None => {
            let any_witness = block
                .transactions
                .iter()
                .any(|tx| tx.inputs.iter().any(|input| input.has_witness()));
            return if any_witness {
                Err(BlockError::MissingWitnessCommitment)
            } else {
                Ok(())
            };
        }
    };

    let witness_root = merkle::Root::from_iter(
        std::iter::once(transaction::Hash::from_bytes_exact([0u8; 32]))
            .chain(block.transactions[1..].iter().map(|tx| tx.wtxid())),
    );

    let reserved_value = coinbase
        .inputs
        .get(0)
        .map(|input| input.witness())
        .and_then(|witness| witness.get(0))
        .filter(|item| item.len() == 32)
        .map(|item| {
            let mut value = [0u8; 32];
            value.copy_from_slice(item);
            value
        })
        .unwrap_or([0u8; 32]);

    let mut writer = sha256d::Writer::default();
    std::io::Write::write_all(&mut writer, &witness_root.0).expect("Writer is infallible");
    std::io::Write::write_all(&mut writer, &reserved_value).expect("Writer is infallible");
    let expected = writer.finish();

    if expected != commitment {
        return Err(BlockError::WitnessCommitmentMismatch);
    }

    Ok(())
}
