//! Local-only admission policy (ยง4.3): standardness, dust, and
//! replace-by-fee. None of these are consensus rules — a transaction that
//! fails one of these checks is still valid on chain, so a failure here
//! must never be blamed on the peer that relayed it
//! ([`ConsensusError::PolicyRejected`](chain::ConsensusError)).

use std::collections::HashMap;

use primitives::{
    amount::{Amount, NegativeAllowed},
    transaction::Transaction,
    transparent,
};

use crate::entry::MempoolEntry;
use crate::MempoolError;

/// Transactions larger than this are never relayed or mined, mirroring
/// Bitcoin Core's `MAX_STANDARD_TX_WEIGHT` at a byte-size granularity
/// since this node does not yet discount witness weight.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;

/// The default per-package ancestor/descendant limits (ยง4.3).
pub const DEFAULT_ANCESTOR_LIMIT: usize = 25;
pub const DEFAULT_ANCESTOR_SIZE_LIMIT: u64 = 101_000;
pub const DEFAULT_DESCENDANT_LIMIT: usize = 25;
pub const DEFAULT_DESCENDANT_SIZE_LIMIT: u64 = 101_000;

/// An output below this many satoshis per standard P2PKH-sized input is
/// dust: the cost of spending it would exceed its value. A fixed
/// threshold rather than a feerate-scaled one, matching the "reduced
/// scope" bucketed-fee policy this node otherwise uses.
pub const DUST_THRESHOLD: i64 = 546;

/// The minimum fee, in satoshis per thousand vbytes, this node will
/// admit or relay a transaction at. RBF replacements must clear the
/// current dynamic minimum (ยง4.3's decaying eviction floor), which starts
/// at this value and never drops below it.
pub const MIN_RELAY_FEE_PER_KVB: i64 = 1_000;

/// Checks the context-free standardness rules: size, and dust outputs.
/// Script-form recognition is intentionally coarse (raw length buckets
/// for the common P2PKH/P2SH/P2WPKH/P2WSH/OP_RETURN shapes) since
/// `primitives::transparent::Script` carries no opcode parser.
pub fn check_standard(tx: &Transaction) -> Result<(), MempoolError> {
    let size = tx.len();
    if size > MAX_STANDARD_TX_SIZE {
        return Err(MempoolError::NonStandard("tx-size"));
    }

    for output in &tx.outputs {
        if is_dust(output) {
            return Err(MempoolError::NonStandard("dust"));
        }
        if !is_standard_script(&output.lock_script) {
            return Err(MempoolError::NonStandard("scriptpubkey"));
        }
    }

    Ok(())
}

fn is_dust(output: &transparent::Output) -> bool {
    !is_unspendable(&output.lock_script) && output.value.satoshis() < DUST_THRESHOLD
}

fn is_unspendable(script: &transparent::Script) -> bool {
    // OP_RETURN outputs carry no spendable value and are exempt from the
    // dust rule; they are the one standard "provably unspendable" form.
    matches!(script.0.first(), Some(0x6a))
}

fn is_standard_script(script: &transparent::Script) -> bool {
    if is_unspendable(script) {
        return script.0.len() <= 83;
    }
    // P2PKH (25), P2SH (23), P2WPKH (22), P2WSH (34) are the recognized
    // standard forms; anything else is rejected as non-standard, matching
    // Bitcoin Core's `IsStandard` at reduced fidelity.
    matches!(script.0.len(), 22 | 23 | 25 | 34)
}

/// Fee comparison for an opt-in replace-by-fee (BIP125) replacement:
/// `replacement` must pay a strictly higher feerate than every entry it
/// conflicts with, and its absolute fee must exceed the sum of replaced
/// fees by at least one minimum-relay increment times its own size.
pub fn check_replacement(
    replacement_fee: Amount<NegativeAllowed>,
    replacement_vsize: u64,
    conflicts: &[&MempoolEntry],
) -> Result<(), MempoolError> {
    if conflicts.is_empty() {
        return Ok(());
    }

    if !conflicts.iter().any(|entry| signals_replacement(entry)) {
        return Err(MempoolError::Conflict("not-opt-in-rbf"));
    }

    let replacement_rate = if replacement_vsize == 0 {
        0
    } else {
        replacement_fee.satoshis() * 1000 / replacement_vsize as i64
    };

    let mut replaced_fee_total = 0i64;
    for entry in conflicts {
        if replacement_rate <= entry.fee_rate_per_kvb() {
            return Err(MempoolError::Conflict("insufficient-fee-rate"));
        }
        replaced_fee_total += entry.fee.satoshis();
    }

    let min_increment = MIN_RELAY_FEE_PER_KVB * replacement_vsize as i64 / 1000;
    if replacement_fee.satoshis() < replaced_fee_total + min_increment.max(1) {
        return Err(MempoolError::Conflict("insufficient-fee"));
    }

    Ok(())
}

/// Returns `true` if any input's sequence number opts this transaction
/// into BIP125 replacement (sequence < `0xffff_fffe`).
pub fn signals_replacement(entry: &MempoolEntry) -> bool {
    entry.tx.inputs.iter().any(|input| match input {
        transparent::Input::PrevOut { sequence, .. } => *sequence < 0xffff_fffe,
        transparent::Input::Coinbase { .. } => false,
    })
}

/// Returns every outpoint `tx` spends, used both for conflict detection
/// and for resolving which in-mempool entries a new transaction depends
/// on.
pub fn spent_outpoints(tx: &Transaction) -> Vec<transparent::OutPoint> {
    tx.inputs
        .iter()
        .filter_map(|input| match input {
            transparent::Input::PrevOut { outpoint, .. } => Some(*outpoint),
            transparent::Input::Coinbase { .. } => None,
        })
        .collect()
}

/// Checks the ยง4.3 ancestor package limits against a prospective entry's
/// already-computed ancestor totals.
pub fn check_package_limits(
    ancestor_count: usize,
    ancestor_vsize: u64,
) -> Result<(), MempoolError> {
    if ancestor_count > DEFAULT_ANCESTOR_LIMIT {
        return Err(MempoolError::Conflict("too-many-ancestors"));
    }
    if ancestor_vsize > DEFAULT_ANCESTOR_SIZE_LIMIT {
        return Err(MempoolError::Conflict("ancestor-size-limit"));
    }
    Ok(())
}

/// Checks the ยง4.3 descendant package limits against an existing ancestor
/// entry's totals, once it has gained a prospective new descendant.
/// `descendant_count`/`descendant_vsize` must already include that new
/// descendant.
pub fn check_descendant_limits(
    descendant_count: usize,
    descendant_vsize: u64,
) -> Result<(), MempoolError> {
    if descendant_count > DEFAULT_DESCENDANT_LIMIT {
        return Err(MempoolError::Conflict("too-many-descendants"));
    }
    if descendant_vsize > DEFAULT_DESCENDANT_SIZE_LIMIT {
        return Err(MempoolError::Conflict("descendant-size-limit"));
    }
    Ok(())
}

/// Sums the fee of every resolved input, erroring if any input is
/// missing from `resolved` (the caller already checked every input
/// resolves to the chain UTXO set or another mempool entry).
pub fn compute_fee(
    tx: &Transaction,
    resolved: &HashMap<transparent::OutPoint, Amount<NegativeAllowed>>,
) -> Result<Amount<NegativeAllowed>, MempoolError> {
    let mut input_total = Amount::<NegativeAllowed>::zero();
    for input in spent_outpoints(tx) {
        let value = resolved
            .get(&input)
            .copied()
            .ok_or(MempoolError::MissingInput)?;
        input_total = (input_total + value).map_err(|_| MempoolError::MissingInput)?;
    }

    let mut output_total = Amount::<NegativeAllowed>::zero();
    for output in &tx.outputs {
        let value = output
            .value
            .constrain()
            .map_err(|_| MempoolError::MissingInput)?;
        output_total = (output_total + value).map_err(|_| MempoolError::MissingInput)?;
    }

    (input_total - output_total).map_err(|_| MempoolError::MissingInput)
}
