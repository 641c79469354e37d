//! Transaction checks.
//!
//! Code in this file can freely assume that no pre-V4 transactions are present.

use chrono::{DateTime, Utc};

use primitives::{
    block,
    transaction::{LockTime, Transaction},
    transparent,
};

use crate::error::TransactionError;

/// Checks that the transaction has at least one input and one output.
pub fn has_inputs_and_outputs(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() {
        Err(TransactionError::NoInputs)
    } else if tx.outputs.is_empty() {
        Err(TransactionError::NoOutputs)
    } else {
        Ok(())
    }
}

/// Checks that `tx` is final at `height`/`time` (§4.2): a transaction whose
/// every input signals `SEQUENCE_FINAL` is always final regardless of its
/// locktime; otherwise its locktime must already have passed, interpreted
/// as a block height or a Unix timestamp depending on which range it falls
/// in (`LockTime`'s own threshold split).
pub fn is_final(
    tx: &Transaction,
    height: block::Height,
    time: DateTime<Utc>,
) -> Result<(), TransactionError> {
    const SEQUENCE_FINAL: u32 = 0xffff_ffff;

    let locktime_passed = match tx.locktime {
        LockTime::Height(lock_height) => lock_height < height,
        LockTime::Time(lock_time) => lock_time < time,
    };
    if locktime_passed {
        return Ok(());
    }

    let all_final = tx.inputs.iter().all(|input| match input {
        transparent::Input::PrevOut { sequence, .. } => *sequence == SEQUENCE_FINAL,
        transparent::Input::Coinbase { sequence, .. } => *sequence == SEQUENCE_FINAL,
    });
    if all_final {
        return Ok(());
    }

    Err(TransactionError::NotFinal)
}

/// Checks that the transaction does not spend the same outpoint twice.
pub fn has_no_duplicate_inputs(tx: &Transaction) -> Result<(), TransactionError> {
    use std::collections::HashSet;

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if let primitives::transparent::Input::PrevOut { outpoint, .. } = input {
            if !seen.insert(outpoint) {
                return Err(TransactionError::DuplicateInput);
            }
        }
    }
    Ok(())
}
