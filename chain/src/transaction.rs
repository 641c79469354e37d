//! Transaction-level consensus checks and fee/value computation.

pub mod check;

use std::collections::HashMap;

use primitives::{
    amount::{Amount, NegativeAllowed},
    transaction::Transaction,
    transparent,
};

use crate::error::TransactionError;

/// Computes the value balance (inputs - outputs) for a non-coinbase
/// transaction, given the set of [`store::Utxo`]s its inputs spend.
///
/// A positive result is the fee paid by `tx`.
pub fn value_balance(
    tx: &Transaction,
    spent_utxos: &HashMap<transparent::OutPoint, store::Utxo>,
) -> Result<Amount<NegativeAllowed>, TransactionError> {
    let mut input_total = Amount::<NegativeAllowed>::zero();
    for input in &tx.inputs {
        if let transparent::Input::PrevOut { outpoint, .. } = input {
            let utxo = spent_utxos
                .get(outpoint)
                .ok_or(TransactionError::MissingInput(*outpoint))?;
            input_total = (input_total
                + utxo.output.value.constrain().map_err(TransactionError::Amount)?)
            .map_err(TransactionError::Amount)?;
        }
    }

    let mut output_total = Amount::<NegativeAllowed>::zero();
    for output in &tx.outputs {
        output_total = (output_total
            + output.value.constrain().map_err(TransactionError::Amount)?)
        .map_err(TransactionError::Amount)?;
    }

    (input_total - output_total).map_err(TransactionError::Amount)
}
