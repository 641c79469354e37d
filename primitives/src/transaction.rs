//! Transactions and transaction-related structures.

use crate::BitcoinSerialize;
use crate::{cached::Cached, compactint::CompactInt};
use btc_serde_derive::BtcSerialize;
use serde::{Deserialize, Serialize};

mod hash;
mod lock_time;
mod serialize;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;
#[cfg(test)]
mod tests;

pub use hash::Hash;
pub use lock_time::LockTime;

use crate::transparent;

/// A Bitcoin transaction.
///
/// A transaction is an encoded data structure that facilitates the transfer of
/// value between two public key addresses. Everything is
/// designed to ensure that transactions can created, propagated on the network,
/// validated, and finally added to the global ledger of transactions (the
/// blockchain).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BtcSerialize)]
pub struct Transaction {
    /// The transaction version. Versions greater than 1 mean that BIP 68 applies
    pub version: i32,
    /// The transaction Inputs
    pub inputs: Vec<transparent::Input>,
    /// The transaction Outputs
    pub outputs: Vec<transparent::Output>,
    /// The transaction LockTime
    pub locktime: LockTime,
    hash: Cached<Hash>,
}

impl Transaction {
    pub fn new(
        version: i32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        locktime: LockTime,
    ) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            locktime,
            hash: Cached::new(),
        }
    }
    /// Get the hash of this transaction.
    pub fn hash(&self) -> Hash {
        // If we have a cached version, just return that
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        // Otherwise, serialize the tx to calculate and return the hash
        Hash::from(self)
    }

    pub fn contains_coinbase_input(&self) -> bool {
        self.inputs
            .iter()
            .any(|input| matches!(input, transparent::Input::Coinbase { .. }))
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && matches!(
                self.inputs.get(0),
                Some(transparent::Input::Coinbase { .. })
            )
    }
    /// Returns the serialized length (in bytes) of this transaction's
    /// legacy (non-witness) encoding: BIP 141's "base size".
    pub fn len(&self) -> usize {
        let mut size = 0;
        size += 4 + CompactInt::size(self.inputs.len());
        for input in self.inputs.iter() {
            size += input.len();
        }
        size += CompactInt::size(self.outputs.len());
        for output in self.outputs.iter() {
            size += output.len();
        }
        size + 4
    }

    /// Returns the serialized length (in bytes) of this transaction's
    /// witness data: the two-byte segwit marker/flag plus each input's
    /// witness stack, exactly as the BIP 141 extended encoding writes it.
    /// Zero for a transaction with no witness data.
    fn witness_len(&self) -> usize {
        if !self.has_witness() {
            return 0;
        }
        let mut size = 2; // marker + flag
        for input in &self.inputs {
            size += CompactInt::size(input.witness().len());
            for item in input.witness() {
                size += CompactInt::size(item.len()) + item.len();
            }
        }
        size
    }

    /// Returns this transaction's BIP 141 weight: `base_size * 3 +
    /// total_size`, where `total_size` includes witness data and
    /// `base_size` (`len()`) does not. A transaction with no witness data
    /// has `total_size == base_size`, so its weight is just `base_size * 4`.
    pub fn weight(&self) -> u64 {
        let base = self.len() as u64;
        base * 3 + base + self.witness_len() as u64
    }
}
