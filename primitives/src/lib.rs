//! Core Bitcoin data structures: blocks, transactions, amounts, and their
//! serialization formats.
//!
//! This crate has no consensus-rule logic; it only defines the shapes of
//! the data and how to read/write them on the wire. Consensus rules live
//! in `chain`.

#[macro_use]
extern crate serde;

pub mod amount;
pub mod block;
pub mod cached;
pub mod compactint;
pub mod fmt;
pub mod parameters;
pub mod serialization;
pub mod transaction;
pub mod transparent;
pub mod work;

pub use serialization::{BitcoinDeserialize, BitcoinDeserializeInto, BitcoinSerialize, SerializationError};

use parameters::Network;

/// Chain context used to generate arbitrary but consensus-plausible test
/// data (blocks, transactions) via `proptest`.
///
/// Strategies that build a `Transaction` or `Block` need to know whether
/// they're standing in for the first transaction in a block (a coinbase),
/// and what network/height they're pretending to be mined at, since some
/// encodings (e.g. BIP 34 coinbase height) depend on it.
#[cfg(any(test, feature = "proptest-impl"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerState {
    /// The height of the block immediately preceding the ones to be generated.
    pub tip_height: block::Height,
    /// The network to generate blocks/transactions for.
    pub network: Network,
    /// Whether the next transaction generated should be a coinbase.
    pub is_coinbase: bool,
}

#[cfg(any(test, feature = "proptest-impl"))]
impl LedgerState {
    pub fn genesis_strategy(network: Network) -> Self {
        LedgerState {
            tip_height: block::Height(0),
            network,
            is_coinbase: true,
        }
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl Default for LedgerState {
    fn default() -> Self {
        LedgerState::genesis_strategy(Network::Mainnet)
    }
}
