//! Network-wide consensus parameters.

mod genesis;
mod network_upgrade;

pub use genesis::{genesis_hash, genesis_time, GENESIS_PREVIOUS_BLOCK_HASH};
pub use network_upgrade::{NetworkUpgrade, POW_AVERAGING_WINDOW};

use std::fmt;

/// An instance of the Bitcoin protocol, used to select genesis parameters,
/// soft-fork activation heights, and wire-protocol magic bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The long-running public test network.
    Testnet,
    /// A local, operator-controlled network with no proof-of-work difficulty
    /// and instantly mined blocks.
    ///
    /// Simnet nodes are modeled as a `Regtest` instance: both let an operator
    /// mine blocks on demand with trivial difficulty, and no known deployment
    /// distinguishes between them at the wire or consensus level.
    Regtest,
    /// A public test network that uses a federated signer rather than
    /// proof-of-work to produce blocks.
    Signet,
}

impl Network {
    /// Returns true if this is a network with no real economic value.
    pub fn is_test_network(&self) -> bool {
        !matches!(self, Network::Mainnet)
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl proptest::arbitrary::Arbitrary for Network {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        prop_oneof![
            Just(Network::Mainnet),
            Just(Network::Testnet),
            Just(Network::Regtest),
            Just(Network::Signet),
        ]
        .boxed()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "Mainnet",
            Network::Testnet => "Testnet",
            Network::Regtest => "Regtest",
            Network::Signet => "Signet",
        };
        f.write_str(name)
    }
}
