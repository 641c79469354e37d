//! Small wire types shared across several P2P messages.

use std::io;

use btc_serde_derive::{BtcDeserialize, BtcSerialize};
use primitives::{parameters::Network, BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The magic bytes that prefix every message, identifying which network it
/// belongs to. Peers on one network silently ignore messages carrying
/// another network's magic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Magic(pub [u8; 4]);

impl From<Network> for Magic {
    fn from(network: Network) -> Magic {
        match network {
            Network::Mainnet => Magic([0xf9, 0xbe, 0xb4, 0xd9]),
            Network::Testnet => Magic([0x0b, 0x11, 0x09, 0x07]),
            Network::Regtest => Magic([0xfa, 0xbf, 0xb5, 0xda]),
            Network::Signet => Magic([0x0a, 0x03, 0xcf, 0x40]),
        }
    }
}

impl BitcoinSerialize for Magic {
    fn bitcoin_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(writer)
    }
}

impl BitcoinDeserialize for Magic {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Magic(<[u8; 4]>::bitcoin_deserialize(reader)?))
    }
}

/// The P2P protocol version advertised in a `version` message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, BtcSerialize, BtcDeserialize)]
pub struct ProtocolVersion(pub u32);

impl From<u32> for ProtocolVersion {
    fn from(v: u32) -> Self {
        ProtocolVersion(v)
    }
}

/// A random nonce used to detect self-connections, and to pair `ping`/`pong`
/// messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, BtcSerialize, BtcDeserialize)]
pub struct Nonce(pub u64);

impl Nonce {
    pub fn random() -> Nonce {
        use rand::RngCore;
        Nonce(rand::thread_rng().next_u64())
    }
}

/// A BIP 37 bloom filter, as raw bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Filter(pub Vec<u8>);

impl BitcoinSerialize for Filter {
    fn bitcoin_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(writer)
    }
}

impl BitcoinDeserialize for Filter {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Filter(Vec::bitcoin_deserialize(reader)?))
    }
}

/// A random value mixed into a BIP 37 bloom filter's hash seeds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BtcSerialize, BtcDeserialize)]
pub struct Tweak(pub u32);

bitflags::bitflags! {
    /// Services advertised by a peer in its `version` message, and used to
    /// describe peers in `addr`/gossip data.
    #[derive(Default)]
    pub struct PeerServices: u64 {
        /// Full node: can serve the complete block chain.
        const NODE_NETWORK = 0x1;
        /// Can be asked for bloom-filtered blocks and transactions (BIP 111).
        const NODE_BLOOM = 0x4;
        /// Serves the last 288 blocks only (pruned node, BIP 159).
        const NODE_NETWORK_LIMITED = 0x400;
    }
}

impl BitcoinSerialize for PeerServices {
    fn bitcoin_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.bits().bitcoin_serialize(writer)
    }
}

impl BitcoinDeserialize for PeerServices {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        let bits = u64::bitcoin_deserialize(reader)?;
        Ok(PeerServices::from_bits_truncate(bits))
    }
}
