use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use std::io;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// The height of a block, i.e. the number of blocks in the chain below it,
/// with the genesis block at height 0.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Height(pub u32);

impl Height {
    /// The minimum possible height, the height of the genesis block.
    pub const MIN: Height = Height(0);

    /// The maximum possible height that a coinbase height field (serialized
    /// per BIP 34, a `CompactInt`-prefixed little-endian integer) can encode
    /// in its reserved 4 bytes.
    pub const MAX: Height = Height(u32::MAX - 1);

    /// The maximum height that can be used as a `LockTime::Height`: heights
    /// at or above `LOCKTIME_THRESHOLD` are interpreted as Unix timestamps
    /// instead, per Bitcoin's `nLockTime` convention.
    pub const LOCKTIME_THRESHOLD: Height = Height(500_000_000);
}

impl std::ops::Add<u32> for Height {
    type Output = Option<Height>;

    fn add(self, rhs: u32) -> Option<Height> {
        self.0.checked_add(rhs).map(Height)
    }
}

impl std::ops::Sub<u32> for Height {
    type Output = Option<Height>;

    fn sub(self, rhs: u32) -> Option<Height> {
        self.0.checked_sub(rhs).map(Height)
    }
}

impl BitcoinSerialize for Height {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Height {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Height(u32::bitcoin_deserialize(reader)?))
    }
}
