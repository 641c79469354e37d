use std::io;

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    block,
    serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError},
};

/// A transaction's `nLockTime` field, either a block height below which the
/// transaction cannot be mined, or a Unix timestamp before which it cannot be
/// mined.
///
/// Encoded on the wire as a single `u32`: values below `Height::LOCKTIME_THRESHOLD`
/// (500,000,000) are block heights, values at or above it are Unix timestamps.
/// A locktime of zero means "no lock", and transactions with it are valid in
/// any block.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LockTime {
    /// The transaction may be mined starting at this height (inclusive).
    Height(block::Height),
    /// The transaction may be mined starting at this time (inclusive).
    Time(DateTime<Utc>),
}

impl LockTime {
    /// The smallest Unix timestamp representable by a `LockTime::Time`: the
    /// first value at or above `Height::LOCKTIME_THRESHOLD`.
    pub const MIN_TIMESTAMP: u32 = block::Height::LOCKTIME_THRESHOLD.0;

    /// The largest Unix timestamp a `u32` nLockTime can encode.
    pub const MAX_TIMESTAMP: u32 = u32::MAX;

    /// Returns the `LockTime` that places no restriction on when a
    /// transaction may be mined.
    pub fn unlocked() -> Self {
        LockTime::Height(block::Height(0))
    }

    fn to_u32(self) -> u32 {
        match self {
            LockTime::Height(height) => height.0,
            LockTime::Time(time) => time.timestamp() as u32,
        }
    }
}

impl BitcoinSerialize for LockTime {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.to_u32().bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for LockTime {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        let raw = u32::bitcoin_deserialize(reader)?;
        if raw < LockTime::MIN_TIMESTAMP {
            Ok(LockTime::Height(block::Height(raw)))
        } else {
            Ok(LockTime::Time(Utc.timestamp(raw as i64, 0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u32() {
        let mut buf = Vec::new();
        let height = LockTime::Height(block::Height(500));
        height.bitcoin_serialize(&mut buf).unwrap();
        assert_eq!(
            LockTime::bitcoin_deserialize(&buf[..]).unwrap(),
            height
        );

        let mut buf = Vec::new();
        let time = LockTime::Time(Utc.timestamp(1_600_000_000, 0));
        time.bitcoin_serialize(&mut buf).unwrap();
        assert_eq!(LockTime::bitcoin_deserialize(&buf[..]).unwrap(), time);
    }
}
