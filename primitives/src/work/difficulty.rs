//! `nBits`-encoded proof-of-work targets, and the difficulty-retarget
//! arithmetic that derives a new target every 2016 blocks.

use std::{cmp::Ordering, fmt};

use primitive_types::U256;

use crate::{parameters::Network, BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A proof-of-work target threshold, encoded as Bitcoin's compact "nBits"
/// representation: the top byte is a base-256 exponent, the bottom three
/// bytes are the mantissa.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct CompactDifficulty(u32);

/// A proof-of-work target threshold, expanded to a full 256-bit integer.
///
/// A block hash, read as a 256-bit little-endian integer, must be less than
/// or equal to the expanded difficulty threshold of its header.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ExpandedDifficulty(U256);

impl fmt::Debug for CompactDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompactDifficulty")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

impl fmt::Debug for ExpandedDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExpandedDifficulty")
            .field(&format_args!("{:#066x}", self.0))
            .finish()
    }
}

impl CompactDifficulty {
    /// The precision, in bits, of the compact representation's mantissa.
    const UNSIGNED_MANTISSA_MASK: u32 = 0x007f_ffff;
    const SIGN_BIT_MASK: u32 = 0x0080_0000;
    const EXPONENT_OFFSET: i32 = 3;

    /// Creates a `CompactDifficulty` from its raw wire encoding.
    pub fn from_bits(bits: u32) -> Self {
        CompactDifficulty(bits)
    }

    /// Returns the raw wire encoding of this threshold.
    pub fn to_bits(self) -> u32 {
        self.0
    }

    /// Expands this threshold to a 256-bit target.
    ///
    /// Returns `None` if the encoded value is negative or overflows a
    /// 256-bit unsigned integer, both of which make the header trivially
    /// invalid.
    pub fn to_expanded(self) -> Option<ExpandedDifficulty> {
        let bits = self.0;
        let mantissa = bits & Self::UNSIGNED_MANTISSA_MASK;
        let is_negative = bits & Self::SIGN_BIT_MASK != 0;
        let exponent = (bits >> 24) as i32;

        if is_negative || mantissa == 0 {
            return None;
        }

        let mantissa = U256::from(mantissa);
        let shift = exponent - Self::EXPONENT_OFFSET;

        let target = if shift <= 0 {
            mantissa >> ((-shift) * 8) as usize
        } else {
            if shift > 29 {
                // would overflow a 256-bit integer
                return None;
            }
            mantissa << (shift * 8) as usize
        };

        Some(ExpandedDifficulty(target))
    }

    /// Returns the approximate amount of work represented by a block with
    /// this difficulty threshold, used to pick the chain with the most
    /// cumulative proof of work.
    ///
    /// Defined as `2^256 / (target + 1)`, the expected number of hashes
    /// needed to produce a block hash under `target`.
    pub fn to_work(self) -> Option<U256> {
        let target = self.to_expanded()?.0;
        if target.is_zero() {
            return None;
        }
        // (!target / (target + 1)) + 1, avoiding the 2^256 overflow of the
        // textbook formula
        Some((!target / (target + 1)) + 1)
    }
}

impl ExpandedDifficulty {
    /// Creates an `ExpandedDifficulty` directly from a 256-bit target.
    pub fn from_u256(target: U256) -> Self {
        ExpandedDifficulty(target)
    }

    /// Returns the minimum difficulty (maximum target, "PoWLimit") allowed
    /// for any block on `network`.
    ///
    /// Mainnet and testnet share Bitcoin's historical PoWLimit of
    /// `0x1d00ffff`. Regtest and signet use much easier limits so that test
    /// blocks can be mined instantly.
    pub fn target_difficulty_limit(network: Network) -> ExpandedDifficulty {
        let bits = match network {
            Network::Mainnet | Network::Testnet => 0x1d00_ffff,
            Network::Regtest => 0x207f_ffff,
            Network::Signet => 0x1e00_377e,
        };
        CompactDifficulty::from_bits(bits)
            .to_expanded()
            .expect("network PoWLimit constants are always valid targets")
    }

    /// Returns the underlying 256-bit target.
    pub fn as_u256(self) -> U256 {
        self.0
    }

    /// Compacts this target back to its `nBits` wire encoding.
    ///
    /// Mirrors Bitcoin Core's `GetCompact`: `nSize` is the target's length in
    /// bytes, and the mantissa is its three most significant bytes.
    pub fn to_compact(self) -> CompactDifficulty {
        let target = self.0;
        let size = ((target.bits() + 7) / 8) as u32;

        let mut mantissa = if size <= 3 {
            (target.low_u32()) << (8 * (3 - size))
        } else {
            (target >> (8 * (size - 3)) as usize).low_u32()
        };

        let mut size = size;
        if mantissa & CompactDifficulty::SIGN_BIT_MASK != 0 {
            // the sign bit would be set by the mantissa alone: shift right
            // one more byte and bump the size to compensate
            mantissa >>= 8;
            size += 1;
        }
        CompactDifficulty(mantissa | (size << 24))
    }

    /// Clamps this target to `limit`, the network's maximum permitted
    /// (easiest) proof-of-work target.
    pub fn clamp(self, limit: ExpandedDifficulty) -> ExpandedDifficulty {
        if self.0 > limit.0 {
            limit
        } else {
            self
        }
    }
}

impl PartialOrd for ExpandedDifficulty {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExpandedDifficulty {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl BitcoinSerialize for CompactDifficulty {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for CompactDifficulty {
    fn bitcoin_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::bitcoin_deserialize(reader)?))
    }
}

/// Computes the next block's difficulty threshold, given the timestamps of
/// the first and last blocks of the just-finished 2016-block retarget
/// window and the threshold that applied over that window.
///
/// `powlimit` is the easiest target the network parameters allow; the
/// result is always clamped to it. Mirrors Bitcoin Core's
/// `CalculateNextWorkRequired`: the 2-week timespan is clamped to a factor
/// of 4 in either direction before being applied, bounding how fast
/// difficulty can swing between retargets.
pub fn calculate_next_difficulty(
    first_block_time: chrono::DateTime<chrono::Utc>,
    last_block_time: chrono::DateTime<chrono::Utc>,
    old_target: CompactDifficulty,
    target_timespan_seconds: i64,
    powlimit: ExpandedDifficulty,
) -> CompactDifficulty {
    let actual_timespan = (last_block_time - first_block_time).num_seconds();
    let actual_timespan = actual_timespan.clamp(
        target_timespan_seconds / 4,
        target_timespan_seconds * 4,
    );

    let old_target = old_target
        .to_expanded()
        .expect("stored difficulty thresholds are always valid");

    let new_target = (old_target.as_u256() * U256::from(actual_timespan as u64))
        / U256::from(target_timespan_seconds as u64);

    ExpandedDifficulty::from_u256(new_target)
        .clamp(powlimit)
        .to_compact()
}

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary {
    use proptest::prelude::*;

    use super::CompactDifficulty;

    impl Arbitrary for CompactDifficulty {
        type Parameters = ();

        fn arbitrary_with(_args: ()) -> Self::Strategy {
            // avoid generating bit patterns with the sign bit set, or a
            // zero mantissa, which don't round-trip through `to_expanded`
            (1u32..0x007f_ffff, 3u32..=32)
                .prop_map(|(mantissa, exponent)| CompactDifficulty(mantissa | (exponent << 24)))
                .boxed()
        }

        type Strategy = BoxedStrategy<Self>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_and_compacts_round_trip() {
        // 0x1d00ffff is Bitcoin mainnet's genesis difficulty
        let compact = CompactDifficulty::from_bits(0x1d00ffff);
        let expanded = compact.to_expanded().expect("valid difficulty bits");
        assert_eq!(expanded.to_compact().to_bits(), 0x1d00ffff);
    }

    #[test]
    fn rejects_negative_encoding() {
        let compact = CompactDifficulty::from_bits(0x0184_0000 | 0x0080_0000);
        assert!(compact.to_expanded().is_none());
    }
}
