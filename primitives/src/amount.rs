//! Bitcoin amounts, denominated in satoshis, with compile-time sign
//! constraints.

use std::{
    convert::TryFrom,
    fmt,
    io,
    marker::PhantomData,
    ops::{Add, Neg, Sub},
};

use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The number of satoshis in one bitcoin.
pub const COIN: i64 = 100_000_000;

/// The maximum number of satoshis that will ever exist, 21 million BTC.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// An error that can occur when constructing or combining `Amount`s.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// input {value} is outside of valid range for amount, -{max_amount}..={max_amount}
    Contains { value: i64, max_amount: i64 },
    /// amount {0} plus {1} would overflow/underflow
    SumOverflow(i64, i64),
    /// amount {0} minus {1} would overflow/underflow
    DifferenceOverflow(i64, i64),
}

/// Marker type for `Amount<C>` indicating that the value must be non-negative.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NonNegative;

/// Marker type for `Amount<C>` indicating that any value in the valid range
/// is allowed, including negative amounts (used for fees/deltas).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NegativeAllowed;

/// A monetary amount, denominated in satoshis, bounded to `-MAX_MONEY..=MAX_MONEY`.
///
/// The phantom type parameter constrains the value further: `Amount<NonNegative>`
/// can only hold values in `0..=MAX_MONEY`, while `Amount<NegativeAllowed>`
/// can hold any value in the full range. This lets the type system distinguish
/// transaction output values (always non-negative) from fees or balance deltas
/// (which may be negative).
#[derive(Copy, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Amount<C = NegativeAllowed>(i64, PhantomData<C>);

impl<C> fmt::Debug for Amount<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Amount").field(&self.0).finish()
    }
}

impl<C> fmt::Display for Amount<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<C> PartialEq for Amount<C> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<C> Eq for Amount<C> {}

impl<C> PartialOrd for Amount<C> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}
impl<C> Ord for Amount<C> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}
impl<C> std::hash::Hash for Amount<C> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

/// Trait implemented by the two `Amount` constraint markers, describing
/// the valid range of values they permit.
pub trait Constraint {
    fn valid_range() -> std::ops::RangeInclusive<i64>;
}

impl Constraint for NonNegative {
    fn valid_range() -> std::ops::RangeInclusive<i64> {
        0..=MAX_MONEY
    }
}

impl Constraint for NegativeAllowed {
    fn valid_range() -> std::ops::RangeInclusive<i64> {
        -MAX_MONEY..=MAX_MONEY
    }
}

impl<C: Constraint> Amount<C> {
    /// Convenience constant for the zero amount.
    pub fn zero() -> Amount<C> {
        Amount(0, PhantomData)
    }

    /// Returns the value of this amount in satoshis.
    pub fn satoshis(&self) -> i64 {
        self.0
    }

    /// Widen this amount's constraint, e.g. from `NonNegative` to `NegativeAllowed`.
    pub fn constrain<C2: Constraint>(self) -> Result<Amount<C2>, Error> {
        Amount::try_from(self.0)
    }
}

impl<C: Constraint> TryFrom<i64> for Amount<C> {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if C::valid_range().contains(&value) {
            Ok(Amount(value, PhantomData))
        } else {
            Err(Error::Contains {
                value,
                max_amount: MAX_MONEY,
            })
        }
    }
}

impl<C: Constraint> TryFrom<u64> for Amount<C> {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Amount::try_from(i64::try_from(value).map_err(|_| Error::Contains {
            value: i64::MAX,
            max_amount: MAX_MONEY,
        })?)
    }
}

impl<C: Constraint> Add<Amount<C>> for Amount<C> {
    type Output = Result<Amount<C>, Error>;

    fn add(self, rhs: Amount<C>) -> Self::Output {
        let value = self
            .0
            .checked_add(rhs.0)
            .ok_or(Error::SumOverflow(self.0, rhs.0))?;
        Amount::try_from(value).map_err(|_| Error::SumOverflow(self.0, rhs.0))
    }
}

impl<C: Constraint> Sub<Amount<C>> for Amount<C> {
    type Output = Result<Amount<NegativeAllowed>, Error>;

    fn sub(self, rhs: Amount<C>) -> Self::Output {
        let value = self
            .0
            .checked_sub(rhs.0)
            .ok_or(Error::DifferenceOverflow(self.0, rhs.0))?;
        Amount::try_from(value).map_err(|_| Error::DifferenceOverflow(self.0, rhs.0))
    }
}

impl<C> Neg for Amount<C> {
    type Output = Amount<NegativeAllowed>;

    fn neg(self) -> Self::Output {
        Amount(-self.0, PhantomData)
    }
}

impl<C> BitcoinSerialize for Amount<C> {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(&mut writer)
    }
}

impl<C: Constraint> BitcoinDeserialize for Amount<C> {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let value = i64::bitcoin_deserialize(&mut reader)?;
        Amount::try_from(value).map_err(|_| SerializationError::Parse("amount out of range"))
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl<C: Constraint + std::fmt::Debug> proptest::arbitrary::Arbitrary for Amount<C> {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        C::valid_range()
            .prop_map(|v| Amount::try_from(v).expect("in valid range by construction"))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_zero_and_max() {
        assert!(Amount::<NonNegative>::try_from(0).is_ok());
        assert!(Amount::<NonNegative>::try_from(MAX_MONEY).is_ok());
        assert!(Amount::<NonNegative>::try_from(-1).is_err());
        assert!(Amount::<NonNegative>::try_from(MAX_MONEY + 1).is_err());
    }

    #[test]
    fn negative_allowed_permits_negatives() {
        assert!(Amount::<NegativeAllowed>::try_from(-5).is_ok());
    }

    #[test]
    fn addition_detects_overflow() {
        let max = Amount::<NonNegative>::try_from(MAX_MONEY).unwrap();
        let one = Amount::<NonNegative>::try_from(1).unwrap();
        assert!((max + one).is_err());
    }
}
