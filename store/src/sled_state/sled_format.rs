//! Bridges the `primitives` wire format to sled's `IVec` key/value
//! encoding.
//!
//! Keys are serialized so that sled's lexicographic ordering matches the
//! numeric/chronological ordering we want (`hash_by_height` iterates in
//! height order, for example): heights are written big-endian so that
//! byte-order comparison agrees with integer comparison.

use std::sync::Arc;

use primitives::{
    block::{self, Block},
    transaction::Transaction,
    transparent, BitcoinDeserialize, BitcoinSerialize,
};

use crate::{BoxError, Utxo};

/// Serializes `Self` into the raw bytes stored as a sled key or value.
pub trait SledSerialize {
    fn zs_insert<K: Into<sled::IVec>, V: AsSledValue>(
        &self,
        key: K,
        value: V,
    ) -> Result<(), BoxError>;

    fn zs_get<K: Into<sled::IVec>, V: FromSled>(&self, key: K) -> Result<Option<V>, BoxError>;

    fn zs_delete<K: Into<sled::IVec>>(&self, key: K) -> Result<(), BoxError>;
}

/// A value that can be turned into sled value bytes.
pub trait AsSledValue {
    fn as_sled_value(&self) -> Result<Vec<u8>, BoxError>;
}

/// A value that can be parsed back out of sled value bytes.
pub trait FromSled: Sized {
    fn from_sled(bytes: sled::IVec) -> Result<Self, BoxError>;
}

impl SledSerialize for sled::Tree {
    fn zs_insert<K: Into<sled::IVec>, V: AsSledValue>(
        &self,
        key: K,
        value: V,
    ) -> Result<(), BoxError> {
        self.insert(key.into(), value.as_sled_value()?)?;
        Ok(())
    }

    fn zs_get<K: Into<sled::IVec>, V: FromSled>(&self, key: K) -> Result<Option<V>, BoxError> {
        self.get(key.into())?.map(V::from_sled).transpose()
    }

    fn zs_delete<K: Into<sled::IVec>>(&self, key: K) -> Result<(), BoxError> {
        self.remove(key.into())?;
        Ok(())
    }
}

/// A shared trait bridging our `IVec` conversions to keys used from both
/// `sled::Tree` directly and `sled::Batch`.
pub trait SledDeserialize {
    fn from_ivec(bytes: sled::IVec) -> Result<Self, BoxError>
    where
        Self: Sized;
}

macro_rules! bitcoin_sled_value {
    ($ty:ty) => {
        impl AsSledValue for $ty {
            fn as_sled_value(&self) -> Result<Vec<u8>, BoxError> {
                let mut bytes = Vec::new();
                self.bitcoin_serialize(&mut bytes)?;
                Ok(bytes)
            }
        }

        impl AsSledValue for &$ty {
            fn as_sled_value(&self) -> Result<Vec<u8>, BoxError> {
                (*self).as_sled_value()
            }
        }

        impl FromSled for $ty {
            fn from_sled(bytes: sled::IVec) -> Result<Self, BoxError> {
                Ok(<$ty>::bitcoin_deserialize(&bytes[..])?)
            }
        }

        impl SledDeserialize for $ty {
            fn from_ivec(bytes: sled::IVec) -> Result<Self, BoxError> {
                <$ty as FromSled>::from_sled(bytes)
            }
        }

        impl From<$ty> for sled::IVec {
            fn from(value: $ty) -> Self {
                let mut bytes = Vec::new();
                value
                    .bitcoin_serialize(&mut bytes)
                    .expect("in-memory serialization is infallible");
                sled::IVec::from(bytes)
            }
        }
    };
}

bitcoin_sled_value!(block::Hash);
bitcoin_sled_value!(transaction::Hash);
bitcoin_sled_value!(transparent::OutPoint);

impl block::Height {
    /// Big-endian so byte-order comparison of keys matches height order.
    pub fn to_ivec(self) -> sled::IVec {
        sled::IVec::from(&self.0.to_be_bytes()[..])
    }

    pub fn from_ivec(bytes: sled::IVec) -> Result<Self, BoxError> {
        let mut array = [0u8; 4];
        array.copy_from_slice(&bytes[..4]);
        Ok(block::Height(u32::from_be_bytes(array)))
    }
}

impl From<block::Height> for sled::IVec {
    fn from(height: block::Height) -> Self {
        height.to_ivec()
    }
}

impl AsSledValue for block::Height {
    fn as_sled_value(&self) -> Result<Vec<u8>, BoxError> {
        Ok(self.0.to_be_bytes().to_vec())
    }
}

impl FromSled for block::Height {
    fn from_sled(bytes: sled::IVec) -> Result<Self, BoxError> {
        block::Height::from_ivec(bytes)
    }
}

impl AsSledValue for Block {
    fn as_sled_value(&self) -> Result<Vec<u8>, BoxError> {
        let mut bytes = Vec::new();
        self.bitcoin_serialize(&mut bytes)?;
        Ok(bytes)
    }
}

impl FromSled for Arc<Block> {
    fn from_sled(bytes: sled::IVec) -> Result<Self, BoxError> {
        let mut buf = bytes::BytesMut::from(&bytes[..]);
        Ok(Arc::new(Block::deserialize_from_buf(&mut buf)?))
    }
}

impl AsSledValue for Transaction {
    fn as_sled_value(&self) -> Result<Vec<u8>, BoxError> {
        let mut bytes = Vec::new();
        self.bitcoin_serialize(&mut bytes)?;
        Ok(bytes)
    }
}

impl FromSled for Transaction {
    fn from_sled(bytes: sled::IVec) -> Result<Self, BoxError> {
        Ok(Transaction::bitcoin_deserialize(&bytes[..])?)
    }
}

impl AsSledValue for transparent::Output {
    fn as_sled_value(&self) -> Result<Vec<u8>, BoxError> {
        let mut bytes = Vec::new();
        self.bitcoin_serialize(&mut bytes)?;
        Ok(bytes)
    }
}

impl FromSled for transparent::Output {
    fn from_sled(bytes: sled::IVec) -> Result<Self, BoxError> {
        Ok(transparent::Output::bitcoin_deserialize(&bytes[..])?)
    }
}

impl AsSledValue for () {
    fn as_sled_value(&self) -> Result<Vec<u8>, BoxError> {
        Ok(Vec::new())
    }
}

impl FromSled for () {
    fn from_sled(_bytes: sled::IVec) -> Result<Self, BoxError> {
        Ok(())
    }
}

impl AsSledValue for Utxo {
    fn as_sled_value(&self) -> Result<Vec<u8>, BoxError> {
        let mut bytes = Vec::new();
        self.output.bitcoin_serialize(&mut bytes)?;
        bytes.extend_from_slice(&self.height.0.to_le_bytes());
        bytes.push(self.from_coinbase as u8);
        Ok(bytes)
    }
}

impl FromSled for Utxo {
    fn from_sled(bytes: sled::IVec) -> Result<Self, BoxError> {
        let tail = bytes.len() - 5;
        let output = transparent::Output::bitcoin_deserialize(&bytes[..tail])?;
        let mut height_bytes = [0u8; 4];
        height_bytes.copy_from_slice(&bytes[tail..tail + 4]);
        let height = block::Height(u32::from_le_bytes(height_bytes));
        let from_coinbase = bytes[tail + 4] != 0;
        Ok(Utxo {
            output,
            height,
            from_coinbase,
        })
    }
}
