//! Contains impls of `BitcoinSerialize`/`BitcoinDeserialize` for all of the
//! transaction types, so that all of the serialization logic is in one place.

use std::{io, sync::Arc};

use crate::compactint::CompactInt;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The maximum size of a transaction (excluding the witness) in bytes.
pub const MAX_TX_SIZE: u64 = 1_000_000;

use super::*;
use crate::transparent::{self, serialize::{read_witness_stack, write_witness_stack}};

/// The marker/flag pair that precedes a BIP 141 extended (witness-carrying)
/// transaction encoding. A legacy transaction's input count can never be
/// zero (every transaction has at least one input), so a leading zero byte
/// unambiguously signals the witness encoding.
const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

/// Deserializes a transaction, calculating and caching its TxID.
///
/// Transparently handles both the legacy encoding and the BIP 141 extended
/// encoding (marker `0x00`, flag `0x01`, followed by a witness stack per
/// input after the output list).
impl BitcoinDeserialize for Transaction {
    fn bitcoin_deserialize<R: std::io::Read>(src: R) -> Result<Self, SerializationError> {
        // Put a sanity limit of 1 MB (a whole block) on the size of transaction to protect against DOS attacks
        let mut src = src.take(MAX_TX_SIZE);
        let version = i32::bitcoin_deserialize(&mut src)?;

        let mut marker = [0u8; 1];
        src.read_exact(&mut marker)?;
        let is_segwit = marker[0] == SEGWIT_MARKER;

        let (mut inputs, outputs) = if is_segwit {
            let mut flag = [0u8; 1];
            src.read_exact(&mut flag)?;
            if flag[0] != SEGWIT_FLAG {
                return Err(SerializationError::Parse(
                    "unsupported segwit flag byte",
                ));
            }
            let inputs = <Vec<transparent::Input>>::bitcoin_deserialize(&mut src)?;
            let outputs = <Vec<transparent::Output>>::bitcoin_deserialize(&mut src)?;
            (inputs, outputs)
        } else {
            // `marker` was actually the first byte of a `CompactInt` input count.
            let mut prefixed = std::io::Cursor::new(marker).chain(&mut src);
            let input_count = CompactInt::bitcoin_deserialize(&mut prefixed)?.value();
            let mut inputs = Vec::with_capacity(input_count as usize);
            for _ in 0..input_count {
                inputs.push(transparent::Input::bitcoin_deserialize(&mut prefixed)?);
            }
            let outputs = <Vec<transparent::Output>>::bitcoin_deserialize(&mut prefixed)?;
            (inputs, outputs)
        };

        if is_segwit {
            for input in inputs.iter_mut() {
                let stack = read_witness_stack(&mut src)?;
                match input {
                    transparent::Input::PrevOut { witness, .. } => *witness = stack,
                    transparent::Input::Coinbase { witness, .. } => *witness = stack,
                }
            }
        }

        let locktime = LockTime::bitcoin_deserialize(&mut src)?;
        let hash = Cached::new();
        let mut tx = Transaction {
            version,
            inputs,
            outputs,
            locktime,
            hash,
        };
        // Calculate and cache the TxID. The TxID always uses the legacy,
        // non-witness serialization, so this is correct whether or not the
        // transaction we just parsed carried witness data.
        let own_hash = tx.hash();
        tx.hash = Cached::from(own_hash);
        Ok(tx)
    }
}

impl Transaction {
    /// Returns `true` if any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| input.has_witness())
    }

    /// Computes this transaction's witness transaction ID (wtxid, BIP 141).
    ///
    /// For a transaction with no witness data, `wtxid() == hash()`, per
    /// BIP 141: legacy transactions don't gain a second identity.
    pub fn wtxid(&self) -> Hash {
        if !self.has_witness() {
            return self.hash();
        }

        let mut writer = crate::serialization::sha256d::Writer::default();
        self.version
            .bitcoin_serialize(&mut writer)
            .expect("Writer is infallible");
        io::Write::write_all(&mut writer, &[SEGWIT_MARKER, SEGWIT_FLAG])
            .expect("Writer is infallible");
        self.inputs
            .bitcoin_serialize(&mut writer)
            .expect("Writer is infallible");
        self.outputs
            .bitcoin_serialize(&mut writer)
            .expect("Writer is infallible");
        for input in &self.inputs {
            write_witness_stack(input.witness(), &mut writer).expect("Writer is infallible");
        }
        self.locktime
            .bitcoin_serialize(&mut writer)
            .expect("Writer is infallible");
        Hash(writer.finish())
    }
}

impl<T> BitcoinDeserialize for Arc<T>
where
    T: BitcoinDeserialize,
{
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Arc::new(T::bitcoin_deserialize(reader)?))
    }
}

impl<T> BitcoinSerialize for Arc<T>
where
    T: BitcoinSerialize,
{
    fn bitcoin_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        T::bitcoin_serialize(self, writer)
    }
}
