//! Legacy (non-witness) wire serialization for transparent inputs and outputs.
//!
//! Witness stacks are not part of this encoding: BIP 141 moves them out of
//! the input list and into a separate section of the transaction, written
//! after all outputs. See `transaction::serialize`.

use std::io::{self, Read, Write};

use crate::{
    compactint::CompactInt, transaction, BitcoinDeserialize, BitcoinSerialize, SerializationError,
};

use super::{CoinbaseData, Input, OutPoint};

/// The `OutPoint` used by coinbase inputs: a null transaction hash and an
/// index of `0xffff_ffff`.
fn coinbase_outpoint() -> OutPoint {
    OutPoint {
        hash: transaction::Hash([0; 32]),
        index: u32::MAX,
    }
}

impl BitcoinSerialize for Input {
    fn bitcoin_serialize<W: Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
                ..
            } => {
                outpoint.bitcoin_serialize(&mut writer)?;
                unlock_script.bitcoin_serialize(&mut writer)?;
                sequence.bitcoin_serialize(&mut writer)?;
            }
            Input::Coinbase {
                data, sequence, ..
            } => {
                coinbase_outpoint().bitcoin_serialize(&mut writer)?;
                data.bitcoin_serialize(&mut writer)?;
                sequence.bitcoin_serialize(&mut writer)?;
            }
        }
        Ok(())
    }
}

impl BitcoinDeserialize for Input {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let outpoint = OutPoint::bitcoin_deserialize(&mut reader)?;
        let script_len = CompactInt::bitcoin_deserialize(&mut reader)?.value();
        let mut script_bytes = vec![0u8; script_len as usize];
        reader.read_exact(&mut script_bytes)?;
        let sequence = u32::bitcoin_deserialize(&mut reader)?;

        if outpoint.hash.0 == [0; 32] && outpoint.index == u32::MAX {
            Ok(Input::Coinbase {
                // BIP 34 height parsing from the coinbase script is left to
                // the consensus layer, which knows whether BIP 34 is active
                // at this height.
                height: None,
                data: CoinbaseData(script_bytes),
                sequence,
                witness: Vec::new(),
            })
        } else {
            use std::io::Cursor;
            let unlock_script = super::Script::bitcoin_deserialize(Cursor::new(script_bytes))?;
            Ok(Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
                witness: Vec::new(),
            })
        }
    }
}

/// Reads a single witness stack (a `CompactInt`-prefixed list of
/// `CompactInt`-prefixed byte strings) as used in the BIP 141 extended
/// transaction encoding.
pub fn read_witness_stack<R: Read>(mut reader: R) -> Result<Vec<Vec<u8>>, SerializationError> {
    let count = CompactInt::bitcoin_deserialize(&mut reader)?.value();
    let mut stack = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let item_len = CompactInt::bitcoin_deserialize(&mut reader)?.value();
        let mut item = vec![0u8; item_len as usize];
        reader.read_exact(&mut item)?;
        stack.push(item);
    }
    Ok(stack)
}

/// Writes a single witness stack in the BIP 141 extended transaction encoding.
pub fn write_witness_stack<W: Write>(stack: &[Vec<u8>], mut writer: W) -> Result<(), io::Error> {
    CompactInt::from(stack.len()).bitcoin_serialize(&mut writer)?;
    for item in stack {
        CompactInt::from(item.len()).bitcoin_serialize(&mut writer)?;
        writer.write_all(item)?;
    }
    Ok(())
}
