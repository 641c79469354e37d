//! The 12-byte ASCII command string that identifies a message's type on the wire.

use std::{fmt, io};

use primitives::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A P2P message command, corresponding to one `Message` variant.
///
/// On the wire this is a fixed 12-byte, NUL-padded ASCII string. We parse it
/// into this enum as soon as we read the header, so the rest of the codec
/// never has to compare byte strings.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum Command {
    Addr,
    Alert,
    Block,
    BlockTxn,
    CmpctBlock,
    FeeFilter,
    FilterAdd,
    FilterClear,
    FilterLoad,
    GetAddr,
    GetBlockTxn,
    GetBlocks,
    GetData,
    GetHeaders,
    Headers,
    Inv,
    MemPool,
    MerkleBlock,
    NotFound,
    Ping,
    Pong,
    Reject,
    SendCmpct,
    SendHeaders,
    Tx,
    Verack,
    Version,
}

impl Command {
    /// The bare command string, without NUL padding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Addr => "addr",
            Command::Alert => "alert",
            Command::Block => "block",
            Command::BlockTxn => "blocktxn",
            Command::CmpctBlock => "cmpctblock",
            Command::FeeFilter => "feefilter",
            Command::FilterAdd => "filteradd",
            Command::FilterClear => "filterclear",
            Command::FilterLoad => "filterload",
            Command::GetAddr => "getaddr",
            Command::GetBlockTxn => "getblocktxn",
            Command::GetBlocks => "getblocks",
            Command::GetData => "getdata",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::Inv => "inv",
            Command::MemPool => "mempool",
            Command::MerkleBlock => "merkleblock",
            Command::NotFound => "notfound",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Reject => "reject",
            Command::SendCmpct => "sendcmpct",
            Command::SendHeaders => "sendheaders",
            Command::Tx => "tx",
            Command::Verack => "verack",
            Command::Version => "version",
        }
    }

    /// The 12-byte, NUL-padded wire encoding of this command.
    pub fn bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        let cmd = self.as_str().as_bytes();
        bytes[..cmd.len()].copy_from_slice(cmd);
        bytes
    }

    fn from_str(s: &str) -> Result<Command, SerializationError> {
        Ok(match s {
            "addr" => Command::Addr,
            "alert" => Command::Alert,
            "block" => Command::Block,
            "blocktxn" => Command::BlockTxn,
            "cmpctblock" => Command::CmpctBlock,
            "feefilter" => Command::FeeFilter,
            "filteradd" => Command::FilterAdd,
            "filterclear" => Command::FilterClear,
            "filterload" => Command::FilterLoad,
            "getaddr" => Command::GetAddr,
            "getblocktxn" => Command::GetBlockTxn,
            "getblocks" => Command::GetBlocks,
            "getdata" => Command::GetData,
            "getheaders" => Command::GetHeaders,
            "headers" => Command::Headers,
            "inv" => Command::Inv,
            "mempool" => Command::MemPool,
            "merkleblock" => Command::MerkleBlock,
            "notfound" => Command::NotFound,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "reject" => Command::Reject,
            "sendcmpct" => Command::SendCmpct,
            "sendheaders" => Command::SendHeaders,
            "tx" => Command::Tx,
            "verack" => Command::Verack,
            "version" => Command::Version,
            _ => return Err(SerializationError::Parse("unrecognized command string")),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BitcoinSerialize for Command {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        let mut bytes = [0u8; 12];
        let cmd = self.as_str().as_bytes();
        bytes[..cmd.len()].copy_from_slice(cmd);
        bytes.bitcoin_serialize(&mut writer)
    }
}

impl BitcoinDeserialize for Command {
    fn bitcoin_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        let bytes = <[u8; 12]>::bitcoin_deserialize(reader)?;
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(12);
        let s = std::str::from_utf8(&bytes[..len])
            .map_err(|_| SerializationError::Parse("non-ascii command string"))?;
        Command::from_str(s)
    }
}
