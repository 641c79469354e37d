//! The Bitcoin peer-to-peer wire protocol: message types, their binary
//! encoding, and peer address gossip.
//!
//! This crate only concerns itself with the *wire*: what bytes go on the
//! socket and how they map to typed messages. Peer lifecycle, connection
//! scheduling, and the address manager live in `pool`.

pub mod constants;
pub mod meta_addr;
pub mod protocol;

pub use meta_addr::MetaAddr;
pub use protocol::external::{Codec, InventoryHash, Message};
