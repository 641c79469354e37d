//! The Bitcoin P2P wire protocol: messages, their wire encoding, and the
//! framing codec built on top of `tokio_util::codec`.

pub mod external;
