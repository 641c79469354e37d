//! Protocol-level constants for the P2P wire format.

use crate::protocol::external::types::ProtocolVersion;

/// The protocol version advertised by this node in its own `version` message.
///
/// 70016 is the version that introduced `wtxid`-based transaction relay
/// (BIP 339); we advertise it so peers know we understand SegWit inventory.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion(70016);

/// The lowest protocol version we will accept from a peer.
pub const MIN_PEER_VERSION: ProtocolVersion = ProtocolVersion(31800);

/// The user agent string this node advertises.
pub const USER_AGENT: &str = "/crate-node:1.0.0/";

/// The maximum number of headers returned in a single `headers` message.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2_000;

/// The maximum number of block hashes returned in a single `inv` message.
pub const MAX_INV_PER_MESSAGE: usize = 50_000;

/// How often we send a `ping` to an idle peer.
pub const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(120);

/// How long we wait for a peer to complete the version/verack handshake.
pub const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
