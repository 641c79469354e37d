//! Raw-byte wire fixtures used to exercise deserialization without needing
//! to construct a fully valid chain.

/// An 80-byte block header: version 1, genesis-style zeroed prev hash and
/// merkle root, Unix epoch timestamp 1231006505, and mainnet's genesis
/// difficulty/nonce.
pub const DUMMY_HEADER: &[u8] = b"\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x29\xab\x5f\x49\xff\xff\x00\x1d\x1d\xac\x2b\x7c";

/// A single transparent output: 50 BTC to a P2PKH script.
pub const DUMMY_OUTPUT1: &[u8] = b"\x00\xf2\x05\x2a\x01\x00\x00\x00\x19\x76\xa9\x14\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\x88\xac";

/// A single `PrevOut` input spending output 0 of a dummy (non-null) txid.
pub const DUMMY_INPUT1: &[u8] = b"\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x00\x00\x00\x00\x01\x00\xff\xff\xff\xff";

/// A complete one-input, one-output, legacy (non-SegWit) transaction, built
/// from [`DUMMY_INPUT1`] and [`DUMMY_OUTPUT1`].
pub const DUMMY_TX1: &[u8] = b"\x01\x00\x00\x00\x01\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x00\x00\x00\x00\x01\x00\xff\xff\xff\xff\x01\x00\xf2\x05\x2a\x01\x00\x00\x00\x19\x76\xa9\x14\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\xab\x88\xac\x00\x00\x00\x00";
