//! Constants shared between `Header`/`Block`'s own serialization impls.

/// The maximum size of a Bitcoin block, in bytes.
///
/// After SegWit, this includes the size of the Witness structure.
pub const MAX_BLOCK_BYTES: u64 = 4_000_000;
