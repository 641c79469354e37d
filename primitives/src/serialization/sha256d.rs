//! Bitcoin's double-SHA256 hash, and an incremental `Write` sink that
//! computes it without buffering the input.

use sha2::{Digest, Sha256};

/// An incremental double-SHA256 hasher.
///
/// Header and transaction hashing is on the hot path of block validation, so
/// callers write the serialized bytes directly into a `Writer` as they're
/// produced rather than allocating an intermediate buffer.
#[derive(Default, Clone)]
pub struct Writer(Sha256);

impl Writer {
    /// Consumes this writer, returning the double-SHA256 digest of everything
    /// written to it.
    pub fn finish(self) -> [u8; 32] {
        let first = self.0.finalize();
        let second = Sha256::digest(&first[..]);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        out
    }
}

impl std::io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Returns the double-SHA256 digest of `data`.
pub fn checksum(data: &[u8]) -> [u8; 32] {
    let mut writer = Writer::default();
    std::io::Write::write_all(&mut writer, data).expect("writing to a Writer never fails");
    writer.finish()
}

/// Returns the first four bytes of `sha256d(data)`, used as the payload
/// checksum in the P2P message header.
pub fn checksum4(data: &[u8]) -> [u8; 4] {
    let digest = checksum(data);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[0..4]);
    out
}

/// The first four bytes of a payload's double-SHA256 digest, as carried in
/// the P2P message header to detect corruption in transit.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Checksum(pub [u8; 4]);

impl<'a> From<&'a [u8]> for Checksum {
    fn from(data: &'a [u8]) -> Self {
        Checksum(checksum4(data))
    }
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Checksum").field(&hex::encode(self.0)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_two_rounds_of_sha256() {
        let expected = Sha256::digest(&Sha256::digest(b"hello")[..]);
        assert_eq!(checksum(b"hello").as_ref(), expected.as_slice());
    }

    #[test]
    fn checksum4_is_first_four_bytes_of_checksum() {
        let digest = checksum(b"some payload bytes");
        assert_eq!(checksum4(b"some payload bytes"), digest[0..4]);
    }

    #[test]
    fn writer_matches_one_shot_checksum() {
        let mut writer = Writer::default();
        std::io::Write::write_all(&mut writer, b"abc").unwrap();
        std::io::Write::write_all(&mut writer, b"def").unwrap();
        assert_eq!(writer.finish(), checksum(b"abcdef"));
    }
}
