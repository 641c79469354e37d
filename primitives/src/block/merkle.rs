//! The transaction Merkle tree committed to by a block header.

use std::{fmt, io, iter::FromIterator};

use crate::{
    serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError},
    transaction,
};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// The root of a block's transaction Merkle tree.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Root(pub [u8; 32]);

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(&reversed_bytes))
            .finish()
    }
}

impl BitcoinSerialize for Root {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Root {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::bitcoin_deserialize(reader)?))
    }
}

/// Combines a pair of child hashes into their parent, per Bitcoin's Merkle
/// tree construction: `sha256d(left || right)`.
fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut writer = sha256d::Writer::default();
    std::io::Write::write_all(&mut writer, &left[..]).expect("Writer is infallible");
    std::io::Write::write_all(&mut writer, &right[..]).expect("Writer is infallible");
    writer.finish()
}

/// Builds a Merkle root from a list of transaction hashes, treated as
/// already being in block order.
///
/// If a level of the tree has an odd number of nodes, the last node is
/// duplicated to pair with itself, following Bitcoin's (CVE-2012-2459-prone)
/// convention.
impl FromIterator<transaction::Hash> for Root {
    fn from_iter<T: IntoIterator<Item = transaction::Hash>>(iter: T) -> Self {
        let mut layer: Vec<[u8; 32]> = iter.into_iter().map(|hash| hash.0).collect();

        if layer.is_empty() {
            return Root([0; 32]);
        }

        while layer.len() > 1 {
            if layer.len() % 2 == 1 {
                let last = *layer.last().expect("layer is non-empty");
                layer.push(last);
            }
            layer = layer
                .chunks_exact(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
        }

        Root(layer[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_root_is_the_leaf_hash() {
        let hash = transaction::Hash([7; 32]);
        let root = Root::from_iter(vec![hash]);
        assert_eq!(root.0, hash.0);
    }

    #[test]
    fn odd_leaf_count_duplicates_last_leaf() {
        let a = transaction::Hash([1; 32]);
        let b = transaction::Hash([2; 32]);
        let c = transaction::Hash([3; 32]);

        let root = Root::from_iter(vec![a, b, c]);
        let expected = hash_pair(&hash_pair(&a.0, &b.0), &hash_pair(&c.0, &c.0));
        assert_eq!(root.0, expected);
    }
}
