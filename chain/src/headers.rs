//! Header-only chain tracking for headers-first sync's `acceptHeader`
//! contract (§4.2), kept separate from [`crate::state::NonFinalizedState`]:
//! a header can and usually does arrive well before the block body that
//! fills it in, so this tree has to stand on its own without an
//! `Arc<Block>` to hang off each entry.
//!
//! Mirrors the arena shape of `state::NonFinalizedState` (§9): a flat table
//! keyed by hash, each entry pointing only at its parent, so the structure
//! can never contain a cycle. `service::Inner` advances this tree on every
//! `headers` message and only asks `NonFinalizedState` to do the expensive
//! (UTXO, script) work once a block's full body shows up.

use std::collections::{HashMap, HashSet};

use primitive_types::U256;

use primitives::{
    block::{self, Header, Height},
    parameters::Network,
    work::difficulty::{CompactDifficulty, ExpandedDifficulty},
};

use crate::error::BlockError;

/// The number of ancestor timestamps considered for the median-time-past
/// rule (§4.2: "timestamp strictly greater than the median of the previous
/// eleven ancestors' times").
const MEDIAN_TIME_SPAN: u32 = 11;

const RETARGET_INTERVAL: u32 = primitives::parameters::POW_AVERAGING_WINDOW as u32;

#[derive(Debug, Clone)]
struct HeaderEntry {
    header: Header,
    height: Height,
    parent_hash: block::Hash,
    cumulative_work: U256,
    sequence: u64,
}

/// The outcome of [`HeaderTree::accept`], matching §4.2's `acceptHeader`
/// return shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptHeaderOutcome {
    Accepted { height: Height },
    Duplicate,
    /// The header's parent hash is not known to this tree.
    Orphan,
    /// `hash` failed a consensus check and has been blacklisted; any header
    /// extending it will be rejected as `Invalid` too, without
    /// re-validation (§4.2: "failure is permanent").
    Invalid(BlockError),
}

/// The tree of headers learned from peers, genesis-rooted, independent of
/// which headers also have a downloaded block body.
#[derive(Debug)]
pub struct HeaderTree {
    network: Network,
    genesis_hash: block::Hash,
    entries: HashMap<block::Hash, HeaderEntry>,
    children: HashMap<block::Hash, Vec<block::Hash>>,
    /// Permanently rejected hashes (§4.2: "the hash is placed on an
    /// invalid-set and any chain extending it is rejected without
    /// re-validation").
    invalid: HashSet<block::Hash>,
    tip: (Height, block::Hash),
    next_sequence: u64,
}

impl HeaderTree {
    pub fn new(network: Network) -> Self {
        let genesis_hash = primitives::parameters::genesis_hash(network);
        HeaderTree {
            network,
            genesis_hash,
            entries: HashMap::new(),
            children: HashMap::new(),
            invalid: HashSet::new(),
            tip: (Height(0), genesis_hash),
            next_sequence: 0,
        }
    }

    /// Seeds the tip of this tree from an already-finalized chain tip, so
    /// that headers-first sync resumes from where `store`/`chain` left off
    /// across a restart instead of re-requesting from genesis.
    pub fn set_known_tip(&mut self, tip: (Height, block::Hash)) {
        if tip.0 .0 > self.tip.0 .0 {
            self.tip = tip;
        }
    }

    pub fn contains(&self, hash: &block::Hash) -> bool {
        *hash == self.genesis_hash || self.entries.contains_key(hash)
    }

    pub fn is_invalid(&self, hash: &block::Hash) -> bool {
        self.invalid.contains(hash)
    }

    pub fn tip(&self) -> (Height, block::Hash) {
        self.tip
    }

    fn work_and_height(&self, hash: &block::Hash) -> Option<(U256, Height)> {
        if *hash == self.genesis_hash {
            Some((U256::zero(), Height(0)))
        } else {
            self.entries.get(hash).map(|e| (e.cumulative_work, e.height))
        }
    }

    fn time(&self, hash: &block::Hash) -> Option<chrono::DateTime<chrono::Utc>> {
        if *hash == self.genesis_hash {
            Some(primitives::parameters::genesis_time(self.network))
        } else {
            self.entries.get(hash).map(|e| e.header.time)
        }
    }

    fn difficulty(&self, hash: &block::Hash) -> Option<CompactDifficulty> {
        if *hash == self.genesis_hash {
            Some(ExpandedDifficulty::target_difficulty_limit(self.network).to_compact())
        } else {
            self.entries.get(hash).map(|e| e.header.difficulty_threshold)
        }
    }

    fn nth_ancestor(&self, hash: &block::Hash, n: u32) -> Option<block::Hash> {
        let mut current = *hash;
        for _ in 0..n {
            if current == self.genesis_hash {
                return None;
            }
            current = self.entries.get(&current)?.parent_hash;
        }
        Some(current)
    }

    /// Returns the last `MEDIAN_TIME_SPAN` ancestor times ending at (and
    /// including) `hash`, oldest missing ancestors simply making the window
    /// shorter near genesis.
    fn median_time_past(&self, parent_hash: &block::Hash) -> chrono::DateTime<chrono::Utc> {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN as usize);
        let mut current = *parent_hash;
        for _ in 0..MEDIAN_TIME_SPAN {
            match self.time(&current) {
                Some(time) => times.push(time),
                None => break,
            }
            if current == self.genesis_hash {
                break;
            }
            current = match self.entries.get(&current) {
                Some(entry) => entry.parent_hash,
                None => break,
            };
        }
        times.sort();
        times[times.len() / 2]
    }

    fn expected_difficulty(
        &self,
        parent_hash: &block::Hash,
        height: Height,
    ) -> Result<CompactDifficulty, BlockError> {
        let parent_difficulty = self
            .difficulty(parent_hash)
            .expect("parent_hash was already resolved by the caller");

        if height.0 % RETARGET_INTERVAL != 0 {
            return Ok(parent_difficulty);
        }

        let window_start = self
            .nth_ancestor(parent_hash, RETARGET_INTERVAL - 1)
            .ok_or_else(|| BlockError::InvalidRetarget(height, block::Hash([0; 32])))?;

        let first_time = self
            .time(&window_start)
            .ok_or_else(|| BlockError::InvalidRetarget(height, block::Hash([0; 32])))?;
        let last_time = self
            .time(parent_hash)
            .ok_or_else(|| BlockError::InvalidRetarget(height, block::Hash([0; 32])))?;

        Ok(primitives::work::difficulty::calculate_next_difficulty(
            first_time,
            last_time,
            parent_difficulty,
            14 * 24 * 60 * 60,
            ExpandedDifficulty::target_difficulty_limit(self.network),
        ))
    }

    /// Runs §4.2's header acceptance checks, in order, and inserts `header`
    /// into the tree if they all pass.
    pub fn accept(&mut self, header: Header) -> AcceptHeaderOutcome {
        let hash = block::Hash::from(&header);

        if self.contains(&hash) {
            return AcceptHeaderOutcome::Duplicate;
        }
        if self.invalid.contains(&hash) {
            return AcceptHeaderOutcome::Invalid(BlockError::InvalidRetarget(Height(0), hash));
        }
        if self.invalid.contains(&header.previous_block_hash) {
            self.invalid.insert(hash);
            return AcceptHeaderOutcome::Invalid(BlockError::InvalidRetarget(Height(0), hash));
        }

        let (parent_work, parent_height) = match self.work_and_height(&header.previous_block_hash)
        {
            Some(pair) => pair,
            None => return AcceptHeaderOutcome::Orphan,
        };
        let height = Height(parent_height.0 + 1);

        if let Err(error) =
            crate::block::check::difficulty_is_valid(&header, self.network, &height, &hash)
        {
            self.invalid.insert(hash);
            return AcceptHeaderOutcome::Invalid(error);
        }

        let expected = match self.expected_difficulty(&header.previous_block_hash, height) {
            Ok(expected) => expected,
            Err(error) => {
                self.invalid.insert(hash);
                return AcceptHeaderOutcome::Invalid(error);
            }
        };
        let parent_time = self
            .time(&header.previous_block_hash)
            .expect("parent height resolved above implies parent time resolves too");
        let minimum_difficulty_override = primitives::parameters::NetworkUpgrade::is_testnet_min_difficulty_block(
            self.network,
            height,
            header.time,
            parent_time,
        );
        let expected = if minimum_difficulty_override {
            ExpandedDifficulty::target_difficulty_limit(self.network).to_compact()
        } else {
            expected
        };
        if header.difficulty_threshold.to_bits() != expected.to_bits() {
            let error = BlockError::InvalidRetarget(height, hash);
            self.invalid.insert(hash);
            return AcceptHeaderOutcome::Invalid(error);
        }

        let mtp = self.median_time_past(&header.previous_block_hash);
        if header.time <= mtp {
            let error = BlockError::TimeTooOld(header.time);
            self.invalid.insert(hash);
            return AcceptHeaderOutcome::Invalid(error);
        }

        if let Some((checkpoint_height, checkpoint_hash)) =
            crate::parameters::highest_checkpoint_below(self.network, height)
        {
            if checkpoint_height == height && checkpoint_hash != hash {
                let error = BlockError::CheckpointMismatch(height);
                self.invalid.insert(hash);
                return AcceptHeaderOutcome::Invalid(error);
            }
        }

        let work = match header.difficulty_threshold.to_work() {
            Some(work) => work,
            None => {
                let error = BlockError::InvalidDifficulty(height, hash);
                self.invalid.insert(hash);
                return AcceptHeaderOutcome::Invalid(error);
            }
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let parent_hash = header.previous_block_hash;
        self.entries.insert(
            hash,
            HeaderEntry {
                header,
                height,
                parent_hash,
                cumulative_work: parent_work + work,
                sequence,
            },
        );
        self.children.entry(parent_hash).or_default().push(hash);
        self.children.entry(hash).or_default();

        if height.0 > self.tip.0 .0 {
            self.tip = (height, hash);
        }

        AcceptHeaderOutcome::Accepted { height }
    }

    /// Builds a standard geometric locator (§4.2's `getLocator`) from the
    /// tip back toward genesis: the last 10 hashes, then hashes doubling
    /// their stride apart, ending at genesis.
    pub fn locator(&self) -> Vec<block::Hash> {
        let mut hashes = Vec::new();
        let mut current = self.tip.1;
        let mut step = 1u32;
        let mut collected = 0u32;
        loop {
            hashes.push(current);
            if current == self.genesis_hash {
                break;
            }
            if collected >= 10 {
                step *= 2;
            }
            match self.nth_ancestor(&current, step) {
                Some(ancestor) => current = ancestor,
                None => {
                    hashes.push(self.genesis_hash);
                    break;
                }
            }
            collected += 1;
        }
        hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_the_initial_tip() {
        let tree = HeaderTree::new(Network::Regtest);
        assert_eq!(tree.tip(), (Height(0), primitives::parameters::genesis_hash(Network::Regtest)));
    }

    #[test]
    fn unknown_parent_is_an_orphan() {
        let mut tree = HeaderTree::new(Network::Regtest);
        let header = Header::new(
            1,
            block::Hash([0xAB; 32]),
            primitives::block::merkle::Root([0; 32]),
            primitives::parameters::genesis_time(Network::Regtest) + chrono::Duration::seconds(1),
            ExpandedDifficulty::target_difficulty_limit(Network::Regtest).to_compact(),
            0,
        );
        assert_eq!(tree.accept(header), AcceptHeaderOutcome::Orphan);
    }
}
