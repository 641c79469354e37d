//! The non-finalized state: an in-memory tree of candidate chains sitting on
//! top of the finalized tip held by [`store`].
//!
//! Blocks are kept in a flat arena (ยง9) keyed by hash, with each entry
//! pointing only at its parent's hash; this avoids the cyclic `Arc`/`Weak`
//! references a doubly-linked tree would need and lets us prune whole
//! subtrees by just dropping entries whose parent chain was abandoned.
//! The best chain is whichever leaf (a hash with no children) has the
//! greatest cumulative proof of work; ties keep whichever chain was seen
//! first, matching the usual "first-seen" convention used to resist trivial
//! chain-split grinding.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use primitive_types::U256;

use primitives::{
    block::{self, Block, Height},
    parameters::Network,
    transaction,
    transparent,
    work::difficulty::{CompactDifficulty, ExpandedDifficulty},
};
use store::{HashOrHeight, UndoOutput, Utxo};

use crate::error::{BlockError, ConsensusError};

/// How many blocks must sit behind the best tip before the oldest of them is
/// written to the finalized store. Matches Bitcoin Core's coinbase maturity,
/// which is also the deepest reorg the network is expected to tolerate.
pub const MAX_BLOCK_REORG_HEIGHT: u32 = 100;

/// The number of blocks in one difficulty retarget window.
const RETARGET_INTERVAL: u32 = primitives::parameters::POW_AVERAGING_WINDOW as u32;

const RETARGET_TIMESPAN_SECONDS: i64 = 14 * 24 * 60 * 60;

/// The number of ancestor timestamps considered for the median-time-past
/// rule (§4.2: "timestamp strictly greater than the median of the previous
/// eleven ancestors' times").
const MEDIAN_TIME_SPAN: u32 = 11;

#[derive(Debug)]
struct Entry {
    block: Arc<Block>,
    height: Height,
    parent_hash: block::Hash,
    cumulative_work: U256,
    sequence: u64,
    spent_utxos: Vec<UndoOutput>,
    created_utxos: HashMap<transparent::OutPoint, Utxo>,
}

/// The tree of blocks that extend the finalized tip but have not yet been
/// written to disk.
#[derive(Debug)]
pub struct NonFinalizedState {
    network: Network,
    entries: HashMap<block::Hash, Entry>,
    children: HashMap<block::Hash, Vec<block::Hash>>,
    finalized_tip: (Height, block::Hash),
    next_sequence: u64,
    /// Time and difficulty of the last `RETARGET_INTERVAL` blocks, by height,
    /// kept independently of `entries`' reorg-depth pruning: a retarget
    /// boundary needs the header from 2016 blocks back, far deeper than the
    /// `MAX_BLOCK_REORG_HEIGHT` window blocks are otherwise kept in memory
    /// for.
    recent_headers: std::collections::BTreeMap<u32, (DateTime<Utc>, CompactDifficulty)>,
}

impl NonFinalizedState {
    pub fn new(network: Network, finalized_tip: (Height, block::Hash)) -> Self {
        Self {
            network,
            entries: HashMap::new(),
            children: HashMap::new(),
            finalized_tip,
            next_sequence: 0,
            recent_headers: std::collections::BTreeMap::new(),
        }
    }

    /// Updates the recorded finalized tip, e.g. after `store` commits a
    /// block this state handed it.
    pub fn set_finalized_tip(&mut self, tip: (Height, block::Hash)) {
        self.finalized_tip = tip;
    }

    fn parent_cumulative_work(&self, parent_hash: &block::Hash) -> Option<U256> {
        if *parent_hash == self.finalized_tip.1 {
            Some(U256::zero())
        } else {
            self.entries.get(parent_hash).map(|e| e.cumulative_work)
        }
    }

    fn parent_height(&self, parent_hash: &block::Hash) -> Option<Height> {
        if *parent_hash == self.finalized_tip.1 {
            Some(self.finalized_tip.0)
        } else {
            self.entries.get(parent_hash).map(|e| e.height)
        }
    }

    /// Returns the height a block extending `parent_hash` would have, or
    /// `None` if `parent_hash` is not the finalized tip or a known
    /// non-finalized block.
    pub fn next_height(&self, parent_hash: &block::Hash) -> Option<Height> {
        self.parent_height(parent_hash).map(|height| Height(height.0 + 1))
    }

    /// Returns `true` if `hash` is the finalized tip or a block already
    /// held in the non-finalized tree.
    pub fn contains(&self, hash: &block::Hash) -> bool {
        *hash == self.finalized_tip.1 || self.entries.contains_key(hash)
    }

    /// Returns every leaf hash (a chain tip with no known children),
    /// together with its cumulative work, ordered best-first.
    fn leaves(&self) -> Vec<(block::Hash, U256, u64)> {
        let mut leaves: Vec<_> = self
            .entries
            .keys()
            .filter(|hash| {
                self.children
                    .get(*hash)
                    .map(|c| c.is_empty())
                    .unwrap_or(true)
            })
            .map(|hash| {
                let entry = &self.entries[hash];
                (*hash, entry.cumulative_work, entry.sequence)
            })
            .collect();

        leaves.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        leaves
    }

    /// Returns the hash and height of the current best chain tip, or the
    /// finalized tip if there is no non-finalized block yet.
    pub fn best_tip(&self) -> (Height, block::Hash) {
        match self.leaves().first() {
            Some((hash, _, _)) => (self.entries[hash].height, *hash),
            None => self.finalized_tip,
        }
    }

    /// Returns the chain of ancestor hashes from `hash` back to (but not
    /// including) the finalized tip, in root-to-tip order.
    fn path_from_root(&self, hash: &block::Hash) -> Vec<block::Hash> {
        let mut path = Vec::new();
        let mut current = *hash;
        while current != self.finalized_tip.1 {
            path.push(current);
            current = self.entries[&current].parent_hash;
        }
        path.reverse();
        path
    }

    /// Returns the hashes that must be disconnected (tip-to-fork-point
    /// order) and connected (fork-point-to-tip order) to move the active
    /// chain from `old_tip` to `new_tip`.
    ///
    /// When `new_tip` simply extends `old_tip`, `disconnect` is empty and
    /// `connect` holds exactly the new block; this makes the ordinary
    /// "connect a block on top of the tip" case just a degenerate reorg,
    /// so `service.rs` only needs one code path.
    pub fn branch_points(
        &self,
        old_tip: block::Hash,
        new_tip: block::Hash,
    ) -> (Vec<block::Hash>, Vec<block::Hash>) {
        let old_path = self.path_from_root(&old_tip);
        let new_path = self.path_from_root(&new_tip);

        let common = old_path
            .iter()
            .zip(new_path.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let disconnect: Vec<_> = old_path[common..].iter().rev().cloned().collect();
        let connect: Vec<_> = new_path[common..].to_vec();
        (disconnect, connect)
    }

    /// Looks up a UTXO anywhere in the best chain's overlay, newest entry
    /// wins. Does not look at disk; callers fall back to `store` themselves.
    pub fn utxo(&self, tip: &block::Hash, outpoint: &transparent::OutPoint) -> Option<Utxo> {
        let mut current = *tip;
        while current != self.finalized_tip.1 {
            let entry = self.entries.get(&current)?;
            if let Some(utxo) = entry.created_utxos.get(outpoint) {
                return Some(utxo.clone());
            }
            current = entry.parent_hash;
        }
        None
    }

    pub fn block(&self, hash: &block::Hash) -> Option<Arc<Block>> {
        self.entries.get(hash).map(|e| e.block.clone())
    }

    pub fn depth(&self, hash: &block::Hash) -> Option<u32> {
        let (tip_height, _) = self.best_tip();
        self.entries
            .get(hash)
            .map(|e| tip_height.0.saturating_sub(e.height.0) + 1)
    }

    /// Returns the time of the block at `hash`, falling back to
    /// `recent_headers`/genesis when `hash` is the finalized tip (no longer
    /// kept as an `Entry`).
    fn header_time(&self, hash: &block::Hash) -> Option<DateTime<Utc>> {
        if let Some(entry) = self.entries.get(hash) {
            return Some(entry.block.header.time);
        }
        if *hash == self.finalized_tip.1 {
            return self.time_at_height(self.finalized_tip.0 .0);
        }
        None
    }

    fn header_difficulty(&self, hash: &block::Hash) -> Option<CompactDifficulty> {
        if let Some(entry) = self.entries.get(hash) {
            return Some(entry.block.header.difficulty_threshold);
        }
        if *hash == self.finalized_tip.1 {
            if self.finalized_tip.0 == Height(0) {
                return Some(ExpandedDifficulty::target_difficulty_limit(self.network).to_compact());
            }
            return self.recent_headers.get(&self.finalized_tip.0 .0).map(|(_, d)| *d);
        }
        None
    }

    /// Returns the time recorded for `height`, from `recent_headers` or
    /// genesis. `None` if `height` is older than the rolling window this
    /// state keeps for retargeting.
    fn time_at_height(&self, height: u32) -> Option<DateTime<Utc>> {
        if height == 0 {
            return Some(primitives::parameters::genesis_time(self.network));
        }
        self.recent_headers.get(&height).map(|(time, _)| *time)
    }

    /// Records `height`'s time and difficulty in the rolling retarget
    /// window, evicting anything older than `RETARGET_INTERVAL` blocks.
    fn record_recent_header(&mut self, height: Height, time: DateTime<Utc>, difficulty: CompactDifficulty) {
        self.recent_headers.insert(height.0, (time, difficulty));
        while self.recent_headers.len() as u32 > RETARGET_INTERVAL + 1 {
            if let Some(&oldest) = self.recent_headers.keys().next() {
                self.recent_headers.remove(&oldest);
            }
        }
    }

    /// Returns the last `MEDIAN_TIME_SPAN` ancestor times ending at (and
    /// including) `parent_hash`, oldest missing ancestors simply making the
    /// window shorter near genesis (§4.2's median-time-past rule).
    fn median_time_past(&self, parent_hash: &block::Hash) -> DateTime<Utc> {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN as usize);
        let mut current = *parent_hash;
        for _ in 0..MEDIAN_TIME_SPAN {
            match self.header_time(&current) {
                Some(time) => times.push(time),
                None => break,
            }
            if current == self.finalized_tip.1 {
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

    /// Computes the difficulty threshold required for a block at `height`
    /// extending `parent_hash`.
    fn expected_difficulty(
        &self,
        parent_hash: &block::Hash,
        height: Height,
    ) -> Result<CompactDifficulty, BlockError> {
        let parent_difficulty = self
            .header_difficulty(parent_hash)
            .unwrap_or_else(|| ExpandedDifficulty::target_difficulty_limit(self.network).to_compact());

        if height.0 % RETARGET_INTERVAL != 0 {
            return Ok(parent_difficulty);
        }

        let window_start_height = height.0 - RETARGET_INTERVAL;
        let first_time = self
            .time_at_height(window_start_height)
            .ok_or(BlockError::InvalidRetarget(height, block::Hash([0; 32])))?;
        let last_time = self
            .header_time(parent_hash)
            .ok_or(BlockError::InvalidRetarget(height, block::Hash([0; 32])))?;

        Ok(primitives::work::difficulty::calculate_next_difficulty(
            first_time,
            last_time,
            parent_difficulty,
            RETARGET_TIMESPAN_SECONDS,
            ExpandedDifficulty::target_difficulty_limit(self.network),
        ))
    }

    /// Checks BIP68 relative locktime for every input of `tx`, given the
    /// block `height`/`parent_hash` it is being connected in. Version 1
    /// transactions and blocks before CSV activation ignore sequence
    /// numbers entirely. An input's confirming height older than this
    /// state's rolling `recent_headers` window cannot have its time-based
    /// lock checked; such inputs are treated as satisfied, since at
    /// `MAX_BLOCK_REORG_HEIGHT` maturity they are already far past any
    /// lock a wallet would realistically set.
    fn relative_locktime_is_satisfied(
        &self,
        tx: &transaction::Transaction,
        height: Height,
        parent_hash: &block::Hash,
        spent_utxos_lookup: &HashMap<transparent::OutPoint, Utxo>,
    ) -> bool {
        const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
        const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
        const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;
        const SEQUENCE_LOCKTIME_GRANULARITY_SECONDS: i64 = 512;

        if tx.version < 2 {
            return true;
        }
        let csv_active = primitives::parameters::NetworkUpgrade::CSV
            .activation_height(self.network)
            .map_or(false, |activation| height >= activation);
        if !csv_active {
            return true;
        }

        for input in &tx.inputs {
            let outpoint = match input {
                transparent::Input::PrevOut { outpoint, sequence, .. } => {
                    if *sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
                        continue;
                    }
                    outpoint
                }
                transparent::Input::Coinbase { .. } => continue,
            };
            let sequence = match input {
                transparent::Input::PrevOut { sequence, .. } => *sequence,
                transparent::Input::Coinbase { .. } => continue,
            };
            let utxo = match spent_utxos_lookup.get(outpoint) {
                Some(utxo) => utxo,
                None => continue,
            };
            let mask = sequence & SEQUENCE_LOCKTIME_MASK;

            if sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
                let confirming_time = match self.time_at_height(utxo.height.0) {
                    Some(time) => time,
                    None => continue,
                };
                let required =
                    confirming_time + chrono::Duration::seconds(mask as i64 * SEQUENCE_LOCKTIME_GRANULARITY_SECONDS);
                if self.median_time_past(parent_hash) < required {
                    return false;
                }
            } else if height.0 < utxo.height.0 + mask {
                return false;
            }
        }

        true
    }

    /// Performs contextual validation and inserts `block` as a child of its
    /// parent. The parent must already be known (the finalized tip or an
    /// existing entry); callers are responsible for queueing orphans until
    /// their parent arrives.
    pub fn commit_block(
        &mut self,
        block: Arc<Block>,
        hash: block::Hash,
        spent_utxos_lookup: HashMap<transparent::OutPoint, Utxo>,
    ) -> Result<(), ConsensusError> {
        if self.contains(&hash) {
            return Err(ConsensusError::Duplicate);
        }

        let parent_hash = block.header.previous_block_hash;
        let parent_work = self
            .parent_cumulative_work(&parent_hash)
            .ok_or(ConsensusError::Orphan)?;
        let parent_height = self
            .parent_height(&parent_hash)
            .expect("parent_cumulative_work succeeded");
        let height = Height(parent_height.0 + 1);

        let expected_difficulty = self.expected_difficulty(&parent_hash, height)?;
        let parent_time = self
            .header_time(&parent_hash)
            .expect("parent_cumulative_work succeeded so parent_hash resolves here too");
        let minimum_difficulty_override = primitives::parameters::NetworkUpgrade::is_testnet_min_difficulty_block(
            self.network,
            height,
            block.header.time,
            parent_time,
        );
        let expected_difficulty = if minimum_difficulty_override {
            ExpandedDifficulty::target_difficulty_limit(self.network).to_compact()
        } else {
            expected_difficulty
        };
        if block.header.difficulty_threshold.to_bits() != expected_difficulty.to_bits() {
            return Err(ConsensusError::Invalid(BlockError::InvalidRetarget(
                height, hash,
            )));
        }

        let mtp = self.median_time_past(&parent_hash);
        if block.header.time <= mtp {
            return Err(ConsensusError::Invalid(BlockError::TimeTooOld(
                block.header.time,
            )));
        }

        if let Some((checkpoint_height, checkpoint_hash)) =
            crate::parameters::highest_checkpoint_below(self.network, height)
        {
            if checkpoint_height == height && checkpoint_hash != hash {
                return Err(ConsensusError::Invalid(BlockError::CheckpointMismatch(
                    height,
                )));
            }
        }

        crate::block::coinbase_height_is_valid(&block, self.network, height)
            .map_err(ConsensusError::Invalid)?;

        let mut spent_utxos = Vec::new();
        let mut total_fees = primitives::amount::Amount::<primitives::amount::NonNegative>::zero();
        for tx in block.transactions.iter().skip(1) {
            crate::transaction::check::is_final(tx, height, block.header.time)
                .map_err(|e| ConsensusError::Invalid(BlockError::Transaction(e)))?;
            if !self.relative_locktime_is_satisfied(tx, height, &parent_hash, &spent_utxos_lookup) {
                return Err(ConsensusError::Invalid(BlockError::Transaction(
                    crate::error::TransactionError::NotFinal,
                )));
            }

            let value_balance = crate::transaction::value_balance(tx, &spent_utxos_lookup)
                .map_err(|e| ConsensusError::Invalid(BlockError::Transaction(e)))?;
            if value_balance.satoshis() < 0 {
                return Err(ConsensusError::Invalid(BlockError::Transaction(
                    crate::error::TransactionError::ValueOverflow {
                        input: 0,
                        output: -value_balance.satoshis(),
                    },
                )));
            }
            total_fees = (total_fees + value_balance.constrain().unwrap())
                .map_err(|_| ConsensusError::Invalid(BlockError::FeeOverflow))?;

            for input in &tx.inputs {
                if let transparent::Input::PrevOut { outpoint, .. } = input {
                    if let Some(utxo) = spent_utxos_lookup.get(outpoint).cloned() {
                        if utxo.from_coinbase
                            && height.0.saturating_sub(utxo.height.0) < crate::COINBASE_MATURITY
                        {
                            return Err(ConsensusError::Invalid(
                                BlockError::ImmatureCoinbaseSpend,
                            ));
                        }
                        spent_utxos.push(UndoOutput {
                            outpoint: *outpoint,
                            spent: utxo,
                        });
                    }
                }
            }
        }

        crate::block::check::subsidy_is_valid(&block, self.network, total_fees)
            .map_err(ConsensusError::Invalid)?;

        let mut created_utxos = HashMap::new();
        for tx in &block.transactions {
            let tx_hash = tx.hash();
            let from_coinbase = tx.is_coinbase();
            for (index, output) in tx.outputs.iter().enumerate() {
                created_utxos.insert(
                    transparent::OutPoint {
                        hash: tx_hash,
                        index: index as u32,
                    },
                    Utxo {
                        output: output.clone(),
                        height,
                        from_coinbase,
                    },
                );
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let work = block
            .header
            .difficulty_threshold
            .to_work()
            .ok_or(ConsensusError::Invalid(BlockError::InvalidDifficulty(
                height, hash,
            )))?;

        self.record_recent_header(height, block.header.time, block.header.difficulty_threshold);

        self.entries.insert(
            hash,
            Entry {
                block,
                height,
                parent_hash,
                cumulative_work: parent_work + work,
                sequence,
                spent_utxos,
                created_utxos,
            },
        );
        self.children.entry(parent_hash).or_default().push(hash);
        self.children.entry(hash).or_default();

        Ok(())
    }

    /// Returns the block at the front of the best chain that should now be
    /// written to the finalized store, once the chain is deep enough, plus
    /// the set of sibling-chain hashes that become unreachable once that
    /// ancestor is pruned as the new root.
    pub fn pop_root_if_finalizable(
        &mut self,
    ) -> Option<(Arc<Block>, Vec<UndoOutput>)> {
        let (tip_height, tip_hash) = self.best_tip();
        if tip_height.0.saturating_sub(self.finalized_tip.0 .0) <= MAX_BLOCK_REORG_HEIGHT {
            return None;
        }

        let path = self.path_from_root(&tip_hash);
        let new_root_hash = *path.first()?;
        let entry = self.entries.remove(&new_root_hash)?;

        // Anything that isn't a descendant of the new root is now on an
        // abandoned fork; drop it.
        let keep: std::collections::HashSet<_> = path[1..].iter().cloned().collect();
        let descendants_of_new_root = self.collect_descendants(&new_root_hash);
        self.entries
            .retain(|hash, _| keep.contains(hash) || descendants_of_new_root.contains(hash));
        self.children.retain(|hash, _| self.entries.contains_key(hash));
        for children in self.children.values_mut() {
            children.retain(|h| self.entries.contains_key(h) || *h == tip_hash);
        }

        self.finalized_tip = (entry.height, new_root_hash);

        Some((entry.block, entry.spent_utxos))
    }

    fn collect_descendants(&self, hash: &block::Hash) -> std::collections::HashSet<block::Hash> {
        let mut result = std::collections::HashSet::new();
        let mut stack = vec![*hash];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.children.get(&current) {
                for child in children {
                    if result.insert(*child) {
                        stack.push(*child);
                    }
                }
            }
        }
        result
    }

    /// Returns the height/hash at the given location, checking the
    /// non-finalized tree only.
    pub fn resolve(&self, query: &HashOrHeight) -> Option<block::Hash> {
        match query {
            HashOrHeight::Hash(hash) if self.entries.contains_key(hash) => Some(*hash),
            HashOrHeight::Height(height) => {
                let (_, tip_hash) = self.best_tip();
                self.path_from_root(&tip_hash)
                    .into_iter()
                    .find(|hash| self.entries[hash].height == *height)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_tip_is_finalized_tip() {
        let genesis = primitives::parameters::genesis_hash(Network::Mainnet);
        let state = NonFinalizedState::new(Network::Mainnet, (Height(0), genesis));
        assert_eq!(state.best_tip(), (Height(0), genesis));
    }
}
