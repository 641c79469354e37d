//! The primary implementation of the `store::Service` built upon sled.

use std::{collections::HashMap, sync::Arc};

use tracing::trace;

use primitives::transparent;
use primitives::{
    block::{self, Block},
    parameters::{Network, GENESIS_PREVIOUS_BLOCK_HASH},
};

use crate::{BoxError, Config, HashOrHeight, QueuedBlock, UndoOutput, Utxo};
use sled_format::{FromSled, SledDeserialize, SledSerialize};

mod sled_format;

/// The finalized part of the chain state, stored in sled.
///
/// This structure has two categories of methods:
///
/// - *synchronous* methods that perform writes to the sled state;
/// - *asynchronous* methods that perform reads.
///
/// The synchronous methods are implemented as ordinary methods on
/// [`FinalizedState`] and return once sled has applied the write (sled
/// transactions are atomic per call, which is enough to satisfy ยง4.1's
/// "all or none of a batch is observed" requirement, since each commit
/// touches a single logical block).
pub struct FinalizedState {
    /// Queued blocks that arrived out of order, indexed by their parent
    /// block hash.
    queued_by_prev_hash: HashMap<block::Hash, QueuedBlock>,

    hash_by_height: sled::Tree,
    height_by_hash: sled::Tree,
    block_by_height: sled::Tree,
    tx_by_hash: sled::Tree,
    utxo_by_outpoint: sled::Tree,
    /// Undo log, keyed by the hash of the block it reverses; ยง4.1.
    undo_by_hash: sled::Tree,
}

impl FinalizedState {
    pub fn new(config: &Config, network: Network) -> Self {
        let db = config.sled_config(network).open().unwrap();

        Self {
            queued_by_prev_hash: HashMap::new(),
            hash_by_height: db.open_tree(b"hash_by_height").unwrap(),
            height_by_hash: db.open_tree(b"height_by_hash").unwrap(),
            block_by_height: db.open_tree(b"block_by_height").unwrap(),
            tx_by_hash: db.open_tree(b"tx_by_hash").unwrap(),
            utxo_by_outpoint: db.open_tree(b"utxo_by_outpoint").unwrap(),
            undo_by_hash: db.open_tree(b"undo_by_hash").unwrap(),
        }
    }

    /// Queue a finalized block to be committed to the state.
    ///
    /// After queueing a finalized block, this method checks whether the
    /// newly queued block (and any of its descendants) can be committed to
    /// the state.
    pub fn queue_and_commit_finalized_blocks(&mut self, queued_block: QueuedBlock) {
        let prev_hash = queued_block.block.header.previous_block_hash;
        self.queued_by_prev_hash.insert(prev_hash, queued_block);

        while let Some(queued_block) = self.queued_by_prev_hash.remove(&self.finalized_tip_hash())
        {
            let height = queued_block
                .block
                .coinbase_height()
                .expect("valid blocks must have a height");
            self.commit_finalized(queued_block);
            metrics::counter!("state.committed.block.count", 1);
            metrics::gauge!("state.committed.block.height", height.0 as _);
        }

        metrics::gauge!(
            "state.queued.block.count",
            self.queued_by_prev_hash.len() as _
        );
    }

    /// Returns the hash of the current finalized tip block.
    pub fn finalized_tip_hash(&self) -> block::Hash {
        self.tip()
            .expect("inability to look up tip is unrecoverable")
            .map(|(_, hash)| hash)
            // if the state is empty, return the genesis previous block hash
            .unwrap_or(GENESIS_PREVIOUS_BLOCK_HASH)
    }

    /// Returns the height of the current finalized tip block.
    pub fn finalized_tip_height(&self) -> Option<block::Height> {
        self.tip()
            .expect("inability to look up tip is unrecoverable")
            .map(|(height, _)| height)
    }

    /// Immediately commit `block` to the finalized state, consuming the
    /// outputs `spent_utxos` destroyed and recording them in the undo log.
    ///
    /// It's the caller's responsibility to ensure the UTXOs passed in
    /// `spent_utxos` are exactly the ones this block's inputs spend; `chain`
    /// resolves them against its view of the UTXO set while validating the
    /// block.
    pub fn commit_finalized_direct(
        &mut self,
        block: Arc<Block>,
        spent_utxos: Vec<UndoOutput>,
    ) -> Result<block::Hash, BoxError> {
        let height = block
            .coinbase_height()
            .expect("finalized blocks are valid and have a coinbase height");
        let hash = block.hash();

        trace!(?height, ?hash, "committing finalized block");

        self.hash_by_height.zs_insert(height, hash)?;
        self.height_by_hash.zs_insert(hash, height)?;
        self.block_by_height.zs_insert(height, &*block)?;

        for transaction in block.transactions.iter() {
            let transaction_hash = transaction.hash();
            self.tx_by_hash.zs_insert(transaction_hash, &**transaction)?;

            for (index, output) in transaction.outputs.iter().enumerate() {
                let outpoint = transparent::OutPoint {
                    hash: transaction_hash,
                    index: index as _,
                };
                let utxo = Utxo {
                    output: output.clone(),
                    height,
                    from_coinbase: transaction.is_coinbase(),
                };

                self.utxo_by_outpoint.zs_insert(outpoint, utxo)?;
            }
        }

        for undo in &spent_utxos {
            self.utxo_by_outpoint.zs_delete(undo.outpoint)?;
        }

        self.undo_by_hash.insert(
            &hash.0[..],
            bincode::serialize(&UndoLogBytes::from(&spent_utxos))?,
        )?;

        Ok(hash)
    }

    /// Disconnects the current finalized tip, restoring the outputs it
    /// destroyed and removing the outputs it created.
    ///
    /// Returns the disconnected block and the `UndoOutput`s that were
    /// restored, so the caller (`chain`) can rebuild its in-memory UTXO
    /// view for the new tip.
    pub fn disconnect_tip(&mut self) -> Result<(Arc<Block>, Vec<UndoOutput>), BoxError> {
        let (height, hash) = self
            .tip()?
            .ok_or_else(|| -> BoxError { "cannot disconnect the tip of an empty state".into() })?;

        let block: Arc<Block> = self
            .block_by_height
            .zs_get(height)?
            .ok_or_else(|| -> BoxError { "missing block body for known height".into() })?;

        for transaction in block.transactions.iter() {
            let transaction_hash = transaction.hash();
            for index in 0..transaction.outputs.len() {
                let outpoint = transparent::OutPoint {
                    hash: transaction_hash,
                    index: index as _,
                };
                self.utxo_by_outpoint.zs_delete(outpoint)?;
            }
            self.tx_by_hash.zs_delete(transaction_hash)?;
        }

        let restored: Vec<UndoOutput> = match self.undo_by_hash.get(&hash.0[..])? {
            Some(bytes) => {
                let decoded: UndoLogBytes = bincode::deserialize(&bytes)?;
                decoded.into()
            }
            None => Vec::new(),
        };

        for undo in &restored {
            self.utxo_by_outpoint
                .zs_insert(undo.outpoint, undo.spent.clone())?;
        }

        self.undo_by_hash.remove(&hash.0[..])?;
        self.hash_by_height.zs_delete(height)?;
        self.height_by_hash.zs_delete(hash)?;
        self.block_by_height.zs_delete(height)?;

        Ok((block, restored))
    }

    pub fn block_locator(&self) -> Result<Vec<block::Hash>, BoxError> {
        let (tip_height, _) = match self.tip()? {
            Some(height) => height,
            None => return Ok(Vec::new()),
        };

        let heights = crate::util::block_locator_heights(tip_height);
        let mut hashes = Vec::with_capacity(heights.len());

        for height in heights {
            if let Some(hash) = self.hash_by_height.zs_get(height)? {
                hashes.push(hash);
            }
        }

        Ok(hashes)
    }

    pub fn tip(&self) -> Result<Option<(block::Height, block::Hash)>, BoxError> {
        if let Some((height_bytes, hash_bytes)) =
            self.hash_by_height.iter().rev().next().transpose()?
        {
            let height = block::Height::from_ivec(height_bytes)?;
            let hash = block::Hash::from_ivec(hash_bytes)?;

            Ok(Some((height, hash)))
        } else {
            Ok(None)
        }
    }

    pub fn depth(&self, hash: block::Hash) -> Result<Option<u32>, BoxError> {
        let height: block::Height = match self.height_by_hash.zs_get(hash)? {
            Some(height) => height,
            None => return Ok(None),
        };

        let (tip_height, _) = self.tip()?.expect("tip must exist");

        Ok(Some(tip_height.0 - height.0))
    }

    pub fn block(&self, hash_or_height: HashOrHeight) -> Result<Option<Arc<Block>>, BoxError> {
        let height = match hash_or_height {
            HashOrHeight::Height(height) => height,
            HashOrHeight::Hash(hash) => match self.height_by_hash.zs_get(hash)? {
                Some(height) => height,
                None => return Ok(None),
            },
        };

        Ok(self.block_by_height.zs_get(height)?)
    }

    pub fn transaction(
        &self,
        hash: primitives::transaction::Hash,
    ) -> Result<Option<Arc<primitives::transaction::Transaction>>, BoxError> {
        Ok(self
            .tx_by_hash
            .zs_get::<_, primitives::transaction::Transaction>(hash)?
            .map(Arc::new))
    }

    /// Returns the `Utxo` pointed to by the given `transparent::OutPoint`
    /// if it is present.
    pub fn utxo(&self, outpoint: &transparent::OutPoint) -> Result<Option<Utxo>, BoxError> {
        self.utxo_by_outpoint.zs_get(*outpoint)
    }

    /// Iterates the entire UTXO set; used for reindexing and for
    /// `iterateUtxo()` (ยง4.1).
    pub fn iter_utxos(&self) -> impl Iterator<Item = Result<(transparent::OutPoint, Utxo), BoxError>> {
        self.utxo_by_outpoint.iter().map(|entry| {
            let (key, value) = entry?;
            let outpoint = transparent::OutPoint::from_ivec(key)?;
            let utxo = Utxo::from_sled(value)?;
            Ok((outpoint, utxo))
        })
    }

    /// Commit a finalized block to the state.
    ///
    /// It's the caller's responsibility to ensure that blocks are committed
    /// in order. This function is called by `queue_and_commit_finalized_blocks`,
    /// which ensures order. It is intentionally not exposed as part of the
    /// public API of [`FinalizedState`].
    fn commit_finalized(&mut self, queued_block: QueuedBlock) {
        let QueuedBlock {
            block,
            spent_utxos,
            rsp_tx,
        } = queued_block;
        let result = self.commit_finalized_direct(block, spent_utxos);
        let _ = rsp_tx.send(result.map_err(Into::into));
    }
}

/// Plain-old-data mirror of `Vec<UndoOutput>` used only for the bincode
/// undo-log encoding; `UndoOutput`/`Utxo` don't implement `serde` directly
/// since their wire format is the consensus `BitcoinSerialize` framing, not
/// a general-purpose serde impl.
#[derive(serde::Serialize, serde::Deserialize)]
struct UndoLogBytes(Vec<(Vec<u8>, Vec<u8>, u32, bool)>);

impl From<&Vec<UndoOutput>> for UndoLogBytes {
    fn from(outputs: &Vec<UndoOutput>) -> Self {
        use primitives::BitcoinSerialize;
        UndoLogBytes(
            outputs
                .iter()
                .map(|undo| {
                    let mut outpoint_bytes = Vec::new();
                    undo.outpoint.bitcoin_serialize(&mut outpoint_bytes).ok();
                    let mut output_bytes = Vec::new();
                    undo.spent
                        .output
                        .bitcoin_serialize(&mut output_bytes)
                        .ok();
                    (
                        outpoint_bytes,
                        output_bytes,
                        undo.spent.height.0,
                        undo.spent.from_coinbase,
                    )
                })
                .collect(),
        )
    }
}

impl From<UndoLogBytes> for Vec<UndoOutput> {
    fn from(bytes: UndoLogBytes) -> Self {
        use primitives::BitcoinDeserialize;
        bytes
            .0
            .into_iter()
            .filter_map(|(outpoint_bytes, output_bytes, height, from_coinbase)| {
                let outpoint =
                    transparent::OutPoint::bitcoin_deserialize(&outpoint_bytes[..]).ok()?;
                let output = transparent::Output::bitcoin_deserialize(&output_bytes[..]).ok()?;
                Some(UndoOutput {
                    outpoint,
                    spent: Utxo {
                        output,
                        height: block::Height(height),
                        from_coinbase,
                    },
                })
            })
            .collect()
    }
}
