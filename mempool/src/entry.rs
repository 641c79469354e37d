//! A single admitted transaction, plus the bookkeeping the admission and
//! eviction policies need: its feerate, its size, and the shape of its
//! in-mempool ancestor/descendant package (ยง4.3's "closed under spends only
//! confirmed or in-mempool outputs" invariant relies on these staying
//! accurate across every insert/remove).

use std::sync::Arc;

use chrono::{DateTime, Utc};

use primitives::{
    amount::{Amount, NegativeAllowed},
    block::Height,
    transaction::{self, Transaction},
};

/// An admitted mempool transaction and its derived metadata.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Arc<Transaction>,
    pub txid: transaction::Hash,
    pub wtxid: transaction::Hash,
    pub fee: Amount<NegativeAllowed>,
    /// Serialized size in bytes, standing in for virtual size: this
    /// implementation does not discount witness bytes (no segwit weight
    /// model beyond `Transaction::len`), so vsize and size coincide.
    pub vsize: u64,
    pub time: DateTime<Utc>,
    /// The chain tip height when this entry was admitted, used to compute
    /// how many blocks it took to confirm for fee estimation.
    pub entry_height: Height,
    /// Count, total vsize, and total fee of this entry's in-mempool
    /// ancestors, including itself.
    pub ancestor_count: usize,
    pub ancestor_vsize: u64,
    pub ancestor_fee: Amount<NegativeAllowed>,
    /// Count and total vsize of this entry's in-mempool descendants,
    /// including itself.
    pub descendant_count: usize,
    pub descendant_vsize: u64,
}

impl MempoolEntry {
    pub fn new(
        tx: Arc<Transaction>,
        fee: Amount<NegativeAllowed>,
        time: DateTime<Utc>,
        entry_height: Height,
    ) -> Self {
        let vsize = tx.len() as u64;
        let txid = tx.hash();
        let wtxid = tx.wtxid();
        MempoolEntry {
            tx,
            txid,
            wtxid,
            fee,
            vsize,
            time,
            entry_height,
            ancestor_count: 1,
            ancestor_vsize: vsize,
            ancestor_fee: fee,
            descendant_count: 1,
            descendant_vsize: vsize,
        }
    }

    /// Fee rate in satoshis per thousand vbytes, used to rank and evict
    /// entries (ยง4.3).
    pub fn fee_rate_per_kvb(&self) -> i64 {
        if self.vsize == 0 {
            return 0;
        }
        self.fee.satoshis() * 1000 / self.vsize as i64
    }

    /// The package feerate used for ancestor-aware mining selection and
    /// RBF comparisons: the entry's own fee divided by its ancestor set's
    /// total size, matching Bitcoin Core's "ancestor feerate" notion.
    pub fn ancestor_fee_rate_per_kvb(&self) -> i64 {
        if self.ancestor_vsize == 0 {
            return 0;
        }
        self.ancestor_fee.satoshis() * 1000 / self.ancestor_vsize as i64
    }
}
