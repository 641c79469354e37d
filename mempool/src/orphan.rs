//! A bounded holding area for transactions whose inputs don't yet resolve
//! (ยง4.3: "unresolvable inputs trigger orphan retention for a bounded
//! window"). Entries are evicted on a FIFO basis once the pool is full, and
//! independently expire after [`ORPHAN_EXPIRY`] regardless of pool
//! pressure.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use primitives::{transaction, transaction::Transaction, transparent::OutPoint};

/// Maximum number of orphan transactions retained at once.
pub const MAX_ORPHAN_TRANSACTIONS: usize = 100;

/// Orphans older than this are dropped even if the pool isn't full,
/// matching Bitcoin Core's orphan transaction expiry.
pub fn orphan_expiry() -> Duration {
    Duration::minutes(20)
}

struct OrphanEntry {
    tx: Arc<Transaction>,
    received: DateTime<Utc>,
    /// The outpoints this orphan is still waiting on.
    missing: Vec<OutPoint>,
}

/// Transactions rejected only because an input wasn't resolvable yet,
/// kept around in case the missing parent arrives shortly after.
#[derive(Default)]
pub struct OrphanPool {
    by_txid: HashMap<transaction::Hash, OrphanEntry>,
    /// Index from an awaited outpoint back to the orphan(s) blocked on it,
    /// so a newly created output can cheaply find dependents.
    waiting_on: HashMap<OutPoint, Vec<transaction::Hash>>,
    /// Insertion order, for FIFO eviction once the pool is full.
    order: Vec<transaction::Hash>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_txid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_txid.is_empty()
    }

    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        self.by_txid.contains_key(txid)
    }

    /// Adds `tx` to the pool, blocked on `missing` outpoints, evicting the
    /// oldest orphan if the pool is already at capacity.
    pub fn insert(&mut self, tx: Arc<Transaction>, missing: Vec<OutPoint>, now: DateTime<Utc>) {
        let txid = tx.hash();
        if self.by_txid.contains_key(&txid) {
            return;
        }

        if self.by_txid.len() >= MAX_ORPHAN_TRANSACTIONS {
            if let Some(oldest) = self.order.first().copied() {
                self.remove(&oldest);
            }
        }

        for outpoint in &missing {
            self.waiting_on.entry(*outpoint).or_default().push(txid);
        }

        self.order.push(txid);
        self.by_txid.insert(
            txid,
            OrphanEntry {
                tx,
                received: now,
                missing,
            },
        );
    }

    /// Removes and returns every orphan that was waiting on `outpoint`,
    /// for the caller to retry admission now that it has arrived.
    pub fn take_dependents(&mut self, outpoint: &OutPoint) -> Vec<Arc<Transaction>> {
        let txids = self.waiting_on.remove(outpoint).unwrap_or_default();
        txids
            .into_iter()
            .filter_map(|txid| self.remove(&txid))
            .collect()
    }

    /// Drops every orphan that has been waiting longer than
    /// [`orphan_expiry`], returning their count.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let expiry = orphan_expiry();
        let expired: Vec<_> = self
            .by_txid
            .iter()
            .filter(|(_, entry)| now - entry.received > expiry)
            .map(|(txid, _)| *txid)
            .collect();
        let count = expired.len();
        for txid in expired {
            self.remove(&txid);
        }
        count
    }

    fn remove(&mut self, txid: &transaction::Hash) -> Option<Arc<Transaction>> {
        let entry = self.by_txid.remove(txid)?;
        self.order.retain(|id| id != txid);
        for outpoint in &entry.missing {
            if let Some(waiters) = self.waiting_on.get_mut(outpoint) {
                waiters.retain(|id| id != txid);
                if waiters.is_empty() {
                    self.waiting_on.remove(outpoint);
                }
            }
        }
        Some(entry.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitives::transaction::LockTime;

    fn dummy_tx() -> Arc<Transaction> {
        Arc::new(Transaction::new(1, Vec::new(), Vec::new(), LockTime::unlocked()))
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut pool = OrphanPool::new();
        let now = Utc::now();
        for i in 0..MAX_ORPHAN_TRANSACTIONS {
            let tx = Arc::new(Transaction::new(
                i as i32 + 1,
                Vec::new(),
                Vec::new(),
                LockTime::unlocked(),
            ));
            pool.insert(tx, Vec::new(), now);
        }
        assert_eq!(pool.len(), MAX_ORPHAN_TRANSACTIONS);

        let newest = dummy_tx();
        pool.insert(newest, Vec::new(), now);
        assert_eq!(pool.len(), MAX_ORPHAN_TRANSACTIONS);
    }

    #[test]
    fn expires_old_orphans() {
        let mut pool = OrphanPool::new();
        let then = Utc::now() - Duration::hours(24);
        pool.insert(dummy_tx(), Vec::new(), then);
        assert_eq!(pool.expire(Utc::now()), 1);
        assert!(pool.is_empty());
    }
}
