//! The admission-controlled staging area for unconfirmed transactions
//! (ยง4.3): accepts transactions that would be valid in the next block,
//! tracks their fee/ancestor/descendant package shape, and reacts to chain
//! tip changes by dropping confirmed entries and re-admitting anything a
//! reorg un-confirmed.
//!
//! Like [`chain::service::StateService`], callers talk to this through a
//! `tower::Service<Request>`; the single `Inner` behind an async mutex is
//! the pool's only shared mutable state.

pub mod entry;
pub mod fees;
pub mod listener;
pub mod policy;
pub mod orphan;

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tower::{buffer::Buffer, Service};

use primitives::{
    block::{Block, Height},
    parameters::Network,
    transaction::{self, Transaction},
    transparent,
};

use entry::MempoolEntry;
use fees::FeeEstimator;
use orphan::OrphanPool;

pub use listener::ChainReactor;

/// Local-policy rejections (ยง7's `PolicyRejected`): never consensus
/// violations, so a caller must never punish the peer that relayed one.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in the mempool")]
    Duplicate,
    #[error("transaction fails standardness policy: {0}")]
    NonStandard(&'static str),
    #[error("conflicts with an existing mempool entry: {0}")]
    Conflict(&'static str),
    #[error("transaction input does not resolve against the chain or mempool")]
    MissingInput,
    #[error("parent transaction not yet known")]
    Orphan,
    #[error("fee rate below the minimum relay fee")]
    FeeTooLow,
    #[error("script verification failed for input {0}")]
    ScriptVerifyFailed(usize),
}

/// Tunable policy knobs; defaults match ยง4.3.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub max_mempool_vsize: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            // 300 MB, matching Bitcoin Core's default `-maxmempool`.
            max_mempool_vsize: 300_000_000,
        }
    }
}

/// A request to the mempool service.
pub enum Request {
    /// Validate and, if admissible, add `tx` to the pool.
    AddTransaction(Arc<Transaction>),
    /// Look up a mempool entry by txid.
    Transaction(transaction::Hash),
    /// Returns `true` if `txid` is currently in the pool.
    Contains(transaction::Hash),
    /// Every entry's txid, for `getrawmempool`.
    TxIds,
    /// Transactions ordered highest-ancestor-feerate-first, for block
    /// template construction.
    GetTemplate,
    /// The estimated feerate (satoshis per kvB) to confirm within
    /// `target_blocks`.
    EstimateFee(usize),
    /// Internal: chain connected `block`; drop its transactions from the
    /// pool (ยง4.2/ยง4.3 event contract). Not issued by external callers.
    BlockConnected(Arc<Block>),
    /// Internal: chain disconnected `block`; re-admit its non-coinbase
    /// transactions. Not issued by external callers.
    BlockDisconnected(Arc<Block>),
}

/// A response from the mempool service.
pub enum Response {
    Added(transaction::Hash),
    Rejected(MempoolError),
    Transaction(Option<Arc<Transaction>>),
    Contains(bool),
    TxIds(Vec<transaction::Hash>),
    Template(Vec<Arc<Transaction>>),
    FeeRate(i64),
    /// Acknowledges an internal chain-event request.
    Applied,
}

struct Inner {
    config: Config,
    network: Network,
    chain: Buffer<chain::service::StateService, chain::Request>,
    entries: HashMap<transaction::Hash, MempoolEntry>,
    spent: HashMap<transparent::OutPoint, transaction::Hash>,
    orphans: OrphanPool,
    fees: FeeEstimator,
    min_relay_fee_per_kvb: i64,
}

impl Inner {
    async fn chain_tip_height(&self) -> Height {
        match tower::ServiceExt::oneshot(self.chain.clone(), chain::Request::Tip).await {
            Ok(chain::Response::Tip(Some((height, _)))) => height,
            _ => Height(0),
        }
    }

    fn parents_of(&self, tx: &Transaction) -> HashSet<transaction::Hash> {
        policy::spent_outpoints(tx)
            .into_iter()
            .filter(|outpoint| self.entries.contains_key(&outpoint.hash))
            .map(|outpoint| outpoint.hash)
            .collect()
    }

    /// Recomputes every entry's ancestor/descendant counts, sizes, and
    /// fees from scratch. Simpler and, at this pool's scale, cheap enough
    /// compared to Bitcoin Core's incrementally maintained package
    /// indices, which this implementation does not attempt to match.
    fn recompute_stats(&mut self) {
        let txids: Vec<_> = self.entries.keys().copied().collect();
        let base: HashMap<_, _> = self
            .entries
            .iter()
            .map(|(id, e)| (*id, (e.vsize, e.fee)))
            .collect();

        let mut ancestor_sets = HashMap::new();
        for txid in &txids {
            let mut seen = HashSet::new();
            let mut stack = vec![*txid];
            while let Some(current) = stack.pop() {
                let tx = self.entries[&current].tx.clone();
                for parent in self.parents_of(&tx) {
                    if seen.insert(parent) {
                        stack.push(parent);
                    }
                }
            }
            ancestor_sets.insert(*txid, seen);
        }

        let mut descendant_sets: HashMap<_, HashSet<_>> =
            txids.iter().map(|t| (*t, HashSet::new())).collect();
        for (txid, ancestors) in &ancestor_sets {
            for ancestor in ancestors {
                descendant_sets.get_mut(ancestor).unwrap().insert(*txid);
            }
        }

        for txid in &txids {
            let (own_vsize, own_fee) = base[txid];
            let ancestors = &ancestor_sets[txid];
            let mut ancestor_vsize = own_vsize;
            let mut ancestor_fee = own_fee;
            for ancestor in ancestors {
                let (vsize, fee) = base[ancestor];
                ancestor_vsize += vsize;
                ancestor_fee = (ancestor_fee + fee).unwrap_or(ancestor_fee);
            }

            let descendants = &descendant_sets[txid];
            let descendant_vsize = own_vsize + descendants.iter().map(|d| base[d].0).sum::<u64>();

            let entry = self.entries.get_mut(txid).unwrap();
            entry.ancestor_count = ancestors.len() + 1;
            entry.ancestor_vsize = ancestor_vsize;
            entry.ancestor_fee = ancestor_fee;
            entry.descendant_count = descendants.len() + 1;
            entry.descendant_vsize = descendant_vsize;
        }

        metrics::gauge!("mempool.size", self.entries.len() as _);
    }

    /// Removes `txid` and every entry that (transitively) spends one of
    /// its outputs, returning the removed entries.
    fn remove_with_descendants(&mut self, txid: transaction::Hash) -> Vec<MempoolEntry> {
        let mut stack = vec![txid];
        let mut removed = Vec::new();
        while let Some(id) = stack.pop() {
            let entry = match self.entries.remove(&id) {
                Some(entry) => entry,
                None => continue,
            };
            for outpoint in policy::spent_outpoints(&entry.tx) {
                self.spent.remove(&outpoint);
            }
            for (other_id, other_entry) in &self.entries {
                if policy::spent_outpoints(&other_entry.tx)
                    .iter()
                    .any(|o| o.hash == id)
                {
                    stack.push(*other_id);
                }
            }
            removed.push(entry);
        }
        removed
    }

    /// Removes `txid` only, leaving any descendant entries in place: used
    /// when a block confirms a transaction, since its former descendants
    /// now resolve against the confirmed output instead.
    fn remove_single(&mut self, txid: &transaction::Hash) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for outpoint in policy::spent_outpoints(&entry.tx) {
            self.spent.remove(&outpoint);
        }
        Some(entry)
    }

    /// Resolves `outpoint`'s value against the in-mempool output first,
    /// falling back to the chain's UTXO set.
    async fn resolve_value(
        &self,
        outpoint: transparent::OutPoint,
    ) -> Option<primitives::amount::Amount<primitives::amount::NegativeAllowed>> {
        if let Some(entry) = self.entries.get(&outpoint.hash) {
            if let Some(output) = entry.tx.outputs.get(outpoint.index as usize) {
                return output.value.constrain().ok();
            }
        }

        match tower::ServiceExt::oneshot(self.chain.clone(), chain::Request::Utxo(outpoint)).await
        {
            Ok(chain::Response::Utxo(Some(utxo))) => utxo.output.value.constrain().ok(),
            _ => None,
        }
    }

    /// Resolves `outpoint` to the full UTXO it references, checking the
    /// mempool's own unconfirmed outputs before falling back to the chain.
    /// Used to build the spent-output map `chain::script::verify_transaction_scripts`
    /// needs (unlike [`Self::resolve_value`], which only resolves value).
    async fn resolve_utxo(&self, outpoint: transparent::OutPoint) -> Option<store::Utxo> {
        if let Some(entry) = self.entries.get(&outpoint.hash) {
            if let Some(output) = entry.tx.outputs.get(outpoint.index as usize) {
                return Some(store::Utxo {
                    output: output.clone(),
                    height: entry.entry_height,
                    from_coinbase: false,
                });
            }
        }

        match tower::ServiceExt::oneshot(self.chain.clone(), chain::Request::Utxo(outpoint)).await
        {
            Ok(chain::Response::Utxo(utxo)) => utxo,
            _ => None,
        }
    }

    /// Returns every (transitive) ancestor txid of `txid` already in the
    /// pool, not including `txid` itself.
    fn ancestors_of(&self, txid: transaction::Hash) -> HashSet<transaction::Hash> {
        let mut seen = HashSet::new();
        let mut stack = vec![txid];
        while let Some(current) = stack.pop() {
            let tx = match self.entries.get(&current) {
                Some(entry) => entry.tx.clone(),
                None => continue,
            };
            for parent in self.parents_of(&tx) {
                if seen.insert(parent) {
                    stack.push(parent);
                }
            }
        }
        seen
    }

    async fn add_transaction(
        &mut self,
        tx: Arc<Transaction>,
        now: DateTime<Utc>,
    ) -> Result<transaction::Hash, MempoolError> {
        let txid = tx.hash();
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::Duplicate);
        }

        policy::check_standard(&tx)?;

        let spent = policy::spent_outpoints(&tx);
        if spent.is_empty() {
            return Err(MempoolError::MissingInput);
        }

        let mut conflicting_txids = HashSet::new();
        for outpoint in &spent {
            if let Some(owner) = self.spent.get(outpoint) {
                conflicting_txids.insert(*owner);
            }
        }
        let conflicts: Vec<MempoolEntry> = conflicting_txids
            .iter()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect();

        let mut resolved = HashMap::new();
        let mut missing = Vec::new();
        for outpoint in &spent {
            match self.resolve_value(*outpoint).await {
                Some(value) => {
                    resolved.insert(*outpoint, value);
                }
                None => missing.push(*outpoint),
            }
        }

        if !missing.is_empty() {
            self.orphans.insert(tx, missing, now);
            return Err(MempoolError::Orphan);
        }

        let fee = policy::compute_fee(&tx, &resolved)?;
        let vsize = tx.len() as u64;
        let fee_rate = if vsize == 0 {
            0
        } else {
            fee.satoshis() * 1000 / vsize as i64
        };
        if fee.satoshis() < 0 || fee_rate < self.min_relay_fee_per_kvb {
            return Err(MempoolError::FeeTooLow);
        }

        let conflict_refs: Vec<&MempoolEntry> = conflicts.iter().collect();
        policy::check_replacement(fee, vsize, &conflict_refs)?;

        let entry_height = self.chain_tip_height().await;
        let verify_height = Height(entry_height.0 + 1);
        let mut spent_utxos = HashMap::new();
        for outpoint in &spent {
            if let Some(utxo) = self.resolve_utxo(*outpoint).await {
                spent_utxos.insert(*outpoint, utxo);
            }
        }
        chain::script::verify_transaction_scripts(&tx, self.network, verify_height, &spent_utxos)
            .await
            .map_err(|error| match error {
                chain::error::TransactionError::ScriptFailed(index) => {
                    MempoolError::ScriptVerifyFailed(index)
                }
                _ => MempoolError::MissingInput,
            })?;

        for id in &conflicting_txids {
            self.remove_with_descendants(*id);
        }

        let entry = MempoolEntry::new(tx, fee, now, entry_height);
        self.entries.insert(txid, entry);
        for outpoint in &spent {
            self.spent.insert(*outpoint, txid);
        }
        self.recompute_stats();

        let inserted = &self.entries[&txid];
        if let Err(error) =
            policy::check_package_limits(inserted.ancestor_count, inserted.ancestor_vsize)
        {
            self.remove_with_descendants(txid);
            self.recompute_stats();
            return Err(error);
        }

        let ancestors = self.ancestors_of(txid);
        for ancestor in &ancestors {
            if let Some(ancestor_entry) = self.entries.get(ancestor) {
                if let Err(error) = policy::check_descendant_limits(
                    ancestor_entry.descendant_count,
                    ancestor_entry.descendant_vsize,
                ) {
                    self.remove_with_descendants(txid);
                    self.recompute_stats();
                    return Err(error);
                }
            }
        }

        self.evict_if_over_capacity();

        tracing::debug!(?txid, fee = fee.satoshis(), "admitted transaction");
        Ok(txid)
    }

    /// Evicts the lowest ancestor-feerate package until the pool is back
    /// within [`Config::max_mempool_vsize`], raising the dynamic minimum
    /// relay fee to the evicted rate plus one increment (ยง4.3).
    fn evict_if_over_capacity(&mut self) {
        let total_vsize: u64 = self.entries.values().map(|e| e.vsize).sum();
        if total_vsize <= self.config.max_mempool_vsize {
            return;
        }

        while self
            .entries
            .values()
            .map(|e| e.vsize)
            .sum::<u64>()
            > self.config.max_mempool_vsize
        {
            let lowest = self
                .entries
                .values()
                .min_by_key(|e| e.ancestor_fee_rate_per_kvb())
                .map(|e| (e.txid, e.ancestor_fee_rate_per_kvb()));

            let (txid, rate) = match lowest {
                Some(found) => found,
                None => break,
            };

            for evicted in self.remove_with_descendants(txid) {
                self.fees.record_miss(evicted.fee_rate_per_kvb());
            }
            self.min_relay_fee_per_kvb = rate + policy::MIN_RELAY_FEE_PER_KVB;
            tracing::info!(new_floor = self.min_relay_fee_per_kvb, "evicted under mempool pressure");
        }

        self.recompute_stats();
    }

    /// Decays the dynamic minimum relay fee back toward the configured
    /// floor; called periodically by the caller (the reactor's timer),
    /// not on every request.
    fn decay_min_relay_fee(&mut self) {
        if self.min_relay_fee_per_kvb > policy::MIN_RELAY_FEE_PER_KVB {
            self.min_relay_fee_per_kvb =
                (self.min_relay_fee_per_kvb as f64 * 0.5) as i64;
            if self.min_relay_fee_per_kvb < policy::MIN_RELAY_FEE_PER_KVB {
                self.min_relay_fee_per_kvb = policy::MIN_RELAY_FEE_PER_KVB;
            }
        }
    }

    async fn on_block_connected(&mut self, block: Arc<Block>) {
        let confirmed_height = block.coinbase_height();

        for tx in block.transactions.iter().skip(1) {
            let txid = tx.hash();
            if let Some(entry) = self.remove_single(&txid) {
                if let Some(confirmed_height) = confirmed_height {
                    let blocks_to_confirm =
                        confirmed_height.0.saturating_sub(entry.entry_height.0) as usize;
                    self.fees
                        .record_confirmation(entry.fee_rate_per_kvb(), blocks_to_confirm);
                }
            }

            let conflicting: HashSet<_> = policy::spent_outpoints(tx)
                .into_iter()
                .filter_map(|outpoint| self.spent.get(&outpoint).copied())
                .collect();
            for other in conflicting {
                self.remove_with_descendants(other);
            }
        }
        self.recompute_stats();
        self.fees.decay();
        self.decay_min_relay_fee();
    }

    async fn on_block_disconnected(&mut self, block: Arc<Block>, now: DateTime<Utc>) {
        let entry_height = self.chain_tip_height().await;
        for tx in block.transactions.iter().skip(1) {
            let txid = tx.hash();
            if self.entries.contains_key(&txid) {
                continue;
            }

            let spent = policy::spent_outpoints(tx);
            let mut resolved = HashMap::new();
            let mut resolvable = true;
            for outpoint in &spent {
                match self.resolve_value(*outpoint).await {
                    Some(value) => {
                        resolved.insert(*outpoint, value);
                    }
                    None => {
                        resolvable = false;
                        break;
                    }
                }
            }
            if !resolvable {
                continue;
            }

            let fee = match policy::compute_fee(tx, &resolved) {
                Ok(fee) => fee,
                Err(_) => continue,
            };

            let entry = MempoolEntry::new(tx.clone(), fee, now, entry_height);
            self.entries.insert(txid, entry);
            for outpoint in spent {
                self.spent.insert(outpoint, txid);
            }
        }
        self.recompute_stats();
    }

    fn template(&self) -> Vec<Arc<Transaction>> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| b.ancestor_fee_rate_per_kvb().cmp(&a.ancestor_fee_rate_per_kvb()));
        entries.into_iter().map(|e| e.tx.clone()).collect()
    }
}

/// The mempool service: owns the admitted set and a handle to the chain
/// state so it can resolve inputs and estimate fees.
#[derive(Clone)]
pub struct Mempool {
    inner: Arc<Mutex<Inner>>,
}

impl Mempool {
    pub fn new(
        config: Config,
        network: Network,
        chain: Buffer<chain::service::StateService, chain::Request>,
    ) -> Self {
        Mempool {
            inner: Arc::new(Mutex::new(Inner {
                config,
                network,
                chain,
                entries: HashMap::new(),
                spent: HashMap::new(),
                orphans: OrphanPool::new(),
                fees: FeeEstimator::new(),
                min_relay_fee_per_kvb: policy::MIN_RELAY_FEE_PER_KVB,
            })),
        }
    }
}

impl Service<Request> for Mempool {
    type Response = Response;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let response = match req {
                Request::AddTransaction(tx) => {
                    match inner.lock().await.add_transaction(tx, Utc::now()).await {
                        Ok(txid) => Response::Added(txid),
                        Err(error) => Response::Rejected(error),
                    }
                }
                Request::Transaction(txid) => {
                    let guard = inner.lock().await;
                    Response::Transaction(guard.entries.get(&txid).map(|e| e.tx.clone()))
                }
                Request::Contains(txid) => {
                    let guard = inner.lock().await;
                    Response::Contains(guard.entries.contains_key(&txid))
                }
                Request::TxIds => {
                    let guard = inner.lock().await;
                    Response::TxIds(guard.entries.keys().copied().collect())
                }
                Request::GetTemplate => {
                    let guard = inner.lock().await;
                    Response::Template(guard.template())
                }
                Request::EstimateFee(target) => {
                    let guard = inner.lock().await;
                    Response::FeeRate(guard.fees.estimate(target))
                }
                Request::BlockConnected(block) => {
                    inner.lock().await.on_block_connected(block).await;
                    Response::Applied
                }
                Request::BlockDisconnected(block) => {
                    inner
                        .lock()
                        .await
                        .on_block_disconnected(block, Utc::now())
                        .await;
                    Response::Applied
                }
            };
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use primitives::{
        amount::{Amount, NonNegative},
        block::{self, Header},
        transaction::LockTime,
        transparent::{Input, OutPoint, Output, Script},
        work::difficulty::CompactDifficulty,
    };

    /// A scriptPubKey that evaluates to `true` without any unlocking data:
    /// `OP_TRUE` followed by `len - 1` `OP_NOP`s, left at exactly `len`
    /// bytes so [`policy::check_standard`]'s byte-length standardness
    /// buckets accept it.
    fn anyone_can_spend_script(len: usize) -> Script {
        let mut bytes = vec![0x61; len];
        bytes[0] = 0x51;
        Script(bytes)
    }

    fn dummy_output(value: i64) -> Output {
        Output {
            value: Amount::<NonNegative>::try_from(value).unwrap(),
            lock_script: anyone_can_spend_script(22),
        }
    }

    fn spending_tx(
        funding_txid: transaction::Hash,
        output_value: i64,
        sequence: u32,
    ) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: funding_txid,
                    index: 0,
                },
                unlock_script: Script(vec![]),
                sequence,
                witness: vec![],
            }],
            vec![dummy_output(output_value)],
            LockTime::unlocked(),
        ))
    }

    async fn new_test_inner() -> Inner {
        let disk = store::init(
            store::Config {
                ephemeral: true,
                ..Default::default()
            },
            Network::Mainnet,
        );
        let listeners = chain::listener::FanOut::new();
        let chain = chain::init(Network::Mainnet, disk, listeners).await;

        Inner {
            config: Config::default(),
            network: Network::Mainnet,
            chain,
            entries: HashMap::new(),
            spent: HashMap::new(),
            orphans: OrphanPool::new(),
            fees: FeeEstimator::new(),
            min_relay_fee_per_kvb: policy::MIN_RELAY_FEE_PER_KVB,
        }
    }

    fn dummy_block(transactions: Vec<Arc<Transaction>>) -> Arc<Block> {
        let header = Header::new(
            1,
            block::Hash([0; 32]),
            block::merkle::Root([0; 32]),
            Utc::now(),
            CompactDifficulty::from_bits(0x207fffff),
            0,
        );
        Arc::new(Block { header, transactions })
    }

    #[tokio::test]
    async fn rbf_replacement_evicts_lower_fee_conflict() {
        let mut inner = new_test_inner().await;

        let funding = Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: transaction::Hash([0; 32]),
                    index: 0,
                },
                unlock_script: Script(vec![]),
                sequence: 0xffff_ffff,
                witness: vec![],
            }],
            vec![dummy_output(100_000)],
            LockTime::unlocked(),
        ));
        let funding_txid = funding.hash();
        let funding_entry = MempoolEntry::new(
            funding.clone(),
            Amount::zero(),
            Utc::now(),
            Height(0),
        );
        inner.entries.insert(funding_txid, funding_entry);

        // T1 pays a 1000-satoshi fee and opts into RBF.
        let t1 = spending_tx(funding_txid, 99_000, 0xffff_fffd);
        let t1_id = inner
            .add_transaction(t1, Utc::now())
            .await
            .expect("T1 is admitted");
        assert!(inner.entries.contains_key(&t1_id));

        // T2 spends the same funding output at a strictly higher feerate
        // (3000 satoshis), replacing T1 under BIP125.
        let t2 = spending_tx(funding_txid, 97_000, 0xffff_fffd);
        let t2_id = t2.hash();
        inner
            .add_transaction(t2, Utc::now())
            .await
            .expect("T2 replaces T1");

        assert!(!inner.entries.contains_key(&t1_id), "T1 must be evicted");
        assert!(inner.entries.contains_key(&t2_id), "T2 must be admitted");
    }

    #[tokio::test]
    async fn rbf_replacement_rejects_lower_feerate() {
        let mut inner = new_test_inner().await;

        let funding = Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: transaction::Hash([1; 32]),
                    index: 0,
                },
                unlock_script: Script(vec![]),
                sequence: 0xffff_ffff,
                witness: vec![],
            }],
            vec![dummy_output(100_000)],
            LockTime::unlocked(),
        ));
        let funding_txid = funding.hash();
        inner.entries.insert(
            funding_txid,
            MempoolEntry::new(funding.clone(), Amount::zero(), Utc::now(), Height(0)),
        );

        let t1 = spending_tx(funding_txid, 99_000, 0xffff_fffd);
        inner
            .add_transaction(t1, Utc::now())
            .await
            .expect("T1 is admitted");

        // T3 spends the same output but pays a lower fee than T1; must be
        // rejected, leaving T1 in place.
        let t3 = spending_tx(funding_txid, 99_500, 0xffff_fffd);
        let result = inner.add_transaction(t3, Utc::now()).await;
        assert!(matches!(result, Err(MempoolError::Conflict(_))));
    }

    #[tokio::test]
    async fn block_connect_removes_confirmed_entries() {
        let mut inner = new_test_inner().await;

        let funding = Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: transaction::Hash([2; 32]),
                    index: 0,
                },
                unlock_script: Script(vec![]),
                sequence: 0xffff_ffff,
                witness: vec![],
            }],
            vec![dummy_output(100_000)],
            LockTime::unlocked(),
        ));
        let funding_txid = funding.hash();
        inner.entries.insert(
            funding_txid,
            MempoolEntry::new(funding.clone(), Amount::zero(), Utc::now(), Height(0)),
        );

        let t1 = spending_tx(funding_txid, 99_000, 0xffff_ffff);
        let t1_id = inner
            .add_transaction(t1.clone(), Utc::now())
            .await
            .expect("T1 is admitted");
        assert!(inner.entries.contains_key(&t1_id));

        let block = dummy_block(vec![funding, t1]);
        inner.on_block_connected(block).await;

        assert!(
            !inner.entries.contains_key(&t1_id),
            "confirmed transaction must leave the mempool"
        );
    }
}
