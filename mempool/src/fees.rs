//! Fee-rate estimation (ยง4.3, Open Question resolution): a conservative
//! bucketed-decay estimator mirroring Bitcoin Core's `CBlockPolicyEstimator`
//! at reduced scope. Confirmations are tracked in logarithmic fee-rate
//! buckets; each bucket keeps an exponentially decayed count of
//! transactions confirmed within a target window and a decayed count of
//! transactions still unconfirmed after that many blocks. `estimate`
//! returns the lowest bucket whose decayed success ratio clears a fixed
//! confidence threshold.

use crate::policy::MIN_RELAY_FEE_PER_KVB;

/// Buckets are geometric: each one covers fee rates up to 1.1x the
/// previous bucket's ceiling, from the minimum relay fee up to 1 BTC/kvB.
const BUCKET_GROWTH: f64 = 1.1;
const MAX_BUCKET_FEE_RATE: f64 = 100_000_000.0;

/// The decay applied per observed block: a half-life of roughly 48
/// blocks, matching Core's short-horizon estimator.
const DECAY: f64 = 0.998;

/// A bucket qualifies for an estimate only once it has observed at least
/// this many (decayed) data points.
const MIN_OBSERVATIONS: f64 = 10.0;

/// The decayed hit ratio a bucket must clear to be considered reliable.
const SUCCESS_THRESHOLD: f64 = 0.85;

/// The maximum confirmation target this estimator tracks; requests past
/// this horizon are clamped.
const MAX_CONFIRMS: usize = 25;

#[derive(Clone, Debug)]
struct Bucket {
    /// The upper bound, in satoshis per kvB, of fee rates sorted into
    /// this bucket.
    ceiling: i64,
    /// Decayed count of transactions that confirmed within
    /// `MAX_CONFIRMS` blocks of entering the mempool at this feerate.
    confirmed: Vec<f64>,
    /// Decayed count of transactions still unconfirmed after
    /// `MAX_CONFIRMS` blocks.
    missed: f64,
}

/// Tracks confirmation outcomes by feerate bucket to answer
/// `estimateFee(targetBlocks)` queries.
pub struct FeeEstimator {
    buckets: Vec<Bucket>,
}

impl FeeEstimator {
    pub fn new() -> Self {
        let mut ceiling = MIN_RELAY_FEE_PER_KVB as f64;
        let mut buckets = Vec::new();
        while ceiling < MAX_BUCKET_FEE_RATE {
            buckets.push(Bucket {
                ceiling: ceiling as i64,
                confirmed: vec![0.0; MAX_CONFIRMS],
                missed: 0.0,
            });
            ceiling *= BUCKET_GROWTH;
        }
        FeeEstimator { buckets }
    }

    fn bucket_index(&self, fee_rate: i64) -> usize {
        self.buckets
            .iter()
            .position(|bucket| fee_rate <= bucket.ceiling)
            .unwrap_or(self.buckets.len() - 1)
    }

    /// Decays every bucket's counters; called once per newly connected
    /// block so old observations stop dominating the estimate.
    pub fn decay(&mut self) {
        for bucket in &mut self.buckets {
            for count in &mut bucket.confirmed {
                *count *= DECAY;
            }
            bucket.missed *= DECAY;
        }
    }

    /// Records that a transaction entering the mempool at `fee_rate`
    /// confirmed after `blocks_to_confirm` blocks.
    pub fn record_confirmation(&mut self, fee_rate: i64, blocks_to_confirm: usize) {
        let index = self.bucket_index(fee_rate);
        let slot = blocks_to_confirm.min(MAX_CONFIRMS - 1);
        self.buckets[index].confirmed[slot] += 1.0;
    }

    /// Records that a transaction entering the mempool at `fee_rate`
    /// was still unconfirmed after `MAX_CONFIRMS` blocks (evicted,
    /// expired, or simply slow).
    pub fn record_miss(&mut self, fee_rate: i64) {
        let index = self.bucket_index(fee_rate);
        self.buckets[index].missed += 1.0;
    }

    /// Returns the lowest feerate (satoshis per kvB) whose decayed
    /// success ratio for confirming within `target_blocks` clears
    /// [`SUCCESS_THRESHOLD`], or [`MIN_RELAY_FEE_PER_KVB`] if no bucket
    /// qualifies.
    pub fn estimate(&self, target_blocks: usize) -> i64 {
        let target = target_blocks.clamp(1, MAX_CONFIRMS);

        for bucket in &self.buckets {
            let confirmed_within: f64 = bucket.confirmed[..target].iter().sum();
            let total = confirmed_within + bucket.missed;
            if total < MIN_OBSERVATIONS {
                continue;
            }
            if confirmed_within / total >= SUCCESS_THRESHOLD {
                return bucket.ceiling;
            }
        }

        MIN_RELAY_FEE_PER_KVB
    }
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_estimator_returns_minimum() {
        let estimator = FeeEstimator::new();
        assert_eq!(estimator.estimate(6), MIN_RELAY_FEE_PER_KVB);
    }

    #[test]
    fn bucket_with_enough_fast_confirmations_qualifies() {
        let mut estimator = FeeEstimator::new();
        let fee_rate = 5_000;
        for _ in 0..20 {
            estimator.record_confirmation(fee_rate, 1);
        }
        assert!(estimator.estimate(2) <= fee_rate);
    }

    #[test]
    fn bucket_dominated_by_misses_does_not_qualify() {
        let mut estimator = FeeEstimator::new();
        let fee_rate = 5_000;
        for _ in 0..20 {
            estimator.record_miss(fee_rate);
        }
        assert_eq!(estimator.estimate(2), MIN_RELAY_FEE_PER_KVB);
    }

    #[test]
    fn decay_ages_out_old_observations() {
        let mut estimator = FeeEstimator::new();
        let fee_rate = 5_000;
        for _ in 0..20 {
            estimator.record_confirmation(fee_rate, 1);
        }
        assert!(estimator.estimate(2) <= fee_rate);
        for _ in 0..2000 {
            estimator.decay();
        }
        assert_eq!(estimator.estimate(2), MIN_RELAY_FEE_PER_KVB);
    }
}
