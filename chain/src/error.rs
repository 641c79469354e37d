//! Consensus- and policy-level error types.
//!
//! The top-level [`ConsensusError`] groups errors by the severity classes
//! in ยง7: a permanently invalid block or header (`ConsensusInvalid`,
//! blacklist the hash and drop the peer that sent it), an orphan whose
//! parent we haven't seen, a duplicate of something we already have, or a
//! local-only policy rejection that must never be blamed on the peer that
//! relayed it.

use primitives::{
    amount,
    block::{self, Height},
    parameters::Network,
    transaction,
    work::difficulty::ExpandedDifficulty,
};

/// An error encountered validating a block header or its context.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("block has no transactions")]
    NoTransactions,

    #[error("block {0:?} first transaction is not coinbase")]
    CoinbaseInTransparentInput,

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Subsidy(#[from] SubsidyError),

    #[error("block {1:?} at height {0:?} has invalid difficulty encoding")]
    InvalidDifficulty(Height, block::Hash),

    #[error(
        "block {1:?} at height {0:?} has difficulty threshold {2:?} which is above \
         the {4} network difficulty limit {3:?}"
    )]
    TargetDifficultyLimit(
        Height,
        block::Hash,
        ExpandedDifficulty,
        Network,
        &'static str,
    ),

    #[error(
        "block {1:?} at height {0:?} hash is greater than the difficulty threshold {2:?} on {3}"
    )]
    DifficultyFilter(Height, block::Hash, ExpandedDifficulty, Network),

    #[error("block {1:?} at height {0:?} has an invalid retargeted difficulty")]
    InvalidRetarget(Height, block::Hash),

    #[error("block has a merkle root mismatch: computed {actual:?}, header has {expected:?}")]
    BadMerkleRoot {
        actual: primitives::block::merkle::Root,
        expected: primitives::block::merkle::Root,
    },

    #[error("block contains duplicate transactions")]
    DuplicateTransaction,

    #[error("block exceeds the maximum serialized size")]
    TooLarge,

    #[error("block timestamp {0:?} is not greater than the median of the previous 11 blocks")]
    TimeTooOld(chrono::DateTime<chrono::Utc>),

    #[error("block timestamp is more than two hours in the future")]
    TimeTooNew(#[from] block::BlockTimeError),

    #[error("block at height {0:?} does not match the checkpoint hash")]
    CheckpointMismatch(Height),

    #[error("block's coinbase does not report the expected BIP34 height {0:?}")]
    CoinbaseHeightMismatch(Height),

    #[error("block exceeds the weighted sigop budget")]
    TooManySigops,

    #[error("a non-coinbase transaction in the block spends an immature coinbase output")]
    ImmatureCoinbaseSpend,

    #[error("script verification failed for at least one input")]
    ScriptFailed,

    #[error("block's total transaction fees overflow the amount range")]
    FeeOverflow,

    #[error("a non-coinbase transaction in the block is not final at this height/time")]
    NonFinalTransaction,

    #[error("block's witness commitment does not match its transactions' witness root")]
    WitnessCommitmentMismatch,

    #[error("block activates SegWit but its coinbase carries no witness commitment")]
    MissingWitnessCommitment,
}

/// An error encountered validating a transaction.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction has no inputs")]
    NoInputs,

    #[error("transaction has no outputs")]
    NoOutputs,

    #[error("coinbase transaction is not in the first position")]
    CoinbasePosition,

    #[error("coinbase input found in a non-coinbase transaction")]
    CoinbaseInputFound,

    #[error("transaction is not final given the current height/median-time-past")]
    NotFinal,

    #[error("transaction spends the same outpoint twice")]
    DuplicateInput,

    #[error("transaction input {0:?} does not resolve to an unspent output")]
    MissingInput(primitives::transparent::OutPoint),

    #[error("transaction output total {output} exceeds input total {input}")]
    ValueOverflow { input: i64, output: i64 },

    #[error(transparent)]
    Amount(#[from] amount::Error),

    #[error("script evaluation failed for input {0}")]
    ScriptFailed(usize),

    #[error("transaction exceeds the standard size policy")]
    ExceedsStandardSize,

    #[error("transaction has a dust output")]
    DustOutput,

    #[error("transaction uses a non-standard script form")]
    NonStandardScript,
}

/// An error encountered validating the coinbase subsidy.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubsidyError {
    #[error("block has no coinbase transaction")]
    NoCoinbase,

    #[error("coinbase output total {actual:?} exceeds the subsidy plus fees {allowed:?}")]
    SubsidyTooHigh {
        actual: primitives::amount::Amount<primitives::amount::NonNegative>,
        allowed: primitives::amount::Amount<primitives::amount::NonNegative>,
    },
}

/// The top-level error classification used by `chain`'s public contract and
/// by `Pool`/`Mempool` to decide how to react (ยง7): whether to punish the
/// peer that sent the data, log-and-ignore, or treat it as transient.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Serialization failed; the peer sent malformed bytes.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// A context-free or contextual consensus rule was violated. This
    /// verdict is permanent: the hash is blacklisted and any descendant is
    /// rejected without re-validation.
    #[error(transparent)]
    Invalid(#[from] BlockError),

    /// A local policy rule rejected the data; never punish the source.
    #[error("rejected by local policy: {0}")]
    PolicyRejected(String),

    /// The parent header/block is not yet known.
    #[error("orphan: parent not found")]
    Orphan,

    /// This exact hash has already been accepted.
    #[error("duplicate")]
    Duplicate,

    /// The requested item does not exist.
    #[error("not found")]
    NotFound,

    /// A disk operation failed; the caller should retry once per ยง7.
    #[error("io error: {0}")]
    IoError(String),

    /// An unrecoverable invariant violation; the node should log and stop.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<TransactionError> for ConsensusError {
    fn from(error: TransactionError) -> Self {
        ConsensusError::Invalid(BlockError::Transaction(error))
    }
}

impl From<store::BoxError> for ConsensusError {
    fn from(error: store::BoxError) -> Self {
        ConsensusError::IoError(error.to_string())
    }
}

impl ConsensusError {
    /// Returns `true` if this error should increase a peer's misbehavior
    /// score and potentially blacklist the offending hash (ยง7).
    pub fn punishes_peer(&self) -> bool {
        matches!(
            self,
            ConsensusError::Malformed(_) | ConsensusError::Invalid(_)
        )
    }
}
