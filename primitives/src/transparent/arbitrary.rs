use proptest::{collection::vec, prelude::*};

use crate::{block, cached::Cached, transaction, LedgerState};

use super::{CoinbaseData, Input, OutPoint, Output};

impl Input {
    /// Generate a proptest strategy for a vec of transparent inputs, honoring
    /// `ledger_state.is_coinbase`: coinbase transactions get exactly one
    /// `Coinbase` input, everything else gets `1..=max_len` `PrevOut` inputs.
    pub fn vec_strategy(ledger_state: LedgerState, max_len: usize) -> BoxedStrategy<Vec<Input>> {
        if ledger_state.is_coinbase {
            Input::arbitrary_coinbase(ledger_state.tip_height)
                .prop_map(|input| vec![input])
                .boxed()
        } else {
            vec(Input::arbitrary_prevout(), 1..=max_len.max(1)).boxed()
        }
    }

    fn arbitrary_coinbase(tip_height: block::Height) -> BoxedStrategy<Input> {
        let height = block::Height(tip_height.0 + 1);
        (vec(any::<u8>(), 2..95), any::<u32>())
            .prop_map(move |(extra_data, sequence)| Input::Coinbase {
                height: Some(Cached::from(height)),
                data: CoinbaseData(extra_data),
                sequence,
                witness: Vec::new(),
            })
            .boxed()
    }

    fn arbitrary_prevout() -> BoxedStrategy<Input> {
        (any::<OutPoint>(), any::<super::Script>(), any::<u32>())
            .prop_map(|(outpoint, unlock_script, sequence)| Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
                witness: Vec::new(),
            })
            .boxed()
    }
}

impl Arbitrary for OutPoint {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<transaction::Hash>(), any::<u32>())
            .prop_map(|(hash, index)| OutPoint { hash, index })
            .boxed()
    }
}

impl Arbitrary for Output {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<crate::amount::Amount<crate::amount::NonNegative>>(), any::<super::Script>())
            .prop_map(|(value, lock_script)| Output { value, lock_script })
            .boxed()
    }
}
