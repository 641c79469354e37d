//! Shared helpers used by the finalized-state implementation.

use primitives::block::Height;

/// Computes the heights used in a block locator: the ten most recent
/// heights, then heights doubling the gap each step back to genesis.
///
/// This is the standard Bitcoin locator algorithm (`CBlockLocator`):
/// starting at `tip_height`, step back one block at a time for the first
/// ten entries, then double the step on each subsequent entry, always
/// including genesis (height 0) as the final entry.
pub fn block_locator_heights(tip_height: Height) -> Vec<Height> {
    let mut heights = Vec::new();
    let mut height = tip_height.0;
    let mut step = 1u32;
    let mut count = 0;

    loop {
        heights.push(Height(height));

        if height == 0 {
            break;
        }

        if count >= 10 {
            step = step.saturating_mul(2);
        }
        count += 1;

        height = height.saturating_sub(step);
    }

    heights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_always_ends_at_genesis() {
        for tip in [0u32, 1, 10, 11, 2015, 2016, 1_000_000] {
            let heights = block_locator_heights(Height(tip));
            assert_eq!(heights.last(), Some(&Height(0)));
            assert_eq!(heights.first(), Some(&Height(tip)));
        }
    }

    #[test]
    fn locator_is_strictly_decreasing() {
        let heights = block_locator_heights(Height(1_000_000));
        for pair in heights.windows(2) {
            assert!(pair[0].0 > pair[1].0);
        }
    }
}
