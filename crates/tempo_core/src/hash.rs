//! Provides replacements for `std::hash` items using [`foldhash`]

use core::hash::BuildHasher;
pub use foldhash::fast::{FixedState, FoldHasher as DefaultHasher};

const FIXED_HASHER: FixedState =
    FixedState::with_seed(0b0110100101011100110110010001011011100101100011110100101001110110);

/// Deterministic hasher based upon a random but fixed state
///
/// Iteration order of maps built on this hasher is stable across runs,
/// which keeps rule-application counters and witness cycles reproducible.
#[derive(Copy, Clone, Default, Debug)]
pub struct FixedHasher;
impl BuildHasher for FixedHasher {
    type Hasher = DefaultHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FIXED_HASHER.build_hasher()
    }
}
