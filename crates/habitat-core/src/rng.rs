//! Deterministic PRNG for random event generation.
//!
//! SplitMix64: 8 bytes of state, identical sequences on every platform for
//! the same seed, and serializable alongside the rest of the mission.

use crate::fixed::{Fixed64, Ticks};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRng {
    state: u64,
}

impl MissionRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform value in `[0, 1)`.
    ///
    /// The upper 32 bits of the draw become the fractional bits of the
    /// Q32.32 result, so every representable fraction is reachable.
    pub fn unit(&mut self) -> Fixed64 {
        Fixed64::from_bits((self.next_u64() >> 32) as i64)
    }

    /// `true` with the given probability. `<= 0` never, `>= 1` always.
    pub fn chance(&mut self, probability: Fixed64) -> bool {
        if probability <= Fixed64::ZERO {
            return false;
        }
        if probability >= Fixed64::ONE {
            return true;
        }
        self.unit() < probability
    }

    /// Uniform integer in `[0, n)`; 0 when `n` is 0.
    pub fn below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        // Multiply-shift keeps the high bits, which are the best mixed.
        ((u128::from(self.next_u64()) * u128::from(n)) >> 64) as u64
    }

    /// Uniform tick count in `[lo, hi]`; `lo` when the range is empty.
    pub fn ticks_between(&mut self, lo: Ticks, hi: Ticks) -> Ticks {
        if hi <= lo {
            return lo;
        }
        lo + self.below((hi - lo).saturating_add(1))
    }

    /// Uniform value in `[lo, hi)`; `lo` when the range is empty.
    pub fn fixed_between(&mut self, lo: Fixed64, hi: Fixed64) -> Fixed64 {
        if hi <= lo {
            return lo;
        }
        let span = hi.saturating_sub(lo);
        lo.saturating_add(span.saturating_mul(self.unit()))
    }

    /// A uniformly chosen element, or `None` for an empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        let len = u64::try_from(items.len()).ok()?;
        let index = usize::try_from(self.below(len)).ok()?;
        items.get(index)
    }

    /// Index drawn with probability proportional to its weight. Non-positive
    /// weights are never drawn; `None` if no weight is positive.
    pub fn pick_weighted(&mut self, weights: &[Fixed64]) -> Option<usize> {
        let total = weights
            .iter()
            .filter(|w| **w > Fixed64::ZERO)
            .fold(Fixed64::ZERO, |acc, w| acc.saturating_add(*w));
        if total <= Fixed64::ZERO {
            return None;
        }
        let target = total.saturating_mul(self.unit());
        let mut cumulative = Fixed64::ZERO;
        let mut last = None;
        for (i, w) in weights.iter().enumerate() {
            if *w <= Fixed64::ZERO {
                continue;
            }
            cumulative = cumulative.saturating_add(*w);
            if target < cumulative {
                return Some(i);
            }
            last = Some(i);
        }
        // Rounding in the saturating sum can leave the target on the edge.
        last
    }

    /// Internal state, for hashing and snapshots.
    pub fn state(&self) -> u64 {
        self.state
    }
}
