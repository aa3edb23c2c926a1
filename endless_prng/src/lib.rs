// Seedable pseudo-random source for the Endless Player.
//
// Every random decision the player makes (which phrase-initial symbol starts a
// trajectory, which successor follows a symbol, which key the uniform fallback
// lands on) draws from a `ChainRng` that the caller constructs and passes in.
// Nothing reaches for a global or thread-local generator, so a run seeded with
// the same value replays the same note stream.
//
// The generator is xoshiro256++ (Blackman & Vigna, 2019), state expanded from
// a single `u64` with SplitMix64. Integer-only: no floating point in the core
// step, so output is identical on every platform.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Xoshiro256++ generator with a 256-bit state.
///
/// Cloning a `ChainRng` forks the stream: both copies produce the same
/// sequence from that point on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRng {
    s: [u64; 4],
}

impl ChainRng {
    /// Seed from a `u64`. Equal seeds give equal streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Seed from the system clock, for runs where reproducibility is not
    /// wanted. Returns the generator together with the seed it used so the
    /// caller can log it and replay the run later.
    pub fn from_time() -> (Self, u64) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seed = nanos ^ u64::from(std::process::id()).rotate_left(32);
        (Self::new(seed), seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform integer in `[low, high)`, without modulo bias.
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: empty range {low}..{high}");
        let span = high - low;
        if span.is_power_of_two() {
            return low + (self.next_u64() & (span - 1));
        }
        // Reject the short tail of the u64 range that would bias low values.
        let threshold = span.wrapping_neg() % span;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % span);
            }
        }
    }

    /// Uniform integer in `[low, high]`, both ends reachable.
    ///
    /// Panics if `low > high`. The full `0..=u64::MAX` span is handled by
    /// returning a raw draw.
    pub fn range_u64_inclusive(&mut self, low: u64, high: u64) -> u64 {
        assert!(low <= high, "range_u64_inclusive: empty range {low}..={high}");
        match high.checked_add(1) {
            Some(end) => self.range_u64(low, end),
            None if low == 0 => self.next_u64(),
            None => self.range_u64(low - 1, high) + 1,
        }
    }

    /// Uniform index in `[0, len)`. Panics if `len == 0`.
    pub fn index(&mut self, len: usize) -> usize {
        self.range_u64(0, len as u64) as usize
    }

    /// Uniformly pick one element of a slice, or `None` when it is empty.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            items.get(self.index(items.len()))
        }
    }
}

/// SplitMix64 step, used only to expand the seed into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
