//! Thread-local pseudo-random numbers for scheduler-discretionary choices.
//!
//! The only consumer is [`PlacementPolicy::Arbitrary`], which may put a block
//! on any available processor. The generator is a **thread-local
//! xorshift64\***: lock-free, allocation-free, and deterministic per thread
//! for a given call sequence.
//!
//! It is **not cryptographically secure**.
//!
//! [`PlacementPolicy::Arbitrary`]: crate::engine::placement::PlacementPolicy::Arbitrary

use std::cell::Cell;
use std::thread_local;

thread_local! {static TL_RNG: Cell<u64> = const { Cell::new(0x9E37_79B9_7F4A_7C15) };}

/// Returns a thread-local pseudo-random `u64`.
#[inline]
pub fn tl_rand_u64() -> u64 {
    TL_RNG.with(|c| {
        let mut x = c.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        c.set(x);
        x.wrapping_mul(0x2545F4914F6CDD1D)
    })
}

/// Returns a pseudo-random index in `0..len`. `len` must be non-zero.
#[inline]
pub fn tl_rand_index(len: usize) -> usize {
    (tl_rand_u64() % len as u64) as usize
}
