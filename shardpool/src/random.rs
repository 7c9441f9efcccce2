//! Shard selection for un-pinned dispatch.
//!
//! Every OS thread lazily seeds its own `SmallRng` from the thread-local
//! `rand::rng()` the first time it dispatches. There is no shared generator,
//! so concurrent dispatchers never contend on it.

use std::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

thread_local! {
    static SHARD_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Returns a pseudo-random shard index in `0..num_shards`.
///
/// `num_shards` must be non-zero.
pub(crate) fn shard_index(num_shards: usize) -> usize {
    debug_assert!(num_shards > 0);
    SHARD_RNG.with(|rng| rng.borrow_mut().random_range(0..num_shards))
}
