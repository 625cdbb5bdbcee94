// Every sampling decision of the library (minibatch shuffling, replay sampling, exploration noise)
// goes through this generator so that a single seed reproduces a run.

use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use std::cell::RefCell;

thread_local! {
    pub static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
}

pub fn seed(seed: u64) {
    RNG.with_borrow_mut(|rng| *rng = StdRng::seed_from_u64(seed));
}

pub fn standard_normal() -> f32 {
    RNG.with_borrow_mut(|rng| rng.sample(StandardNormal))
}
