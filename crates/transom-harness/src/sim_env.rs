//! Simulation environment.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use transom_core::Environment;

/// Deterministic environment for tests.
///
/// Randomness comes from a seeded ChaCha stream, so request-id sequences
/// are reproducible. Time is anchored to tokio's clock: under a paused
/// test runtime, `now()` advances with virtual time, which makes keepalive
/// deadlines testable without real waiting.
#[derive(Debug, Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    epoch_std: Instant,
    epoch_tokio: tokio::time::Instant,
}

impl SimEnv {
    /// Environment with a fixed default seed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            epoch_std: Instant::now(),
            epoch_tokio: tokio::time::Instant::now(),
        }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        // Project tokio's (possibly virtual) elapsed time onto a std
        // instant, since the state machine speaks std time.
        self.epoch_std + self.epoch_tokio.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.fill_bytes(buffer);
    }
}
