//! Environment abstraction.
//!
//! Supplies the effects the protocol cannot produce itself: the current
//! time, timer sleeps, and randomness for request identifiers. Production
//! runtimes use the system clock and OS randomness; tests inject seeded,
//! virtual implementations so every run is reproducible.

use std::{future::Future, time::Duration, time::Instant};

/// Source of time and randomness.
pub trait Environment: Clone + Send + 'static {
    /// Current time instant.
    fn now(&self) -> Instant;

    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);
}
