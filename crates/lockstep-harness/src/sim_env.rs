//! Virtual clock environment.
//!
//! Time only moves when a test calls [`SimEnv::advance`] or something
//! sleeps. Clones share one clock, so a server and its replicas observe the
//! same instant.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use lockstep_core::Environment;

/// Shared hand-driven clock.
#[derive(Debug, Clone)]
pub struct SimEnv {
    now: Arc<Mutex<Instant>>,
}

impl SimEnv {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self { now: Arc::new(Mutex::new(Instant::now())) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.lock() += by;
    }

    fn lock(&self) -> MutexGuard<'_, Instant> {
        self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        *self.lock()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}
