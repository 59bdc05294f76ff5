//! Clock abstraction for time-dependent policy
//!
//! Cache TTLs, warning cooldowns, and the sampling loop all read the clock
//! through this trait so tests can drive them deterministically.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Source of "now" and of delays.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Get the current system time
    fn now(&self) -> SystemTime;

    /// Sleep for the specified duration
    async fn sleep(&self, duration: Duration);
}

/// Type alias for shared time provider
pub type SharedTimeProvider = Arc<dyn TimeProvider>;

/// Real wall clock for production use
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock
    pub fn new() -> Self {
        Self
    }

    /// Creates a shared system clock
    pub fn shared() -> SharedTimeProvider {
        Arc::new(Self)
    }
}

#[async_trait]
impl TimeProvider for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Steppable clock for tests.
///
/// `sleep` advances the clock by the requested duration instead of waiting,
/// so a five-minute cooldown elapses in however many simulated ticks it
/// takes rather than in five minutes of test time. `advance` moves the
/// clock directly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<SystemTime>>,
}

impl ManualClock {
    /// Creates a manual clock starting at the current wall time
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Creates a manual clock starting at the given instant
    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeProvider for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock poisoned")
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        // Yield so the task being driven by this clock stays cooperative.
        tokio::task::yield_now().await;
    }
}
