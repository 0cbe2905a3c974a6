//! Monotonic time abstraction.
//!
//! Every timing-dependent behavior in the core (bail recovery windows,
//! heatup stage 2, auto-sleep, broadcast cadence) goes through the
//! [`Clock`] port so that tests can substitute a virtual clock and step
//! time deterministically instead of sleeping for real.

pub use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic point in time, microseconds since an arbitrary boot epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Instant {
    micros: u64,
}

impl Instant {
    pub const EPOCH: Instant = Instant { micros: 0 };

    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    pub fn as_micros(self) -> u64 {
        self.micros
    }

    pub fn as_millis(self) -> u64 {
        self.micros / 1_000
    }

    /// Duration since `earlier`; zero if `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration::from_micros(self.micros.saturating_sub(earlier.micros))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros.saturating_add(rhs.as_micros() as u64))
    }
}

/// Monotonic clock capability.
///
/// Implementations must be cheap to clone; each component holds its own
/// handle to the same underlying time source.
pub trait Clock: Clone {
    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// Block until `deadline` has passed (no-op if already past).
    fn sleep_until(&self, deadline: Instant);
}

// ── Wall clock ────────────────────────────────────────────────

/// Real monotonic clock backed by `std::time::Instant`.
#[derive(Clone)]
pub struct WallClock {
    start: std::time::Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.start.elapsed().as_micros() as u64)
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline.saturating_duration_since(now));
        }
    }
}

// ── Test clock ────────────────────────────────────────────────

/// Shared virtual clock for deterministic tests.
///
/// Cloned handles observe the same time. `sleep_until` advances the clock
/// instead of blocking. An optional per-query auto-advance lets timeout
/// loops (which poll `now()` while waiting for bytes) run to their
/// deadline without an external driver.
#[derive(Clone)]
pub struct TestClock {
    inner: Arc<TestClockInner>,
}

struct TestClockInner {
    now_us: AtomicU64,
    auto_advance_us: AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TestClockInner {
                now_us: AtomicU64::new(0),
                auto_advance_us: AtomicU64::new(0),
            }),
        }
    }

    /// Advance the clock by `d`.
    pub fn advance(&self, d: Duration) {
        self.inner
            .now_us
            .fetch_add(d.as_micros() as u64, Ordering::SeqCst);
    }

    /// Make every `now()` query advance time by `d`. Zero disables.
    pub fn set_auto_advance(&self, d: Duration) {
        self.inner
            .auto_advance_us
            .store(d.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        let step = self.inner.auto_advance_us.load(Ordering::SeqCst);
        let t = self.inner.now_us.fetch_add(step, Ordering::SeqCst);
        Instant::from_micros(t)
    }

    fn sleep_until(&self, deadline: Instant) {
        let mut now = self.inner.now_us.load(Ordering::SeqCst);
        while now < deadline.as_micros() {
            match self.inner.now_us.compare_exchange(
                now,
                deadline.as_micros(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => now = actual,
            }
        }
    }
}
