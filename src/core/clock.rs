//! Scheduler tick abstraction.
//!
//! The envelope engine's per-step suspension is its only blocking point,
//! and it goes through this trait so the step engine runs against a
//! virtual clock in tests instead of real wall-clock sleeps.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub trait Clock {
    /// Monotonic time since the clock was created.
    fn now(&self) -> Duration;

    /// Suspend the calling thread for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Wall-clock implementation used in production.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock: `sleep` advances time instantly and records the
/// requested durations. Clones share state, so a test can hold one handle
/// while the sequencer owns another.
#[derive(Clone, Default)]
pub struct VirtualClock {
    inner: Rc<RefCell<VirtualClockState>>,
}

#[derive(Default)]
struct VirtualClockState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.inner.borrow_mut().now += duration;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.borrow().sleeps.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.borrow().now
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    fn sleep(&mut self, duration: Duration) {
        let mut state = self.inner.borrow_mut();
        state.now += duration;
        state.sleeps.push(duration);
    }
}
