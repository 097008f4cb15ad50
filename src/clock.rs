//! Time source for protocol timestamps and gesture pacing
//!
//! Gesture timing is part of the contract with the compositor, so real code
//! sleeps for real. Tests swap in [`ManualClock`], which only records.

use std::time::Duration;

use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary epoch
    fn now(&self) -> Duration;

    /// Block the calling thread
    fn sleep(&self, duration: Duration);

    fn now_micros(&self) -> u64 {
        self.now().as_micros() as u64
    }
}

/// `CLOCK_MONOTONIC`, the time base libei frames are stamped in
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        match nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => Duration::from(ts),
            Err(_) => Duration::ZERO,
        }
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that advances only when slept on, recording every sleep
#[derive(Debug, Default)]
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, by: Duration) {
        self.inner.lock().now += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.inner.lock().sleeps.iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.now += duration;
        state.sleeps.push(duration);
    }
}

pub(crate) fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        clock.sleep(millis(20));
        clock.advance(millis(5));
        clock.sleep(millis(10));

        assert_eq!(clock.now(), millis(35));
        assert_eq!(clock.sleeps(), vec![millis(20), millis(10)]);
        assert_eq!(clock.total_slept(), millis(30));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a > Duration::ZERO);
    }
}
