use std::time::Duration;

/// Delay growing by a fixed increment per counted failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    base: Duration,
    increment: Duration,
    steps: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration, increment: Duration) -> Self {
        LinearBackoff {
            base,
            increment,
            steps: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.base
            .saturating_add(self.increment.saturating_mul(self.steps))
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Count one failure, making the next delay longer.
    pub fn attempt(&mut self) {
        self.steps = self.steps.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.steps = 0;
    }
}

/// Blocking sleep, replaceable in tests.
pub trait Sleep {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
