use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Wall-clock sliding-window circuit breaker over worker failures.
///
/// The window is wall-clock rather than task-count: the breaker exists to
/// catch systemic worker failure, and a long healthy run must not trip on
/// isolated failures spread hours apart. Scheduled recycling never records
/// here.
#[derive(Debug)]
pub struct CircuitBreaker {
    window: Duration,
    threshold: u32,
    failures: VecDeque<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            window,
            threshold,
            failures: VecDeque::new(),
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.failures.push_back(now);
        self.prune(now);
    }

    /// `true` once the failure count within the window reaches the threshold.
    pub fn tripped(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.failures.len() as u32 >= self.threshold
    }

    /// Failures currently inside the window.
    pub fn count(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.failures.len() as u32
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.failures.front() {
            if now.duration_since(*front) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}
