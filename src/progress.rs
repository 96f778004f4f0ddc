//! Rate-limited progress reporting.
//!
//! Build phases iterate millions of elements; emitting one line per step
//! would drown the log. [`ProgressLog`] forwards at most one message per
//! interval to the `log` facade and is purely observational.

use std::time::{Duration, Instant};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(300);

/// Throttled sink for human-readable progress strings.
pub struct ProgressLog {
    interval: Duration,
    next: Instant,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        ProgressLog {
            interval,
            next: Instant::now(),
        }
    }

    /// Log the message unless one was logged within the current interval.
    /// The closure only runs when the message is actually emitted.
    pub fn emit<F: FnOnce() -> String>(&mut self, message: F) {
        let now = Instant::now();
        if now >= self.next {
            log::info!("{}", message());
            self.next = now + self.interval;
        }
    }

    /// Log unconditionally; used for final 100% lines.
    pub fn finish(&mut self, message: String) {
        log::info!("{message}");
        self.next = Instant::now() + self.interval;
    }
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttles_closure_evaluation() {
        // `log::info!` only evaluates its arguments when logging is enabled;
        // raise the global max level so the emitted closure actually runs.
        log::set_max_level(log::LevelFilter::Info);
        let mut progress = ProgressLog::with_interval(Duration::from_secs(3600));
        let mut calls = 0;
        progress.emit(|| {
            calls += 1;
            String::from("first")
        });
        let mut second_ran = false;
        progress.emit(|| {
            second_ran = true;
            String::from("suppressed")
        });
        assert_eq!(calls, 1);
        assert!(!second_ran);
    }
}
