//! Feedback Monitor - detects stale Hardware Link feedback
//!
//! **Purpose**: the executor must notice when the arm stops talking
//! (powered off, cable unplugged, driver crashed) and escalate to a
//! communication fault instead of happily writing setpoints into the void.
//!
//! **App Start Relative Time Pattern**:
//! - Monotonic time anchored to application start
//! - Unaffected by system clock changes (NTP, manual adjustments)
//! - Fits in an AtomicU64 for lock-free access from the 100Hz loop

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global anchor point for monotonic time, set once on first access
static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic microseconds since app start
fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Hardware Link feedback freshness monitor
///
/// The executor calls [`register_feedback`](Self::register_feedback) after
/// each successful `read_feedback`; anyone may call
/// [`is_fresh`](Self::is_fresh) concurrently.
pub struct FeedbackMonitor {
    last_feedback: AtomicU64,
    window: Duration,
}

impl FeedbackMonitor {
    /// `window`: maximum silence before feedback counts as stale
    pub fn new(window: Duration) -> Self {
        FeedbackMonitor {
            last_feedback: AtomicU64::new(monotonic_micros()),
            window,
        }
    }

    /// Record that fresh feedback arrived
    pub fn register_feedback(&self) {
        self.last_feedback.store(monotonic_micros(), Ordering::Relaxed);
    }

    /// True if feedback arrived within the configured window
    pub fn is_fresh(&self) -> bool {
        self.time_since_last() < self.window
    }

    /// Time since the last registered feedback
    pub fn time_since_last(&self) -> Duration {
        let last = self.last_feedback.load(Ordering::Relaxed);
        Duration::from_micros(monotonic_micros().saturating_sub(last))
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
