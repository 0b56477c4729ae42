//! Clock abstraction so expiry and rate limiting can be driven from tests.
//!
//! Ages are measured with the monotonic [`Clock::instant`] reading. The wall
//! clock is only used for ids and the timestamps shown to callers.

use chrono::{DateTime, Utc};
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic reading used to measure elapsed time.
    fn instant(&self) -> Instant;
}

/// Reads the system clocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
