//! # Leader Signal Watch
//!
//! Servers and clients both decide "the leader is gone" the same way: they
//! remember when they last saw a leadership-flagged datagram from someone else
//! and compare its age against a fixed threshold.

use std::time::{Duration, Instant};

/// Age tracker for the most recent leadership signal.
#[derive(Debug, Clone)]
pub struct LeaderWatch {
    last_signal: Instant,
    timeout: Duration,
}

impl LeaderWatch {
    /// Start watching as if a signal had just arrived, so a fresh process
    /// gets one full timeout before declaring the leader lost.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            last_signal: now,
            timeout,
        }
    }

    /// Record a fresh leadership signal.
    pub fn observe(&mut self, now: Instant) {
        if now > self.last_signal {
            self.last_signal = now;
        }
    }

    /// Time since the last signal.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_signal)
    }

    /// Whether the silence has outlasted the threshold.
    pub fn expired(&self, now: Instant) -> bool {
        self.age(now) > self.timeout
    }
}
