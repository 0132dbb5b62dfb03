//! Sliding-window restart accounting.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};

// Layer 3: Internal module imports
// (none)

/// Tracks restart timestamps in a sliding window.
///
/// Old entries expire as time passes, so a burst of restarts does not lock
/// the supervisor out permanently. Only failure-driven restarts are
/// recorded; manual restarts of running children are not.
#[derive(Debug, Clone)]
pub struct RestartWindow {
    max_restarts: u32,
    within: Duration,
    history: VecDeque<DateTime<Utc>>,
}

impl RestartWindow {
    pub fn new(max_restarts: u32, within: Duration) -> Self {
        Self {
            max_restarts,
            within,
            history: VecDeque::new(),
        }
    }

    /// Record a restart at the current time and expire old entries.
    pub fn record(&mut self) {
        self.history.push_back(Utc::now());
        self.prune();
    }

    /// `true` once strictly more than `max_restarts` restarts sit inside
    /// the window.
    pub fn is_exceeded(&self) -> bool {
        self.history.len() as u32 > self.max_restarts
    }

    /// Restarts currently inside the window.
    pub fn count(&self) -> usize {
        self.history.len()
    }

    fn prune(&mut self) {
        let Ok(window) = chrono::Duration::from_std(self.within) else {
            return;
        };
        let cutoff = Utc::now() - window;
        while matches!(self.history.front(), Some(ts) if *ts < cutoff) {
            self.history.pop_front();
        }
    }
}
