//! Per-watchdog idle clock.
//!
//! The clock is plain state owned by one watchdog scheduler task. It only
//! changes when the scheduler observes an owner activity transition or
//! re-arms after a firing; nothing else can write it.

use std::time::Duration;

use tokio::time::Instant;

/// Whether an agent currently has an active turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Running,
    Idle { since: Instant },
}

#[derive(Debug, Clone, Copy)]
pub struct IdleClock {
    /// When the owner last went idle; `None` while it is running.
    idle_since: Option<Instant>,
    /// Idle time is never counted from before this instant (creation or the
    /// most recent firing).
    floor: Instant,
}

impl IdleClock {
    pub fn new(activity: Activity, now: Instant) -> Self {
        let mut clock = Self {
            idle_since: None,
            floor: now,
        };
        clock.observe(activity);
        clock
    }

    pub fn observe(&mut self, activity: Activity) {
        self.idle_since = match activity {
            Activity::Running => None,
            Activity::Idle { since } => Some(since),
        };
    }

    fn counting_from(&self) -> Option<Instant> {
        self.idle_since.map(|since| since.max(self.floor))
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        self.counting_from()
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Earliest instant a check-in may fire, if the owner is idle.
    pub fn deadline(&self, interval: Duration) -> Option<Instant> {
        self.counting_from().map(|start| start + interval)
    }

    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        self.deadline(interval).is_some_and(|deadline| now >= deadline)
    }

    /// Reset the clock to zero after a firing.
    pub fn rearm(&mut self, now: Instant) {
        self.floor = now;
    }
}
