use std::time::Duration;
use tokio::time::Instant;

/// Tracks global request timing
///
/// This structure holds the two timing constraints every outbound request is
/// subject to: the minimum spacing between dispatches and the cooldown
/// entered when the remote API signals a rate limit.
#[derive(Debug, Clone)]
pub struct DispatchState {
    /// Minimum spacing between two dispatches
    pub min_gap: Duration,

    /// When the last request was dispatched
    pub last_dispatch: Option<Instant>,

    /// No request may be dispatched before this instant
    pub cooldown_until: Option<Instant>,
}

impl DispatchState {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_dispatch: None,
            cooldown_until: None,
        }
    }

    /// Calculates the time until the next request can be dispatched
    ///
    /// Returns None if a request can be dispatched now, or the duration to wait otherwise.
    pub fn time_until_next_dispatch(&self, now: Instant) -> Option<Duration> {
        let gap_ready = self.last_dispatch.map(|last| last + self.min_gap);
        let ready_at = match (gap_ready, self.cooldown_until) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };

        (ready_at > now).then(|| ready_at - now)
    }

    /// Records that a request was dispatched
    pub fn record_dispatch(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
    }

    /// Pauses all dispatching for `duration` from `now`
    ///
    /// An active cooldown that already ends later is kept.
    pub fn enter_cooldown(&mut self, now: Instant, duration: Duration) {
        let until = now + duration;
        if self.cooldown_until.map_or(true, |current| until > current) {
            self.cooldown_until = Some(until);
        }
    }

    /// Checks if a cooldown is still in effect
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(false, |until| until > now)
    }
}
