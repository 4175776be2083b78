// Client-side countdown smoothing
//
// The daemon's status answers are authoritative but arrive once per poll.
// Between polls the UI still wants a ticking number, so this tracks the
// last authoritative snapshot and extrapolates locally at one second per
// second while the session is Running. Every poll overwrites the local
// estimate; local drift never feeds back to the daemon.

use crate::timer::session::SessionState;
use std::time::Instant;

/// Last authoritative status plus when it arrived
#[derive(Debug, Clone, Copy)]
pub struct OptimisticCountdown {
    state: Option<SessionState>,
    remaining_secs: u64,
    is_idle: bool,
    synced_at: Option<Instant>,
}

impl OptimisticCountdown {
    pub fn new() -> Self {
        Self {
            state: None,
            remaining_secs: 0,
            is_idle: false,
            synced_at: None,
        }
    }

    /// Take an authoritative snapshot from a status poll. Always overwrites
    /// the local estimate, even when the server's number jumped.
    pub fn apply_status(
        &mut self,
        state: Option<SessionState>,
        remaining_secs: u64,
        is_idle: bool,
        at: Instant,
    ) {
        self.state = state;
        self.remaining_secs = remaining_secs;
        self.is_idle = is_idle;
        self.synced_at = Some(at);
    }

    /// Forget everything, e.g. when the daemon connection is lost
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> Option<SessionState> {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle
    }

    /// Remaining seconds to display at `now`. Counts down from the last
    /// sync while Running; frozen in every other state. None when no
    /// session is known.
    pub fn display_remaining(&self, now: Instant) -> Option<u64> {
        let state = self.state?;
        let synced_at = self.synced_at?;

        match state {
            SessionState::Running => {
                let ticked = now.saturating_duration_since(synced_at).as_secs();
                Some(self.remaining_secs.saturating_sub(ticked))
            }
            _ => Some(self.remaining_secs),
        }
    }
}

impl Default for OptimisticCountdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn no_session_displays_nothing() {
        let countdown = OptimisticCountdown::new();
        assert_eq!(countdown.display_remaining(Instant::now()), None);
    }

    #[test]
    fn running_session_ticks_down_between_polls() {
        let mut countdown = OptimisticCountdown::new();
        let t0 = Instant::now();
        countdown.apply_status(Some(SessionState::Running), 100, false, t0);

        assert_eq!(countdown.display_remaining(t0), Some(100));
        assert_eq!(countdown.display_remaining(t0 + Duration::from_secs(3)), Some(97));
        assert_eq!(countdown.display_remaining(t0 + Duration::from_millis(3500)), Some(97));
    }

    #[test]
    fn paused_session_freezes() {
        let mut countdown = OptimisticCountdown::new();
        let t0 = Instant::now();
        countdown.apply_status(Some(SessionState::Paused), 80, false, t0);

        assert_eq!(countdown.display_remaining(t0 + Duration::from_secs(30)), Some(80));
    }

    #[test]
    fn display_never_goes_below_zero() {
        let mut countdown = OptimisticCountdown::new();
        let t0 = Instant::now();
        countdown.apply_status(Some(SessionState::Running), 2, false, t0);

        assert_eq!(countdown.display_remaining(t0 + Duration::from_secs(10)), Some(0));
    }

    #[test]
    fn poll_overwrites_local_estimate_in_both_directions() {
        let mut countdown = OptimisticCountdown::new();
        let t0 = Instant::now();
        countdown.apply_status(Some(SessionState::Running), 100, false, t0);

        // Local estimate drifted to 95, but the daemon says 90 (clock skew)
        let t1 = t0 + Duration::from_secs(5);
        countdown.apply_status(Some(SessionState::Running), 90, false, t1);
        assert_eq!(countdown.display_remaining(t1), Some(90));

        // And upward too (session was paused server-side meanwhile)
        let t2 = t1 + Duration::from_secs(5);
        countdown.apply_status(Some(SessionState::Running), 95, false, t2);
        assert_eq!(countdown.display_remaining(t2), Some(95));
    }

    #[test]
    fn clear_forgets_the_session() {
        let mut countdown = OptimisticCountdown::new();
        let t0 = Instant::now();
        countdown.apply_status(Some(SessionState::Running), 100, false, t0);
        countdown.clear();
        assert_eq!(countdown.display_remaining(t0), None);
        assert_eq!(countdown.state(), None);
    }
}
