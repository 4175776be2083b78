// Idle and sleep-gap detection heuristics
//
// Two deliberately distinct signals, both based on wall-clock gaps:
// - sleep detection reacts to a *tick* gap (machine-level suspension) and
//   the registry force-pauses affected sessions;
// - idle detection reacts to a *lack of heartbeats* (human inattention) and
//   only produces a notification. The idle predicate itself lives on
//   `TimerSession::is_idle`; the registry latches it per idle period.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A detected discontinuity between consecutive ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepGap {
    /// The last tick observed before the gap. Forced pauses are backdated
    /// to this instant so the gap does not count as focused time.
    pub last_seen: DateTime<Utc>,
    /// Length of the gap in whole seconds
    pub gap_secs: i64,
}

/// Tracks the registry's tick clock and flags large gaps as host suspension
#[derive(Debug)]
pub struct SleepGapDetector {
    threshold: Duration,
    last_seen: Option<DateTime<Utc>>,
}

impl SleepGapDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_seen: None,
        }
    }

    /// Record a tick and report a sleep gap if the time since the previous
    /// tick exceeds the threshold. Backwards clock jumps are ignored; the
    /// clock is simply re-anchored at `now`.
    pub fn observe(&mut self, now: DateTime<Utc>) -> Option<SleepGap> {
        let prev = self.last_seen.replace(now)?;
        let gap_secs = now.signed_duration_since(prev).num_seconds();

        if gap_secs > self.threshold.as_secs() as i64 {
            Some(SleepGap {
                last_seen: prev,
                gap_secs,
            })
        } else {
            None
        }
    }

    /// Forget the previous tick, e.g. across a daemon restart
    pub fn reset(&mut self) {
        self.last_seen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn first_tick_never_reports_a_gap() {
        let mut detector = SleepGapDetector::new(Duration::from_secs(120));
        assert_eq!(detector.observe(t0()), None);
    }

    #[test]
    fn regular_ticks_do_not_trigger() {
        let mut detector = SleepGapDetector::new(Duration::from_secs(120));
        detector.observe(t0());
        for i in 1..10 {
            assert_eq!(detector.observe(t0() + secs(i)), None);
        }
    }

    #[test]
    fn gap_above_threshold_reports_pre_gap_tick() {
        let mut detector = SleepGapDetector::new(Duration::from_secs(120));
        detector.observe(t0());
        detector.observe(t0() + secs(1));

        let gap = detector
            .observe(t0() + secs(151))
            .expect("150s gap should be detected");
        assert_eq!(gap.last_seen, t0() + secs(1));
        assert_eq!(gap.gap_secs, 150);
    }

    #[test]
    fn gap_exactly_at_threshold_does_not_trigger() {
        let mut detector = SleepGapDetector::new(Duration::from_secs(120));
        detector.observe(t0());
        assert_eq!(detector.observe(t0() + secs(120)), None);
        assert!(detector.observe(t0() + secs(120 + 121)).is_some());
    }

    #[test]
    fn backwards_clock_jump_is_ignored() {
        let mut detector = SleepGapDetector::new(Duration::from_secs(120));
        detector.observe(t0() + secs(1000));
        assert_eq!(detector.observe(t0()), None);
        // Re-anchored: a normal next tick is quiet
        assert_eq!(detector.observe(t0() + secs(1)), None);
    }

    #[test]
    fn reset_forgets_the_previous_tick() {
        let mut detector = SleepGapDetector::new(Duration::from_secs(120));
        detector.observe(t0());
        detector.reset();
        assert_eq!(detector.observe(t0() + secs(500)), None);
    }
}
