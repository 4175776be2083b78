// Per-session timer state machine (no I/O)
//
// A TimerSession tracks one focus/break interval for one client. All
// transition methods take an explicit `now` so that the registry can pass
// wall-clock time and tests can pass synthetic timestamps. The daemon-facing
// wrappers in the registry call these with `Utc::now()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of the persisted session row, owned by the repository.
/// `None` until the repository's create call has resolved.
pub type RecordId = u64;

/// Closed set of session types. Each carries a recommended default duration;
/// the planned duration is stored per-session, never re-derived from the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    DeepWork,
    QuickTask,
    Break,
    Custom,
}

impl SessionType {
    /// Recommended duration used when a start request omits one
    pub fn default_duration_secs(&self) -> u64 {
        match self {
            SessionType::DeepWork => 25 * 60,
            SessionType::QuickTask => 10 * 60,
            SessionType::Break => 5 * 60,
            SessionType::Custom => 25 * 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::DeepWork => "deep_work",
            SessionType::QuickTask => "quick_task",
            SessionType::Break => "break",
            SessionType::Custom => "custom",
        }
    }

    /// Parse a wire-format type name. Unknown names degrade to `Custom`
    /// rather than rejecting the request; callers log the fallback.
    pub fn parse_lossy(s: &str) -> SessionType {
        match s {
            "deep_work" => SessionType::DeepWork,
            "quick_task" => SessionType::QuickTask,
            "break" => SessionType::Break,
            _ => SessionType::Custom,
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session state. A client with no session is modeled as absence from the
/// registry, not as a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SessionState {
    Running,
    Paused,
    Completed,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Running => write!(f, "Running"),
            SessionState::Paused => write!(f, "Paused"),
            SessionState::Completed => write!(f, "Completed"),
            SessionState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Terminal record of a finished session, emitted exactly once when a session
/// reaches Completed or Stopped and handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    pub session_type: SessionType,
    pub planned_duration_secs: u64,
    pub actual_duration_secs: u64,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// One timed session, owned exclusively by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSession {
    /// Opaque identifier of the connected UI instance
    pub client_id: String,
    /// Persisted row id; None until the repository create resolves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    pub session_type: SessionType,
    pub planned_duration_secs: u64,
    pub started_at: DateTime<Utc>,
    /// Total paused time folded in by resume(), in milliseconds.
    /// Monotonically non-decreasing.
    pub accumulated_paused_ms: i64,
    /// Start of the currently open pause interval, if Paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    /// Refreshed by client heartbeats and mutating calls
    pub last_active_at: DateTime<Utc>,
    pub state: SessionState,
    /// Set when a tick gap forces a pause; cleared on explicit resume
    pub sleep_flagged: bool,
    /// Latch so the registry emits at most one idle event per idle period
    #[serde(default)]
    pub idle_notified: bool,
    /// Opaque attachment points owned by external collaborators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl TimerSession {
    pub fn new(
        client_id: String,
        session_type: SessionType,
        planned_duration_secs: u64,
        task_id: Option<String>,
        category_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id,
            record_id: None,
            session_type,
            planned_duration_secs,
            started_at: now,
            accumulated_paused_ms: 0,
            paused_at: None,
            last_active_at: now,
            state: SessionState::Running,
            sleep_flagged: false,
            idle_notified: false,
            task_id,
            category_id,
            updated_at: now,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Completed | SessionState::Stopped)
    }

    /// Running time in seconds, clamped to `[0, planned_duration_secs]`.
    ///
    /// While Paused the open pause interval is excluded by measuring up to
    /// `paused_at`; once terminal, up to `ended_at`.
    pub fn elapsed_running_secs(&self, now: DateTime<Utc>) -> u64 {
        let effective_now = match self.state {
            SessionState::Paused => self.paused_at.unwrap_or(now),
            SessionState::Completed | SessionState::Stopped => self.ended_at.unwrap_or(now),
            SessionState::Running => now,
        };

        // Widened so the millisecond conversion cannot wrap for any u64
        // planned duration
        let running_ms = effective_now
            .signed_duration_since(self.started_at)
            .num_milliseconds() as i128
            - self.accumulated_paused_ms as i128;

        let planned_ms = self.planned_duration_secs as i128 * 1000;
        (running_ms.clamp(0, planned_ms) / 1000) as u64
    }

    /// Remaining time in seconds; never negative
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        self.planned_duration_secs
            .saturating_sub(self.elapsed_running_secs(now))
    }

    /// Pause the session. Valid only from Running; a no-op (not an error)
    /// when already Paused or terminal. Returns whether a transition happened.
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        self.state = SessionState::Paused;
        self.paused_at = Some(now);
        self.last_active_at = now;
        self.updated_at = now;
        true
    }

    /// Pause forced by sleep-gap detection. The pause start is backdated to
    /// the last observed tick so the suspension gap counts as paused time
    /// rather than focused time.
    pub fn force_sleep_pause(&mut self, pause_from: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        self.state = SessionState::Paused;
        self.paused_at = Some(pause_from);
        self.sleep_flagged = true;
        self.updated_at = now;
        true
    }

    /// Resume the session. Valid only from Paused; a no-op when Running or
    /// terminal. Folds the open pause interval into `accumulated_paused_ms`
    /// and clears the sleep flag.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::Paused {
            return false;
        }
        if let Some(paused_at) = self.paused_at.take() {
            let paused_ms = now.signed_duration_since(paused_at).num_milliseconds();
            self.accumulated_paused_ms += paused_ms.max(0);
        }
        self.state = SessionState::Running;
        self.sleep_flagged = false;
        self.idle_notified = false;
        self.last_active_at = now;
        self.updated_at = now;
        true
    }

    /// Stop the session, capturing the actual running duration.
    /// Valid from Running or Paused; the persisted record gets `completed = false`.
    pub fn stop(&mut self, now: DateTime<Utc>) -> SessionSummary {
        let actual = self.elapsed_running_secs(now);
        self.state = SessionState::Stopped;
        self.ended_at = Some(now);
        self.updated_at = now;
        self.summary(actual, false, None, None, now)
    }

    /// Complete the session, either by explicit user action or by the tick
    /// when remaining time reaches zero. The persisted record gets
    /// `completed = true`.
    pub fn complete(
        &mut self,
        now: DateTime<Utc>,
        quality_rating: Option<u8>,
        notes: Option<String>,
    ) -> SessionSummary {
        let actual = self.elapsed_running_secs(now);
        self.state = SessionState::Completed;
        self.ended_at = Some(now);
        self.updated_at = now;
        self.summary(actual, true, quality_rating, notes, now)
    }

    /// Record client activity. Clears the idle latch so the next idle period
    /// is reported again.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
        self.idle_notified = false;
    }

    /// Whether the user has been inactive past the threshold while Running
    pub fn is_idle(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.state == SessionState::Running
            && now.signed_duration_since(self.last_active_at).num_seconds()
                > threshold.as_secs() as i64
    }

    fn summary(
        &self,
        actual: u64,
        completed: bool,
        quality_rating: Option<u8>,
        notes: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> SessionSummary {
        SessionSummary {
            client_id: self.client_id.clone(),
            record_id: self.record_id,
            session_type: self.session_type,
            planned_duration_secs: self.planned_duration_secs,
            actual_duration_secs: actual,
            completed,
            quality_rating,
            notes,
            task_id: self.task_id.clone(),
            category_id: self.category_id.clone(),
            started_at: self.started_at,
            ended_at,
        }
    }
}
