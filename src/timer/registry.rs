// Timer session registry owned by the daemon
//
// Holds one TimerSession per client id and serializes every mutation for a
// given client behind a per-session tokio Mutex; different clients never
// block each other. Domain events go out on a broadcast channel and the
// registry knows nothing about its consumers (the daemon's event pump wires
// persistence and notifications to it).
//
// Public methods use the wall clock; the `_at` variants take an explicit
// `now` and are what the tick loop and tests drive directly.

use crate::timer::config::TimerTuning;
use crate::timer::detector::SleepGapDetector;
use crate::timer::session::{
    RecordId, SessionState, SessionSummary, SessionType, TimerSession,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Capacity of the domain event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine error taxonomy. Classified by kind so the same set applies across
/// the request/response boundary. Mutations on an absent session are no-ops,
/// not errors (see the Option-returning registry methods).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),
}

/// Domain events emitted after a state transition has been committed
#[derive(Debug, Clone)]
pub enum TimerEvent {
    /// A session was created; the persistence collaborator should create
    /// its record and report the id back via `set_record_id`
    SessionStarted { session: TimerSession },
    /// A session completed (explicitly or via the tick at zero remaining)
    SessionCompleted { summary: SessionSummary },
    /// A session was stopped without completing
    SessionStopped { summary: SessionSummary },
    /// No heartbeat past the idle threshold; a suggestion to prompt the
    /// user, never an automatic pause. Emitted once per idle period.
    SessionIdle { client_id: String },
    /// A tick gap forced this session into a sleep-flagged pause
    SleepDetected { client_id: String },
}

/// Read-only status snapshot returned to status requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub remaining_secs: u64,
    pub is_idle: bool,
}

/// Registry of active sessions, one per client id
pub struct TimerRegistry {
    tuning: TimerTuning,
    sessions: RwLock<HashMap<String, Arc<Mutex<TimerSession>>>>,
    events_tx: broadcast::Sender<TimerEvent>,
    sleep_clock: StdMutex<SleepGapDetector>,
}

impl TimerRegistry {
    pub fn new(tuning: TimerTuning) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sleep_clock = StdMutex::new(SleepGapDetector::new(tuning.sleep_gap_threshold));
        Self {
            tuning,
            sessions: RwLock::new(HashMap::new()),
            events_tx,
            sleep_clock,
        }
    }

    pub fn tuning(&self) -> &TimerTuning {
        &self.tuning
    }

    /// Subscribe to domain events
    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: TimerEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.events_tx.send(event);
    }

    /// Look up the session slot for a client without holding the map lock
    async fn slot(&self, client_id: &str) -> Option<Arc<Mutex<TimerSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(client_id).cloned()
    }

    async fn remove_slot(&self, client_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(client_id);
    }

    // ------------------------------------------------------------------
    // Mutating operations
    // ------------------------------------------------------------------

    pub async fn start(
        &self,
        client_id: &str,
        session_type: SessionType,
        planned_duration_secs: u64,
        task_id: Option<String>,
        category_id: Option<String>,
    ) -> Result<TimerSession, EngineError> {
        self.start_at(
            client_id,
            session_type,
            planned_duration_secs,
            task_id,
            category_id,
            Utc::now(),
        )
        .await
    }

    /// Create a new Running session for the client.
    ///
    /// Starting while a non-terminal session exists REPLACES it without
    /// finalizing it; callers are expected to stop/complete first. This
    /// mirrors the observed upstream behavior and is logged loudly.
    pub async fn start_at(
        &self,
        client_id: &str,
        session_type: SessionType,
        planned_duration_secs: u64,
        task_id: Option<String>,
        category_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TimerSession, EngineError> {
        if client_id.trim().is_empty() {
            return Err(EngineError::Validation("client id must not be empty".into()));
        }
        if planned_duration_secs == 0 {
            return Err(EngineError::Validation(
                "planned duration must be positive".into(),
            ));
        }

        let session = TimerSession::new(
            client_id.to_string(),
            session_type,
            planned_duration_secs,
            task_id,
            category_id,
            now,
        );

        {
            let mut sessions = self.sessions.write().await;
            if sessions
                .insert(client_id.to_string(), Arc::new(Mutex::new(session.clone())))
                .is_some()
            {
                eprintln!(
                    "Replacing existing session for client '{}' without finalizing it",
                    client_id
                );
            }
        }

        self.emit(TimerEvent::SessionStarted {
            session: session.clone(),
        });
        Ok(session)
    }

    pub async fn pause(&self, client_id: &str) -> Option<SessionState> {
        self.pause_at(client_id, Utc::now()).await
    }

    /// Pause the client's session. Returns the state after the call, or
    /// None when the client has no active session (a no-op, not an error).
    pub async fn pause_at(&self, client_id: &str, now: DateTime<Utc>) -> Option<SessionState> {
        let slot = self.slot(client_id).await?;
        let mut session = slot.lock().await;
        if session.is_terminal() {
            return None;
        }
        session.pause(now);
        Some(session.state)
    }

    pub async fn resume(&self, client_id: &str) -> Option<SessionState> {
        self.resume_at(client_id, Utc::now()).await
    }

    pub async fn resume_at(&self, client_id: &str, now: DateTime<Utc>) -> Option<SessionState> {
        let slot = self.slot(client_id).await?;
        let mut session = slot.lock().await;
        if session.is_terminal() {
            return None;
        }
        session.resume(now);
        Some(session.state)
    }

    pub async fn stop(&self, client_id: &str) -> Option<SessionSummary> {
        self.stop_at(client_id, Utc::now()).await
    }

    /// Stop the client's session, remove it from the active set, and emit
    /// its terminal event. None when no active session exists.
    pub async fn stop_at(&self, client_id: &str, now: DateTime<Utc>) -> Option<SessionSummary> {
        let slot = self.slot(client_id).await?;
        let summary = {
            let mut session = slot.lock().await;
            if session.is_terminal() {
                return None;
            }
            session.stop(now)
        };

        self.remove_slot(client_id).await;
        self.emit(TimerEvent::SessionStopped {
            summary: summary.clone(),
        });
        Some(summary)
    }

    pub async fn complete(
        &self,
        client_id: &str,
        quality_rating: Option<u8>,
        notes: Option<String>,
    ) -> Option<SessionSummary> {
        self.complete_at(client_id, quality_rating, notes, Utc::now())
            .await
    }

    /// Complete the client's session by explicit user action. Allowed from
    /// Running or Paused; None when no active session exists.
    pub async fn complete_at(
        &self,
        client_id: &str,
        quality_rating: Option<u8>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<SessionSummary> {
        let slot = self.slot(client_id).await?;
        let summary = {
            let mut session = slot.lock().await;
            if session.is_terminal() {
                return None;
            }
            session.complete(now, quality_rating, notes)
        };

        self.remove_slot(client_id).await;
        self.emit(TimerEvent::SessionCompleted {
            summary: summary.clone(),
        });
        Some(summary)
    }

    pub async fn heartbeat(&self, client_id: &str) -> bool {
        self.heartbeat_at(client_id, Utc::now()).await
    }

    /// Refresh the client's activity timestamp. False when no session exists.
    pub async fn heartbeat_at(&self, client_id: &str, now: DateTime<Utc>) -> bool {
        match self.slot(client_id).await {
            Some(slot) => {
                let mut session = slot.lock().await;
                if session.is_terminal() {
                    return false;
                }
                session.heartbeat(now);
                true
            }
            None => false,
        }
    }

    /// Report the persisted record id back onto the live session. Ignored
    /// when the session already ended (the terminal event carried whatever
    /// id it had at that point).
    pub async fn set_record_id(&self, client_id: &str, record_id: RecordId) {
        if let Some(slot) = self.slot(client_id).await {
            let mut session = slot.lock().await;
            if session.record_id.is_none() {
                session.record_id = Some(record_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn status(&self, client_id: &str) -> Option<StatusSnapshot> {
        self.status_at(client_id, Utc::now()).await
    }

    /// Consistent snapshot of one session. None when the client is idle
    /// (no session).
    pub async fn status_at(&self, client_id: &str, now: DateTime<Utc>) -> Option<StatusSnapshot> {
        let slot = self.slot(client_id).await?;
        let session = slot.lock().await;
        Some(StatusSnapshot {
            state: session.state,
            remaining_secs: session.remaining_secs(now),
            is_idle: session.is_idle(now, self.tuning.idle_threshold),
        })
    }

    /// Number of active sessions, for the drain log line
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    pub async fn on_tick(&self) {
        self.on_tick_at(Utc::now()).await
    }

    /// One pass over all active sessions: detect sleep gaps, auto-complete
    /// expired sessions, and report newly idle ones.
    pub async fn on_tick_at(&self, now: DateTime<Utc>) {
        let sleep_gap = self.sleep_clock.lock().unwrap().observe(now);

        let entries: Vec<(String, Arc<Mutex<TimerSession>>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut finished: Vec<String> = Vec::new();

        for (client_id, slot) in entries {
            let mut session = slot.lock().await;
            if session.is_terminal() {
                continue;
            }

            // Machine-level suspension: force-pause before any time-derived
            // evaluation so the gap cannot auto-complete the session.
            if let Some(gap) = sleep_gap {
                if session.state == SessionState::Running
                    && session.force_sleep_pause(gap.last_seen, now)
                {
                    eprintln!(
                        "Sleep gap of {}s detected; pausing session for client '{}'",
                        gap.gap_secs, client_id
                    );
                    self.emit(TimerEvent::SleepDetected {
                        client_id: client_id.clone(),
                    });
                    continue;
                }
            }

            if session.state != SessionState::Running {
                continue;
            }

            if session.remaining_secs(now) == 0 {
                let summary = session.complete(now, None, None);
                finished.push(client_id.clone());
                self.emit(TimerEvent::SessionCompleted { summary });
                continue;
            }

            if session.is_idle(now, self.tuning.idle_threshold) && !session.idle_notified {
                session.idle_notified = true;
                self.emit(TimerEvent::SessionIdle {
                    client_id: client_id.clone(),
                });
            }
        }

        if !finished.is_empty() {
            let mut sessions = self.sessions.write().await;
            for client_id in finished {
                sessions.remove(&client_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    pub async fn drain(&self) -> Vec<SessionSummary> {
        self.drain_at(Utc::now()).await
    }

    /// Finalize every active session as Stopped (completed = false) for a
    /// graceful shutdown. Emits the terminal events and also returns the
    /// summaries so the caller can persist them directly.
    pub async fn drain_at(&self, now: DateTime<Utc>) -> Vec<SessionSummary> {
        let drained: Vec<Arc<Mutex<TimerSession>>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, slot)| slot).collect()
        };

        let mut summaries = Vec::with_capacity(drained.len());
        for slot in drained {
            let mut session = slot.lock().await;
            if session.is_terminal() {
                continue;
            }
            let summary = session.stop(now);
            self.emit(TimerEvent::SessionStopped {
                summary: summary.clone(),
            });
            summaries.push(summary);
        }
        summaries
    }
}
