// Daemon-side sync protocol server
//
// Accepts Unix socket connections, reads newline-delimited JSON request
// frames, and answers each with exactly one response frame. All session
// semantics live in the registry; this module validates requests, maps
// registry results onto the wire, and runs the two background loops the
// daemon needs (the 1s tick and the persistence/notification event pump).

use crate::timer::config::Config;
use crate::timer::notify::{NotificationDebouncer, Notifier};
use crate::timer::persistence::{NewSessionRecord, SessionPatch, SessionRepository};
use crate::timer::protocol::{
    deserialize_message, serialize_message, ErrorCode, TimerRequest, TimerResponse,
    MAX_REQUEST_FRAME_SIZE, PROTOCOL_VERSION,
};
use crate::timer::registry::{TimerEvent, TimerRegistry};
use crate::timer::session::{SessionSummary, SessionType};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

/// Shared daemon state handed to every connection task
pub struct DaemonState {
    pub config: Config,
    pub registry: TimerRegistry,
}

impl DaemonState {
    pub fn new(config: Config) -> Self {
        let registry = TimerRegistry::new(config.tuning.clone());
        Self { config, registry }
    }
}

/// Accept loop. Runs until a shutdown is signalled (by a Shutdown request
/// from any client, or by the caller sending on `shutdown_tx` itself).
pub async fn serve(
    listener: UnixListener,
    state: Arc<DaemonState>,
    shutdown_tx: mpsc::Sender<()>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(state, stream, shutdown_tx).await {
                                eprintln!("Client connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        eprintln!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                println!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }
    Ok(())
}

/// Handle a single client connection
pub async fn handle_client(
    state: Arc<DaemonState>,
    mut stream: UnixStream,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // Client disconnected
            Ok(_) => {
                // Enforce max request frame size (1MB)
                let response = if line.len() > MAX_REQUEST_FRAME_SIZE {
                    TimerResponse::Error {
                        code: ErrorCode::InvalidRequest,
                        message: format!(
                            "Request frame too large: {} bytes (max {})",
                            line.len(),
                            MAX_REQUEST_FRAME_SIZE
                        ),
                    }
                } else {
                    match deserialize_message::<TimerRequest>(line.as_bytes()) {
                        Ok(request) => handle_request(&state, request, &shutdown_tx).await,
                        Err(e) => TimerResponse::Error {
                            code: ErrorCode::InvalidRequest,
                            message: format!("Failed to parse request: {}", e),
                        },
                    }
                };

                let bytes = serialize_message(&response)?;
                writer.write_all(&bytes).await?;
                writer.flush().await?;
            }
            Err(e) => {
                eprintln!("Error reading from client: {}", e);
                break;
            }
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> TimerResponse {
    TimerResponse::Error {
        code: ErrorCode::InvalidRequest,
        message: message.into(),
    }
}

/// Handle a single request from a client
pub async fn handle_request(
    state: &Arc<DaemonState>,
    request: TimerRequest,
    shutdown_tx: &mpsc::Sender<()>,
) -> TimerResponse {
    match request {
        TimerRequest::Handshake { client_version } => {
            if client_version != PROTOCOL_VERSION {
                let message = if client_version < PROTOCOL_VERSION {
                    "Daemon is newer than the client—please update the client.".to_string()
                } else {
                    "Daemon is outdated—please restart the daemon.".to_string()
                };
                return TimerResponse::Error {
                    code: ErrorCode::VersionMismatch,
                    message,
                };
            }
            TimerResponse::Handshake {
                protocol_version: PROTOCOL_VERSION,
            }
        }

        TimerRequest::Ping => TimerResponse::Pong,

        TimerRequest::Shutdown => {
            // Signal the accept loop to wind down
            let _ = shutdown_tx.send(()).await;
            TimerResponse::ShuttingDown
        }

        TimerRequest::Start {
            client_id,
            session_type,
            planned_duration_secs,
            task_id,
            category_id,
        } => {
            if client_id.trim().is_empty() {
                return invalid("client_id must not be empty");
            }
            if planned_duration_secs == Some(0) {
                return invalid("planned_duration_secs must be positive");
            }

            let parsed_type = SessionType::parse_lossy(&session_type);
            if parsed_type == SessionType::Custom && session_type != "custom" {
                eprintln!(
                    "Unknown session type '{}' from client '{}', treating as custom",
                    session_type, client_id
                );
            }
            let planned = planned_duration_secs.unwrap_or(parsed_type.default_duration_secs());

            match state
                .registry
                .start(&client_id, parsed_type, planned, task_id, category_id)
                .await
            {
                Ok(session) => TimerResponse::SessionStarted { session },
                Err(e) => invalid(e.to_string()),
            }
        }

        TimerRequest::Pause { client_id } => {
            if client_id.trim().is_empty() {
                return invalid("client_id must not be empty");
            }
            TimerResponse::SessionState {
                state: state.registry.pause(&client_id).await,
            }
        }

        TimerRequest::Resume { client_id } => {
            if client_id.trim().is_empty() {
                return invalid("client_id must not be empty");
            }
            TimerResponse::SessionState {
                state: state.registry.resume(&client_id).await,
            }
        }

        TimerRequest::Stop { client_id } => {
            if client_id.trim().is_empty() {
                return invalid("client_id must not be empty");
            }
            match state.registry.stop(&client_id).await {
                Some(summary) => TimerResponse::SessionStopped { summary },
                None => TimerResponse::SessionState { state: None },
            }
        }

        TimerRequest::Complete {
            client_id,
            quality_rating,
            notes,
        } => {
            if client_id.trim().is_empty() {
                return invalid("client_id must not be empty");
            }
            if let Some(rating) = quality_rating {
                if !(1..=5).contains(&rating) {
                    return invalid(format!("quality_rating must be 1-5, got {}", rating));
                }
            }
            match state
                .registry
                .complete(&client_id, quality_rating, notes)
                .await
            {
                Some(summary) => TimerResponse::SessionCompleted { summary },
                None => TimerResponse::SessionState { state: None },
            }
        }

        TimerRequest::Status { client_id } => {
            if client_id.trim().is_empty() {
                return invalid("client_id must not be empty");
            }
            match state.registry.status(&client_id).await {
                Some(snapshot) => TimerResponse::Status {
                    state: Some(snapshot.state),
                    remaining_secs: snapshot.remaining_secs,
                    is_idle: snapshot.is_idle,
                },
                None => TimerResponse::Status {
                    state: None,
                    remaining_secs: 0,
                    is_idle: false,
                },
            }
        }

        TimerRequest::Heartbeat { client_id } => {
            if client_id.trim().is_empty() {
                return invalid("client_id must not be empty");
            }
            TimerResponse::HeartbeatAck {
                updated: state.registry.heartbeat(&client_id).await,
            }
        }
    }
}

/// Drive the registry's time-derived transitions on a fixed cadence
pub async fn run_tick_loop(state: Arc<DaemonState>) {
    let mut interval = tokio::time::interval(state.config.tuning.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        state.registry.on_tick().await;
    }
}

/// Consume registry events: create/update persistent records and forward
/// attention events to the notifier. Persistence failures are logged and
/// never reverse an in-memory transition.
pub async fn run_event_pump(
    state: Arc<DaemonState>,
    repository: Arc<dyn SessionRepository>,
    notifier: Arc<dyn Notifier>,
) {
    let mut events = state.registry.subscribe();
    let mut debouncers: HashMap<String, NotificationDebouncer> = HashMap::new();

    loop {
        match events.recv().await {
            Ok(event) => {
                handle_event(&state, &repository, notifier.as_ref(), &mut debouncers, event).await
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                eprintln!("Event pump lagged, {} events dropped", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn handle_event(
    state: &Arc<DaemonState>,
    repository: &Arc<dyn SessionRepository>,
    notifier: &dyn Notifier,
    debouncers: &mut HashMap<String, NotificationDebouncer>,
    event: TimerEvent,
) {
    match event {
        TimerEvent::SessionStarted { session } => {
            match repository.create(&NewSessionRecord::from_session(&session)) {
                Ok(record_id) => {
                    state.registry.set_record_id(&session.client_id, record_id).await;
                }
                Err(e) => {
                    eprintln!(
                        "Failed to persist new session for '{}': {:#}",
                        session.client_id, e
                    );
                }
            }
        }

        TimerEvent::SessionCompleted { summary } => {
            notifier.session_completed(&summary.client_id, summary.actual_duration_secs);
            debouncers.remove(&summary.client_id);
            persist_summary(repository.as_ref(), &summary);
        }

        TimerEvent::SessionStopped { summary } => {
            debouncers.remove(&summary.client_id);
            persist_summary(repository.as_ref(), &summary);
        }

        TimerEvent::SessionIdle { client_id } => {
            if debouncers.entry(client_id.clone()).or_default().should_notify() {
                notifier.idle_detected(&client_id);
            }
        }

        TimerEvent::SleepDetected { client_id } => {
            if debouncers.entry(client_id.clone()).or_default().should_notify() {
                notifier.sleep_detected(&client_id);
            }
        }
    }
}

/// Write a terminal summary to storage. Falls back to creating a fresh
/// record when the session never got one (e.g. its create failed earlier).
pub fn persist_summary(repository: &dyn SessionRepository, summary: &SessionSummary) {
    let result = match summary.record_id {
        Some(record_id) => repository.update(record_id, &SessionPatch::from_summary(summary)),
        None => repository
            .create(&NewSessionRecord::from_summary(summary))
            .map(|_| ()),
    };
    if let Err(e) = result {
        eprintln!(
            "Failed to persist session summary for '{}': {:#}",
            summary.client_id, e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::config::TimerTuning;
    use crate::timer::persistence::SessionRecord;
    use crate::timer::session::{RecordId, SessionState};
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    fn test_state() -> Arc<DaemonState> {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::rooted_at(dir.path().to_path_buf());
        // TempDir is dropped here; these tests never touch the filesystem
        Arc::new(DaemonState::new(config))
    }

    fn shutdown_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
        mpsc::channel(1)
    }

    async fn start_session(state: &Arc<DaemonState>, client_id: &str) -> TimerResponse {
        let (tx, _rx) = shutdown_channel();
        handle_request(
            state,
            TimerRequest::Start {
                client_id: client_id.to_string(),
                session_type: "deep_work".to_string(),
                planned_duration_secs: Some(1500),
                task_id: None,
                category_id: None,
            },
            &tx,
        )
        .await
    }

    #[tokio::test]
    async fn handshake_accepts_matching_version() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();
        let response = handle_request(
            &state,
            TimerRequest::Handshake {
                client_version: PROTOCOL_VERSION,
            },
            &tx,
        )
        .await;
        assert!(matches!(
            response,
            TimerResponse::Handshake { protocol_version } if protocol_version == PROTOCOL_VERSION
        ));
    }

    #[tokio::test]
    async fn handshake_rejects_version_mismatch() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();
        let response = handle_request(
            &state,
            TimerRequest::Handshake {
                client_version: PROTOCOL_VERSION + 1,
            },
            &tx,
        )
        .await;
        match response {
            TimerResponse::Error { code, .. } => assert_eq!(code, ErrorCode::VersionMismatch),
            other => panic!("Expected version mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ping_pongs() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();
        let response = handle_request(&state, TimerRequest::Ping, &tx).await;
        assert!(matches!(response, TimerResponse::Pong));
    }

    #[tokio::test]
    async fn shutdown_signals_the_accept_loop() {
        let state = test_state();
        let (tx, mut rx) = shutdown_channel();
        let response = handle_request(&state, TimerRequest::Shutdown, &tx).await;
        assert!(matches!(response, TimerResponse::ShuttingDown));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn start_returns_running_session() {
        let state = test_state();
        match start_session(&state, "desktop-1").await {
            TimerResponse::SessionStarted { session } => {
                assert_eq!(session.client_id, "desktop-1");
                assert_eq!(session.state, SessionState::Running);
                assert_eq!(session.planned_duration_secs, 1500);
            }
            other => panic!("Expected SessionStarted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_defaults_duration_from_session_type() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();
        let response = handle_request(
            &state,
            TimerRequest::Start {
                client_id: "c1".to_string(),
                session_type: "break".to_string(),
                planned_duration_secs: None,
                task_id: None,
                category_id: None,
            },
            &tx,
        )
        .await;
        match response {
            TimerResponse::SessionStarted { session } => {
                assert_eq!(session.planned_duration_secs, 300);
            }
            other => panic!("Expected SessionStarted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_degrades_unknown_type_to_custom() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();
        let response = handle_request(
            &state,
            TimerRequest::Start {
                client_id: "c1".to_string(),
                session_type: "pomodoro_extreme".to_string(),
                planned_duration_secs: None,
                task_id: None,
                category_id: None,
            },
            &tx,
        )
        .await;
        match response {
            TimerResponse::SessionStarted { session } => {
                assert_eq!(session.session_type, SessionType::Custom);
                assert_eq!(session.planned_duration_secs, 1500);
            }
            other => panic!("Expected SessionStarted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_rejects_empty_client_and_zero_duration() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();

        let response = handle_request(
            &state,
            TimerRequest::Start {
                client_id: "  ".to_string(),
                session_type: "deep_work".to_string(),
                planned_duration_secs: Some(1500),
                task_id: None,
                category_id: None,
            },
            &tx,
        )
        .await;
        assert!(matches!(
            response,
            TimerResponse::Error { code: ErrorCode::InvalidRequest, .. }
        ));

        let response = handle_request(
            &state,
            TimerRequest::Start {
                client_id: "c1".to_string(),
                session_type: "deep_work".to_string(),
                planned_duration_secs: Some(0),
                task_id: None,
                category_id: None,
            },
            &tx,
        )
        .await;
        assert!(matches!(
            response,
            TimerResponse::Error { code: ErrorCode::InvalidRequest, .. }
        ));
    }

    #[tokio::test]
    async fn pause_resume_stop_flow() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();
        start_session(&state, "c1").await;

        let response = handle_request(
            &state,
            TimerRequest::Pause {
                client_id: "c1".to_string(),
            },
            &tx,
        )
        .await;
        assert!(matches!(
            response,
            TimerResponse::SessionState { state: Some(SessionState::Paused) }
        ));

        let response = handle_request(
            &state,
            TimerRequest::Resume {
                client_id: "c1".to_string(),
            },
            &tx,
        )
        .await;
        assert!(matches!(
            response,
            TimerResponse::SessionState { state: Some(SessionState::Running) }
        ));

        let response = handle_request(
            &state,
            TimerRequest::Stop {
                client_id: "c1".to_string(),
            },
            &tx,
        )
        .await;
        match response {
            TimerResponse::SessionStopped { summary } => {
                assert!(!summary.completed);
                assert_eq!(summary.client_id, "c1");
            }
            other => panic!("Expected SessionStopped, got {:?}", other),
        }

        // Session is gone now; further mutations answer with None state
        let response = handle_request(
            &state,
            TimerRequest::Pause {
                client_id: "c1".to_string(),
            },
            &tx,
        )
        .await;
        assert!(matches!(response, TimerResponse::SessionState { state: None }));
    }

    #[tokio::test]
    async fn complete_validates_quality_rating() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();
        start_session(&state, "c1").await;

        let response = handle_request(
            &state,
            TimerRequest::Complete {
                client_id: "c1".to_string(),
                quality_rating: Some(6),
                notes: None,
            },
            &tx,
        )
        .await;
        assert!(matches!(
            response,
            TimerResponse::Error { code: ErrorCode::InvalidRequest, .. }
        ));

        // Session survived the rejected request
        let response = handle_request(
            &state,
            TimerRequest::Complete {
                client_id: "c1".to_string(),
                quality_rating: Some(4),
                notes: Some("solid".to_string()),
            },
            &tx,
        )
        .await;
        match response {
            TimerResponse::SessionCompleted { summary } => {
                assert!(summary.completed);
                assert_eq!(summary.quality_rating, Some(4));
                assert_eq!(summary.notes.as_deref(), Some("solid"));
            }
            other => panic!("Expected SessionCompleted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn status_reports_none_for_absent_session() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();
        let response = handle_request(
            &state,
            TimerRequest::Status {
                client_id: "nobody".to_string(),
            },
            &tx,
        )
        .await;
        match response {
            TimerResponse::Status {
                state,
                remaining_secs,
                is_idle,
            } => {
                assert_eq!(state, None);
                assert_eq!(remaining_secs, 0);
                assert!(!is_idle);
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn heartbeat_reports_whether_a_session_was_touched() {
        let state = test_state();
        let (tx, _rx) = shutdown_channel();

        let response = handle_request(
            &state,
            TimerRequest::Heartbeat {
                client_id: "c1".to_string(),
            },
            &tx,
        )
        .await;
        assert!(matches!(response, TimerResponse::HeartbeatAck { updated: false }));

        start_session(&state, "c1").await;
        let response = handle_request(
            &state,
            TimerRequest::Heartbeat {
                client_id: "c1".to_string(),
            },
            &tx,
        )
        .await;
        assert!(matches!(response, TimerResponse::HeartbeatAck { updated: true }));
    }

    // ------------------------------------------------------------------
    // Event pump
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingRepo {
        created: Mutex<Vec<NewSessionRecord>>,
        updated: Mutex<Vec<(RecordId, SessionPatch)>>,
        fail_create: Mutex<bool>,
    }

    impl SessionRepository for RecordingRepo {
        fn create(&self, record: &NewSessionRecord) -> anyhow::Result<RecordId> {
            if *self.fail_create.lock().unwrap() {
                anyhow::bail!("disk full");
            }
            let mut created = self.created.lock().unwrap();
            created.push(record.clone());
            Ok(created.len() as RecordId)
        }

        fn update(&self, record_id: RecordId, patch: &SessionPatch) -> anyhow::Result<()> {
            self.updated.lock().unwrap().push((record_id, patch.clone()));
            Ok(())
        }

        fn find_completed_between(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> anyhow::Result<Vec<SessionRecord>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        completed: Mutex<Vec<String>>,
        idle: Mutex<Vec<String>>,
        sleep: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn session_completed(&self, client_id: &str, _actual_duration_secs: u64) {
            self.completed.lock().unwrap().push(client_id.to_string());
        }
        fn idle_detected(&self, client_id: &str) {
            self.idle.lock().unwrap().push(client_id.to_string());
        }
        fn sleep_detected(&self, client_id: &str) {
            self.sleep.lock().unwrap().push(client_id.to_string());
        }
    }

    async fn pump_pending_events(
        state: &Arc<DaemonState>,
        events: &mut tokio::sync::broadcast::Receiver<TimerEvent>,
        repo: &Arc<dyn SessionRepository>,
        notifier: &RecordingNotifier,
        debouncers: &mut HashMap<String, NotificationDebouncer>,
    ) {
        while let Ok(event) = events.try_recv() {
            handle_event(state, repo, notifier, debouncers, event).await;
        }
    }

    #[tokio::test]
    async fn pump_creates_record_and_wires_id_back() {
        let state = test_state();
        let mut events = state.registry.subscribe();
        let recording = Arc::new(RecordingRepo::default());
        let repo: Arc<dyn SessionRepository> = recording.clone();
        let notifier = RecordingNotifier::default();
        let mut debouncers = HashMap::new();

        start_session(&state, "c1").await;
        pump_pending_events(&state, &mut events, &repo, &notifier, &mut debouncers).await;

        assert_eq!(recording.created.lock().unwrap().len(), 1);

        // The terminal summary must carry the id the pump wired back
        let (tx, _rx) = shutdown_channel();
        let response = handle_request(
            &state,
            TimerRequest::Stop {
                client_id: "c1".to_string(),
            },
            &tx,
        )
        .await;
        let summary = match response {
            TimerResponse::SessionStopped { summary } => summary,
            other => panic!("Expected SessionStopped, got {:?}", other),
        };
        assert_eq!(summary.record_id, Some(1));

        pump_pending_events(&state, &mut events, &repo, &notifier, &mut debouncers).await;
        let updated = recording.updated.lock().unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].0, 1);
    }

    #[tokio::test]
    async fn pump_survives_create_failure_and_falls_back_on_stop() {
        let state = test_state();
        let mut events = state.registry.subscribe();
        let recording = Arc::new(RecordingRepo::default());
        let repo: Arc<dyn SessionRepository> = recording.clone();
        let notifier = RecordingNotifier::default();
        let mut debouncers = HashMap::new();

        *recording.fail_create.lock().unwrap() = true;
        start_session(&state, "c1").await;
        pump_pending_events(&state, &mut events, &repo, &notifier, &mut debouncers).await;

        // The create failed but the session is alive and mutable
        assert!(state.registry.status("c1").await.is_some());

        *recording.fail_create.lock().unwrap() = false;
        let summary = state.registry.stop("c1").await.unwrap();
        assert_eq!(summary.record_id, None);

        pump_pending_events(&state, &mut events, &repo, &notifier, &mut debouncers).await;
        // No record id, so the pump created a fresh terminal record
        assert_eq!(recording.created.lock().unwrap().len(), 1);
        assert!(recording.updated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pump_notifies_on_completion_idle_and_sleep() {
        let state = test_state();
        let mut events = state.registry.subscribe();
        let recording = Arc::new(RecordingRepo::default());
        let repo: Arc<dyn SessionRepository> = recording.clone();
        let notifier = RecordingNotifier::default();
        let mut debouncers = HashMap::new();

        start_session(&state, "c1").await;
        state.registry.complete("c1", None, None).await.unwrap();
        pump_pending_events(&state, &mut events, &repo, &notifier, &mut debouncers).await;
        assert_eq!(notifier.completed.lock().unwrap().as_slice(), ["c1"]);

        handle_event(
            &state,
            &repo,
            &notifier,
            &mut debouncers,
            TimerEvent::SessionIdle {
                client_id: "c2".to_string(),
            },
        )
        .await;
        assert_eq!(notifier.idle.lock().unwrap().as_slice(), ["c2"]);

        // Debounced: a second attention event right away stays quiet
        handle_event(
            &state,
            &repo,
            &notifier,
            &mut debouncers,
            TimerEvent::SleepDetected {
                client_id: "c2".to_string(),
            },
        )
        .await;
        assert!(notifier.sleep.lock().unwrap().is_empty());
    }

    #[test]
    fn tick_loop_uses_configured_interval() {
        let tuning = TimerTuning::default();
        assert_eq!(tuning.tick_interval, std::time::Duration::from_secs(1));
    }
}
