// Client side of the sync protocol
//
// `send_request` opens a fresh connection per request, performs the
// protocol handshake, and reads exactly one response. `SyncClient` builds
// the long-lived client on top of it: a status poll loop feeding an
// optimistic countdown, a heartbeat loop, and a connection monitor that
// escalates repeated failures through a bounded reconnect schedule.

use crate::timer::config::{Config, TimerTuning};
use crate::timer::countdown::OptimisticCountdown;
use crate::timer::protocol::{
    deserialize_message, serialize_message, ErrorCode, TimerRequest, TimerResponse,
    MAX_RESPONSE_FRAME_SIZE, PROTOCOL_VERSION,
};
use crate::timer::session::{SessionState, SessionSummary, TimerSession};
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc, watch};

/// How long to wait for any single daemon response
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn unavailable(message: String) -> TimerResponse {
    TimerResponse::Error {
        code: ErrorCode::DaemonUnavailable,
        message,
    }
}

/// Send a request to the daemon and receive a response.
///
/// Opens a connection, performs the protocol handshake, then exchanges the
/// request. Transport problems come back as structured `TimerResponse::Error`
/// values (`DaemonUnavailable`, `Timeout`, `Internal`) so callers can branch
/// without parsing messages.
pub async fn send_request(config: &Config, request: TimerRequest) -> Result<TimerResponse> {
    let mut stream = match UnixStream::connect(&config.socket_path).await {
        Ok(stream) => stream,
        Err(e) => {
            return Ok(unavailable(format!(
                "Failed to connect to daemon at {}: {}",
                config.socket_path.display(),
                e
            )));
        }
    };
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    // Perform protocol handshake first
    let handshake = TimerRequest::Handshake {
        client_version: PROTOCOL_VERSION,
    };
    let bytes = serialize_message(&handshake)?;
    if let Err(e) = writer.write_all(&bytes).await {
        return Ok(unavailable(format!("Failed to send handshake: {}", e)));
    }
    if let Err(e) = writer.flush().await {
        return Ok(unavailable(format!("Failed to flush handshake: {}", e)));
    }

    match read_response(&mut reader).await {
        TimerResponse::Handshake { protocol_version: _ } => {}
        // Version mismatch and transport problems pass through as-is
        error @ TimerResponse::Error { .. } => return Ok(error),
        other => {
            return Ok(TimerResponse::Error {
                code: ErrorCode::Internal,
                message: format!("Expected handshake response, got: {:?}", other),
            });
        }
    }

    // Send the actual request
    let bytes = serialize_message(&request)?;
    if let Err(e) = writer.write_all(&bytes).await {
        return Ok(unavailable(format!("Failed to send request to daemon: {}", e)));
    }
    if let Err(e) = writer.flush().await {
        return Ok(unavailable(format!("Failed to flush stream: {}", e)));
    }

    Ok(read_response(&mut reader).await)
}

/// Read one response frame, enforcing the timeout and the frame size limit.
/// Failures come back as structured error responses.
async fn read_response<R>(reader: &mut BufReader<R>) -> TimerResponse
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = match tokio::time::timeout(REQUEST_TIMEOUT, reader.read_line(&mut line)).await {
        Err(_) => {
            return TimerResponse::Error {
                code: ErrorCode::Timeout,
                message: "Daemon read timeout".to_string(),
            };
        }
        Ok(Err(e)) => {
            return unavailable(format!("Failed to read response from daemon: {}", e));
        }
        Ok(Ok(n)) => n,
    };

    if n == 0 {
        return unavailable("Daemon closed connection unexpectedly".to_string());
    }
    if line.len() > MAX_RESPONSE_FRAME_SIZE {
        return TimerResponse::Error {
            code: ErrorCode::Internal,
            message: format!(
                "Response frame too large: {} bytes (max {})",
                line.len(),
                MAX_RESPONSE_FRAME_SIZE
            ),
        };
    }

    match deserialize_message::<TimerResponse>(line.as_bytes()) {
        Ok(response) => response,
        Err(e) => TimerResponse::Error {
            code: ErrorCode::Internal,
            message: format!("Failed to parse daemon response: {} (line: {})", e, line.trim()),
        },
    }
}

// ============================================================================
// Connection monitoring
// ============================================================================

/// Connection health transitions surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// Repeated polls failed; the client is retrying on a backoff schedule
    Lost,
    /// A poll succeeded after the connection had been lost
    Restored,
    /// The reconnect schedule is exhausted; only a manual refresh retries
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionStatus {
    Healthy,
    Lost,
    Failed,
}

/// Decides when poll failures become user-visible and how long to back off.
///
/// Individual failures stay silent below the failure threshold. At the
/// threshold the connection is declared lost and each further failure
/// consumes one slot of the reconnect schedule; when the schedule runs out
/// the monitor parks in Failed until `reset`.
#[derive(Debug)]
pub struct ConnectionMonitor {
    failure_threshold: u32,
    schedule: Vec<Duration>,
    consecutive_failures: u32,
    retry_index: usize,
    status: ConnectionStatus,
}

impl ConnectionMonitor {
    pub fn new(tuning: &TimerTuning) -> Self {
        Self {
            failure_threshold: tuning.failure_threshold,
            schedule: tuning.reconnect_schedule.clone(),
            consecutive_failures: 0,
            retry_index: 0,
            status: ConnectionStatus::Healthy,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ConnectionStatus::Failed
    }

    /// Record a failed poll. Returns the signal to surface (if any) and the
    /// delay before the next retry (None when the regular poll cadence, or
    /// nothing at all, should follow).
    pub fn on_failure(&mut self) -> (Option<ConnectionSignal>, Option<Duration>) {
        match self.status {
            ConnectionStatus::Healthy => {
                self.consecutive_failures += 1;
                if self.consecutive_failures < self.failure_threshold {
                    return (None, None);
                }
                self.status = ConnectionStatus::Lost;
                self.retry_index = 0;
                (Some(ConnectionSignal::Lost), self.schedule.first().copied())
            }
            ConnectionStatus::Lost => {
                self.retry_index += 1;
                match self.schedule.get(self.retry_index) {
                    Some(delay) => (None, Some(*delay)),
                    None => {
                        self.status = ConnectionStatus::Failed;
                        (Some(ConnectionSignal::Failed), None)
                    }
                }
            }
            ConnectionStatus::Failed => (None, None),
        }
    }

    /// Record a successful poll
    pub fn on_success(&mut self) -> Option<ConnectionSignal> {
        let was_unhealthy = self.status != ConnectionStatus::Healthy;
        self.reset();
        if was_unhealthy {
            Some(ConnectionSignal::Restored)
        } else {
            None
        }
    }

    /// Back to a clean slate; used by manual refresh to leave Failed
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.retry_index = 0;
        self.status = ConnectionStatus::Healthy;
    }
}

// ============================================================================
// Long-lived sync client
// ============================================================================

/// What a UI needs to render the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerView {
    pub state: Option<SessionState>,
    pub remaining_secs: u64,
    pub is_idle: bool,
}

const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Background sync client: polls the daemon for authoritative status,
/// keeps the optimistic countdown in sync, sends heartbeats, and reports
/// connection health transitions.
pub struct SyncClient {
    config: Config,
    client_id: String,
    countdown: Arc<StdMutex<OptimisticCountdown>>,
    view_rx: watch::Receiver<TimerView>,
    signals_tx: broadcast::Sender<ConnectionSignal>,
    refresh_tx: mpsc::Sender<()>,
    poll_task: tokio::task::JoinHandle<()>,
    heartbeat_task: tokio::task::JoinHandle<()>,
}

impl SyncClient {
    pub fn spawn(config: Config, client_id: String) -> Self {
        let countdown = Arc::new(StdMutex::new(OptimisticCountdown::new()));
        let (view_tx, view_rx) = watch::channel(TimerView::default());
        let (signals_tx, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let (refresh_tx, refresh_rx) = mpsc::channel(4);

        let poll_task = tokio::spawn(run_poll_loop(
            config.clone(),
            client_id.clone(),
            Arc::clone(&countdown),
            view_tx,
            signals_tx.clone(),
            refresh_rx,
        ));
        let heartbeat_task = tokio::spawn(run_heartbeat_loop(config.clone(), client_id.clone()));

        Self {
            config,
            client_id,
            countdown,
            view_rx,
            signals_tx,
            refresh_tx,
            poll_task,
            heartbeat_task,
        }
    }

    /// Latest authoritative view; updated by every successful poll
    pub fn view(&self) -> TimerView {
        *self.view_rx.borrow()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<TimerView> {
        self.view_rx.clone()
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.signals_tx.subscribe()
    }

    /// Locally extrapolated remaining seconds for display. None when no
    /// session is known.
    pub fn display_remaining(&self) -> Option<u64> {
        let countdown = self.countdown.lock().unwrap();
        countdown.display_remaining(Instant::now())
    }

    /// Force an immediate poll; also the way out of the Failed state
    pub async fn refresh(&self) {
        let _ = self.refresh_tx.send(()).await;
    }

    pub async fn start(
        &self,
        session_type: &str,
        planned_duration_secs: Option<u64>,
        task_id: Option<String>,
        category_id: Option<String>,
    ) -> Result<TimerSession> {
        let response = send_request(
            &self.config,
            TimerRequest::Start {
                client_id: self.client_id.clone(),
                session_type: session_type.to_string(),
                planned_duration_secs,
                task_id,
                category_id,
            },
        )
        .await?;
        let session = match response {
            TimerResponse::SessionStarted { session } => session,
            TimerResponse::Error { message, .. } => return Err(anyhow!(message)),
            other => return Err(anyhow!("Unexpected response: {:?}", other)),
        };
        self.refresh().await;
        Ok(session)
    }

    pub async fn pause(&self) -> Result<Option<SessionState>> {
        self.state_mutation(TimerRequest::Pause {
            client_id: self.client_id.clone(),
        })
        .await
    }

    pub async fn resume(&self) -> Result<Option<SessionState>> {
        self.state_mutation(TimerRequest::Resume {
            client_id: self.client_id.clone(),
        })
        .await
    }

    pub async fn stop(&self) -> Result<Option<SessionSummary>> {
        let response = send_request(
            &self.config,
            TimerRequest::Stop {
                client_id: self.client_id.clone(),
            },
        )
        .await?;
        let summary = match response {
            TimerResponse::SessionStopped { summary } => Some(summary),
            TimerResponse::SessionState { state: None } => None,
            TimerResponse::Error { message, .. } => return Err(anyhow!(message)),
            other => return Err(anyhow!("Unexpected response: {:?}", other)),
        };
        self.refresh().await;
        Ok(summary)
    }

    pub async fn complete(
        &self,
        quality_rating: Option<u8>,
        notes: Option<String>,
    ) -> Result<Option<SessionSummary>> {
        let response = send_request(
            &self.config,
            TimerRequest::Complete {
                client_id: self.client_id.clone(),
                quality_rating,
                notes,
            },
        )
        .await?;
        let summary = match response {
            TimerResponse::SessionCompleted { summary } => Some(summary),
            TimerResponse::SessionState { state: None } => None,
            TimerResponse::Error { message, .. } => return Err(anyhow!(message)),
            other => return Err(anyhow!("Unexpected response: {:?}", other)),
        };
        self.refresh().await;
        Ok(summary)
    }

    async fn state_mutation(&self, request: TimerRequest) -> Result<Option<SessionState>> {
        let response = send_request(&self.config, request).await?;
        let state = match response {
            TimerResponse::SessionState { state } => state,
            TimerResponse::Error { message, .. } => return Err(anyhow!(message)),
            other => return Err(anyhow!("Unexpected response: {:?}", other)),
        };
        self.refresh().await;
        Ok(state)
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.poll_task.abort();
        self.heartbeat_task.abort();
    }
}

async fn run_poll_loop(
    config: Config,
    client_id: String,
    countdown: Arc<StdMutex<OptimisticCountdown>>,
    view_tx: watch::Sender<TimerView>,
    signals_tx: broadcast::Sender<ConnectionSignal>,
    mut refresh_rx: mpsc::Receiver<()>,
) {
    let mut interval = tokio::time::interval(config.tuning.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut monitor = ConnectionMonitor::new(&config.tuning);
    // Delay imposed by the reconnect schedule, replacing the poll cadence
    let mut pending_retry: Option<Duration> = None;

    loop {
        if let Some(delay) = pending_retry.take() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                msg = refresh_rx.recv() => {
                    if msg.is_none() {
                        return;
                    }
                    monitor.reset();
                }
            }
        } else {
            tokio::select! {
                _ = interval.tick() => {
                    if monitor.is_failed() {
                        // Parked; only a refresh gets us polling again
                        continue;
                    }
                }
                msg = refresh_rx.recv() => {
                    if msg.is_none() {
                        return;
                    }
                    monitor.reset();
                }
            }
        }

        let request = TimerRequest::Status {
            client_id: client_id.clone(),
        };
        match send_request(&config, request).await {
            Ok(TimerResponse::Status {
                state,
                remaining_secs,
                is_idle,
            }) => {
                if let Some(signal) = monitor.on_success() {
                    let _ = signals_tx.send(signal);
                }
                {
                    let mut countdown = countdown.lock().unwrap();
                    countdown.apply_status(state, remaining_secs, is_idle, Instant::now());
                }
                let _ = view_tx.send(TimerView {
                    state,
                    remaining_secs,
                    is_idle,
                });
            }
            Ok(TimerResponse::Error { code, message })
                if matches!(code, ErrorCode::DaemonUnavailable | ErrorCode::Timeout) =>
            {
                let (signal, delay) = monitor.on_failure();
                if let Some(signal) = signal {
                    eprintln!("Daemon poll failed ({}); connection {:?}", message, signal);
                    let _ = signals_tx.send(signal);
                }
                pending_retry = delay;
            }
            Ok(other) => {
                // The daemon answered, so the connection is fine; the
                // response shape is not. Log and keep polling.
                eprintln!("Unexpected status response: {:?}", other);
                if let Some(signal) = monitor.on_success() {
                    let _ = signals_tx.send(signal);
                }
            }
            Err(e) => {
                let (signal, delay) = monitor.on_failure();
                if let Some(signal) = signal {
                    eprintln!("Daemon poll failed ({:#}); connection {:?}", e, signal);
                    let _ = signals_tx.send(signal);
                }
                pending_retry = delay;
            }
        }
    }
}

async fn run_heartbeat_loop(config: Config, client_id: String) {
    let mut interval = tokio::time::interval(config.tuning.heartbeat_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let request = TimerRequest::Heartbeat {
            client_id: client_id.clone(),
        };
        // Heartbeats are best-effort; the poll loop owns failure reporting
        let _ = send_request(&config, request).await;
    }
}
