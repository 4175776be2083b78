// Sync protocol - shared structs for daemon <-> client communication
// Uses framed JSON messages over Unix sockets

use crate::timer::session::{SessionState, SessionSummary, TimerSession};
use serde::{Deserialize, Serialize};

/// Bumped whenever a request or response shape changes incompatibly
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum size of a single request frame (1MB)
pub const MAX_REQUEST_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum size of a single response frame (10MB)
pub const MAX_RESPONSE_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Structured error codes, so clients can branch without parsing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or failed-validation request (bad duration, missing client id)
    InvalidRequest,
    /// Client and daemon protocol versions differ
    VersionMismatch,
    /// The daemon did not answer within the read timeout
    Timeout,
    /// Could not reach the daemon at all
    DaemonUnavailable,
    /// Anything else that went wrong daemon-side
    Internal,
}

// ============================================================================
// Client -> Daemon requests
// ============================================================================

/// Request message from client to daemon. Every session operation is keyed
/// by the caller-supplied client id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerRequest {
    /// Protocol version exchange; sent once per connection before anything else
    Handshake { client_version: u32 },
    /// Start a session. Omitting the duration uses the type's recommended
    /// default; an unknown type name degrades to `custom`.
    Start {
        client_id: String,
        session_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        planned_duration_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category_id: Option<String>,
    },
    /// Pause the running session
    Pause { client_id: String },
    /// Resume the paused session
    Resume { client_id: String },
    /// Stop the session without completing it
    Stop { client_id: String },
    /// Complete the session, optionally rating it
    Complete {
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality_rating: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    /// Authoritative state/remaining/idle snapshot
    Status { client_id: String },
    /// Keep the server-side activity timestamp fresh
    Heartbeat { client_id: String },
    /// Ping to check if daemon is alive
    Ping,
    /// Request daemon to shut down gracefully
    Shutdown,
}

// ============================================================================
// Daemon -> Client responses
// ============================================================================

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerResponse {
    /// Handshake accepted
    Handshake { protocol_version: u32 },
    /// Session was started
    SessionStarted { session: TimerSession },
    /// Result of pause/resume, and the no-op answer for mutations on a
    /// client with no active session (state is None then)
    SessionState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<SessionState>,
    },
    /// Session was stopped; terminal values delivered once
    SessionStopped { summary: SessionSummary },
    /// Session was completed; terminal values delivered once
    SessionCompleted { summary: SessionSummary },
    /// Authoritative status snapshot. `state` is None when the client has
    /// no active session.
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<SessionState>,
        remaining_secs: u64,
        is_idle: bool,
    },
    /// Heartbeat acknowledged; `updated` is false when no session exists
    HeartbeatAck { updated: bool },
    /// Pong response
    Pong,
    /// Shutdown acknowledged
    ShuttingDown,
    /// Error response
    Error { code: ErrorCode, message: String },
}

// ============================================================================
// Helpers for message framing
// ============================================================================

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, serde_json::Error> {
    let trimmed = if bytes.last() == Some(&b'\n') {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    };
    serde_json::from_slice(trimmed)
}
