// Environment configuration helpers for the daemon and client
// Handles platform-specific paths for sockets, PID files, and data
// directories, plus the timer tuning constants shared by every component.

use std::path::PathBuf;
use std::time::Duration;

/// Tuning constants for the session engine and the sync protocol.
///
/// Every interval and threshold lives here so that changing one does not
/// require touching the components that consume it. Tests shrink these to
/// milliseconds to keep runs fast.
#[derive(Debug, Clone)]
pub struct TimerTuning {
    /// How often the registry re-evaluates all active sessions
    pub tick_interval: Duration,
    /// A tick-to-tick gap above this means the host was suspended
    pub sleep_gap_threshold: Duration,
    /// No heartbeat for this long while Running means the user is idle
    pub idle_threshold: Duration,
    /// Client status poll cadence
    pub poll_interval: Duration,
    /// Client heartbeat cadence
    pub heartbeat_interval: Duration,
    /// Consecutive poll failures before the connection counts as lost
    pub failure_threshold: u32,
    /// Retry delays once the connection is lost; exhausting them is terminal
    pub reconnect_schedule: Vec<Duration>,
}

impl Default for TimerTuning {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            sleep_gap_threshold: Duration::from_secs(120),
            idle_threshold: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            failure_threshold: 3,
            reconnect_schedule: vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
        }
    }
}

/// Configuration for daemon paths and timer tuning
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing runtime files (socket, PID)
    pub runtime_dir: PathBuf,
    /// Directory for storing persistent state (sessions.json)
    pub state_dir: PathBuf,
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Path to the daemon PID file
    pub pid_file: PathBuf,
    /// Intervals and thresholds for the engine and the sync client
    pub tuning: TimerTuning,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        let runtime_dir = Self::default_runtime_dir();
        let state_dir = Self::default_state_dir();

        Self {
            socket_path: runtime_dir.join("daemon.sock"),
            pid_file: runtime_dir.join("daemon.pid"),
            runtime_dir,
            state_dir,
            tuning: TimerTuning::default(),
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        // TEMPO_DAEMON_DIR overrides BOTH runtime_dir and state_dir
        if let Ok(override_dir) = std::env::var("TEMPO_DAEMON_DIR") {
            let base = PathBuf::from(override_dir);
            return Self::rooted_at(base);
        }

        Self::default_paths()
    }

    /// Create a configuration with every path under a single directory.
    /// Used by the env override and by tests running against a TempDir.
    pub fn rooted_at(base: PathBuf) -> Self {
        Self {
            socket_path: base.join("daemon.sock"),
            pid_file: base.join("daemon.pid"),
            runtime_dir: base.clone(),
            state_dir: base,
            tuning: TimerTuning::default(),
        }
    }

    /// Get the default runtime directory (socket + pid)
    fn default_runtime_dir() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            // macOS: use same as state_dir
            Self::default_state_dir()
        }

        #[cfg(target_os = "linux")]
        {
            // Linux: prefer XDG_RUNTIME_DIR if set, else fall back to state_dir
            if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                PathBuf::from(runtime_dir).join("tempo")
            } else {
                Self::default_state_dir()
            }
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Self::default_state_dir()
        }
    }

    /// Get the default state directory (sessions.json)
    fn default_state_dir() -> PathBuf {
        // All platforms: ~/.tempo/ (or /tmp/tempo if home unavailable)
        dirs::home_dir()
            .map(|h| h.join(".tempo"))
            .unwrap_or_else(|| PathBuf::from("/tmp/tempo"))
    }

    /// Get the sessions.json file path
    pub fn sessions_file(&self) -> PathBuf {
        self.state_dir.join("sessions.json")
    }

    /// Ensure both runtime and state directories exist with appropriate permissions
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        // Create state directory (for durable data)
        std::fs::create_dir_all(&self.state_dir)?;

        // Create runtime directory with 0700 permissions on Unix
        std::fs::create_dir_all(&self.runtime_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.runtime_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Write the daemon PID to the PID file
    pub fn write_pid(&self) -> std::io::Result<()> {
        self.ensure_dirs()?;
        std::fs::write(&self.pid_file, std::process::id().to_string())
    }

    /// Read the daemon PID from the PID file
    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Remove the PID file
    pub fn remove_pid(&self) -> std::io::Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)
        } else {
            Ok(())
        }
    }

    /// Remove the socket file
    pub fn remove_socket(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
        } else {
            Ok(())
        }
    }

    /// Check if the daemon socket exists (indicating daemon may be running)
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if a process with the stored PID is still running
    #[cfg(unix)]
    pub fn is_daemon_running(&self) -> bool {
        if let Some(pid) = self.read_pid() {
            // Check if process exists by sending signal 0
            unsafe { libc::kill(pid as i32, 0) == 0 }
        } else {
            false
        }
    }

    #[cfg(not(unix))]
    pub fn is_daemon_running(&self) -> bool {
        // Conservative fallback: assume running if socket exists
        self.socket_exists()
    }
}
