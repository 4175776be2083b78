// tempo-daemon - background timer session daemon
//
// Owns the authoritative timer state. Clients talk to it over a Unix
// socket with newline-delimited JSON frames; the engine itself lives in
// the tempo library so it stays testable without a socket.

use anyhow::{Context, Result};
use std::sync::Arc;
use tempo::timer::config::Config;
use tempo::timer::notify::TerminalNotifier;
use tempo::timer::persistence::{JsonSessionStore, SessionRepository};
use tempo::timer::server::{self, persist_summary, DaemonState};
use tokio::net::UnixListener;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env();

    // Ensure data directories exist
    config
        .ensure_dirs()
        .context("Failed to create data directories")?;

    // Clean up stale socket if exists
    if config.socket_exists() {
        if config.is_daemon_running() {
            eprintln!("Daemon already running (PID: {:?})", config.read_pid());
            std::process::exit(1);
        }
        // Stale socket, remove it
        config
            .remove_socket()
            .context("Failed to remove stale socket")?;
    }

    // Write PID file
    config.write_pid().context("Failed to write PID file")?;

    // Open the session store and reconcile records left in-progress by a
    // previous run (crash or power loss)
    let store = Arc::new(JsonSessionStore::new(config.clone()));
    match store.reconcile_stale(chrono::Utc::now()) {
        Ok(0) => {}
        Ok(n) => println!("Reconciled {} stale session record(s) from a previous run", n),
        Err(e) => eprintln!("Failed to reconcile stale sessions: {:#}", e),
    }

    // Initialize daemon state
    let state = Arc::new(DaemonState::new(config.clone()));

    // Create Unix socket listener
    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("Failed to bind socket: {}", config.socket_path.display()))?;

    // Secure socket permissions (Unix only - owner-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!(
                    "Failed to set socket permissions: {}",
                    config.socket_path.display()
                )
            })?;
    }

    println!("Daemon listening on {}", config.socket_path.display());

    // Background loops: the 1s tick drives time-derived transitions, the
    // event pump persists records and raises notifications
    let repository: Arc<dyn SessionRepository> = store;
    let tick_task = tokio::spawn(server::run_tick_loop(Arc::clone(&state)));
    let pump_task = tokio::spawn(server::run_event_pump(
        Arc::clone(&state),
        Arc::clone(&repository),
        Arc::new(TerminalNotifier),
    ));

    // Shutdown signal channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Handle SIGTERM/SIGINT for graceful shutdown
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        let _ = shutdown_tx_clone.send(()).await;
    });

    // Accept connections until shutdown
    server::serve(listener, Arc::clone(&state), shutdown_tx, shutdown_rx).await?;
    println!("Shutting down daemon...");

    tick_task.abort();
    // Stop the pump first so drain summaries are persisted exactly once,
    // by us, below
    pump_task.abort();

    let active = state.registry.active_count().await;
    if active > 0 {
        println!("Stopping {} active session(s)", active);
    }
    for summary in state.registry.drain().await {
        persist_summary(repository.as_ref(), &summary);
    }

    // Cleanup
    config.remove_pid().ok();
    config.remove_socket().ok();

    println!("Daemon stopped");
    Ok(())
}
