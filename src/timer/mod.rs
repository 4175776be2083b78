// Timer session engine and sync protocol
// This module is shared between the daemon binary and embedding clients

pub mod config;
pub mod countdown;
pub mod detector;
pub mod notify;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

// Sync client (Unix only for now)
#[cfg(unix)]
pub mod client;
