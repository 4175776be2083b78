// tempo - focus timer session daemon and sync client

// Timer engine, sync protocol, persistence, notifications
pub mod timer;

// Async test helpers (timeout/retry assertions)
pub mod test_utils;
