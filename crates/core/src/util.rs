use std::time::{SystemTime, UNIX_EPOCH};

/// Returns current unix epoch milliseconds.
pub fn now_ms() -> i64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}

/// Returns current unix epoch seconds.
pub fn now_unix() -> i64 {
    now_ms() / 1000
}

/// Generates a fresh idempotency key for mutating service calls.
pub fn new_idempotency_key() -> String {
    uuid::Uuid::new_v4().to_string()
}
