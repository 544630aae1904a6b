//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in Unix milliseconds — the timestamp convention used
/// throughout the durable schema and the in-memory entity maps.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}
