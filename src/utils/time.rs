use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds
pub fn current_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
