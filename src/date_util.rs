use chrono::{Duration, TimeZone, Utc};

/// Current time as milliseconds since the Unix epoch (the watermark unit).
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Whether a watermark is missing or older than `expiration` at `now`.
pub fn is_expired(last_sync_at: Option<i64>, now: i64, expiration: Duration) -> bool {
    match last_sync_at {
        Some(last) => now - last > expiration.num_milliseconds(),
        None => true,
    }
}

/// Render an epoch-millisecond timestamp as RFC 3339 (UTC).
pub fn format_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        None => millis.to_string(),
    }
}
