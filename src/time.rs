// Timestamp helpers
//
// The remote service expects unix-epoch milliseconds. Signed, so hook
// backdating can subtract without wrapping near the epoch in tests.

pub fn now_unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
