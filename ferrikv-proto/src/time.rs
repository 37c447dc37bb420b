use std::time::SystemTime;

/// Current unix timestamp in whole seconds, used for key expiry and RDB
/// timestamps.
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// Current unix timestamp in whole milliseconds, used for idle/keepalive
/// bookkeeping that wants finer granularity than `timestamp_secs`.
#[inline]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
