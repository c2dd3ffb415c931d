use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

pub(crate) fn get_duration_since_epoch() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// return millisecond
pub(crate) fn get_now_as_millis() -> u64 {
    get_duration_since_epoch().as_millis() as u64
}

/// Whole seconds covering `duration`, at least one
pub(crate) fn ceil_secs(duration: Duration) -> i64 {
    let millis = duration.as_millis();
    let secs = millis.div_ceil(1000);
    secs.clamp(1, i64::MAX as u128) as i64
}
