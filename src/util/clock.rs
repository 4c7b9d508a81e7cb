//! Millisecond wall-clock helpers shared by the scheduler core.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis())
}

/// Duration from `now` until `due_ms`; zero when the due time has passed.
#[must_use]
pub fn until(due_ms: u128, now: u128) -> Duration {
    let delta = due_ms.saturating_sub(now);
    Duration::from_millis(u64::try_from(delta).unwrap_or(u64::MAX))
}
