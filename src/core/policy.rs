//! Re-run policies: pure functions computing a plan's next due time.
//!
//! A policy answers two questions for the dispatch loop: *when* should this
//! plan run next, and *should it still be on the schedule at all*. The two
//! stock policies mirror the classic fixed-rate vs fixed-delay distinction
//! in periodic schedulers; [`DateLimit`] decorates any policy with a
//! wall-clock expiry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::util::clock;

/// Computes a plan's next due time from its history.
pub trait RunPolicy: Send + Sync {
    /// Next due time in milliseconds since the Unix epoch.
    ///
    /// `expected` is the due time of the most recent dispatched invocation,
    /// `None` before the first dispatch. `now_ms` is the wall clock at the
    /// moment of rescheduling; delay-anchored policies use it.
    fn next_run_time(&self, expected: Option<u128>, now_ms: u128) -> u128;

    /// Whether the plan should stay on the schedule at `now_ms`.
    ///
    /// The scheduler treats `false` as an implicit removal, with the normal
    /// removal notifications. Defaults to `true`; decorators such as
    /// [`DateLimit`] override it.
    fn should_reschedule(&self, _now_ms: u128) -> bool {
        true
    }
}

impl RunPolicy for Box<dyn RunPolicy> {
    fn next_run_time(&self, expected: Option<u128>, now_ms: u128) -> u128 {
        self.as_ref().next_run_time(expected, now_ms)
    }

    fn should_reschedule(&self, now_ms: u128) -> bool {
        self.as_ref().should_reschedule(now_ms)
    }
}

/// Re-run at a fixed rate, anchored to the theoretical previous schedule
/// time.
///
/// If an invocation overruns its period, the next due time may already be
/// in the past and the scheduler runs the plan again immediately: ticks are
/// never skipped, cadence catches up.
#[derive(Debug, Clone)]
pub struct FixedRate {
    period: Duration,
}

impl FixedRate {
    /// Policy with the given period between theoretical run times.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self { period }
    }

    /// The configured period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

impl RunPolicy for FixedRate {
    fn next_run_time(&self, expected: Option<u128>, _now_ms: u128) -> u128 {
        let period = self.period.as_millis();
        expected.map_or(period, |scheduled| scheduled + period)
    }
}

/// Re-run a fixed delay after the previous invocation actually completed.
///
/// Cadence never bursts; under sustained overrun it drifts later instead.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    period: Duration,
}

impl FixedDelay {
    /// Policy with the given delay between a completion and the next run.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self { period }
    }

    /// The configured delay.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

impl RunPolicy for FixedDelay {
    fn next_run_time(&self, _expected: Option<u128>, now_ms: u128) -> u128 {
        now_ms + self.period.as_millis()
    }
}

/// Decorator retiring the schedule once a wall-clock deadline passes.
///
/// `next_run_time` forwards to the inner policy; `should_reschedule`
/// refuses once `now >= deadline`, which the scheduler turns into the
/// normal removal path, removal notification included.
#[derive(Debug, Clone)]
pub struct DateLimit<P> {
    inner: P,
    deadline_ms: u128,
}

impl<P: RunPolicy> DateLimit<P> {
    /// Limit `inner` to run only before `deadline`.
    #[must_use]
    pub fn new(inner: P, deadline: SystemTime) -> Self {
        let deadline_ms = deadline
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());
        Self { inner, deadline_ms }
    }

    /// Limit `inner` to the next `ttl` from now.
    #[must_use]
    pub fn expires_in(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            deadline_ms: clock::now_ms() + ttl.as_millis(),
        }
    }

    /// The deadline in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn deadline_ms(&self) -> u128 {
        self.deadline_ms
    }
}

impl<P: RunPolicy> RunPolicy for DateLimit<P> {
    fn next_run_time(&self, expected: Option<u128>, now_ms: u128) -> u128 {
        self.inner.next_run_time(expected, now_ms)
    }

    fn should_reschedule(&self, now_ms: u128) -> bool {
        now_ms < self.deadline_ms && self.inner.should_reschedule(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_rate_first_run_is_one_period() {
        let policy = FixedRate::new(Duration::from_millis(250));
        assert_eq!(policy.next_run_time(None, 1_000_000), 250);
    }

    #[test]
    fn test_fixed_rate_anchors_to_previous_schedule_time() {
        let policy = FixedRate::new(Duration::from_millis(250));
        assert_eq!(policy.next_run_time(Some(10_000), 99_999), 10_250);
    }

    #[test]
    fn test_fixed_rate_catches_up_after_overrun() {
        let policy = FixedRate::new(Duration::from_millis(100));
        // Run scheduled for T=1000 finished late, at now=1500: the next
        // due time is already in the past.
        let next = policy.next_run_time(Some(1_000), 1_500);
        assert_eq!(next, 1_100);
        assert!(next < 1_500);
    }

    #[test]
    fn test_fixed_delay_anchors_to_completion_time() {
        let policy = FixedDelay::new(Duration::from_millis(300));
        assert_eq!(policy.next_run_time(Some(1_000), 5_000), 5_300);
        assert_eq!(policy.next_run_time(None, 5_000), 5_300);
    }

    #[test]
    fn test_default_policies_always_reschedule() {
        assert!(FixedRate::new(Duration::from_secs(1)).should_reschedule(u128::MAX));
        assert!(FixedDelay::new(Duration::from_secs(1)).should_reschedule(u128::MAX));
    }

    #[test]
    fn test_date_limit_forwards_next_run_time() {
        let limited = DateLimit::new(
            FixedRate::new(Duration::from_millis(100)),
            UNIX_EPOCH + Duration::from_millis(2_000),
        );
        assert_eq!(limited.next_run_time(Some(500), 600), 600);
        assert_eq!(limited.deadline_ms(), 2_000);
    }

    #[test]
    fn test_date_limit_expires_at_deadline() {
        let limited = DateLimit::new(
            FixedDelay::new(Duration::from_millis(100)),
            UNIX_EPOCH + Duration::from_millis(2_000),
        );
        assert!(limited.should_reschedule(1_999));
        assert!(!limited.should_reschedule(2_000));
        assert!(!limited.should_reschedule(3_000));
    }

    #[test]
    fn test_date_limit_expires_in_uses_wall_clock() {
        let limited =
            DateLimit::expires_in(FixedRate::new(Duration::from_millis(10)), Duration::from_secs(60));
        let now = clock::now_ms();
        assert!(limited.should_reschedule(now));
        assert!(!limited.should_reschedule(now + 120_000));
    }

    #[test]
    fn test_boxed_policy_delegates() {
        let boxed: Box<dyn RunPolicy> = Box::new(FixedRate::new(Duration::from_millis(50)));
        assert_eq!(boxed.next_run_time(None, 0), 50);
        assert!(boxed.should_reschedule(0));
    }
}
