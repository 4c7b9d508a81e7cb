//! Plan: a schedulable, repeatable unit of work plus its run history.
//!
//! A [`Plan`] owns three pieces of state, each with its own guard:
//!
//! - the **work body**, behind a mutex whose guard serializes `run()`: a
//!   plan executes at most once concurrently, no matter how many threads
//!   call it;
//! - the **run history** (state, counters, timestamps, last error), behind
//!   a second mutex paired with a condvar so `is_running()` and
//!   `await_finish()` stay responsive while the body executes;
//! - the **observer set**, weakly held, fired in the fixed order
//!   run → finished for every invocation.
//!
//! A failing work body is a recoverable event: the error is recorded as the
//! plan's last error and surfaced through the finish notification, then the
//! plan stays eligible for its next run.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::AppResult;
use crate::core::observer::{ObserverSet, PlanObserver};
use crate::core::policy::{FixedDelay, FixedRate, RunPolicy};
use crate::util::clock;

/// Execution state of a [`Plan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanState {
    /// Not currently executing.
    #[default]
    Idle,
    /// The work body is executing right now.
    Running,
}

/// Snapshot of one completed invocation, delivered to observers.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Identifier of the plan that ran.
    pub plan_id: Uuid,
    /// Name of the plan that ran.
    pub plan_name: Arc<str>,
    /// Completed-invocation count, including this run.
    pub finished_count: u64,
    /// Due time this invocation was dispatched for, if a scheduler ran it.
    pub expected_run_time: Option<u128>,
    /// Wall-clock time this invocation actually started.
    pub actual_run_time: Option<u128>,
    /// The failure from this invocation; `None` on success.
    pub error: Option<Arc<anyhow::Error>>,
}

impl RunOutcome {
    /// `true` when the work body returned without error.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

type BoxedBody = Box<dyn FnMut() -> AppResult<()> + Send>;

/// Mutable run history, guarded by the plan's history mutex.
#[derive(Default)]
struct RunHistory {
    state: PlanState,
    finished_count: u64,
    expected_run_time: Option<u128>,
    actual_run_time: Option<u128>,
    last_error: Option<Arc<anyhow::Error>>,
}

/// A schedulable, repeatable unit of work with its own run history.
///
/// Constructed once and shared as an `Arc`; scheduling identity is the
/// allocation itself, there is no separate id key. `run()` may be invoked
/// by a scheduler or directly by the caller.
///
/// ```
/// use std::time::Duration;
/// use replan::Plan;
///
/// let plan = Plan::fixed_rate(
///     "heartbeat",
///     Duration::ZERO,
///     Duration::from_secs(30),
///     || Ok(()),
/// );
/// plan.run();
/// assert_eq!(plan.finished_count(), 1);
/// assert!(plan.last_error().is_none());
/// ```
pub struct Plan {
    id: Uuid,
    name: Arc<str>,
    initial_delay: Duration,
    policy: Box<dyn RunPolicy>,
    body: Mutex<BoxedBody>,
    history: Mutex<RunHistory>,
    finished: Condvar,
    observers: ObserverSet<dyn PlanObserver>,
}

impl Plan {
    /// Plan with an explicit re-run policy.
    ///
    /// `initial_delay` is the offset from `schedule()` to the first run;
    /// after that the policy decides each next due time.
    pub fn new<P, F>(
        name: impl Into<String>,
        initial_delay: Duration,
        policy: P,
        body: F,
    ) -> Arc<Self>
    where
        P: RunPolicy + 'static,
        F: FnMut() -> AppResult<()> + Send + 'static,
    {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.into().into(),
            initial_delay,
            policy: Box::new(policy),
            body: Mutex::new(Box::new(body)),
            history: Mutex::new(RunHistory::default()),
            finished: Condvar::new(),
            observers: ObserverSet::new(),
        })
    }

    /// Plan re-run at a fixed rate anchored to theoretical schedule times.
    pub fn fixed_rate<F>(
        name: impl Into<String>,
        initial_delay: Duration,
        period: Duration,
        body: F,
    ) -> Arc<Self>
    where
        F: FnMut() -> AppResult<()> + Send + 'static,
    {
        Self::new(name, initial_delay, FixedRate::new(period), body)
    }

    /// Plan re-run a fixed delay after each actual completion.
    pub fn fixed_delay<F>(
        name: impl Into<String>,
        initial_delay: Duration,
        period: Duration,
        body: F,
    ) -> Arc<Self>
    where
        F: FnMut() -> AppResult<()> + Send + 'static,
    {
        Self::new(name, initial_delay, FixedDelay::new(period), body)
    }

    /// Diagnostic identifier, unique per plan.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Plan name, used for logging context.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset from `schedule()` to the first run.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Current execution state.
    #[must_use]
    pub fn state(&self) -> PlanState {
        self.history.lock().state
    }

    /// `true` only while the work body is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == PlanState::Running
    }

    /// Completed invocations, success and failure alike. Monotonically
    /// non-decreasing for the plan's lifetime.
    #[must_use]
    pub fn finished_count(&self) -> u64 {
        self.history.lock().finished_count
    }

    /// Due time the most recent dispatched invocation was scheduled for,
    /// `None` before the first dispatch.
    #[must_use]
    pub fn expected_run_time(&self) -> Option<u128> {
        self.history.lock().expected_run_time
    }

    /// Wall-clock time the most recent invocation actually started.
    #[must_use]
    pub fn actual_run_time(&self) -> Option<u128> {
        self.history.lock().actual_run_time
    }

    /// Error from the most recent invocation; cleared by the next
    /// successful one.
    #[must_use]
    pub fn last_error(&self) -> Option<Arc<anyhow::Error>> {
        self.history.lock().last_error.clone()
    }

    /// Next due time computed by the plan's policy.
    #[must_use]
    pub fn next_run_time(&self, now_ms: u128) -> u128 {
        self.policy.next_run_time(self.expected_run_time(), now_ms)
    }

    /// Whether the policy still wants this plan on the schedule at `now_ms`.
    #[must_use]
    pub fn should_reschedule(&self, now_ms: u128) -> bool {
        self.policy.should_reschedule(now_ms)
    }

    /// Record the due time the upcoming invocation is dispatched for.
    pub(crate) fn set_expected_run_time(&self, due_ms: u128) {
        self.history.lock().expected_run_time = Some(due_ms);
    }

    /// Execute one invocation of the work body.
    ///
    /// Safe to call from any thread; concurrent callers queue on the body
    /// lock, so a plan executes at most once at a time. On normal return
    /// the last error is cleared; on failure the error is recorded. Either
    /// way the finished count advances, observers receive `on_run`, the
    /// plan returns to idle (releasing `await_finish` callers), and
    /// observers receive `on_finished`.
    ///
    /// Observer callbacks run on the calling thread while the invocation is
    /// being retired; they must not re-run or block on this plan.
    pub fn run(&self) {
        let mut body = self.body.lock();
        {
            let mut history = self.history.lock();
            history.state = PlanState::Running;
            history.actual_run_time = Some(clock::now_ms());
        }
        debug!(plan = %self.name, id = %self.id, "running plan");

        let outcome = (*body)();

        let snapshot = {
            let mut history = self.history.lock();
            match outcome {
                Ok(()) => history.last_error = None,
                Err(error) => {
                    warn!(plan = %self.name, error = %error, "plan work body failed");
                    history.last_error = Some(Arc::new(error));
                }
            }
            history.finished_count += 1;
            self.outcome_snapshot(&history)
        };
        self.observers.notify(|observer| observer.on_run(&snapshot));

        self.history.lock().state = PlanState::Idle;
        self.finished.notify_all();
        self.observers.notify(|observer| observer.on_finished(&snapshot));
    }

    /// Block until the in-flight invocation, if any, completes.
    pub fn await_finish(&self) {
        let mut history = self.history.lock();
        while history.state == PlanState::Running {
            self.finished.wait(&mut history);
        }
    }

    /// Bounded [`await_finish`](Self::await_finish): returns `false` on
    /// expiry, with no side effects, so the wait can simply be retried.
    pub fn await_finish_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut history = self.history.lock();
        while history.state == PlanState::Running {
            if self.finished.wait_until(&mut history, deadline).timed_out() {
                return history.state != PlanState::Running;
            }
        }
        true
    }

    /// Subscribe an observer. Held weakly: the subscription ends when the
    /// caller drops its last `Arc`.
    pub fn add_observer<O>(&self, observer: &Arc<O>)
    where
        O: PlanObserver + 'static,
    {
        let erased: Arc<dyn PlanObserver> = (*observer).clone();
        self.observers.add(&erased);
    }

    /// Unsubscribe by identity. Returns `true` if the observer was present.
    pub fn remove_observer<O>(&self, observer: &Arc<O>) -> bool
    where
        O: PlanObserver + 'static,
    {
        let erased: Arc<dyn PlanObserver> = (*observer).clone();
        self.observers.remove(&erased)
    }

    /// Drop every observer subscription.
    pub fn clear_observers(&self) {
        self.observers.clear();
    }

    /// Read-only view of the live observers, in subscription order.
    #[must_use]
    pub fn observers(&self) -> Vec<Arc<dyn PlanObserver>> {
        self.observers.snapshot()
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn outcome_snapshot(&self, history: &RunHistory) -> RunOutcome {
        RunOutcome {
            plan_id: self.id,
            plan_name: Arc::clone(&self.name),
            finished_count: history.finished_count,
            expected_run_time: history.expected_run_time,
            actual_run_time: history.actual_run_time,
            error: history.last_error.clone(),
        }
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("finished_count", &self.finished_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    fn failing_every_other() -> Arc<Plan> {
        let calls = AtomicU64::new(0);
        Plan::fixed_rate("flaky", Duration::ZERO, Duration::from_secs(1), move || {
            if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(anyhow!("even invocation"))
            } else {
                Ok(())
            }
        })
    }

    #[test]
    fn test_finished_count_advances_on_success_and_failure() {
        let plan = failing_every_other();
        for _ in 0..4 {
            plan.run();
        }
        assert_eq!(plan.finished_count(), 4);
    }

    #[test]
    fn test_last_error_recorded_then_cleared() {
        let plan = failing_every_other();

        plan.run();
        let error = plan.last_error().expect("first invocation fails");
        assert_eq!(error.to_string(), "even invocation");

        plan.run();
        assert!(plan.last_error().is_none());
    }

    #[test]
    fn test_actual_run_time_recorded() {
        let before = clock::now_ms();
        let plan = Plan::fixed_delay("stamp", Duration::ZERO, Duration::from_secs(1), || Ok(()));
        assert!(plan.actual_run_time().is_none());
        plan.run();
        assert!(plan.actual_run_time().expect("ran once") >= before);
    }

    #[test]
    fn test_is_running_only_during_body() {
        let plan = Plan::fixed_rate("slow", Duration::ZERO, Duration::from_secs(1), || {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        });
        assert!(!plan.is_running());

        let runner = {
            let plan = Arc::clone(&plan);
            thread::spawn(move || plan.run())
        };

        // Wait for the body to start, then observe the running state.
        while !plan.is_running() && !runner.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(plan.is_running());
        assert!(!plan.await_finish_timeout(Duration::from_millis(1)));

        plan.await_finish();
        assert!(!plan.is_running());
        assert!(plan.await_finish_timeout(Duration::from_millis(1)));
        runner.join().expect("runner thread");
    }

    #[test]
    fn test_run_order_and_outcome_payload() {
        struct Recorder(parking_lot::Mutex<Vec<String>>);
        impl PlanObserver for Recorder {
            fn on_run(&self, outcome: &RunOutcome) {
                self.0.lock().push(format!("run:{}", outcome.finished_count));
            }
            fn on_finished(&self, outcome: &RunOutcome) {
                self.0
                    .lock()
                    .push(format!("finished:{}", outcome.succeeded()));
            }
        }

        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        let plan = Plan::fixed_rate("observed", Duration::ZERO, Duration::from_secs(1), || Ok(()));
        plan.add_observer(&recorder);

        plan.run();
        plan.run();

        let events = recorder.0.lock().clone();
        assert_eq!(
            events,
            vec!["run:1", "finished:true", "run:2", "finished:true"]
        );
    }

    #[test]
    fn test_dropped_observer_is_not_notified() {
        struct Counting(AtomicU64);
        impl PlanObserver for Counting {
            fn on_run(&self, _outcome: &RunOutcome) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let plan = Plan::fixed_rate("weakly", Duration::ZERO, Duration::from_secs(1), || Ok(()));
        let observer = Arc::new(Counting(AtomicU64::new(0)));
        plan.add_observer(&observer);
        assert_eq!(plan.observer_count(), 1);

        plan.run();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);

        drop(observer);
        assert_eq!(plan.observer_count(), 0);
        plan.run();
        assert_eq!(plan.finished_count(), 2);
    }

    #[test]
    fn test_remove_and_clear_observers() {
        struct Silent;
        impl PlanObserver for Silent {}

        let plan = Plan::fixed_rate("managed", Duration::ZERO, Duration::from_secs(1), || Ok(()));
        let first = Arc::new(Silent);
        let second = Arc::new(Silent);
        plan.add_observer(&first);
        plan.add_observer(&second);
        assert_eq!(plan.observers().len(), 2);

        assert!(plan.remove_observer(&first));
        assert!(!plan.remove_observer(&first));
        assert_eq!(plan.observer_count(), 1);

        plan.clear_observers();
        assert_eq!(plan.observer_count(), 0);
    }

    #[test]
    fn test_concurrent_runs_are_serialized() {
        let active = Arc::new(AtomicU64::new(0));
        let overlap = Arc::new(AtomicU64::new(0));
        let plan = {
            let active = Arc::clone(&active);
            let overlap = Arc::clone(&overlap);
            Plan::fixed_rate("serial", Duration::ZERO, Duration::from_secs(1), move || {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        };

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let plan = Arc::clone(&plan);
                thread::spawn(move || plan.run())
            })
            .collect();
        for handle in handles {
            handle.join().expect("runner thread");
        }

        assert_eq!(plan.finished_count(), 4);
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }
}
