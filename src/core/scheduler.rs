//! The scheduler: one dedicated thread dispatching due plans in order.
//!
//! A [`Scheduler`] owns a time-ordered collection of scheduled [`Plan`]s
//! and a single dispatch thread. The thread parks on a condvar while the
//! queue is empty, sleeps until the earliest due time otherwise, and is
//! woken early whenever `schedule`/`remove`/`clear`/`shutdown` changes
//! what it should be waiting for. Plans execute synchronously on the
//! dispatch thread, one at a time, so a long-running plan delays all
//! others.
//!
//! # Design
//!
//! - **No polling**: the loop waits exactly until the next due time or a
//!   wakeup signal; an idle scheduler consumes no CPU
//! - **Strong plans, weak relay**: the queue holds each plan (and its
//!   event relay) strongly; the relay holds the scheduler and plan weakly,
//!   so no reference cycle forms
//! - **Clean shutdown**: `shutdown()` is a one-way, non-blocking signal;
//!   an executing plan finishes, queued plans are abandoned, and the
//!   run state becomes terminated once the loop has exited

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::observer::{ObserverSet, PlanObserver, SchedulerObserver};
use crate::core::plan::{Plan, RunOutcome};
use crate::util::clock;

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Accepting and dispatching plans.
    Running = 0,
    /// Shutdown requested: no new plans; queued plans are abandoned.
    Shutdown = 1,
    /// The dispatch loop has exited and no plan is executing.
    Terminated = 2,
}

impl RunState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Shutdown,
            _ => Self::Terminated,
        }
    }
}

/// Queue key: due time first, schedule order (FIFO) for ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
    due_ms: u128,
    seq: u64,
}

/// A scheduled plan plus the relay forwarding its events.
struct Entry {
    plan: Arc<Plan>,
    /// Keeps the weakly-subscribed relay alive while the plan is scheduled;
    /// dropping the entry detaches it.
    _relay: Arc<PlanRelay>,
}

struct DispatchState {
    queue: BTreeMap<EntryKey, Entry>,
    run_state: RunState,
    next_seq: u64,
}

impl DispatchState {
    fn key_of(&self, plan: &Arc<Plan>) -> Option<EntryKey> {
        self.queue
            .iter()
            .find(|(_, entry)| Arc::ptr_eq(&entry.plan, plan))
            .map(|(key, _)| *key)
    }

    fn insert(&mut self, due_ms: u128, entry: Entry) {
        let key = EntryKey {
            due_ms,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queue.insert(key, entry);
    }
}

struct SchedulerInner {
    state: Mutex<DispatchState>,
    /// Parks the dispatch thread; signaled on schedule/remove/clear/shutdown.
    wakeup: Condvar,
    /// Signals run-state transitions to `await_termination` callers.
    lifecycle: Condvar,
    /// Mirror of the run state for lock-free status reads.
    run_state: AtomicU8,
    observers: ObserverSet<dyn SchedulerObserver>,
}

impl SchedulerInner {
    fn store_run_state(&self, state: RunState) {
        self.run_state.store(state as u8, Ordering::Release);
    }
}

/// Scheduler-internal observer attached to each scheduled plan, forwarding
/// its run/finish events to scheduler-level observers with the plan as
/// context.
struct PlanRelay {
    scheduler: Weak<SchedulerInner>,
    plan: Weak<Plan>,
}

impl PlanObserver for PlanRelay {
    fn on_run(&self, outcome: &RunOutcome) {
        if let (Some(inner), Some(plan)) = (self.scheduler.upgrade(), self.plan.upgrade()) {
            inner
                .observers
                .notify(|observer| observer.on_plan_run(&plan, outcome));
        }
    }

    fn on_finished(&self, outcome: &RunOutcome) {
        if let (Some(inner), Some(plan)) = (self.scheduler.upgrade(), self.plan.upgrade()) {
            inner
                .observers
                .notify(|observer| observer.on_plan_finished(&plan, outcome));
        }
    }
}

/// In-process scheduler dispatching due [`Plan`]s from one dedicated
/// thread.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::time::Duration;
/// use replan::{Plan, Scheduler};
///
/// let scheduler = Scheduler::new();
/// let ticks = Arc::new(AtomicU64::new(0));
/// let counter = Arc::clone(&ticks);
/// let plan = Plan::fixed_rate("tick", Duration::ZERO, Duration::from_millis(20), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
///     Ok(())
/// });
///
/// assert!(scheduler.schedule(&plan));
/// while ticks.load(Ordering::SeqCst) == 0 {
///     std::thread::sleep(Duration::from_millis(5));
/// }
///
/// scheduler.shutdown();
/// scheduler.await_termination();
/// assert!(scheduler.is_terminated());
/// ```
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Scheduler with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the dispatch thread cannot be spawned.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default()).expect("failed to start dispatch thread")
    }

    /// Scheduler from a validated configuration.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] if validation fails,
    /// [`SchedulerError::Spawn`] if the dispatch thread cannot be started.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let inner = Arc::new(SchedulerInner {
            state: Mutex::new(DispatchState {
                queue: BTreeMap::new(),
                run_state: RunState::Running,
                next_seq: 0,
            }),
            wakeup: Condvar::new(),
            lifecycle: Condvar::new(),
            run_state: AtomicU8::new(RunState::Running as u8),
            observers: ObserverSet::new(),
        });

        let mut builder = thread::Builder::new().name(config.thread_name.clone());
        if let Some(stack_size) = config.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }
        let loop_inner = Arc::clone(&inner);
        // The thread is never joined: it exits through the run-state
        // machine, and await_termination waits on the lifecycle condvar.
        let _detached = builder.spawn(move || dispatch_loop(&loop_inner))?;

        info!(thread = %config.thread_name, "scheduler started");
        Ok(Self { inner, config })
    }

    /// The configuration this scheduler was built from.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Insert `plan` keyed by `now + initial_delay` and attach the event
    /// relay.
    ///
    /// Returns `false` without side effects if the plan is already
    /// scheduled or the scheduler is no longer running. Pre-existing
    /// observers on the plan are left untouched.
    pub fn schedule(&self, plan: &Arc<Plan>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.run_state != RunState::Running {
                warn!(plan = %plan.name(), "schedule rejected: scheduler is shut down");
                return false;
            }
            if state.key_of(plan).is_some() {
                debug!(plan = %plan.name(), "schedule rejected: already scheduled");
                return false;
            }

            let relay = Arc::new(PlanRelay {
                scheduler: Arc::downgrade(&self.inner),
                plan: Arc::downgrade(plan),
            });
            plan.add_observer(&relay);

            let due_ms = clock::now_ms() + plan.initial_delay().as_millis();
            debug!(plan = %plan.name(), due_ms, "plan scheduled");
            state.insert(
                due_ms,
                Entry {
                    plan: Arc::clone(plan),
                    _relay: relay,
                },
            );
        }
        // Notify before waking the dispatch thread, so observers see the
        // scheduled event ahead of the plan's first run events.
        self.inner
            .observers
            .notify(|observer| observer.on_plan_scheduled(plan));
        self.inner.wakeup.notify_all();
        true
    }

    /// Like [`schedule`](Self::schedule), but reports a shut-down
    /// scheduler as a hard error instead of `false`, since it is
    /// permanently unusable at that point.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShutDown`] once shutdown has been requested.
    pub fn try_schedule(&self, plan: &Arc<Plan>) -> Result<bool, SchedulerError> {
        if self.is_shutdown() {
            return Err(SchedulerError::ShutDown);
        }
        Ok(self.schedule(plan))
    }

    /// Remove `plan` from the schedule.
    ///
    /// Detaches the relay, clears the plan's observer set as a release
    /// step, and fires the removal notification. Returns `false` if the
    /// plan was not scheduled.
    pub fn remove(&self, plan: &Arc<Plan>) -> bool {
        let found = {
            let mut state = self.inner.state.lock();
            match state.key_of(plan) {
                Some(key) => state.queue.remove(&key).is_some(),
                None => false,
            }
        };
        if !found {
            return false;
        }
        plan.clear_observers();
        self.inner.wakeup.notify_all();
        self.inner
            .observers
            .notify(|observer| observer.on_plan_removed(plan));
        debug!(plan = %plan.name(), "plan removed");
        true
    }

    /// Remove every scheduled plan, firing one cleared notification
    /// regardless of how many plans were present.
    pub fn clear(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            std::mem::take(&mut state.queue)
        };
        for entry in drained.values() {
            entry.plan.clear_observers();
        }
        self.inner.wakeup.notify_all();
        self.inner
            .observers
            .notify(|observer| observer.on_plans_cleared());
        info!(count = drained.len(), "plans cleared");
    }

    /// Snapshot of the scheduled plans, in due-time order.
    #[must_use]
    pub fn plans(&self) -> Vec<Arc<Plan>> {
        self.inner
            .state
            .lock()
            .queue
            .values()
            .map(|entry| Arc::clone(&entry.plan))
            .collect()
    }

    /// Request shutdown: running → shutdown, one-way, non-blocking,
    /// idempotent.
    ///
    /// A plan already executing is allowed to finish; queued plans are
    /// abandoned unexecuted. No plan may be scheduled afterwards.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.run_state != RunState::Running {
                return;
            }
            state.run_state = RunState::Shutdown;
            self.inner.store_run_state(RunState::Shutdown);
        }
        info!("scheduler shutdown requested");
        self.inner.wakeup.notify_all();
    }

    /// Current lifecycle state (lock-free read).
    #[must_use]
    pub fn run_state(&self) -> RunState {
        RunState::from_u8(self.inner.run_state.load(Ordering::Acquire))
    }

    /// `true` once shutdown has been requested, terminal state included.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.run_state() != RunState::Running
    }

    /// `true` once the dispatch loop has exited and no plan is executing.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.run_state() == RunState::Terminated
    }

    /// Block until the scheduler is terminated.
    pub fn await_termination(&self) {
        let mut state = self.inner.state.lock();
        while state.run_state != RunState::Terminated {
            self.inner.lifecycle.wait(&mut state);
        }
    }

    /// Bounded [`await_termination`](Self::await_termination): returns
    /// `false` on expiry, with no side effects, so the wait can simply be
    /// retried.
    pub fn await_termination_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.run_state != RunState::Terminated {
            if self
                .inner
                .lifecycle
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.run_state == RunState::Terminated;
            }
        }
        true
    }

    /// Subscribe a scheduler-level observer. Held weakly: the subscription
    /// ends when the caller drops its last `Arc`.
    pub fn add_observer<O>(&self, observer: &Arc<O>)
    where
        O: SchedulerObserver + 'static,
    {
        let erased: Arc<dyn SchedulerObserver> = (*observer).clone();
        self.inner.observers.add(&erased);
    }

    /// Unsubscribe by identity. Returns `true` if the observer was present.
    pub fn remove_observer<O>(&self, observer: &Arc<O>) -> bool
    where
        O: SchedulerObserver + 'static,
    {
        let erased: Arc<dyn SchedulerObserver> = (*observer).clone();
        self.inner.observers.remove(&erased)
    }

    /// Drop every scheduler-level observer subscription.
    pub fn clear_observers(&self) {
        self.inner.observers.clear();
    }

    /// Number of live scheduler-level observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Signal shutdown but do not join: the dispatch thread finishes
        // any in-flight plan and exits through the run-state machine.
        self.shutdown();
        debug!("scheduler dropped; dispatch thread detached");
    }
}

/// Body of the dedicated dispatch thread.
fn dispatch_loop(inner: &Arc<SchedulerInner>) {
    loop {
        // Phase 1: wait until the earliest entry is due, a new earlier
        // entry arrives, or shutdown is requested.
        let dispatched = {
            let mut state = inner.state.lock();
            loop {
                if state.run_state != RunState::Running {
                    break None;
                }
                let earliest = state
                    .queue
                    .first_key_value()
                    .map(|(key, entry)| (*key, Arc::clone(&entry.plan)));
                let Some((key, plan)) = earliest else {
                    inner.wakeup.wait(&mut state);
                    continue;
                };
                let now = clock::now_ms();
                if key.due_ms <= now {
                    break Some((key, plan));
                }
                let _ = inner
                    .wakeup
                    .wait_for(&mut state, clock::until(key.due_ms, now));
            }
        };
        let Some((key, plan)) = dispatched else { break };

        // Phase 2: a date limit that passed while waiting retires the plan
        // without a final run.
        if !plan.should_reschedule(clock::now_ms()) {
            let present = inner.state.lock().queue.remove(&key).is_some();
            if present {
                plan.clear_observers();
                inner
                    .observers
                    .notify(|observer| observer.on_plan_removed(&plan));
                info!(plan = %plan.name(), "plan expired before dispatch");
            }
            continue;
        }

        // Phase 3: run synchronously, outside the scheduler lock. The entry
        // stays in the queue under its old key, so the plan still counts as
        // scheduled and cannot be scheduled twice.
        plan.set_expected_run_time(key.due_ms);
        debug!(plan = %plan.name(), due_ms = key.due_ms, "dispatching plan");
        plan.run();

        // Phase 4: reinsert with the policy's next due time, unless the
        // plan was concurrently removed, its policy expired, or shutdown
        // began mid-run.
        let retired = {
            let mut state = inner.state.lock();
            if state.run_state != RunState::Running {
                None
            } else if let Some(entry) = state.queue.remove(&key) {
                let now = clock::now_ms();
                if entry.plan.should_reschedule(now) {
                    let due_ms = entry.plan.next_run_time(now);
                    debug!(plan = %entry.plan.name(), due_ms, "plan rescheduled");
                    state.insert(due_ms, entry);
                    None
                } else {
                    Some(entry.plan)
                }
            } else {
                // Concurrently removed or cleared; nothing to reinsert.
                None
            }
        };
        if let Some(plan) = retired {
            plan.clear_observers();
            inner
                .observers
                .notify(|observer| observer.on_plan_removed(&plan));
            info!(plan = %plan.name(), "plan retired by policy");
        }
    }

    // Shutdown path: queued plans are abandoned, never run.
    info!("dispatch loop stopping");
    inner.observers.notify(|observer| observer.on_shutdown());
    {
        let mut state = inner.state.lock();
        state.run_state = RunState::Terminated;
        inner.store_run_state(RunState::Terminated);
    }
    inner.lifecycle.notify_all();
    inner.observers.notify(|observer| observer.on_terminated());
    info!("scheduler terminated");
}
