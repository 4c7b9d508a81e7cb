//! Weakly-held observer sets and the notification contracts they carry.
//!
//! Both [`Plan`] and the scheduler publish lifecycle events through an
//! [`ObserverSet`]. Subscribers are held by `Weak` reference, so a
//! subscription lives exactly as long as the caller keeps its `Arc`; the
//! set never pins a listener alive. Firing is copy-on-iterate: the set's
//! lock is released before the first callback runs, so an observer may add
//! or remove subscriptions (or drop itself) mid-notification.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::plan::{Plan, RunOutcome};

/// Callbacks fired by a [`Plan`] around each invocation.
///
/// Delivery order per invocation is fixed: `on_run` once history has been
/// updated, then `on_finished` once the plan is idle again. Callbacks run
/// on the thread executing the plan and must not block on the plan they
/// observe.
pub trait PlanObserver: Send + Sync {
    /// The work body returned (successfully or not) and history was updated.
    fn on_run(&self, _outcome: &RunOutcome) {}

    /// The plan is idle again; `await_finish` callers have been released.
    fn on_finished(&self, _outcome: &RunOutcome) {}
}

/// Callbacks fired by a scheduler for its own lifecycle and for the plans
/// it dispatches.
///
/// Per-plan event ordering (scheduled, then run/finished pairs, then
/// removed) is preserved; no ordering is guaranteed across different plans
/// beyond their due-time order.
pub trait SchedulerObserver: Send + Sync {
    /// A plan was accepted by `schedule`.
    fn on_plan_scheduled(&self, _plan: &Arc<Plan>) {}

    /// A scheduled plan ran, relayed from the plan's own `on_run`.
    fn on_plan_run(&self, _plan: &Arc<Plan>, _outcome: &RunOutcome) {}

    /// A scheduled plan finished, relayed from the plan's own `on_finished`.
    fn on_plan_finished(&self, _plan: &Arc<Plan>, _outcome: &RunOutcome) {}

    /// A plan was removed, explicitly or by policy expiry.
    fn on_plan_removed(&self, _plan: &Arc<Plan>) {}

    /// All plans were removed by one `clear` call.
    fn on_plans_cleared(&self) {}

    /// Shutdown was requested; the dispatch loop is stopping.
    fn on_shutdown(&self) {}

    /// The dispatch loop has exited and no plan is executing.
    fn on_terminated(&self) {}
}

/// An insertion-ordered set of weakly-held subscribers.
pub struct ObserverSet<T: ?Sized> {
    entries: Mutex<Vec<Weak<T>>>,
}

impl<T: ?Sized> ObserverSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe. The set holds only a `Weak`; the subscription ends when
    /// the caller drops its last `Arc`.
    pub fn add(&self, observer: &Arc<T>) {
        self.entries.lock().push(Arc::downgrade(observer));
    }

    /// Unsubscribe by identity. Returns `true` if the observer was present.
    pub fn remove(&self, observer: &Arc<T>) -> bool {
        let target = Arc::downgrade(observer);
        let mut entries = self.entries.lock();
        let mut found = false;
        entries.retain(|weak| {
            if Weak::ptr_eq(weak, &target) {
                found = true;
                return false;
            }
            weak.strong_count() > 0
        });
        found
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// `true` when no live subscriber remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only view of the live subscribers, in subscription order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Fire `f` for each live subscriber, pruning dead entries.
    ///
    /// The internal lock is released before the first callback runs.
    pub fn notify(&self, f: impl Fn(&T)) {
        let live: Vec<Arc<T>> = {
            let mut entries = self.entries.lock();
            entries.retain(|weak| weak.strong_count() > 0);
            entries.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in &live {
            f(observer);
        }
    }
}

impl<T: ?Sized> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
