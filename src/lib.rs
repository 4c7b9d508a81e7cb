//! # Replan
//!
//! An in-process recurring task scheduler: register a repeatable unit of
//! work as a [`Plan`], hand it to a [`Scheduler`], and it re-runs on a
//! policy-defined cadence until removed, expired, or the scheduler shuts
//! down.
//!
//! ## Core Model
//!
//! - **[`Plan`]**: a schedulable, repeatable unit of work plus its run
//!   history (finished count, expected/actual run times, last error).
//!   A failing work body is recoverable: recorded and reported, never
//!   fatal to the plan or the scheduler.
//! - **Re-run policies**: [`FixedRate`] anchors each next due time to the
//!   theoretical previous schedule time (ticks catch up after an overrun);
//!   [`FixedDelay`] anchors to the actual completion time (cadence never
//!   bursts, drifts instead). [`DateLimit`] decorates any policy so the
//!   scheduler auto-retires the plan once a wall-clock deadline passes.
//! - **[`Scheduler`]**: one dedicated dispatch thread executes due plans
//!   synchronously in non-decreasing due-time order, parks when idle, and
//!   shuts down gracefully: an executing plan finishes, queued plans are
//!   abandoned.
//! - **Observers**: weakly-held listener sets at both levels. Each
//!   scheduled plan gets an internal relay so scheduler observers see
//!   per-plan run/finish events without polling.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::time::Duration;
//! use replan::{Plan, Scheduler};
//!
//! let scheduler = Scheduler::new();
//!
//! let beats = Arc::new(AtomicU64::new(0));
//! let counter = Arc::clone(&beats);
//! let heartbeat = Plan::fixed_rate(
//!     "heartbeat",
//!     Duration::from_millis(5),
//!     Duration::from_millis(20),
//!     move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     },
//! );
//!
//! assert!(scheduler.schedule(&heartbeat));
//! while beats.load(Ordering::SeqCst) < 2 {
//!     std::thread::sleep(Duration::from_millis(5));
//! }
//!
//! scheduler.shutdown();
//! scheduler.await_termination();
//! assert!(scheduler.is_terminated());
//! ```
//!
//! Scheduling is best-effort, in-memory, and process-local: due times are
//! targets rather than deadlines, and all plans are lost on restart.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: plans, re-run policies, observers, and the dispatch loop.
pub mod core;
/// Configuration models for the scheduler.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;

pub use crate::builders::SchedulerBuilder;
pub use crate::config::SchedulerConfig;
pub use crate::core::error::{AppResult, SchedulerError};
pub use crate::core::observer::{ObserverSet, PlanObserver, SchedulerObserver};
pub use crate::core::plan::{Plan, PlanState, RunOutcome};
pub use crate::core::policy::{DateLimit, FixedDelay, FixedRate, RunPolicy};
pub use crate::core::scheduler::{RunState, Scheduler};
