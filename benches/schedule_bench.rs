//! Benchmarks for scheduling churn, direct plan execution, and observer
//! fan-out.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use replan::{ObserverSet, Plan, PlanObserver, RunOutcome, Scheduler};

/// Plan due far in the future, so the dispatch thread never runs it while
/// the benchmark churns the queue.
fn parked_plan(index: usize) -> Arc<Plan> {
    Plan::fixed_rate(
        format!("bench-{index}"),
        Duration::from_secs(3600),
        Duration::from_secs(3600),
        || Ok(()),
    )
}

fn bench_schedule_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_remove");
    for plan_count in [8_usize, 64, 256] {
        group.throughput(Throughput::Elements(plan_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(plan_count),
            &plan_count,
            |b, &plan_count| {
                let scheduler = Scheduler::new();
                let plans: Vec<Arc<Plan>> = (0..plan_count).map(parked_plan).collect();
                b.iter(|| {
                    for plan in &plans {
                        black_box(scheduler.schedule(plan));
                    }
                    for plan in &plans {
                        black_box(scheduler.remove(plan));
                    }
                });
                scheduler.shutdown();
            },
        );
    }
    group.finish();
}

fn bench_direct_run(c: &mut Criterion) {
    let counter = Arc::new(AtomicU64::new(0));
    let plan = {
        let counter = Arc::clone(&counter);
        Plan::fixed_rate("hot", Duration::ZERO, Duration::from_secs(3600), move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    };

    c.bench_function("plan_run", |b| {
        b.iter(|| {
            plan.run();
            black_box(plan.finished_count())
        });
    });
}

fn bench_observer_fanout(c: &mut Criterion) {
    struct Sink(AtomicU64);
    impl PlanObserver for Sink {
        fn on_run(&self, outcome: &RunOutcome) {
            self.0.fetch_add(outcome.finished_count, Ordering::Relaxed);
        }
    }

    let mut group = c.benchmark_group("observer_fanout");
    for observer_count in [1_usize, 8, 32] {
        group.throughput(Throughput::Elements(observer_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(observer_count),
            &observer_count,
            |b, &observer_count| {
                let set: ObserverSet<dyn PlanObserver> = ObserverSet::new();
                let observers: Vec<Arc<Sink>> = (0..observer_count)
                    .map(|_| Arc::new(Sink(AtomicU64::new(0))))
                    .collect();
                for observer in &observers {
                    let erased: Arc<dyn PlanObserver> = Arc::clone(observer);
                    set.add(&erased);
                }
                let outcome = RunOutcome {
                    plan_id: uuid::Uuid::new_v4(),
                    plan_name: "bench".into(),
                    finished_count: 1,
                    expected_run_time: None,
                    actual_run_time: None,
                    error: None,
                };
                b.iter(|| set.notify(|observer| observer.on_run(black_box(&outcome))));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_schedule_remove,
    bench_direct_run,
    bench_observer_fanout
);
criterion_main!(benches);
