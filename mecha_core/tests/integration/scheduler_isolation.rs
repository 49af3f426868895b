//! Multi-rate scheduling: readiness, ordering, and failure isolation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mecha_common::time::{Clock, ManualClock, Timestamp};
use mecha_common::value::Value;
use mecha_core::error::TaskError;
use mecha_core::sched::{CycleHealth, Scheduler, TaskDescriptor, TaskResult};

type RunLog = Arc<Mutex<Vec<(&'static str, Timestamp)>>>;

/// Task recording `(name, now)` from the shared clock on each run.
fn recorder(
    log: &RunLog,
    clock: &ManualClock,
    name: &'static str,
) -> impl FnMut() -> TaskResult + Send + 'static {
    let log = Arc::clone(log);
    let clock = clock.clone();
    move || {
        log.lock().unwrap().push((name, clock.now()));
        Ok(None)
    }
}

#[test]
fn rates_hold_over_many_cycles() {
    let clock = ManualClock::new();
    let log: RunLog = Arc::default();
    let mut s = Scheduler::new(clock.clone());
    s.add_task(TaskDescriptor::new("fast", 100.0, 1, recorder(&log, &clock, "fast")))
        .unwrap();
    s.add_task(TaskDescriptor::new("medium", 10.0, 1, recorder(&log, &clock, "medium")))
        .unwrap();
    s.add_task(TaskDescriptor::new("slow", 1.0, 1, recorder(&log, &clock, "slow")))
        .unwrap();

    // 1 ms host cycle for 2 s.
    for ms in 0..2_000u64 {
        clock.set(Timestamp::from_millis(ms));
        s.run_cycle(clock.now());
    }

    let log = log.lock().unwrap();
    let count = |name| log.iter().filter(|(n, _)| *n == name).count();
    assert_eq!(count("fast"), 200);
    assert_eq!(count("medium"), 20);
    assert_eq!(count("slow"), 2);

    // Consecutive runs of each task are at least one period apart.
    for (name, period) in [("fast", 10), ("medium", 100), ("slow", 1_000)] {
        let times: Vec<_> = log.iter().filter(|(n, _)| *n == name).map(|(_, t)| *t).collect();
        for pair in times.windows(2) {
            assert!(
                pair[1].saturating_since(pair[0]) >= Duration::from_millis(period),
                "{name}: {:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
    }
}

#[test]
fn runs_on_first_cycle_past_period() {
    let mut s = Scheduler::new(ManualClock::new());
    s.add_task(TaskDescriptor::new("t", 4.0, 0, || -> TaskResult { Ok(None) }))
        .unwrap();

    let t0 = Timestamp::from_millis(1_000);
    assert_eq!(s.run_cycle(t0).len(), 1);
    // Period 250 ms; host cycles every 100 ms.
    assert!(s.run_cycle(t0 + Duration::from_millis(100)).is_empty());
    assert!(s.run_cycle(t0 + Duration::from_millis(200)).is_empty());
    let recs = s.run_cycle(t0 + Duration::from_millis(300));
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].lateness, Duration::from_millis(50));
}

#[test]
fn higher_priority_record_comes_first() {
    let mut s = Scheduler::new(ManualClock::new());
    s.add_task(TaskDescriptor::new("five", 10.0, 5, || -> TaskResult { Ok(None) }))
        .unwrap();
    s.add_task(TaskDescriptor::new("ten", 10.0, 10, || -> TaskResult { Ok(None) }))
        .unwrap();

    let recs = s.run_cycle(Timestamp::ZERO);
    assert_eq!(&*recs[0].task_name, "ten");
    assert_eq!(recs[0].priority, 10);
    assert_eq!(&*recs[1].task_name, "five");
    assert_eq!(recs[1].priority, 5);
}

#[test]
fn always_failing_task_does_not_block_others() {
    let counter = Arc::new(Mutex::new(0u32));
    let mut s = Scheduler::new(ManualClock::new());
    s.add_task(TaskDescriptor::new("broken", 10.0, 100, || -> TaskResult {
        Err(TaskError::failed("actuator not responding"))
    }))
    .unwrap();
    s.add_task(TaskDescriptor::new("panicky", 10.0, 50, || -> TaskResult {
        let readings: Vec<f64> = Vec::new();
        Ok(Some(Value::Number(readings[3])))
    }))
    .unwrap();
    let c = Arc::clone(&counter);
    s.add_task(TaskDescriptor::new("healthy", 10.0, 1, move || -> TaskResult {
        *c.lock().unwrap() += 1;
        Ok(Some(Value::Bool(true)))
    }))
    .unwrap();

    for k in 0..10u64 {
        let mut out = Vec::new();
        let health = s.run_cycle_into(Timestamp::from_millis(k * 100), &mut out);
        assert_eq!(out.len(), 3);
        assert!(matches!(out[0].result, Err(TaskError::Failed(_))));
        assert!(matches!(out[1].result, Err(TaskError::Panicked(_))));
        assert_eq!(out[2].result, Ok(Some(Value::Bool(true))));
        assert!(health.contains(CycleHealth::TASK_FAILED | CycleHealth::TASK_PANICKED));
    }

    assert_eq!(*counter.lock().unwrap(), 10);
    assert_eq!(s.task("broken").unwrap().stats().failures, 10);
    assert_eq!(s.task("panicky").unwrap().stats().failures, 10);
    assert_eq!(s.task("healthy").unwrap().stats().failures, 0);
}

#[test]
fn execution_time_comes_from_injected_clock() {
    let clock = ManualClock::new();
    let work = clock.clone();
    let mut s = Scheduler::new(clock);
    s.add_task(TaskDescriptor::new("filter", 10.0, 0, move || -> TaskResult {
        work.advance(Duration::from_micros(250));
        Ok(None)
    }))
    .unwrap();

    let recs = s.run_cycle(Timestamp::ZERO);
    assert_eq!(recs[0].duration, Duration::from_micros(250));
    assert!((recs[0].duration_ms() - 0.25).abs() < 1e-12);
    assert_eq!(s.task("filter").unwrap().stats().avg_duration(), Duration::from_micros(250));
}
