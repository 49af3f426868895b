//! Guarded start-up with a warm-up timeout and an emergency override.

use std::time::Duration;

use mecha_common::time::Timestamp;
use mecha_common::value::Context;
use mecha_core::state::{
    IgnoreReason, StateMachine, StateMachineBuilder, TransitionCause, TransitionOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Conveyor {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Ev {
    Start,
    StartupComplete,
    Stop,
    EmergencyStop,
}

#[derive(Debug, Default)]
struct Drive {
    motor_on: bool,
    brake_engaged: bool,
    exits: Vec<Conveyor>,
    entries: Vec<Conveyor>,
}

fn conveyor() -> StateMachine<Conveyor, Ev, Drive> {
    StateMachineBuilder::new(Conveyor::Stopped, Drive::default())
        .guarded_rule(Conveyor::Stopped, Ev::Start, Conveyor::Starting, |ctx| {
            ctx.bool("sensorClear")
        })
        .rule(Conveyor::Starting, Ev::StartupComplete, Conveyor::Running)
        .rule(Conveyor::Running, Ev::Stop, Conveyor::Stopped)
        .override_event(Ev::EmergencyStop, Conveyor::Error)
        .timeout(Conveyor::Starting, Duration::from_secs(2), Ev::StartupComplete)
        .on_enter(Conveyor::Running, |d| {
            d.motor_on = true;
            d.entries.push(Conveyor::Running);
        })
        .on_exit(Conveyor::Running, |d| {
            d.motor_on = false;
            d.exits.push(Conveyor::Running);
        })
        .on_enter(Conveyor::Error, |d| {
            d.motor_on = false;
            d.brake_engaged = true;
            d.entries.push(Conveyor::Error);
        })
        .build()
        .unwrap()
}

fn secs(s: f64) -> Timestamp {
    Timestamp::from_secs_f64(s)
}

#[test]
fn guarded_start_then_timeout_to_running() {
    let mut sm = conveyor();
    let clear = Context::new().with("sensorClear", true);

    let outcome = sm.handle_event_at(Ev::Start, &clear, secs(10.0));
    assert_eq!(
        outcome,
        TransitionOutcome::Transitioned {
            from: Conveyor::Stopped,
            to: Conveyor::Starting,
        }
    );

    // Not yet.
    assert_eq!(sm.tick(secs(11.9)), None);
    assert!(sm.is_in(Conveyor::Starting));

    let outcome = sm.tick(secs(12.0)).expect("warm-up elapsed");
    assert_eq!(outcome.current(), Conveyor::Running);
    assert!(sm.data().motor_on);

    let last = sm.last_transition().unwrap();
    assert_eq!(last.cause, TransitionCause::Timeout);
    assert_eq!(last.event, Ev::StartupComplete);
    assert_eq!(last.at, Some(secs(12.0)));
}

#[test]
fn blocked_sensor_ignores_start() {
    let mut sm = conveyor();
    let blocked = Context::new().with("sensorClear", false);

    let outcome = sm.handle_event_at(Ev::Start, &blocked, secs(0.0));
    assert_eq!(
        outcome,
        TransitionOutcome::Ignored {
            state: Conveyor::Stopped,
            reason: IgnoreReason::GuardRejected,
        }
    );
    assert!(sm.is_in(Conveyor::Stopped));
    assert_eq!(sm.tick(secs(100.0)), None);
    assert!(sm.is_in(Conveyor::Stopped));
    assert_eq!(sm.transition_count(), 0);
}

#[test]
fn missing_sensor_reading_is_not_satisfied() {
    let mut sm = conveyor();
    let outcome = sm.handle_event(Ev::Start, &Context::new());
    assert_eq!(
        outcome,
        TransitionOutcome::Ignored {
            state: Conveyor::Stopped,
            reason: IgnoreReason::GuardUnevaluable,
        }
    );

    let wrong_type = Context::new().with("sensorClear", "yes");
    assert!(!sm.handle_event(Ev::Start, &wrong_type).changed());
    assert!(sm.is_in(Conveyor::Stopped));
}

#[test]
fn emergency_stop_from_every_state() {
    let clear = Context::new().with("sensorClear", true);

    // Drive a fresh machine into each state, then trip it.
    let drives: [&dyn Fn(&mut StateMachine<Conveyor, Ev, Drive>); 4] = [
        &|_| {},
        &|sm| {
            sm.handle_event_at(Ev::Start, &clear, secs(0.0));
        },
        &|sm| {
            sm.handle_event_at(Ev::Start, &clear, secs(0.0));
            sm.tick(secs(2.0));
        },
        &|sm| {
            sm.handle_event(Ev::EmergencyStop, &Context::new());
        },
    ];
    let expected_from = [
        Conveyor::Stopped,
        Conveyor::Starting,
        Conveyor::Running,
        Conveyor::Error,
    ];

    for (drive, from) in drives.iter().zip(expected_from) {
        let mut sm = conveyor();
        drive(&mut sm);
        assert_eq!(sm.state(), from);

        let outcome = sm.handle_event(Ev::EmergencyStop, &Context::new());
        assert_eq!(
            outcome,
            TransitionOutcome::Overridden {
                from,
                to: Conveyor::Error,
            }
        );
        assert!(sm.is_in(Conveyor::Error));
        assert!(sm.data().brake_engaged);
        assert!(!sm.data().motor_on);
    }
}

#[test]
fn exit_runs_before_entry_exactly_once() {
    let mut sm = conveyor();
    let clear = Context::new().with("sensorClear", true);
    sm.handle_event_at(Ev::Start, &clear, secs(0.0));
    sm.tick(secs(2.0));
    sm.handle_event(Ev::EmergencyStop, &Context::new());

    assert_eq!(sm.data().exits, [Conveyor::Running]);
    assert_eq!(sm.data().entries, [Conveyor::Running, Conveyor::Error]);
}

#[test]
fn error_state_is_sticky_for_ordinary_events() {
    let mut sm = conveyor();
    sm.handle_event(Ev::EmergencyStop, &Context::new());
    let clear = Context::new().with("sensorClear", true);
    for ev in [Ev::Start, Ev::StartupComplete, Ev::Stop] {
        assert!(!sm.handle_event(ev, &clear).changed());
    }
    assert!(sm.is_in(Conveyor::Error));
}
