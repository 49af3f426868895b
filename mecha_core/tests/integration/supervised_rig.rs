//! Full composition: supervisor, PID, and plant as scheduler tasks, paced
//! by the cycle runner on a manual clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mecha_common::time::{Clock, ManualClock, Timestamp};
use mecha_common::value::{Context, Value};
use mecha_core::control::pid::{AntiWindup, PidParams, PidRegulator};
use mecha_core::cycle::CycleRunner;
use mecha_core::error::TaskError;
use mecha_core::plant::{ThermalParams, ThermalPlant};
use mecha_core::sched::{CycleHealth, Scheduler, TaskDescriptor, TaskResult};
use mecha_core::state::{StateMachine, StateMachineBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Mode {
    Idle,
    Warming,
    Regulating,
    Tripped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Cmd {
    Start,
    Warm,
    Trip,
}

#[derive(Debug, Default)]
struct Outputs {
    heater_allowed: bool,
    tripped: bool,
}

type Supervisor = StateMachine<Mode, Cmd, Outputs>;

struct Rig {
    clock: ManualClock,
    plant: Arc<Mutex<ThermalPlant>>,
    supervisor: Arc<Mutex<Supervisor>>,
    trip_request: Arc<AtomicBool>,
    runner: CycleRunner<ManualClock>,
}

fn supervisor() -> Supervisor {
    StateMachineBuilder::new(Mode::Idle, Outputs::default())
        .guarded_rule(Mode::Idle, Cmd::Start, Mode::Warming, |ctx| {
            Ok(ctx.number("temperature")? < 80.0)
        })
        .rule(Mode::Warming, Cmd::Warm, Mode::Regulating)
        .timeout(Mode::Warming, Duration::from_secs(2), Cmd::Warm)
        .override_event(Cmd::Trip, Mode::Tripped)
        .on_enter(Mode::Regulating, |o| o.heater_allowed = true)
        .on_exit(Mode::Regulating, |o| o.heater_allowed = false)
        .on_enter(Mode::Tripped, |o| {
            o.heater_allowed = false;
            o.tripped = true;
        })
        .build()
        .unwrap()
}

fn poisoned<T>(_: T) -> TaskError {
    TaskError::Poisoned("rig")
}

fn rig() -> Rig {
    let clock = ManualClock::new();
    let plant = Arc::new(Mutex::new(ThermalPlant::new(ThermalParams::default()).unwrap()));
    let supervisor = Arc::new(Mutex::new(supervisor()));
    let pid = Arc::new(Mutex::new(
        PidRegulator::new(
            PidParams::new(4.0, 0.4, 0.0)
                .with_setpoint(60.0)
                .with_limits(0.0, 100.0)
                .with_anti_windup(AntiWindup::IntegralClamp { limit: 250.0 }),
        )
        .unwrap(),
    ));
    let temperature = Arc::new(Mutex::new(20.0_f64));
    let trip_request = Arc::new(AtomicBool::new(false));

    let mut s = Scheduler::new(clock.clone());

    let (c, p, t) = (clock.clone(), Arc::clone(&plant), Arc::clone(&temperature));
    s.add_task(TaskDescriptor::new("sense", 100.0, 20, move || -> TaskResult {
        let reading = p.lock().map_err(poisoned)?.step_to(c.now());
        *t.lock().map_err(poisoned)? = reading;
        Ok(Some(Value::Number(reading)))
    }))
    .unwrap();

    let (c, sm, t, trip) = (
        clock.clone(),
        Arc::clone(&supervisor),
        Arc::clone(&temperature),
        Arc::clone(&trip_request),
    );
    s.add_task(TaskDescriptor::new("supervise", 50.0, 15, move || -> TaskResult {
        let now = c.now();
        let ctx = Context::new().with("temperature", *t.lock().map_err(poisoned)?);
        let mut sm = sm.lock().map_err(poisoned)?;
        if trip.load(Ordering::Acquire) {
            sm.handle_event_at(Cmd::Trip, &ctx, now);
        } else if sm.is_in(Mode::Idle) {
            sm.handle_event_at(Cmd::Start, &ctx, now);
        }
        sm.tick_with(now, &ctx);
        Ok(None)
    }))
    .unwrap();

    let (c, sm, p, t) = (
        clock.clone(),
        Arc::clone(&supervisor),
        Arc::clone(&plant),
        Arc::clone(&temperature),
    );
    s.add_task(TaskDescriptor::new("regulate", 10.0, 10, move || -> TaskResult {
        let now = c.now();
        let allowed = sm.lock().map_err(poisoned)?.data().heater_allowed;
        let mut pid = pid.lock().map_err(poisoned)?;
        let power = if allowed {
            pid.update(*t.lock().map_err(poisoned)?, now)
                .map_err(|e| TaskError::failed(e.to_string()))?
        } else {
            pid.reset(now);
            0.0
        };
        p.lock().map_err(poisoned)?.set_heater(power);
        Ok(Some(Value::Number(power)))
    }))
    .unwrap();

    let runner = CycleRunner::new(s, Duration::from_millis(10)).unwrap();
    Rig {
        clock,
        plant,
        supervisor,
        trip_request,
        runner,
    }
}

impl Rig {
    /// Run host cycles every 10 ms until `until`.
    fn run_until(&mut self, until: Timestamp) {
        while self.clock.now() < until {
            let health = self.runner.run_once().unwrap();
            assert!(
                !health.intersects(CycleHealth::TASK_FAILED | CycleHealth::TASK_PANICKED),
                "{health:?}: {:?}",
                self.runner.last_records()
            );
            self.clock.advance(Duration::from_millis(10));
        }
    }

    fn mode(&self) -> Mode {
        self.supervisor.lock().unwrap().state()
    }

    fn temperature(&self) -> f64 {
        self.plant.lock().unwrap().temperature()
    }
}

#[test]
fn warms_up_then_regulates() {
    let mut rig = rig();

    rig.run_until(Timestamp::from_millis(1_000));
    assert_eq!(rig.mode(), Mode::Warming);
    assert_eq!(rig.plant.lock().unwrap().heater(), 0.0);

    rig.run_until(Timestamp::from_millis(2_500));
    assert_eq!(rig.mode(), Mode::Regulating);
    assert!(rig.plant.lock().unwrap().heater() > 0.0);

    rig.run_until(Timestamp::from_secs_f64(200.0));
    assert!((rig.temperature() - 60.0).abs() < 0.2, "{}", rig.temperature());

    let stats = rig.runner.stats();
    assert_eq!(stats.overruns, 0);
    assert_eq!(stats.unhealthy_cycles, 0);
    let sense = rig.runner.scheduler().task("sense").unwrap();
    assert_eq!(sense.stats().runs, 20_000);
}

#[test]
fn trip_forces_safe_state_and_cools() {
    let mut rig = rig();
    rig.run_until(Timestamp::from_secs_f64(100.0));
    assert_eq!(rig.mode(), Mode::Regulating);
    let hot = rig.temperature();

    rig.trip_request.store(true, Ordering::Release);
    rig.run_until(Timestamp::from_secs_f64(101.0));
    assert_eq!(rig.mode(), Mode::Tripped);
    {
        let sm = rig.supervisor.lock().unwrap();
        assert!(sm.data().tripped);
        assert!(!sm.data().heater_allowed);
    }
    assert_eq!(rig.plant.lock().unwrap().heater(), 0.0);

    rig.run_until(Timestamp::from_secs_f64(130.0));
    assert!(rig.temperature() < hot - 10.0, "{} vs {hot}", rig.temperature());
    assert_eq!(rig.mode(), Mode::Tripped);
}
