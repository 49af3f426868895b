//! PID regulator against the simulated thermal plant.

use std::time::Duration;

use mecha_common::time::Timestamp;
use mecha_core::control::pid::{AntiWindup, PidParams, PidRegulator};
use mecha_core::plant::{ThermalParams, ThermalPlant};

const DT: Duration = Duration::from_millis(100);

/// Gains for the default plant (τ = 10 s, 0.5 K/% steady-state gain):
/// closed-loop poles at −0.1 and −0.2 rad/s.
fn heater_pid(setpoint: f64) -> PidRegulator {
    PidRegulator::new(
        PidParams::new(4.0, 0.4, 0.0)
            .with_setpoint(setpoint)
            .with_limits(0.0, 100.0)
            .with_anti_windup(AntiWindup::IntegralClamp { limit: 250.0 }),
    )
    .unwrap()
}

/// Run `steps` control periods; returns the peak temperature seen.
fn simulate(pid: &mut PidRegulator, plant: &mut ThermalPlant, start: Timestamp, steps: u64) -> f64 {
    let mut peak = plant.temperature();
    for k in 0..steps {
        let now = start + DT * k as u32;
        let temperature = plant.step_to(now);
        let power = pid.update(temperature, now).unwrap();
        assert!((0.0..=100.0).contains(&power));
        plant.set_heater(power);
        peak = peak.max(temperature);
    }
    peak
}

#[test]
fn regulates_to_setpoint() {
    let mut plant = ThermalPlant::new(ThermalParams::default()).unwrap();
    let mut pid = heater_pid(60.0);

    // 150 s of simulated time.
    let peak = simulate(&mut pid, &mut plant, Timestamp::ZERO, 1_500);
    assert!((plant.temperature() - 60.0).abs() < 0.1, "{}", plant.temperature());
    assert!(peak < 63.0, "overshoot: {peak}");
    // Steady state needs 80 % heater power.
    assert!((plant.heater() - 80.0).abs() < 1.0, "{}", plant.heater());
}

#[test]
fn setpoint_change_is_tracked() {
    let mut plant = ThermalPlant::new(ThermalParams::default()).unwrap();
    let mut pid = heater_pid(60.0);
    simulate(&mut pid, &mut plant, Timestamp::ZERO, 1_500);

    pid.set_setpoint(45.0).unwrap();
    simulate(&mut pid, &mut plant, Timestamp::from_secs_f64(150.0), 1_500);
    assert!((plant.temperature() - 45.0).abs() < 0.1, "{}", plant.temperature());
}

#[test]
fn unreachable_setpoint_saturates_without_runaway() {
    // Max reachable is 70 °C.
    let mut plant = ThermalPlant::new(ThermalParams::default()).unwrap();
    let mut pid = heater_pid(90.0);
    simulate(&mut pid, &mut plant, Timestamp::ZERO, 2_000);

    assert_eq!(plant.heater(), 100.0);
    assert!(pid.last_terms().saturated());
    assert_eq!(pid.integral(), 250.0);
}

#[test]
fn proportional_scenario() {
    let mut pid = PidRegulator::new(PidParams::new(2.0, 0.0, 0.0).with_setpoint(50.0)).unwrap();
    assert_eq!(pid.update(40.0, Timestamp::ZERO).unwrap(), 20.0);
}

#[test]
fn zero_error_holds_zero_output() {
    let mut pid = PidRegulator::new(
        PidParams::new(1.5, 0.7, 0.2)
            .with_setpoint(25.0)
            .with_limits(-10.0, 10.0),
    )
    .unwrap();
    for k in 0..1_000u64 {
        let out = pid.update(25.0, Timestamp::from_millis(k * 10)).unwrap();
        assert_eq!(out, 0.0);
    }
    assert_eq!(pid.integral(), 0.0);
}
