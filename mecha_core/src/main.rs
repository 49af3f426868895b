//! # Mecha Core demo host
//!
//! Runs the kernel against a simulated thermal rig: a supervisory state
//! machine decides when the heater may run, a PID regulator drives it to
//! the configured setpoint, and four scheduler tasks tie them together.
//!
//! | task        | role                                              |
//! |-------------|---------------------------------------------------|
//! | `sense`     | advance the plant model, publish the temperature  |
//! | `supervise` | start the rig, trip on over-temperature, timeouts |
//! | `regulate`  | PID update while regulating, heater off otherwise |
//! | `telemetry` | periodic status log                               |

use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clap::Parser;
use mecha_common::config::LogLevel;
use mecha_common::consts::DEFAULT_CONFIG_PATH;
use mecha_common::time::{Clock, MonotonicClock};
use mecha_common::value::{Context, Value};
use mecha_core::config::{KernelConfig, TaskConfig};
use mecha_core::control::pid::PidRegulator;
use mecha_core::cycle::{CycleRunner, rt_setup};
use mecha_core::error::{ConfigError, TaskError};
use mecha_core::plant::ThermalPlant;
use mecha_core::sched::{Scheduler, TaskResult};
use mecha_core::state::{StateMachine, StateMachineBuilder};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Temperature that trips the emergency stop [°C].
const OVER_TEMPERATURE_C: f64 = 90.0;
/// Warm-up time before regulation starts.
const WARMUP: Duration = Duration::from_secs(2);

/// Mecha Core: supervisory control kernel demo host
#[derive(Parser, Debug)]
#[command(name = "mecha_core")]
#[command(version)]
#[command(about = "Runs the control kernel against a simulated thermal rig")]
struct Args {
    /// Path to the kernel configuration TOML.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Stop after this many seconds (0 = run until Ctrl-C).
    #[arg(long, default_value_t = 0.0)]
    duration_s: f64,

    /// CPU core to pin the loop thread to (`rt` feature only).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (`rt` feature only).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Mode {
    Stopped,
    Starting,
    Regulating,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Command {
    Start,
    Warmed,
    Stop,
    Reset,
    EmergencyStop,
}

/// Device data mutated by the supervisor's hooks.
#[derive(Debug, Default)]
struct Rig {
    heater_enabled: bool,
    estop_latched: bool,
}

type Supervisor = StateMachine<Mode, Command, Rig>;

fn main() {
    let args = Args::parse();
    let config = KernelConfig::load(&args.config);
    let level = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, level);

    info!("Mecha Core v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = config
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Mecha Core shutdown complete");
}

fn run(args: &Args, config: KernelConfig) -> Result<(), Box<dyn std::error::Error>> {
    let limit = match args.duration_s {
        s if s == 0.0 => None,
        s => Some(Duration::try_from_secs_f64(s).map_err(|e| format!("--duration-s: {e}"))?),
    };

    info!(
        service = %config.shared.service_name,
        cycle_time_us = config.cycle.cycle_time_us,
        setpoint = config.pid.setpoint,
        tasks = config.tasks.len(),
        "config loaded from {}",
        args.config.display()
    );

    rt_setup(args.cpu_core, args.rt_priority)?;

    let clock = MonotonicClock::new();
    let scheduler = build_scheduler(&config, clock)?;
    let mut runner = CycleRunner::new(scheduler, config.cycle.cycle_time())?
        .abort_on_overrun(config.cycle.abort_on_overrun);

    let stop = runner.stop_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        stop.store(true, Ordering::Release);
    })?;

    let cycles = runner.run(limit)?;
    let stats = runner.stats();
    info!(
        cycles,
        overruns = stats.overruns,
        unhealthy_cycles = stats.unhealthy_cycles,
        max_latency_us = stats.max_latency_ns / 1_000,
        "run finished"
    );
    for task in runner.scheduler().tasks() {
        let s = task.stats();
        info!(
            task = task.name(),
            runs = s.runs,
            failures = s.failures,
            overruns = s.overruns,
            avg_us = s.avg_duration().as_micros() as u64,
            max_us = s.max_duration.as_micros() as u64,
            "task summary"
        );
    }
    Ok(())
}

fn build_supervisor() -> Result<Supervisor, ConfigError> {
    StateMachineBuilder::new(Mode::Stopped, Rig::default())
        .guarded_rule(Mode::Stopped, Command::Start, Mode::Starting, |ctx| {
            Ok(!ctx.bool("over_temperature")?)
        })
        .rule(Mode::Starting, Command::Warmed, Mode::Regulating)
        .rule(Mode::Starting, Command::Stop, Mode::Stopped)
        .rule(Mode::Regulating, Command::Stop, Mode::Stopped)
        .guarded_rule(Mode::Fault, Command::Reset, Mode::Stopped, |ctx| {
            Ok(!ctx.bool("over_temperature")?)
        })
        .override_event(Command::EmergencyStop, Mode::Fault)
        .timeout(Mode::Starting, WARMUP, Command::Warmed)
        .on_enter(Mode::Regulating, |rig| rig.heater_enabled = true)
        .on_exit(Mode::Regulating, |rig| rig.heater_enabled = false)
        .on_enter(Mode::Fault, |rig| {
            rig.heater_enabled = false;
            rig.estop_latched = true;
        })
        .on_exit(Mode::Fault, |rig| rig.estop_latched = false)
        .build()
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &'static str) -> Result<MutexGuard<'a, T>, TaskError> {
    m.lock().map_err(|_| TaskError::Poisoned(what))
}

/// Timing for `name` from the config file, or `fallback`.
fn task_config(config: &KernelConfig, fallback: TaskConfig) -> TaskConfig {
    config.task(&fallback.name).cloned().unwrap_or(fallback)
}

fn build_scheduler(
    config: &KernelConfig,
    clock: MonotonicClock,
) -> Result<Scheduler<MonotonicClock>, ConfigError> {
    let plant = Arc::new(Mutex::new(ThermalPlant::new(config.plant)?));
    let supervisor = Arc::new(Mutex::new(build_supervisor()?));
    let pid = Arc::new(Mutex::new(PidRegulator::new(config.pid)?));
    let measurements = Arc::new(Mutex::new(
        Context::new()
            .with("temperature", config.plant.ambient_c)
            .with("over_temperature", false),
    ));

    for extra in config
        .tasks
        .iter()
        .filter(|t| !["sense", "supervise", "regulate", "telemetry"].contains(&t.name.as_str()))
    {
        warn!(task = %extra.name, "no action for configured task; ignored");
    }

    let mut scheduler = Scheduler::new(clock);

    let sense = {
        let plant = Arc::clone(&plant);
        let measurements = Arc::clone(&measurements);
        move || -> TaskResult {
            let temperature = lock(&plant, "plant")?.step_to(clock.now());
            let mut m = lock(&measurements, "measurements")?;
            m.set("temperature", temperature);
            m.set("over_temperature", temperature >= OVER_TEMPERATURE_C);
            Ok(Some(Value::Number(temperature)))
        }
    };
    scheduler.add_task(
        task_config(config, TaskConfig::new("sense", 100.0, 20)).descriptor(sense),
    )?;

    let supervise = {
        let supervisor = Arc::clone(&supervisor);
        let measurements = Arc::clone(&measurements);
        move || -> TaskResult {
            let now = clock.now();
            let ctx = lock(&measurements, "measurements")?.clone();
            let mut sm = lock(&supervisor, "supervisor")?;
            if ctx.bool("over_temperature").unwrap_or(true) {
                sm.handle_event_at(Command::EmergencyStop, &ctx, now);
            } else if sm.is_in(Mode::Stopped) {
                sm.handle_event_at(Command::Start, &ctx, now);
            }
            sm.tick_with(now, &ctx);
            Ok(Some(Value::Text(format!("{:?}", sm.state()))))
        }
    };
    scheduler.add_task(
        task_config(config, TaskConfig::new("supervise", 50.0, 15)).descriptor(supervise),
    )?;

    let regulate = {
        let plant = Arc::clone(&plant);
        let supervisor = Arc::clone(&supervisor);
        let measurements = Arc::clone(&measurements);
        let pid = Arc::clone(&pid);
        move || -> TaskResult {
            let now = clock.now();
            let enabled = lock(&supervisor, "supervisor")?.data().heater_enabled;
            let mut pid = lock(&pid, "pid")?;
            let heater = if enabled {
                let temperature = lock(&measurements, "measurements")?
                    .number("temperature")
                    .map_err(|e| TaskError::failed(e.to_string()))?;
                pid.update(temperature, now)
                    .map_err(|e| TaskError::failed(e.to_string()))?
            } else {
                pid.reset(now);
                0.0
            };
            lock(&plant, "plant")?.set_heater(heater);
            Ok(Some(Value::Number(heater)))
        }
    };
    scheduler.add_task(
        task_config(config, TaskConfig::new("regulate", 10.0, 10)).descriptor(regulate),
    )?;

    let telemetry = {
        let plant = Arc::clone(&plant);
        let supervisor = Arc::clone(&supervisor);
        move || -> TaskResult {
            let (temperature, heater) = {
                let p = lock(&plant, "plant")?;
                (p.temperature(), p.heater())
            };
            let sm = lock(&supervisor, "supervisor")?;
            info!(
                mode = ?sm.state(),
                temperature_c = temperature,
                heater_pct = heater,
                estop = sm.data().estop_latched,
                "telemetry"
            );
            Ok(None)
        }
    };
    scheduler.add_task(
        task_config(config, TaskConfig::new("telemetry", 1.0, 0)).descriptor(telemetry),
    )?;

    Ok(scheduler)
}

/// Setup tracing subscriber. `RUST_LOG` wins over the config file level;
/// `--verbose` raises the default to DEBUG.
fn setup_tracing(args: &Args, level: LogLevel) {
    let default = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
