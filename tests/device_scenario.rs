//! The control loop wired to the simulated plant, driven step by step.

use std::sync::Arc;
use std::time::Duration;

use pump_limiter::config::Config;
use pump_limiter::controller::{ControlLoop, Device, GuardState, ManualClock, RestartReason};
use pump_limiter::hardware::Cse7766Meter;
use pump_limiter::simulation::{PumpSimulationConfig, SimulatedPlant};
use pump_limiter::telemetry::{MemorySink, RESET_LINE, TRIP_LINE};

const STEP_MS: u32 = 100;

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.guard.max_run_ms = 5_000;
    cfg.simulation = PumpSimulationConfig {
        noise_w: 0.0,
        run_secs: 3,
        rest_secs: 2,
        stuck_on_cycle: Some(1),
        operator_reset_after_secs: Some(2),
        random_seed: Some(42),
        ..Default::default()
    };
    cfg
}

fn device(plant: &SimulatedPlant, clock: &ManualClock, with_link: bool) -> Device {
    let link: Box<dyn pump_limiter::controller::Connectivity> = if with_link {
        Box::new(plant.link())
    } else {
        Box::new(pump_limiter::controller::connectivity::NoConnectivity)
    };
    Device {
        meter: Box::new(Cse7766Meter::new(plant.uart())),
        outputs: Box::new(plant.outputs()),
        reset: Box::new(plant.button()),
        heartbeat: Box::new(plant.led()),
        link,
        clock: Arc::new(clock.clone()),
    }
}

struct Rig {
    plant: SimulatedPlant,
    clock: ManualClock,
    control: ControlLoop,
    sink: MemorySink,
}

impl Rig {
    fn new(cfg: &Config) -> Self {
        let plant = SimulatedPlant::new(&cfg.simulation);
        let clock = ManualClock::starting_at(0);
        let sink = MemorySink::new();
        let control = ControlLoop::boot(device(&plant, &clock, false), cfg, Box::new(sink.clone()));
        Self {
            plant,
            clock,
            control,
            sink,
        }
    }

    fn run_for(&mut self, ms: u32) {
        for _ in 0..ms / STEP_MS {
            self.clock.advance(STEP_MS);
            self.plant.advance(Duration::from_millis(STEP_MS as u64));
            assert_eq!(self.control.iterate(), None);
        }
    }

    fn count(&self, line: &str) -> usize {
        self.sink.lines().iter().filter(|l| *l == line).count()
    }
}

#[test]
fn boot_closes_relay() {
    let rig = Rig::new(&config());
    assert!(rig.plant.outputs().relay_closed());
    assert!(rig.plant.outputs().state().is_on());
}

#[test]
fn dry_running_pump_is_cut_and_operator_restores_it() {
    let mut rig = Rig::new(&config());

    // Pump sticks at 2s, first seen by the 2.1s tick
    rig.run_for(7_000);
    assert_eq!(rig.control.guard().state(), GuardState::Running);
    assert!(rig.plant.outputs().relay_closed());

    rig.run_for(1_200);
    assert_eq!(rig.control.guard().state(), GuardState::Tripped);
    assert!(!rig.plant.outputs().relay_closed());
    assert_eq!(rig.count(TRIP_LINE), 1);

    // Operator presses reset two seconds after the relay opened
    rig.run_for(2_500);
    assert!(rig.plant.outputs().relay_closed());
    assert_eq!(rig.count(RESET_LINE), 1);
    assert!(!rig.plant.pump().is_stuck());

    // Healthy cycles from here on stay below the limit
    rig.run_for(20_000);
    assert_eq!(rig.control.events().trip_count(), 1);
    assert!(rig.plant.outputs().relay_closed());
    assert!(rig.sink.contains("ActivePower 450.0 W"));
}

#[test]
fn heartbeat_toggles_once_per_tick() {
    let mut rig = Rig::new(&config());
    rig.run_for(3_000);
    assert_eq!(rig.control.ticks(), 3);
    assert_eq!(rig.plant.led().toggles(), 3);
}

#[tokio::test(start_paused = true)]
async fn unreachable_access_point_restarts_at_boot() {
    let mut cfg = config();
    cfg.connectivity.enabled = true;

    let plant = SimulatedPlant::new(&cfg.simulation);
    plant.link().set_reachable(false);
    let clock = ManualClock::starting_at(0);
    let control = ControlLoop::boot(
        device(&plant, &clock, true),
        &cfg,
        Box::new(MemorySink::new()),
    );

    assert_eq!(control.run().await, RestartReason::ConnectTimeout);
}
