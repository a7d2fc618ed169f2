pub mod clock;
pub mod connectivity;
pub mod events;
pub mod guard;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::domain::{apply_outputs, HeartbeatLed, PowerMeter, RelayOutputs, ResetInput};
use crate::hardware::DeviceFactory;
use crate::telemetry::{episode_line, reading_lines, restart_line, TelemetrySink, RESET_LINE, TRIP_LINE};

pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::{Connectivity, ConnectivityConfig, ConnectivityMonitor};
pub use events::{EventLog, GuardEvent};
pub use guard::{GuardConfig, GuardState, GuardTransition, LoadGuard};
pub use scheduler::TickScheduler;

/// Peripherals of one board boot.
pub struct Device {
    pub meter: Box<dyn PowerMeter>,
    pub outputs: Box<dyn RelayOutputs>,
    pub reset: Box<dyn ResetInput>,
    pub heartbeat: Box<dyn HeartbeatLed>,
    pub link: Box<dyn Connectivity>,
    pub clock: Arc<dyn Clock>,
}

/// Why the control loop gave up and asked for a cold restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The link did not come up within the boot timeout
    ConnectTimeout,
    /// The failure counter reached its ceiling
    LinkFailures { failures: u32 },
}

/// Cooperative main loop: one tick per `tick_interval_ms`, reset button and
/// link serviced on every pass.
pub struct ControlLoop {
    meter: Box<dyn PowerMeter>,
    outputs: Box<dyn RelayOutputs>,
    reset: Box<dyn ResetInput>,
    heartbeat: Box<dyn HeartbeatLed>,
    clock: Arc<dyn Clock>,
    link: ConnectivityMonitor,
    link_enabled: bool,
    guard: LoadGuard,
    scheduler: TickScheduler,
    telemetry: Box<dyn TelemetrySink>,
    events: EventLog,
    heartbeat_on: bool,
    reset_held: bool,
    poll_interval: Duration,
}

impl ControlLoop {
    /// Power-on: fresh guard in Idle with both outputs driven on.
    pub fn boot(device: Device, cfg: &Config, telemetry: Box<dyn TelemetrySink>) -> Self {
        let Device {
            meter,
            mut outputs,
            reset,
            heartbeat,
            link,
            clock,
        } = device;

        let guard = LoadGuard::new(cfg.guard.clone());
        apply_outputs(outputs.as_mut(), guard.outputs());
        info!(
            hostname = %cfg.device.hostname,
            threshold_w = cfg.guard.power_threshold_w,
            max_run_ms = cfg.guard.max_run_ms,
            tick_interval_ms = cfg.device.tick_interval_ms,
            "load guard armed"
        );

        Self {
            meter,
            outputs,
            reset,
            heartbeat,
            clock,
            link: ConnectivityMonitor::new(link, &cfg.connectivity),
            link_enabled: cfg.connectivity.enabled,
            guard,
            scheduler: TickScheduler::new(cfg.device.tick_interval_ms),
            telemetry,
            events: EventLog::default(),
            heartbeat_on: false,
            reset_held: false,
            poll_interval: Duration::from_millis(cfg.device.poll_interval_ms),
        }
    }

    pub fn guard(&self) -> &LoadGuard {
        &self.guard
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn link_failures(&self) -> u32 {
        self.link.failures()
    }

    pub fn ticks(&self) -> u64 {
        self.scheduler.ticks()
    }

    /// Run until a restart is required.
    pub async fn run(mut self) -> RestartReason {
        if self.link_enabled {
            if let Err(e) = self.link.establish().await {
                error!(error = %e, "link did not come up");
                return RestartReason::ConnectTimeout;
            }
        }

        loop {
            if let Some(reason) = self.iterate() {
                return reason;
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One pass of the main loop. Never blocks.
    pub fn iterate(&mut self) -> Option<RestartReason> {
        self.link.maintain(self.clock.as_ref());

        let now = self.clock.now_ms();
        if self.scheduler.poll(now) {
            self.tick(now);
        }

        self.poll_reset();

        if self.link.should_restart() {
            let failures = self.link.failures();
            error!(failures, "link failure ceiling reached");
            self.telemetry.emit(&restart_line(failures));
            return Some(RestartReason::LinkFailures { failures });
        }
        None
    }

    fn tick(&mut self, now: u32) {
        self.heartbeat_on = !self.heartbeat_on;
        self.heartbeat.set(self.heartbeat_on);

        self.meter.poll();
        let reading = self.meter.latest();
        for line in reading_lines(&reading) {
            self.telemetry.emit(&line);
        }

        let power_w = reading.effective_power_w();
        match self.guard.evaluate(power_w, now) {
            GuardTransition::Unchanged => {}
            GuardTransition::EpisodeStarted { at_ms } => {
                info!(power_w, at_ms, "load episode started");
                self.events.record(GuardEvent::EpisodeStarted { power_w });
            }
            GuardTransition::EpisodeEnded { ran_ms } => {
                info!(power_w, ran_ms, "load episode ended");
                self.events.record(GuardEvent::EpisodeEnded { ran_ms });
            }
            GuardTransition::Tripped { ran_ms } => {
                warn!(
                    power_w,
                    ran_ms,
                    max_run_ms = self.guard.config().max_run_ms,
                    "load ran too long, switching off"
                );
                self.telemetry.emit(TRIP_LINE);
                self.events.record(GuardEvent::Tripped { ran_ms, power_w });
            }
        }

        if let Some(elapsed_ms) = self.guard.episode_elapsed_ms(now) {
            self.telemetry.emit(&episode_line(elapsed_ms));
        }

        apply_outputs(self.outputs.as_mut(), self.guard.outputs());
    }

    fn poll_reset(&mut self) {
        let active = self.reset.is_active();
        if active {
            let from = self.guard.reset();
            apply_outputs(self.outputs.as_mut(), self.guard.outputs());
            if !self.reset_held {
                info!(from = %from, "reset button pressed, switching on");
                self.telemetry.emit(RESET_LINE);
                self.events.record(GuardEvent::ManualReset { from });
            }
        }
        self.reset_held = active;
    }
}

/// Boot, run and cold-restart the board forever.
pub async fn run_forever<S>(cfg: &Config, factory: &DeviceFactory, mut make_sink: S)
where
    S: FnMut() -> Box<dyn TelemetrySink>,
{
    let mut boots: u64 = 0;
    loop {
        boots += 1;
        info!(boots, "booting");
        let control = ControlLoop::boot(factory.create_device(), cfg, make_sink());
        let reason = control.run().await;
        warn!(?reason, boots, "restarting");
        sleep(Duration::from_millis(cfg.device.restart_delay_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::connectivity::{MockConnectivity, NoConnectivity};
    use crate::domain::{MockPowerMeter, MockRelayOutputs, MockResetInput, OutputState, PowerReading};
    use crate::telemetry::MemorySink;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        clock: ManualClock,
        power: Arc<Mutex<f64>>,
        pressed: Arc<AtomicBool>,
        relay: Arc<Mutex<Vec<bool>>>,
        sink: MemorySink,
    }

    impl Fixture {
        fn relay_on(&self) -> bool {
            self.relay.lock().last().copied().unwrap_or(false)
        }
    }

    struct Led;

    impl HeartbeatLed for Led {
        fn set(&mut self, _on: bool) {}
    }

    fn test_config(max_run_ms: u32) -> Config {
        let mut cfg = Config::default();
        cfg.guard.max_run_ms = max_run_ms;
        cfg.device.tick_interval_ms = 1000;
        cfg
    }

    fn boot(cfg: &Config, link: Box<dyn Connectivity>) -> (ControlLoop, Fixture) {
        let clock = ManualClock::starting_at(0);
        let power = Arc::new(Mutex::new(0.0));
        let pressed = Arc::new(AtomicBool::new(false));
        let relay = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink::new();

        let mut meter = MockPowerMeter::new();
        meter.expect_poll().returning(|| ());
        let p = power.clone();
        meter
            .expect_latest()
            .returning(move || PowerReading::from_active_power(*p.lock()));

        let mut outputs = MockRelayOutputs::new();
        let r = relay.clone();
        outputs
            .expect_set_relay()
            .returning(move |on| r.lock().push(on));
        outputs.expect_set_indicator().returning(|_| ());

        let mut reset = MockResetInput::new();
        let b = pressed.clone();
        reset
            .expect_is_active()
            .returning(move || b.load(Ordering::SeqCst));

        let device = Device {
            meter: Box::new(meter),
            outputs: Box::new(outputs),
            reset: Box::new(reset),
            heartbeat: Box::new(Led),
            link,
            clock: Arc::new(clock.clone()),
        };
        let control = ControlLoop::boot(device, cfg, Box::new(sink.clone()));
        (
            control,
            Fixture {
                clock,
                power,
                pressed,
                relay,
                sink,
            },
        )
    }

    /// Advance one second and run a pass.
    fn step(control: &mut ControlLoop, fx: &Fixture, power_w: f64) {
        *fx.power.lock() = power_w;
        fx.clock.advance(1000);
        assert_eq!(control.iterate(), None);
    }

    #[test]
    fn test_boot_drives_outputs_on() {
        let (control, fx) = boot(&test_config(5000), Box::new(NoConnectivity));
        assert!(fx.relay_on());
        assert_eq!(control.guard().state(), GuardState::Idle);
        assert_eq!(control.guard().outputs(), OutputState::ON);
    }

    #[test]
    fn test_first_pass_ticks_immediately() {
        let (mut control, fx) = boot(&test_config(5000), Box::new(NoConnectivity));
        assert_eq!(control.iterate(), None);
        assert_eq!(control.ticks(), 1);
        assert!(fx.sink.contains("Voltage 0.0 V"));
        assert!(fx.sink.contains("Energy 0.00 kWh"));
    }

    #[test]
    fn test_no_tick_between_intervals() {
        let (mut control, fx) = boot(&test_config(5000), Box::new(NoConnectivity));
        control.iterate();
        fx.clock.advance(500);
        control.iterate();
        assert_eq!(control.ticks(), 1);
        fx.clock.advance(500);
        control.iterate();
        assert_eq!(control.ticks(), 2);
    }

    #[test]
    fn test_long_run_trips_and_reset_restores() {
        let (mut control, fx) = boot(&test_config(5000), Box::new(NoConnectivity));
        control.iterate();

        // 250 W from t=1s: episode starts at 1s, trips once 5s are exceeded
        for _ in 0..6 {
            step(&mut control, &fx, 250.0);
        }
        assert_eq!(control.guard().state(), GuardState::Running);
        assert!(fx.relay_on());

        step(&mut control, &fx, 250.0);
        assert_eq!(control.guard().state(), GuardState::Tripped);
        assert!(!fx.relay_on());
        assert!(fx.sink.contains(TRIP_LINE));
        assert_eq!(control.events().trip_count(), 1);

        // Power drop does not clear a trip
        step(&mut control, &fx, 0.0);
        assert_eq!(control.guard().state(), GuardState::Tripped);
        assert!(!fx.relay_on());

        fx.pressed.store(true, Ordering::SeqCst);
        control.iterate();
        control.iterate();
        fx.pressed.store(false, Ordering::SeqCst);
        control.iterate();

        assert_eq!(control.guard().state(), GuardState::Idle);
        assert!(fx.relay_on());
        let resets = fx.sink.lines().iter().filter(|l| *l == RESET_LINE).count();
        assert_eq!(resets, 1);
    }

    #[test]
    fn test_short_episode_ends_without_trip() {
        let (mut control, fx) = boot(&test_config(5000), Box::new(NoConnectivity));
        control.iterate();
        step(&mut control, &fx, 250.0);
        step(&mut control, &fx, 250.0);
        assert!(fx.sink.contains("Load has been running for 1 seconds."));

        step(&mut control, &fx, 10.0);
        assert_eq!(control.guard().state(), GuardState::Idle);
        assert!(fx.relay_on());
        assert!(!fx.sink.contains(TRIP_LINE));
    }

    #[test]
    fn test_reset_while_held_keeps_guard_idle() {
        let (mut control, fx) = boot(&test_config(5000), Box::new(NoConnectivity));
        fx.pressed.store(true, Ordering::SeqCst);
        control.iterate();
        step(&mut control, &fx, 250.0);
        // Held button clears the episode the tick just started
        assert_eq!(control.guard().state(), GuardState::Idle);
    }

    #[test]
    fn test_link_failures_request_restart() {
        let mut cfg = test_config(5000);
        cfg.connectivity.enabled = true;
        cfg.connectivity.failure_ceiling = 3;
        cfg.connectivity.reconnect_backoff_ms = 1000;

        let mut link = MockConnectivity::new();
        link.expect_is_connected().returning(|| false);
        link.expect_reconnect().returning(|| Ok(()));
        let (mut control, fx) = boot(&cfg, Box::new(link));

        assert_eq!(control.iterate(), None);
        fx.clock.advance(1000);
        assert_eq!(control.iterate(), None);
        fx.clock.advance(1000);
        assert_eq!(
            control.iterate(),
            Some(RestartReason::LinkFailures { failures: 3 })
        );
        assert!(fx
            .sink
            .contains("Failure counter has reached: 3. Rebooting..."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_restarts_when_link_never_comes_up() {
        let mut cfg = test_config(5000);
        cfg.connectivity.enabled = true;

        let mut link = MockConnectivity::new();
        link.expect_begin().returning(|| Ok(()));
        link.expect_is_connected().returning(|| false);
        let (control, _fx) = boot(&cfg, Box::new(link));

        assert_eq!(control.run().await, RestartReason::ConnectTimeout);
    }
}
