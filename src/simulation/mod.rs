//! # Plant simulation
//!
//! Stands in for the physical world around the relay board: the pump behind
//! the relay, the metering chip streaming frames over the UART, the operator
//! at the reset button and the wireless access point.
//!
//! The plant outlives control loop restarts, just like the pump does when the
//! board reboots.

pub mod pump;

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::domain::ResetInput;
use crate::hardware::simulated::{
    SimulatedButton, SimulatedLed, SimulatedLink, SimulatedOutputs, SimulatedUart,
};

pub use pump::{PumpSample, PumpSimulationConfig, PumpSimulator};

pub struct SimulatedPlant {
    pump: PumpSimulator,
    outputs: SimulatedOutputs,
    button: SimulatedButton,
    uart: SimulatedUart,
    link: SimulatedLink,
    led: SimulatedLed,
    frame_interval: Duration,
    operator_reset_after: Option<Duration>,
    relay_open_for: Duration,
}

impl SimulatedPlant {
    pub fn new(config: &PumpSimulationConfig) -> Self {
        Self {
            pump: PumpSimulator::new(config.clone()),
            outputs: SimulatedOutputs::new(),
            button: SimulatedButton::new(),
            uart: SimulatedUart::new(),
            link: SimulatedLink::new(),
            led: SimulatedLed::new(),
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            operator_reset_after: config.operator_reset_after_secs.map(Duration::from_secs),
            relay_open_for: Duration::ZERO,
        }
    }

    pub fn outputs(&self) -> SimulatedOutputs {
        self.outputs.clone()
    }

    pub fn button(&self) -> SimulatedButton {
        self.button.clone()
    }

    pub fn uart(&self) -> SimulatedUart {
        self.uart.clone()
    }

    pub fn link(&self) -> SimulatedLink {
        self.link.clone()
    }

    pub fn led(&self) -> SimulatedLed {
        self.led.clone()
    }

    pub fn pump(&self) -> &PumpSimulator {
        &self.pump
    }

    /// Advance the plant by `dt` and transmit one metering frame.
    pub fn advance(&mut self, dt: Duration) -> PumpSample {
        // A press lasts one frame
        if self.button.is_active() {
            self.button.release();
        }

        let relay_closed = self.outputs.relay_closed();
        if relay_closed {
            self.relay_open_for = Duration::ZERO;
        } else {
            self.relay_open_for += dt;
            if let Some(after) = self.operator_reset_after {
                if self.relay_open_for >= after {
                    info!(
                        waited_secs = self.relay_open_for.as_secs(),
                        "operator services the pump and presses reset"
                    );
                    self.pump.clear_fault();
                    self.button.press();
                    self.relay_open_for = Duration::ZERO;
                }
            }
        }

        let sample = self.pump.step(dt, relay_closed);
        self.uart.transmit(&self.pump.frame(&sample).encode());
        sample
    }

    /// Run the plant in the background at the metering frame rate.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.frame_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let dt = self.frame_interval;
                self.advance(dt);
            }
        })
    }
}
