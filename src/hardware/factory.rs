use std::sync::Arc;

use crate::controller::clock::SystemClock;
use crate::controller::connectivity::{Connectivity, NoConnectivity};
use crate::controller::Device;
use crate::hardware::cse7766::Cse7766Meter;
use crate::hardware::simulated::{
    SimulatedButton, SimulatedLed, SimulatedLink, SimulatedOutputs, SimulatedUart,
};
use crate::simulation::SimulatedPlant;

/// Builds the peripheral set for each boot of the control loop.
///
/// Every boot gets a fresh meter (empty decoder, zero energy) and a fresh
/// monotonic clock, while the handles keep pointing at the same plant.
pub struct DeviceFactory {
    outputs: SimulatedOutputs,
    button: SimulatedButton,
    uart: SimulatedUart,
    led: SimulatedLed,
    link: Option<SimulatedLink>,
}

impl DeviceFactory {
    /// Wire the board to a simulated plant. Without `link_enabled` the board
    /// runs offline and never restarts for connectivity.
    pub fn simulated(plant: &SimulatedPlant, link_enabled: bool) -> Self {
        Self {
            outputs: plant.outputs(),
            button: plant.button(),
            uart: plant.uart(),
            led: plant.led(),
            link: link_enabled.then(|| plant.link()),
        }
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn create_device(&self) -> Device {
        let link: Box<dyn Connectivity> = match &self.link {
            Some(link) => Box::new(link.clone()),
            None => Box::new(NoConnectivity),
        };
        Device {
            meter: Box::new(Cse7766Meter::new(self.uart.clone())),
            outputs: Box::new(self.outputs.clone()),
            reset: Box::new(self.button.clone()),
            heartbeat: Box::new(self.led.clone()),
            link,
            clock: Arc::new(SystemClock::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::PumpSimulationConfig;
    use std::time::Duration;

    fn plant() -> SimulatedPlant {
        SimulatedPlant::new(&PumpSimulationConfig {
            noise_w: 0.0,
            rest_secs: 1,
            random_seed: Some(1),
            ..Default::default()
        })
    }

    #[test]
    fn test_device_reads_plant_frames() {
        let mut plant = plant();
        let factory = DeviceFactory::simulated(&plant, false);
        let mut device = factory.create_device();

        plant.advance(Duration::from_millis(100));
        device.meter.poll();
        assert!((device.meter.latest().voltage_v - 230.0).abs() < 0.5);
    }

    #[test]
    fn test_device_drives_plant_relay() {
        let plant = plant();
        let factory = DeviceFactory::simulated(&plant, false);
        let mut device = factory.create_device();

        device.outputs.set_relay(true);
        assert!(plant.outputs().relay_closed());
    }

    #[test]
    fn test_offline_device_is_always_connected() {
        let plant = plant();
        let factory = DeviceFactory::simulated(&plant, false);
        assert!(!factory.has_link());
        assert!(factory.create_device().link.is_connected());
    }

    #[test]
    fn test_linked_device_shares_access_point() {
        let plant = plant();
        let factory = DeviceFactory::simulated(&plant, true);
        let mut device = factory.create_device();

        device.link.begin().unwrap();
        assert!(device.link.is_connected());
        plant.link().set_reachable(false);
        assert!(!device.link.is_connected());
    }
}
