use serde::{Deserialize, Serialize};

use super::PowerReading;

/// Desired state of the relay and its status lamp.
///
/// Both outputs are always driven together: on means the load is enabled,
/// off means the guard has tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputState {
    pub relay_enabled: bool,
    pub indicator_enabled: bool,
}

impl OutputState {
    pub const ON: OutputState = OutputState {
        relay_enabled: true,
        indicator_enabled: true,
    };

    pub const OFF: OutputState = OutputState {
        relay_enabled: false,
        indicator_enabled: false,
    };

    pub fn is_on(&self) -> bool {
        self.relay_enabled && self.indicator_enabled
    }
}

impl Default for OutputState {
    fn default() -> Self {
        Self::ON
    }
}

/// Source of power samples.
///
/// Implementations sample on their own schedule; `poll` only drains what is
/// already pending and must never block.
#[cfg_attr(test, mockall::automock)]
pub trait PowerMeter: Send {
    /// Process any pending sensor data.
    fn poll(&mut self);
    /// Most recent reading. Zero until the first valid sample arrives.
    fn latest(&self) -> PowerReading;
}

/// Load relay and the status lamp next to it.
#[cfg_attr(test, mockall::automock)]
pub trait RelayOutputs: Send {
    fn set_relay(&mut self, enabled: bool);
    fn set_indicator(&mut self, enabled: bool);
}

/// Drive both outputs from a single state.
pub fn apply_outputs(outputs: &mut dyn RelayOutputs, state: OutputState) {
    outputs.set_relay(state.relay_enabled);
    outputs.set_indicator(state.indicator_enabled);
}

/// Manual reset button. Level-triggered: active for as long as it is held.
#[cfg_attr(test, mockall::automock)]
pub trait ResetInput: Send {
    fn is_active(&self) -> bool;
}

/// Liveness LED toggled once per tick.
#[cfg_attr(test, mockall::automock)]
pub trait HeartbeatLed: Send {
    fn set(&mut self, on: bool);
}
