//! Pump limiter: a load guard for a metering smart relay.
//!
//! Switches the relay off when the measured load stays above a power
//! threshold for longer than allowed, and keeps it off until someone presses
//! the reset button.

pub mod config;
pub mod controller;
pub mod domain;
pub mod hardware;
pub mod simulation;
pub mod telemetry;
