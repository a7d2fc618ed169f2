pub mod stream;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::domain::PowerReading;

pub use stream::{serve_log_stream, BroadcastSink, TelemetryConfig};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pump_limiter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
    info!("shutdown signal received");
}

/// Receiver of human-readable status lines.
///
/// Purely observational: nothing written here feeds back into control.
pub trait TelemetrySink: Send {
    fn emit(&mut self, line: &str);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&mut self, _line: &str) {}
}

/// Forwards status lines to the diagnostics log at debug level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&mut self, line: &str) {
        debug!(target: "pump_limiter::telemetry", "{line}");
    }
}

/// Keeps every line in memory. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&mut self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Per-tick measurement lines.
pub fn reading_lines(reading: &PowerReading) -> Vec<String> {
    vec![
        format!("Voltage {:.1} V", reading.voltage_v),
        format!("Current {:.1} A", reading.current_a),
        format!("ActivePower {:.1} W", reading.active_power_w),
        format!("ApparentPower {:.1} VA", reading.apparent_power_va),
        format!("ReactivePower {:.1} VAR", reading.reactive_power_var),
        format!("PowerFactor {:.1}", reading.power_factor),
        format!("Energy {:.2} kWh", reading.energy_kwh()),
    ]
}

pub fn episode_line(elapsed_ms: u32) -> String {
    format!("Load has been running for {} seconds.", elapsed_ms / 1_000)
}

pub const TRIP_LINE: &str = "Load has been running too long! Switching off...";
pub const RESET_LINE: &str = "Reset button pressed. Switching on...";

pub fn restart_line(failures: u32) -> String {
    format!("Failure counter has reached: {failures}. Rebooting...")
}
