use anyhow::Result;
use pump_limiter::{config, controller, hardware, simulation, telemetry};
use config::Config;
use hardware::DeviceFactory;
use simulation::SimulatedPlant;
use telemetry::{init_tracing, BroadcastSink, NoopSink, TelemetrySink, TracingSink};
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    info!(hostname = %cfg.device.hostname, "starting pump limiter");

    let stream = if cfg.telemetry.enabled {
        match &cfg.telemetry.listen_addr {
            Some(addr) => {
                let listener = telemetry::stream::bind_log_stream(addr).await?;
                let sink = BroadcastSink::new(cfg.telemetry.channel_capacity);
                let tx = sink.sender();
                tokio::spawn(async move {
                    if let Err(e) = telemetry::serve_log_stream(listener, tx).await {
                        error!(error = %e, "log stream stopped");
                    }
                });
                Some(sink)
            }
            None => None,
        }
    } else {
        None
    };
    let telemetry_enabled = cfg.telemetry.enabled;
    let make_sink = move || -> Box<dyn TelemetrySink> {
        match (&stream, telemetry_enabled) {
            (Some(sink), _) => Box::new(sink.clone()),
            (None, true) => Box::new(TracingSink),
            (None, false) => Box::new(NoopSink),
        }
    };

    let plant = SimulatedPlant::new(&cfg.simulation);
    let factory = DeviceFactory::simulated(&plant, cfg.connectivity.enabled);
    let plant_task = plant.spawn();

    tokio::select! {
        _ = controller::run_forever(&cfg, &factory, make_sink) => {}
        _ = telemetry::shutdown_signal() => {}
    }

    plant_task.abort();
    warn!("shutdown complete");
    Ok(())
}
