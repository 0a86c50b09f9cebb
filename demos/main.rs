/* klimalogg-demo: minimal host loop exercising the driver's public API --
 * starts the engine, renames a couple of sensor channels, and prints
 * observations as they arrive. */
use std::time::Duration;

use anyhow::{Context, Result};
use klimalogg_link::{Engine, EngineConfig, SensorMap, StalenessMonitor};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut sensor_map = SensorMap::new();
    sensor_map
        .rename_temperature(0, "outTemp")
        .context("renaming Temp0")?;
    sensor_map
        .rename_humidity(0, "outHumidity")
        .context("renaming Humidity0")?;

    let mut engine = Engine::start(EngineConfig::default()).context("starting RF engine")?;
    let store = engine.store().clone();
    let mut staleness = StalenessMonitor::new();

    loop {
        std::thread::sleep(Duration::from_secs(10));
        staleness.poll_store(&store);

        if let Some(reading) = store.current_reading() {
            for obs in sensor_map.project(&reading) {
                println!("{}: {:?}", obs.label, obs.value);
            }
        }

        match store.connection_status() {
            klimalogg_link::ConnectionStatus::Lost { silent_for } => {
                println!("console silent for {silent_for:?}");
                engine.stop();
                break;
            }
            _ => continue,
        }
    }

    engine.join().context("joining RF thread")
}
