//! Forecast collector daemon.
//!
//! Runs one forecast pass at startup and then every `forecast.interval`.
//! Passes never overlap: the next one starts when the interval has elapsed
//! since the previous start, or right away if the previous pass overran.
//!
//! Usage: solar_forecast_service [--once]

use std::error::Error;
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use solar_forecast_service::config::{AppConfig, Settings};
use solar_forecast_service::ingest::ForecastSolarClient;
use solar_forecast_service::logging;
use solar_forecast_service::registry::ConfigurationRegistry;
use solar_forecast_service::run;
use solar_forecast_service::store::build_store;

fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    let settings = Settings::load()?;
    let config = AppConfig::from_settings(&settings)?;
    logging::init_logger(&config.log_level, config.log_file.as_deref())?;

    let registry = ConfigurationRegistry::from_settings(&settings)?;
    if config.simulate {
        registry.missing_simulation_data();
    }

    let source = ForecastSolarClient::from_config(&registry, &config)?;
    let mut store = build_store(&config.store)?;

    info!(
        configurations = registry.len(),
        simulate = config.simulate,
        write_to_store = config.write_to_store,
        store = store.backend(),
        "forecast service started, interval {}",
        config.interval_text
    );

    loop {
        let started = Instant::now();
        run::execute(
            &registry,
            &source,
            store.as_mut(),
            config.write_to_store,
            config.simulate,
            &config.interval_text,
        );

        if once {
            return Ok(());
        }

        let elapsed = started.elapsed();
        match config.interval.checked_sub(elapsed) {
            Some(remaining) => thread::sleep(remaining),
            None => warn!(
                "forecast run took {:?}, longer than the {} interval; starting the next one now",
                elapsed, config.interval_text
            ),
        }
    }
}
