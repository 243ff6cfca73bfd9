//! Forecast persistence.
//!
//! The run hands every combined entry to a `ForecastStore`, one call per
//! timestamp. A store always builds the `Forecast` sample (which validates
//! the timestamp); it only touches its backend when `write_to_store` is set.
//!
//! Submodules:
//! - `influx`: InfluxDB v2 HTTP write API.
//! - `postgres`: a `forecast` table in PostgreSQL.

pub mod influx;
pub mod postgres;

use tracing::debug;

use crate::config::StoreSettings;
use crate::logging::DataSource;
use crate::model::{Forecast, StoreError};

pub use self::influx::InfluxStore;
pub use self::postgres::PostgresStore;

/// Persistence collaborator for combined forecast entries.
pub trait ForecastStore {
    /// Short backend name used in logs and errors.
    fn backend(&self) -> &'static str;

    /// Data source that store failures and run summaries are tagged with.
    fn source(&self) -> DataSource;

    /// Builds the sample for `(time, watt)` and, if `write_to_store` is set,
    /// writes it. Returns the sample on success.
    fn create_forecast_data(
        &mut self,
        time: &str,
        watt: i32,
        write_to_store: bool,
    ) -> Result<Forecast, StoreError>;
}

/// Builds samples and logs them; never writes anywhere.
#[derive(Debug, Default)]
pub struct LogOnlyStore;

impl ForecastStore for LogOnlyStore {
    fn backend(&self) -> &'static str {
        "log"
    }

    fn source(&self) -> DataSource {
        DataSource::System
    }

    fn create_forecast_data(
        &mut self,
        time: &str,
        watt: i32,
        _write_to_store: bool,
    ) -> Result<Forecast, StoreError> {
        let forecast = Forecast::from_provider(time, watt)?;
        debug!(backend = self.backend(), "forecast {}", forecast);
        Ok(forecast)
    }
}

/// Creates the store selected in the configuration. No connection is opened
/// here; backends connect on their first write.
pub fn build_store(settings: &StoreSettings) -> Result<Box<dyn ForecastStore>, StoreError> {
    Ok(match settings {
        StoreSettings::InfluxDb(influx) => Box::new(InfluxStore::new(influx.clone())?),
        StoreSettings::Postgres { database_url } => Box::new(PostgresStore::new(database_url)),
        StoreSettings::LogOnly => Box::new(LogOnlyStore),
    })
}
