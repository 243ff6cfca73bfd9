//! InfluxDB v2 writer
//!
//! Writes one `Forecast` point per call through the HTTP write API
//! (`POST {url}/api/v2/write`) using line protocol at second precision,
//! authenticated with an API token.

use std::time::Duration;

use tracing::debug;

use super::ForecastStore;
use crate::logging::DataSource;
use crate::config::InfluxSettings;
use crate::model::{Forecast, StoreError};

const BACKEND: &str = "InfluxDB";

/// Measurement name of stored samples.
pub const MEASUREMENT: &str = "Forecast";

/// Renders a sample as one line of InfluxDB line protocol.
pub fn line_protocol(forecast: &Forecast) -> String {
    format!("{} watt={}i {}", MEASUREMENT, forecast.watt, forecast.time.timestamp())
}

pub struct InfluxStore {
    settings: InfluxSettings,
    client: reqwest::blocking::Client,
}

impl InfluxStore {
    pub fn new(settings: InfluxSettings) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Connect {
                backend: BACKEND,
                cause: e.to_string(),
            })?;
        Ok(Self { settings, client })
    }

    fn write(&self, forecast: &Forecast) -> Result<(), StoreError> {
        let url = format!("{}/api/v2/write", self.settings.url);

        let response = self
            .client
            .post(&url)
            .query(&[
                ("org", self.settings.org.as_str()),
                ("bucket", self.settings.bucket.as_str()),
                ("precision", "s"),
            ])
            .header("Authorization", format!("Token {}", self.settings.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line_protocol(forecast))
            .send()
            .map_err(|e| StoreError::Connect {
                backend: BACKEND,
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StoreError::Write {
                backend: BACKEND,
                cause: format!("HTTP {}: {}", status.as_u16(), body.trim()),
            });
        }
        Ok(())
    }
}

impl ForecastStore for InfluxStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn source(&self) -> DataSource {
        DataSource::InfluxDb
    }

    fn create_forecast_data(
        &mut self,
        time: &str,
        watt: i32,
        write_to_store: bool,
    ) -> Result<Forecast, StoreError> {
        let forecast = Forecast::from_provider(time, watt)?;
        if write_to_store {
            self.write(&forecast)?;
            debug!(backend = BACKEND, "wrote forecast {}", forecast);
        }
        Ok(forecast)
    }
}
