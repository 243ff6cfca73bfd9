//! PostgreSQL writer
//!
//! Keeps samples in a single `forecast` table keyed by instant. The
//! connection is opened on the first write and the table is created if it
//! does not exist; a later run overwrites the watt value of an instant it
//! forecasts again.

use postgres::{Client, NoTls};
use tracing::{debug, info};

use super::ForecastStore;
use crate::logging::DataSource;
use crate::model::{Forecast, StoreError};

const BACKEND: &str = "PostgreSQL";

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS forecast (
        time TIMESTAMPTZ PRIMARY KEY,
        watt INTEGER NOT NULL
    )
";

const UPSERT: &str = "
    INSERT INTO forecast (time, watt)
    VALUES ($1, $2)
    ON CONFLICT (time) DO UPDATE SET watt = EXCLUDED.watt
";

pub struct PostgresStore {
    database_url: String,
    client: Option<Client>,
}

impl PostgresStore {
    pub fn new(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            client: None,
        }
    }

    fn connection(&mut self) -> Result<&mut Client, StoreError> {
        let client = match self.client.take() {
            Some(client) if !client.is_closed() => client,
            _ => {
                let mut client = Client::connect(&self.database_url, NoTls).map_err(|e| {
                    StoreError::Connect {
                        backend: BACKEND,
                        cause: e.to_string(),
                    }
                })?;
                client
                    .batch_execute(CREATE_TABLE)
                    .map_err(|e| StoreError::Write {
                        backend: BACKEND,
                        cause: e.to_string(),
                    })?;
                info!(backend = BACKEND, "connected, forecast table ready");
                client
            }
        };
        Ok(self.client.insert(client))
    }

    fn write(&mut self, forecast: &Forecast) -> Result<(), StoreError> {
        let client = self.connection()?;
        client
            .execute(UPSERT, &[&forecast.time, &forecast.watt])
            .map_err(|e| StoreError::Write {
                backend: BACKEND,
                cause: e.to_string(),
            })?;
        Ok(())
    }
}

impl ForecastStore for PostgresStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn source(&self) -> DataSource {
        DataSource::Postgres
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
