//! Forecast retrieval.
//!
//! Submodules:
//! - `forecast_solar`: forecast.solar estimate client and payload parsing.

pub mod forecast_solar;

pub use self::forecast_solar::{ForecastSolarClient, ForecastSource, parse_watts};
