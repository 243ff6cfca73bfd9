//! Core data types for the solar forecast service.
//!
//! This module defines the shared domain model imported by all other modules:
//! the timestamp-keyed watt mapping, the persisted forecast sample and the
//! error kinds raised along the pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::timestamp::parse_timestamp;

// ---------------------------------------------------------------------------
// Forecast data
// ---------------------------------------------------------------------------

/// Watt values keyed by the provider's native timestamp string.
///
/// Used both for a single configuration's forecast and for the combined
/// mapping of a run. The raw string is the merge key; it is parsed into an
/// instant only when a sample is persisted.
pub type WattsByTimestamp = BTreeMap<String, i32>;

/// A single persisted forecast sample.
///
/// Stored as measurement `Forecast` with one integer field `watt`, at
/// second precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Forecast {
    pub time: DateTime<Utc>,
    pub watt: i32,
}

impl Forecast {
    /// Builds a sample from a provider timestamp string and a watt value.
    ///
    /// Sub-second precision is dropped so that the instant matches what the
    /// store keeps.
    pub fn from_provider(time: &str, watt: i32) -> Result<Self, TimestampFormatError> {
        let time = parse_timestamp(time)?.trunc_subsecs(0);
        Ok(Self { time, watt })
    }
}

impl fmt::Display for Forecast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}; {})", self.time.to_rfc3339(), self.watt)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Startup configuration problems. Any of these aborts the service.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value for '{key}'")]
    Missing { key: String },
    #[error("invalid value '{value}' for '{key}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("unable to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised while obtaining forecast data for one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForecastError {
    /// The configuration name is not in the registry.
    #[error("unknown forecast configuration '{0}'")]
    UnknownConfiguration(String),
    /// Simulation mode is active but no payload was configured.
    #[error("no simulated forecast response configured for '{configuration}' (key '{key}')")]
    MissingSimulationData { configuration: String, key: String },
    /// Non-2xx HTTP response from the provider.
    #[error("HTTP error: {0}")]
    HttpStatus(u16),
    /// Connection failure, timeout or unreadable body.
    #[error("transport error: {0}")]
    Transport(String),
    /// The payload is not JSON or lacks `result.watts`.
    #[error("Parse error: {0}")]
    PayloadParse(String),
    /// An entry under `result.watts` is not a non-negative integer.
    #[error("invalid watt value '{value}' at '{timestamp}'")]
    InvalidWattValue { timestamp: String, value: String },
}

impl ForecastError {
    /// Transport and payload failures only cost the configuration its
    /// contribution to the current run; everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ForecastError::HttpStatus(_)
                | ForecastError::Transport(_)
                | ForecastError::PayloadParse(_)
        )
    }
}

/// None of the known layouts matched a timestamp string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to parse timestamp '{input}' (tried {}): {last_error}", .attempted.join(", "))]
pub struct TimestampFormatError {
    pub input: String,
    pub attempted: Vec<&'static str>,
    pub last_error: String,
}

/// Failure to turn a combined entry into a stored sample.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Timestamp(#[from] TimestampFormatError),
    #[error("unable to connect to {backend}: {cause}")]
    Connect { backend: &'static str, cause: String },
    #[error("error while writing data to {backend}: {cause}")]
    Write { backend: &'static str, cause: String },
}
