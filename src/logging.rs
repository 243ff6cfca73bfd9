//! Structured logging for the forecast service
//!
//! Events are emitted through `tracing` with the data source and the
//! configuration name attached as fields. Output goes to the console and,
//! optionally, to an append-only log file for daemon operation.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    ForecastSolar,
    Simulation,
    InfluxDb,
    Postgres,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::ForecastSolar => write!(f, "FORECAST.SOLAR"),
            DataSource::Simulation => write!(f, "SIM"),
            DataSource::InfluxDb => write!(f, "INFLUX"),
            DataSource::Postgres => write!(f, "PG"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - provider rate limit reached for this period
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `log_file` set, events are
/// appended to that file instead of the console. Calling this twice is
/// harmless; the second call keeps the first subscriber.
pub fn init_logger(level: &str, log_file: Option<&str>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.try_init(),
    };

    if let Err(e) = result {
        eprintln!("logger already initialized: {}", e);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a forecast fetch failure based on the error message
pub fn classify_fetch_failure(error_message: &str) -> FailureType {
    // forecast.solar answers 429 once the hourly quota is used up; the next
    // run picks the data up again.
    if error_message.contains("HTTP error: 429") {
        FailureType::Expected
    } else if error_message.contains("HTTP error: 5") || error_message.contains("timed out") {
        FailureType::Unknown
    } else if error_message.contains("HTTP error") || error_message.contains("Parse error") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a fetch failure for one configuration with automatic classification
pub fn log_fetch_failure(
    source: DataSource,
    configuration: &str,
    operation: &str,
    err: &dyn std::error::Error,
) {
    let error_msg = err.to_string();
    let failure_type = classify_fetch_failure(&error_msg);

    match failure_type {
        FailureType::Expected => {
            debug!(source = %source, configuration, "{} failed [{}]: {}", operation, failure_type, error_msg)
        }
        FailureType::Unexpected => {
            error!(source = %source, configuration, "{} failed [{}]: {}", operation, failure_type, error_msg)
        }
        FailureType::Unknown => {
            warn!(source = %source, configuration, "{} failed [{}]: {}", operation, failure_type, error_msg)
        }
    }
}

/// Log a failed write of one combined entry
pub fn log_store_failure(source: DataSource, timestamp: &str, watt: i32, err: &dyn std::error::Error) {
    warn!(
        source = %source,
        timestamp,
        watt,
        "unable to write forecast data ({}, {}): {}",
        timestamp,
        watt,
        err
    );
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of one run's persistence pass
pub fn log_run_summary(source: DataSource, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Run complete: {}/{} forecast entries stored, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info!(source = %source, "{}", message);
    } else if successful == 0 {
        error!(source = %source, "{}", message);
    } else {
        warn!(source = %source, "{}", message);
    }
}
