//! forecast.solar estimate client
//!
//! Retrieves the per-timestamp power forecast of one installation from the
//! public forecast.solar API, or from the configured simulated payload when
//! simulation mode is active.
//!
//! API Documentation: https://doc.forecast.solar/api:estimate
//! Estimate endpoint: GET {base}/estimate/{lat}/{lon}/{dec}/{az}/{kwp}?time=utc

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::logging::{self, DataSource};
use crate::model::{ForecastError, WattsByTimestamp};
use crate::registry::ConfigurationRegistry;

// ============================================================================
// API Response Structures
// ============================================================================

/// Estimate response. Only `result.watts` is required.
#[derive(Debug, Deserialize)]
pub struct EstimateResponse {
    pub result: EstimateResult,
    pub message: Option<EstimateMessage>,
}

#[derive(Debug, Deserialize)]
pub struct EstimateResult {
    /// Timestamp -> watts. Values arrive as numbers, or as numeric strings
    /// in some hand-made payloads, so they are converted afterwards.
    pub watts: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct EstimateMessage {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: Option<String>,
    pub info: Option<EstimateInfo>,
    pub ratelimit: Option<RateLimit>,
}

#[derive(Debug, Deserialize)]
pub struct EstimateInfo {
    pub place: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateLimit {
    pub period: Option<u64>,
    pub limit: Option<u64>,
    pub remaining: Option<i64>,
}

// ============================================================================
// Payload parsing
// ============================================================================

/// Extracts the timestamp -> watt mapping from a raw estimate payload.
///
/// A payload that is not JSON or has no `result.watts` object is a
/// `PayloadParse` error. Once `result.watts` is found, every entry must be a
/// non-negative integer; anything else is `InvalidWattValue`.
pub fn parse_watts(payload: &str) -> Result<WattsByTimestamp, ForecastError> {
    parse_estimate(payload).and_then(|response| watts_from_result(response.result))
}

pub fn parse_estimate(payload: &str) -> Result<EstimateResponse, ForecastError> {
    serde_json::from_str(payload).map_err(|e| ForecastError::PayloadParse(e.to_string()))
}

fn watts_from_result(result: EstimateResult) -> Result<WattsByTimestamp, ForecastError> {
    result
        .watts
        .into_iter()
        .map(|(timestamp, value)| {
            let watt = parse_watt_value(&value).ok_or_else(|| ForecastError::InvalidWattValue {
                timestamp: timestamp.clone(),
                value: value.to_string(),
            })?;
            Ok((timestamp, watt))
        })
        .collect()
}

fn parse_watt_value(value: &serde_json::Value) -> Option<i32> {
    let watt = match value {
        serde_json::Value::Number(n) => i32::try_from(n.as_i64()?).ok()?,
        serde_json::Value::String(s) => s.trim().parse::<i32>().ok()?,
        _ => return None,
    };
    (watt >= 0).then_some(watt)
}

// ============================================================================
// Source trait
// ============================================================================

/// Anything that can produce one configuration's forecast mapping.
///
/// Implementations must turn transport and payload failures into an empty
/// mapping and only return `Err` for failures that should abort the run.
pub trait ForecastSource {
    fn fetch(&self, configuration: &str) -> Result<WattsByTimestamp, ForecastError>;
}

// ============================================================================
// API Client
// ============================================================================

/// forecast.solar client for every configuration in a registry.
pub struct ForecastSolarClient<'a> {
    registry: &'a ConfigurationRegistry,
    client: reqwest::blocking::Client,
    base_url: String,
    simulate: bool,
}

impl<'a> ForecastSolarClient<'a> {
    pub fn new(
        registry: &'a ConfigurationRegistry,
        base_url: &str,
        timeout: Duration,
        simulate: bool,
    ) -> Result<Self, ForecastError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForecastError::Transport(e.to_string()))?;

        Ok(Self {
            registry,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            simulate,
        })
    }

    pub fn from_config(registry: &'a ConfigurationRegistry, config: &AppConfig) -> Result<Self, ForecastError> {
        Self::new(registry, &config.base_url, config.request_timeout, config.simulate)
    }

    pub fn is_simulating(&self) -> bool {
        self.simulate
    }

    /// Issues the estimate request for one configuration and returns the body.
    pub fn request_estimate(&self, configuration: &str) -> Result<String, ForecastError> {
        let url = format!("{}{}", self.base_url, self.registry.uri_for(configuration)?);
        info!(configuration, "forecast URI: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| ForecastError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ForecastError::HttpStatus(response.status().as_u16()));
        }

        response.text().map_err(|e| ForecastError::Transport(e.to_string()))
    }

    fn raw_payload(&self, configuration: &str) -> Result<String, ForecastError> {
        if self.simulate {
            self.registry
                .simulated_response_for(configuration)
                .map(String::from)
        } else {
            self.request_estimate(configuration)
        }
    }
}

impl ForecastSource for ForecastSolarClient<'_> {
    fn fetch(&self, configuration: &str) -> Result<WattsByTimestamp, ForecastError> {
        let source = if self.simulate {
            DataSource::Simulation
        } else {
            DataSource::ForecastSolar
        };

        let payload = match self.raw_payload(configuration) {
            Ok(payload) => payload,
            Err(e) if e.is_recoverable() => {
                logging::log_fetch_failure(source, configuration, "get forecast data", &e);
                return Ok(WattsByTimestamp::new());
            }
            Err(e) => return Err(e),
        };

        let kwp = self.registry.kwp_for(configuration)?;
        debug!(configuration, kwp, "raw forecast response: {}", payload);

        let response = match parse_estimate(&payload) {
            Ok(response) => response,
            Err(e) => {
                logging::log_fetch_failure(source, configuration, "parse forecast response", &e);
                return Ok(WattsByTimestamp::new());
            }
        };

        if let Some(limit) = response.message.as_ref().and_then(|m| m.ratelimit.as_ref()) {
            debug!(
                configuration,
                remaining = ?limit.remaining,
                limit = ?limit.limit,
                period = ?limit.period,
                "provider rate limit"
            );
        }

        let watts = watts_from_result(response.result)?;
        debug!(configuration, entries = watts.len(), "forecast data received");
        Ok(watts)
    }
}

// ============================================================================
// Tests
// ============================================================================
