//! Forecast configuration registry.
//!
//! A "configuration" is one physical solar installation: a location, the
//! orientation of its panels and its installed peak power. The service sums
//! the forecasts of all configured installations, so this registry is the
//! single source of truth for which installations exist and how to query
//! forecast.solar for each of them.
//!
//! Property keys are scoped by name. The `default` configuration uses
//! unscoped keys (`forecast.latitude`), every other name is inserted after
//! the `forecast.` prefix (`forecast.east.latitude`).

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use crate::config::{ConfigurationSection, ForecastSection, PropertyValue, Settings};
use crate::model::{ConfigError, ForecastError};

/// Name of the configuration that uses unscoped keys.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// Property listing the configuration names.
pub const CONFIGURATIONS_KEY: &str = "forecast.configurations";

// ---------------------------------------------------------------------------
// Configuration record
// ---------------------------------------------------------------------------

/// Parameters of one installation, kept exactly as configured so that the
/// provider sees the same decimal text the operator wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastConfiguration {
    pub name: String,
    /// WGS84 latitude.
    pub latitude: String,
    /// WGS84 longitude.
    pub longitude: String,
    /// Panel tilt, 0 (horizontal) to 90 (vertical).
    pub declination: String,
    /// Panel direction, -180 (north) .. -90 (east) .. 0 (south) .. 90 (west).
    pub azimuth: String,
    /// Installed peak power in kWp.
    pub kwp: String,
    /// Provider-format JSON used instead of a request in simulation mode.
    pub simulated_response: Option<String>,
}

impl ForecastConfiguration {
    /// Provider path for this installation's estimate, in UTC.
    pub fn estimate_path(&self) -> String {
        format!(
            "/estimate/{}/{}/{}/{}/{}?time=utc",
            self.latitude, self.longitude, self.declination, self.azimuth, self.kwp
        )
    }
}

impl fmt::Display for ForecastConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] latitude: {}, longitude: {}, declination: {}, azimuth: {}, kwp: {}",
            self.name, self.latitude, self.longitude, self.declination, self.azimuth, self.kwp
        )
    }
}

/// Property key for `parameter` of configuration `name`.
pub fn property_key(name: &str, parameter: &str) -> String {
    if name == DEFAULT_CONFIGURATION {
        format!("forecast.{}", parameter)
    } else {
        format!("forecast.{}.{}", name, parameter)
    }
}

/// Property key holding the simulated payload of configuration `name`.
pub fn simulate_key(name: &str) -> String {
    property_key(name, "simulate")
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// All configured installations, immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationRegistry {
    configurations: BTreeMap<String, ForecastConfiguration>,
}

impl ConfigurationRegistry {
    /// Builds a registry from already validated records. Later records with
    /// a duplicate name replace earlier ones.
    pub fn new(configurations: impl IntoIterator<Item = ForecastConfiguration>) -> Self {
        Self {
            configurations: configurations
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        }
    }

    /// Reads every configuration listed under `forecast.configurations`
    /// (default: just `default`). All five parameters must be present for
    /// every name; the first missing one aborts startup.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Self::from_section(&settings.sections()?.forecast)
    }

    pub fn from_section(forecast: &ForecastSection) -> Result<Self, ConfigError> {
        let names = forecast.configuration_names();
        if names.is_empty() {
            return Err(ConfigError::Invalid {
                key: CONFIGURATIONS_KEY.to_string(),
                value: String::new(),
                reason: "at least one configuration name is required".to_string(),
            });
        }

        let unconfigured = ConfigurationSection::default();
        let mut configurations = BTreeMap::new();
        for name in names {
            let section = forecast.configuration(&name).unwrap_or(&unconfigured);
            let param = |parameter: &str, value: &Option<PropertyValue>| -> Result<String, ConfigError> {
                value
                    .as_ref()
                    .map(ToString::to_string)
                    .ok_or_else(|| ConfigError::Missing {
                        key: property_key(&name, parameter),
                    })
            };

            let configuration = ForecastConfiguration {
                latitude: param("latitude", &section.latitude)?,
                longitude: param("longitude", &section.longitude)?,
                declination: param("declination", &section.declination)?,
                azimuth: param("azimuth", &section.azimuth)?,
                kwp: param("kwp", &section.kwp)?,
                simulated_response: section.simulate.clone(),
                name: name.clone(),
            };

            info!(configuration = %name, "parsed configuration {}", configuration);
            configurations.insert(name, configuration);
        }

        Ok(Self { configurations })
    }

    /// Names of all registered configurations, each exactly once.
    pub fn names(&self) -> Vec<&str> {
        self.configurations.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    /// Looks up a configuration by name.
    pub fn get(&self, name: &str) -> Result<&ForecastConfiguration, ForecastError> {
        self.configurations
            .get(name)
            .ok_or_else(|| ForecastError::UnknownConfiguration(name.to_string()))
    }

    /// Provider query path: latitude, longitude, declination, azimuth, kWp.
    pub fn uri_for(&self, name: &str) -> Result<String, ForecastError> {
        self.get(name).map(ForecastConfiguration::estimate_path)
    }

    pub fn kwp_for(&self, name: &str) -> Result<&str, ForecastError> {
        self.get(name).map(|c| c.kwp.as_str())
    }

    /// The configured simulated payload. Absence is an error because it is
    /// only asked for in simulation mode.
    pub fn simulated_response_for(&self, name: &str) -> Result<&str, ForecastError> {
        self.get(name)?
            .simulated_response
            .as_deref()
            .ok_or_else(|| ForecastError::MissingSimulationData {
                configuration: name.to_string(),
                key: simulate_key(name),
            })
    }

    /// Names of configurations without a simulated payload. Logged at
    /// startup in simulation mode; their fetches still fail when run.
    pub fn missing_simulation_data(&self) -> Vec<&str> {
        let missing: Vec<&str> = self
            .configurations
            .values()
            .filter(|c| c.simulated_response.is_none())
            .map(|c| c.name.as_str())
            .collect();

        for name in &missing {
            warn!(
                configuration = %name,
                "simulation mode is active but '{}' is not set",
                simulate_key(name)
            );
        }
        missing
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
