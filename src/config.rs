//! Process configuration.
//!
//! Settings come from a TOML file. Any key can be overridden through the
//! environment using its upper-cased, underscore-separated form
//! (`[forecast.east] latitude` is overridden by `FORECAST_EAST_LATITUDE`),
//! which is also how `.env` files reach us. Overrides are written into the
//! document before it is deserialized, so the typed sections below never
//! see where a value came from.
//!
//! `Settings` is the merged document; `ConfigFile` its serde view; `AppConfig`
//! the validated service-wide switches.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::model::ConfigError;
use crate::registry::{CONFIGURATIONS_KEY, DEFAULT_CONFIGURATION, property_key};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "FORECAST_CONFIG";

/// Configuration file used when `FORECAST_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "forecast.toml";

pub const DEFAULT_BASE_URL: &str = "https://api.forecast.solar";

/// Service-wide keys that may be set from the environment even when the
/// file does not mention them.
const SERVICE_KEYS: &[&str] = &[
    "simulate.forecast",
    "write.to.influxdb",
    "forecast.interval",
    "forecast.configurations",
    "forecast.base.url",
    "forecast.request.timeout",
    "store.backend",
    "influx.url",
    "influx.token",
    "influx.org",
    "influx.bucket.id",
    "database.url",
    "log.level",
    "log.file",
];

/// Parameters every configuration carries, in key form.
pub const CONFIGURATION_PARAMETERS: &[&str] =
    &["latitude", "longitude", "declination", "azimuth", "kwp", "simulate"];

// ---------------------------------------------------------------------------
// Raw settings
// ---------------------------------------------------------------------------

/// The configuration document with environment overrides applied.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    table: toml::Table,
}

impl Settings {
    /// Loads the file named by `FORECAST_CONFIG` (or `forecast.toml`) and
    /// applies the process environment. A missing file is not an error;
    /// everything may come from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        let settings = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        Ok(settings.with_env(std::env::vars()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            table: toml::from_str(content)?,
        })
    }

    /// Applies environment overrides to every key already in the document,
    /// to the service-wide keys and to the parameters of every configured
    /// name. Override values are kept as strings.
    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: HashMap<String, String> = vars.into_iter().collect();

        let mut keys = BTreeSet::new();
        leaf_keys("", &self.table, &mut keys);
        keys.extend(SERVICE_KEYS.iter().map(|key| key.to_string()));
        self.apply_overrides(&keys, &env);

        // The name list may itself have been overridden above.
        let keys: BTreeSet<String> = self
            .configuration_names()
            .iter()
            .flat_map(|name| CONFIGURATION_PARAMETERS.iter().map(move |p| property_key(name, p)))
            .collect();
        self.apply_overrides(&keys, &env);
        self
    }

    /// Raw value at a dotted key.
    pub fn value(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let mut current = self.table.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Deserializes the document into its typed sections.
    pub fn sections(&self) -> Result<ConfigFile, ConfigError> {
        Ok(toml::Value::Table(self.table.clone()).try_into()?)
    }

    fn configuration_names(&self) -> Vec<String> {
        self.value(CONFIGURATIONS_KEY)
            .cloned()
            .and_then(|value| value.try_into::<NameList>().ok())
            .map(|names| names.names())
            .unwrap_or_else(|| vec![DEFAULT_CONFIGURATION.to_string()])
    }

    fn apply_overrides(&mut self, keys: &BTreeSet<String>, env: &HashMap<String, String>) {
        for key in keys {
            if let Some(value) = env.get(&env_key(key)) {
                set_value(&mut self.table, key, toml::Value::String(value.clone()));
            }
        }
    }
}

/// Environment variable name for a property key:
/// `forecast.east.kwp` -> `FORECAST_EAST_KWP`.
pub fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn leaf_keys(prefix: &str, table: &toml::Table, out: &mut BTreeSet<String>) {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(nested) => leaf_keys(&path, nested, out),
            _ => {
                out.insert(path);
            }
        }
    }
}

/// Writes `value` at a dotted key, creating intermediate tables. A scalar in
/// the way of the path is left alone.
fn set_value(table: &mut toml::Table, key: &str, value: toml::Value) {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(leaf) = parts.pop() else {
        return;
    };

    let mut current = table;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        match entry {
            toml::Value::Table(nested) => current = nested,
            _ => return,
        }
    }
    current.insert(leaf.to_string(), value);
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, ConfigError> {
    value.as_deref().ok_or_else(|| ConfigError::Missing {
        key: key.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Value shapes
// ---------------------------------------------------------------------------

/// A scalar that is used as text: numbers are accepted as written so that
/// `kwp = 9.8` and `FORECAST_KWP=9.8` mean the same thing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Flag(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::Text(s) => write!(f, "{}", s.trim()),
        }
    }
}

/// Configuration names, either as a TOML array or a comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    List(Vec<String>),
    Joined(String),
}

impl NameList {
    /// Trimmed names with empty items dropped.
    pub fn names(&self) -> Vec<String> {
        let items: Vec<&str> = match self {
            NameList::List(items) => items.iter().map(String::as_str).collect(),
            NameList::Joined(text) => text.split(',').collect(),
        };
        items
            .into_iter()
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Accepts a TOML boolean or a boolean-looking string from the environment.
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => parse_flag(&text).ok_or_else(|| {
            serde::de::Error::custom(format!("expected a boolean, found '{}'", text))
        }),
    }
}

// ---------------------------------------------------------------------------
// File sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub simulate: SimulateSection,
    #[serde(default)]
    pub write: WriteSection,
    #[serde(default)]
    pub forecast: ForecastSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub influx: InfluxSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulateSection {
    /// Substitute configured payloads for provider requests.
    #[serde(default, deserialize_with = "flexible_bool")]
    pub forecast: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriteSection {
    #[serde(default)]
    pub to: WriteTargets,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteTargets {
    /// Historical name; gates writes to whichever store is selected.
    #[serde(default = "default_write", deserialize_with = "flexible_bool")]
    pub influxdb: bool,
}

/// `[forecast]`: schedule and provider settings, the `default`
/// configuration's parameters, and one sub-table per other configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForecastSection {
    #[serde(default)]
    pub interval: Option<PropertyValue>,
    #[serde(default)]
    pub configurations: Option<NameList>,
    #[serde(default)]
    pub base: EndpointSection,
    #[serde(default)]
    pub request: RequestSection,
    #[serde(flatten)]
    pub default_configuration: ConfigurationSection,
    #[serde(flatten)]
    pub named: BTreeMap<String, ConfigurationSection>,
}

impl ForecastSection {
    /// Configured names; just `default` when the list is absent.
    pub fn configuration_names(&self) -> Vec<String> {
        self.configurations
            .as_ref()
            .map(NameList::names)
            .unwrap_or_else(|| vec![DEFAULT_CONFIGURATION.to_string()])
    }

    /// Parameters of configuration `name`, empty if none were given.
    pub fn configuration(&self, name: &str) -> Option<&ConfigurationSection> {
        if name == DEFAULT_CONFIGURATION {
            Some(&self.default_configuration)
        } else {
            self.named.get(name)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSection {
    #[serde(default = "default_base_url")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestSection {
    #[serde(default)]
    pub timeout: Option<PropertyValue>,
}

/// Parameters of one installation as written in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigurationSection {
    #[serde(default)]
    pub latitude: Option<PropertyValue>,
    #[serde(default)]
    pub longitude: Option<PropertyValue>,
    #[serde(default)]
    pub declination: Option<PropertyValue>,
    #[serde(default)]
    pub azimuth: Option<PropertyValue>,
    #[serde(default)]
    pub kwp: Option<PropertyValue>,
    /// Provider-format JSON used in simulation mode.
    #[serde(default)]
    pub simulate: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    #[serde(alias = "influx")]
    InfluxDb,
    #[serde(alias = "postgresql")]
    Postgres,
    /// Samples are only built and logged.
    #[serde(rename = "none", alias = "log")]
    LogOnly,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Clone, Default, Deserialize)]
pub struct InfluxSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub bucket: BucketSection,
}

impl fmt::Debug for InfluxSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxSection")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("org", &self.org)
            .field("bucket", &self.bucket.id)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BucketSection {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_write() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for WriteTargets {
    fn default() -> Self {
        Self {
            influxdb: default_write(),
        }
    }
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            url: default_base_url(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl ConfigFile {
    /// Cross-section rules that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let writing = self.write.to.influxdb;

        if writing && self.store.backend == StoreBackend::LogOnly {
            return Err(invalid(
                "store.backend",
                "none",
                "writes are enabled but no store backend is configured",
            ));
        }
        if writing && self.store.backend == StoreBackend::InfluxDb {
            if let Some(token) = self.influx.token.as_deref() {
                if token.trim().is_empty() || token == "change-me" {
                    return Err(invalid("influx.token", "<redacted>", "must be set to a real API token"));
                }
            }
        }
        Ok(())
    }

    fn store_settings(&self) -> Result<StoreSettings, ConfigError> {
        let writing = self.write.to.influxdb;
        match self.store.backend {
            StoreBackend::InfluxDb => {
                // Without writes there is nothing to connect to, so a missing
                // InfluxDB section is fine.
                if !writing && self.influx.url.is_none() {
                    return Ok(StoreSettings::LogOnly);
                }
                Ok(StoreSettings::InfluxDb(InfluxSettings {
                    url: required(&self.influx.url, "influx.url")?
                        .trim_end_matches('/')
                        .to_string(),
                    token: required(&self.influx.token, "influx.token")?.to_string(),
                    org: required(&self.influx.org, "influx.org")?.to_string(),
                    bucket: required(&self.influx.bucket.id, "influx.bucket.id")?.to_string(),
                }))
            }
            StoreBackend::Postgres => {
                if !writing && self.database.url.is_none() {
                    return Ok(StoreSettings::LogOnly);
                }
                Ok(StoreSettings::Postgres {
                    database_url: required(&self.database.url, "database.url")?.to_string(),
                })
            }
            StoreBackend::LogOnly => Ok(StoreSettings::LogOnly),
        }
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Parses an interval such as `15m`, `1h`, `30s`, `500ms`, `2d`, a bare
/// number of seconds, or an ISO 8601 duration like `PT1H30M`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }

    let duration = if let Some(iso) = text.strip_prefix("PT").or_else(|| text.strip_prefix("pt")) {
        parse_iso_duration(iso)?
    } else {
        let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("'{}' does not start with a number", text))?;
        match unit.trim() {
            "ms" => Duration::from_millis(amount),
            "" | "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(scale(amount, 60, text)?),
            "h" => Duration::from_secs(scale(amount, 3600, text)?),
            "d" => Duration::from_secs(scale(amount, 86_400, text)?),
            other => return Err(format!("unknown duration unit '{}'", other)),
        }
    };

    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

fn scale(amount: u64, seconds_per_unit: u64, text: &str) -> Result<u64, String> {
    amount
        .checked_mul(seconds_per_unit)
        .ok_or_else(|| format!("'{}' is too long", text))
}

fn parse_iso_duration(text: &str) -> Result<Duration, String> {
    let mut total = 0u64;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{}'", c))?;
        digits.clear();
        let seconds = match c.to_ascii_uppercase() {
            'H' => scale(amount, 3600, text)?,
            'M' => scale(amount, 60, text)?,
            'S' => amount,
            other => return Err(format!("unknown ISO 8601 designator '{}'", other)),
        };
        total = total
            .checked_add(seconds)
            .ok_or_else(|| format!("'PT{}' is too long", text))?;
    }
    if !digits.is_empty() {
        return Err("ISO 8601 duration is missing a designator".to_string());
    }
    Ok(Duration::from_secs(total))
}

fn duration_value(value: &PropertyValue, key: &str) -> Result<Duration, ConfigError> {
    let text = value.to_string();
    parse_duration(&text).map_err(|reason| invalid(key, &text, &reason))
}

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

/// Connection details for the InfluxDB v2 write API.
#[derive(Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl fmt::Debug for InfluxSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxSettings")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Where forecast samples are written.
#[derive(Debug, Clone)]
pub enum StoreSettings {
    InfluxDb(InfluxSettings),
    Postgres { database_url: String },
    /// Samples are only built and logged.
    LogOnly,
}

/// Service-wide switches, validated at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Substitute configured payloads for live provider requests.
    pub simulate: bool,
    /// Actually write samples; when false the store only builds them.
    pub write_to_store: bool,
    pub interval: Duration,
    /// The interval as configured, for log output.
    pub interval_text: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub store: StoreSettings,
    pub log_level: String,
    pub log_file: Option<String>,
}

impl AppConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Self::from_config_file(&settings.sections()?)
    }

    pub fn from_config_file(file: &ConfigFile) -> Result<Self, ConfigError> {
        file.validate()?;

        let interval_value = file.forecast.interval.as_ref().ok_or_else(|| ConfigError::Missing {
            key: "forecast.interval".to_string(),
        })?;
        let interval = duration_value(interval_value, "forecast.interval")?;
        let request_timeout = match &file.forecast.request.timeout {
            Some(value) => duration_value(value, "forecast.request.timeout")?,
            None => default_request_timeout(),
        };

        Ok(Self {
            simulate: file.simulate.forecast,
            write_to_store: file.write.to.influxdb,
            interval,
            interval_text: interval_value.to_string(),
            base_url: file.forecast.base.url.trim_end_matches('/').to_string(),
            request_timeout,
            store: file.store_settings()?,
            log_level: file.log.level.clone(),
            log_file: file.log.file.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
