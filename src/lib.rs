//! Solar power forecast collector.
//!
//! Periodically queries forecast.solar for every configured panel
//! installation, sums the per-timestamp watt forecasts across installations
//! and writes the combined series to a time-series store.
//!
//! Modules, leaves first:
//! - `timestamp`: tolerant parsing of provider timestamps.
//! - `model`: shared types and error kinds.
//! - `config`: TOML + environment configuration.
//! - `registry`: the configured installations.
//! - `ingest`: forecast retrieval (live or simulated).
//! - `consolidate`: time-keyed summation across installations.
//! - `store`: persistence backends.
//! - `run`: one complete fetch/sum/persist pass.
//! - `logging`: subscriber setup and structured failure logging.

pub mod config;
pub mod consolidate;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod registry;
pub mod run;
pub mod store;
pub mod timestamp;
