//! One forecast run: fetch every configuration, sum, persist.
//!
//! Configurations are fetched one after another and their mappings folded
//! into the run's combined mapping, which lives only as long as the run.
//! Each combined entry is then handed to the store on its own, so one failed
//! write never stops the others.

use chrono::Local;
use serde::Serialize;
use tracing::{debug, error, info, trace};

use crate::consolidate::consolidate;
use crate::ingest::forecast_solar::ForecastSource;
use crate::logging::{self, DataSource};
use crate::model::{ForecastError, WattsByTimestamp};
use crate::registry::ConfigurationRegistry;
use crate::store::ForecastStore;

/// Outcome counters of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Configurations fetched.
    pub configurations: usize,
    /// Entries in the combined mapping.
    pub entries: usize,
    pub persisted: usize,
    pub failed: usize,
}

/// Fetches and sums the forecasts of every registered configuration.
///
/// Stops at the first error the source reports; sources report only
/// failures that must abort the run.
pub fn collect_forecasts(
    registry: &ConfigurationRegistry,
    source: &dyn ForecastSource,
) -> Result<WattsByTimestamp, ForecastError> {
    let forecasts = registry
        .names()
        .into_iter()
        .map(|name| {
            let forecast = source.fetch(name)?;
            debug!(configuration = name, entries = forecast.len(), "fetched forecast");
            Ok(forecast)
        })
        .collect::<Result<Vec<_>, ForecastError>>()?;

    let combined = consolidate(&forecasts);
    trace!("combined forecast: {:?}", combined);
    Ok(combined)
}

/// Hands every combined entry to the store, isolating failures per entry.
pub fn persist_forecasts(
    combined: &WattsByTimestamp,
    store: &mut dyn ForecastStore,
    write_to_store: bool,
) -> (usize, usize) {
    let source = store.source();
    let mut persisted = 0;
    let mut failed = 0;

    for (time, &watt) in combined {
        match store.create_forecast_data(time, watt, write_to_store) {
            Ok(forecast) => {
                debug!("Forecast: {}", forecast);
                persisted += 1;
            }
            Err(e) => {
                logging::log_store_failure(source, time, watt, &e);
                failed += 1;
            }
        }
    }
    (persisted, failed)
}

/// Runs one complete pass. A fatal fetch error aborts the run before
/// anything is persisted.
pub fn run_once(
    registry: &ConfigurationRegistry,
    source: &dyn ForecastSource,
    store: &mut dyn ForecastStore,
    write_to_store: bool,
) -> Result<RunSummary, ForecastError> {
    let combined = collect_forecasts(registry, source)?;
    let (persisted, failed) = persist_forecasts(&combined, store, write_to_store);

    let summary = RunSummary {
        configurations: registry.len(),
        entries: combined.len(),
        persisted,
        failed,
    };
    logging::log_run_summary(store.source(), summary.entries, persisted, failed);
    Ok(summary)
}

/// Scheduled entry point. Logs the run header and any fatal error; never
/// fails, so one bad run cannot stop the schedule.
pub fn execute(
    registry: &ConfigurationRegistry,
    source: &dyn ForecastSource,
    store: &mut dyn ForecastStore,
    write_to_store: bool,
    simulate: bool,
    interval: &str,
) -> Option<RunSummary> {
    let execution_time = Local::now().format("%Y-%m-%d %H:%M:%S");
    let method = if simulate { "simulating" } else { "querying" };
    info!("[{}] {} forecast data, interval: {}", execution_time, method, interval);

    match run_once(registry, source, store, write_to_store) {
        Ok(summary) => Some(summary),
        Err(e) => {
            error!(source = %DataSource::System, "forecast run aborted: {}", e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Forecast, StoreError};
    use crate::registry::ForecastConfiguration;
    use std::collections::HashMap;

    fn configuration(name: &str) -> ForecastConfiguration {
        ForecastConfiguration {
            name: name.to_string(),
            latitude: "52.52".to_string(),
            longitude: "13.37".to_string(),
            declination: "30".to_string(),
            azimuth: "0".to_string(),
            kwp: "5".to_string(),
            simulated_response: None,
        }
    }

    fn registry(names: &[&str]) -> ConfigurationRegistry {
        ConfigurationRegistry::new(names.iter().map(|n| configuration(n)))
    }

    fn watts(entries: &[(&str, i32)]) -> WattsByTimestamp {
        entries.iter().map(|(t, w)| (t.to_string(), *w)).collect()
    }

    /// Returns a canned result per configuration.
    struct StubSource(HashMap<&'static str, Result<WattsByTimestamp, ForecastError>>);

    impl ForecastSource for StubSource {
        fn fetch(&self, configuration: &str) -> Result<WattsByTimestamp, ForecastError> {
            self.0
                .get(configuration)
                .cloned()
                .unwrap_or_else(|| Err(ForecastError::UnknownConfiguration(configuration.to_string())))
        }
    }

    /// Records every call; fails for timestamps listed in `fail_on`.
    #[derive(Default)]
    struct RecordingStore {
        calls: Vec<(String, i32, bool)>,
        fail_on: Vec<&'static str>,
    }

    impl ForecastStore for RecordingStore {
        fn backend(&self) -> &'static str {
            "recording"
        }

        fn source(&self) -> DataSource {
            DataSource::System
        }

        fn create_forecast_data(
            &mut self,
            time: &str,
            watt: i32,
            write_to_store: bool,
        ) -> Result<Forecast, StoreError> {
            self.calls.push((time.to_string(), watt, write_to_store));
            if self.fail_on.iter().any(|failing| *failing == time) {
                return Err(StoreError::Write {
                    backend: "recording",
                    cause: "disk full".to_string(),
                });
            }
            Ok(Forecast::from_provider(time, watt)?)
        }
    }

    const T1: &str = "2024-05-01T06:00:00+00:00";
    const T2: &str = "2024-05-01T07:00:00+00:00";

    #[test]
    fn test_two_configurations_are_summed_per_timestamp() {
        let source = StubSource(HashMap::from([
            ("a", Ok(watts(&[(T1, 100), (T2, 200)]))),
            ("b", Ok(watts(&[(T1, 50)]))),
        ]));
        let mut store = RecordingStore::default();

        let summary = run_once(&registry(&["a", "b"]), &source, &mut store, true).unwrap();

        let mut calls = store.calls.clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![(T1.to_string(), 150, true), (T2.to_string(), 200, true)]
        );
        assert_eq!(
            summary,
            RunSummary {
                configurations: 2,
                entries: 2,
                persisted: 2,
                failed: 0,
            }
        );
    }

    #[test]
    fn test_collect_forecasts_folds_every_configuration() {
        let a = watts(&[(T1, 100), (T2, 200)]);
        let b = watts(&[(T1, 50)]);
        let c = watts(&[(T2, 7)]);
        let source = StubSource(HashMap::from([
            ("a", Ok(a.clone())),
            ("b", Ok(b.clone())),
            ("c", Ok(c.clone())),
        ]));

        let combined = collect_forecasts(&registry(&["a", "b", "c"]), &source).unwrap();
        assert_eq!(combined, crate::consolidate::consolidate([&c, &a, &b]));
        assert_eq!(combined, watts(&[(T1, 150), (T2, 207)]));
    }

    #[test]
    fn test_empty_contribution_keeps_other_configurations() {
        // A source reports transport failures as an empty mapping.
        let source = StubSource(HashMap::from([
            ("a", Ok(WattsByTimestamp::new())),
            ("b", Ok(watts(&[(T1, 50)]))),
        ]));
        let mut store = RecordingStore::default();

        run_once(&registry(&["a", "b"]), &source, &mut store, true).unwrap();
        assert_eq!(store.calls, vec![(T1.to_string(), 50, true)]);
    }

    #[test]
    fn test_store_failure_does_not_stop_remaining_entries() {
        let source = StubSource(HashMap::from([("a", Ok(watts(&[(T1, 1), (T2, 2)])))]));
        let mut store = RecordingStore {
            fail_on: vec![T1],
            ..Default::default()
        };

        let summary = run_once(&registry(&["a"]), &source, &mut store, true).unwrap();
        assert_eq!(store.calls.len(), 2);
        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_unparseable_timestamp_fails_only_that_entry() {
        let source = StubSource(HashMap::from([("a", Ok(watts(&[("soon", 1), (T2, 2)])))]));
        let mut store = RecordingStore::default();

        let summary = run_once(&registry(&["a"]), &source, &mut store, true).unwrap();
        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_fatal_fetch_error_aborts_before_persisting() {
        let source = StubSource(HashMap::from([
            ("a", Ok(watts(&[(T1, 100)]))),
            (
                "b",
                Err(ForecastError::MissingSimulationData {
                    configuration: "b".to_string(),
                    key: "forecast.b.simulate".to_string(),
                }),
            ),
        ]));
        let mut store = RecordingStore::default();

        let result = run_once(&registry(&["a", "b"]), &source, &mut store, true);
        assert!(matches!(result, Err(ForecastError::MissingSimulationData { .. })));
        assert!(store.calls.is_empty());
    }

    #[test]
    fn test_write_flag_is_passed_through() {
        let source = StubSource(HashMap::from([("a", Ok(watts(&[(T1, 100)])))]));
        let mut store = RecordingStore::default();

        run_once(&registry(&["a"]), &source, &mut store, false).unwrap();
        assert_eq!(store.calls, vec![(T1.to_string(), 100, false)]);
    }

    #[test]
    fn test_execute_swallows_fatal_errors() {
        let source = StubSource(HashMap::new());
        let mut store = RecordingStore::default();

        let outcome = execute(&registry(&["a"]), &source, &mut store, true, false, "15m");
        assert!(outcome.is_none());
        assert!(store.calls.is_empty());
    }

    #[test]
    fn test_consecutive_runs_share_no_state() {
        let source = StubSource(HashMap::from([("a", Ok(watts(&[(T1, 100)])))]));
        let registry = registry(&["a"]);
        let mut store = RecordingStore::default();

        run_once(&registry, &source, &mut store, true).unwrap();
        run_once(&registry, &source, &mut store, true).unwrap();
        assert_eq!(
            store.calls,
            vec![(T1.to_string(), 100, true), (T1.to_string(), 100, true)]
        );
    }
}
