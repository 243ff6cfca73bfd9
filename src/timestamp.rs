//! Tolerant parsing of provider timestamps.
//!
//! forecast.solar answers `time=utc` queries with ISO 8601 strings carrying an
//! offset (`2024-05-01T06:00:00+00:00`), but older responses, simulated
//! payloads and hand-written test fixtures also use a bare `Z`/`z`
//! designator, a colon-less offset or a naive `YYYY-MM-DD HH:MM:SS` form.
//! Every string is tried against `KNOWN_LAYOUTS` in order and the first
//! match wins. Each layout accepts an optional fractional second
//! (`06:00:00.250`).

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::model::TimestampFormatError;

/// How a layout encodes the zone of the instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    /// Numeric offset handled by the pattern itself (`%z` / `%:z`).
    Offset,
    /// Trailing `Z` or `z` after the pattern.
    UtcDesignator,
    /// No zone at all; the instant is taken as UTC.
    Naive,
}

/// A textual timestamp layout the parser understands.
#[derive(Debug)]
pub struct TimestampLayout {
    pub name: &'static str,
    pub pattern: &'static str,
    zone: Zone,
}

/// Known layouts, in the order they are attempted.
pub static KNOWN_LAYOUTS: &[TimestampLayout] = &[
    TimestampLayout {
        name: "iso8601-offset-colon",
        pattern: "%Y-%m-%dT%H:%M:%S%.f%:z",
        zone: Zone::Offset,
    },
    TimestampLayout {
        name: "iso8601-offset",
        pattern: "%Y-%m-%dT%H:%M:%S%.f%z",
        zone: Zone::Offset,
    },
    TimestampLayout {
        name: "iso8601-utc-designator",
        pattern: "%Y-%m-%dT%H:%M:%S%.f",
        zone: Zone::UtcDesignator,
    },
    TimestampLayout {
        name: "naive-utc",
        pattern: "%Y-%m-%d %H:%M:%S%.f",
        zone: Zone::Naive,
    },
];

impl TimestampLayout {
    fn parse(&self, input: &str) -> Result<DateTime<Utc>, String> {
        match self.zone {
            Zone::Offset => DateTime::parse_from_str(input, self.pattern)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| e.to_string()),
            Zone::UtcDesignator => {
                let naive = input
                    .strip_suffix(['Z', 'z'])
                    .ok_or_else(|| "missing 'Z' zone designator".to_string())?;
                NaiveDateTime::parse_from_str(naive, self.pattern)
                    .map(|dt| dt.and_utc())
                    .map_err(|e| e.to_string())
            }
            Zone::Naive => NaiveDateTime::parse_from_str(input, self.pattern)
                .map(|dt| dt.and_utc())
                .map_err(|e| e.to_string()),
        }
    }

    /// Renders `instant` in this layout. Offsets are always rendered as UTC.
    pub fn format(&self, instant: &DateTime<Utc>) -> String {
        match self.zone {
            Zone::Offset | Zone::Naive => instant.format(self.pattern).to_string(),
            Zone::UtcDesignator => format!("{}Z", instant.format(self.pattern)),
        }
    }
}

/// Parses a provider timestamp into an absolute instant.
///
/// Leading and trailing whitespace is ignored. On failure the error names
/// every layout that was tried and carries the last parse error.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, TimestampFormatError> {
    let trimmed = input.trim();
    let mut attempted = Vec::with_capacity(KNOWN_LAYOUTS.len());
    let mut last_error = String::from("empty timestamp");

    for layout in KNOWN_LAYOUTS {
        attempted.push(layout.name);
        match layout.parse(trimmed) {
            Ok(instant) => return Ok(instant),
            Err(e) => last_error = e,
        }
    }

    Err(TimestampFormatError {
        input: input.to_string(),
        attempted,
        last_error,
    })
}

/// Renders `instant` in `layout`, e.g. to build fixtures or log lines in the
/// provider's own format.
pub fn format_timestamp(instant: &DateTime<Utc>, layout: &TimestampLayout) -> String {
    layout.format(instant)
}

/// Looks up a layout by name. Returns `None` if not found.
pub fn find_layout(name: &str) -> Option<&'static TimestampLayout> {
    KNOWN_LAYOUTS.iter().find(|l| l.name == name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn six_am_utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_every_layout_round_trips() {
        let instant = Utc.with_ymd_and_hms(2023, 11, 30, 17, 45, 12).unwrap();
        for layout in KNOWN_LAYOUTS {
            let text = layout.format(&instant);
            let parsed = parse_timestamp(&text)
                .unwrap_or_else(|e| panic!("layout '{}' failed on '{}': {}", layout.name, text, e));
            assert_eq!(parsed, instant, "layout '{}' rendered '{}'", layout.name, text);
        }
    }

    #[test]
    fn test_offset_is_honored() {
        let parsed = parse_timestamp("2024-05-01T08:00:00+02:00").expect("colon offset");
        assert_eq!(parsed, six_am_utc());

        let parsed = parse_timestamp("2024-05-01T01:00:00-0500").expect("colon-less offset");
        assert_eq!(parsed, six_am_utc());
    }

    #[test]
    fn test_upper_and_lower_case_utc_designator() {
        assert_eq!(parse_timestamp("2024-05-01T06:00:00Z").unwrap(), six_am_utc());
        assert_eq!(parse_timestamp("2024-05-01T06:00:00z").unwrap(), six_am_utc());
    }

    #[test]
    fn test_fractional_seconds_are_accepted() {
        assert_eq!(parse_timestamp("2024-05-01T06:00:00.000Z").unwrap(), six_am_utc());
        assert_eq!(parse_timestamp("2024-05-01T06:00:00.000+00:00").unwrap(), six_am_utc());
        assert_eq!(parse_timestamp("2024-05-01 06:00:00.000").unwrap(), six_am_utc());

        let parsed = parse_timestamp("2024-05-01T08:00:00.5+02:00").unwrap();
        assert_eq!(parsed, six_am_utc() + chrono::Duration::milliseconds(500));

        let parsed = parse_timestamp("2024-05-01T06:00:00.123456-0000").unwrap();
        assert_eq!(parsed, six_am_utc() + chrono::Duration::microseconds(123_456));
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        assert_eq!(parse_timestamp("2024-05-01 06:00:00").unwrap(), six_am_utc());
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        assert_eq!(parse_timestamp("  2024-05-01 06:00:00\n").unwrap(), six_am_utc());
    }

    #[test]
    fn test_unknown_layout_reports_all_attempts() {
        let err = parse_timestamp("01/05/2024 06:00").unwrap_err();
        assert_eq!(err.input, "01/05/2024 06:00");
        assert_eq!(err.attempted.len(), KNOWN_LAYOUTS.len());
        assert_eq!(err.attempted.first(), Some(&"iso8601-offset-colon"));
        assert_eq!(err.attempted.last(), Some(&"naive-utc"));
        assert!(!err.last_error.is_empty());
        let message = err.to_string();
        assert!(message.contains("naive-utc"), "message should list layouts: {}", message);
    }

    #[test]
    fn test_empty_string_is_rejected() {
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_format_timestamp_in_named_layouts() {
        let colon = find_layout("iso8601-offset-colon").unwrap();
        assert_eq!(format_timestamp(&six_am_utc(), colon), "2024-05-01T06:00:00+00:00");

        let zulu = find_layout("iso8601-utc-designator").unwrap();
        assert_eq!(format_timestamp(&six_am_utc(), zulu), "2024-05-01T06:00:00Z");
    }

    #[test]
    fn test_find_layout() {
        assert!(find_layout("naive-utc").is_some());
        assert!(find_layout("rfc2822").is_none());
    }
}
