//! Parser for CSV exports of the Windows Security event log.
//!
//! Typical source: `Get-WinEvent -LogName Security | Export-Csv`. Rows are
//! read as header-keyed maps. Only failed logons (event 4625) are relevant;
//! the key is the `Source Network Address:` inside the message text and the
//! timestamp comes from the `TimeCreated` column.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use crate::log_sources::{Normalized, Normalizer};
use crate::WatchResult;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

/// Event id of "An account failed to log on".
pub const FAILED_LOGON_EVENT_ID: &str = "4625";

/// One CSV row, column header -> cell.
pub type EventRow = HashMap<String, String>;

/// Tried in order against the cleaned creation time.
const TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

static RE_SOURCE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Source Network Address:\s+(\d+\.\d+\.\d+\.\d+)").expect("regex")
});

/// Trailing numeric UTC offset, e.g. "+00:00" or "-0500".
static RE_TRAILING_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[+-]\d{2}:?\d{2}$").expect("regex")
});

// ---------------------------------------------------------------------------
// SecurityEventNormalizer
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityEventNormalizer;

impl SecurityEventNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// True if the row is a failed logon. Matches an exact `Id` column or
    /// an `EventID` column containing the id.
    pub fn is_failed_logon(row: &EventRow) -> bool {
        if row.get("Id").map(|v| v.trim()) == Some(FAILED_LOGON_EVENT_ID) {
            return true;
        }
        row.get("EventID")
            .is_some_and(|v| v.contains(FAILED_LOGON_EVENT_ID))
    }

    pub fn normalize_row(&self, row: &EventRow) -> Normalized {
        if !Self::is_failed_logon(row) {
            return Normalized::discard();
        }

        let raw_time = field(row, "TimeCreated", "timecreated");
        let Some(timestamp) = parse_time_created(raw_time) else {
            return Normalized::discard();
        };

        let message = field(row, "Message", "message");
        let key = RE_SOURCE_ADDRESS
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        Normalized::failure(timestamp, key)
    }
}

impl Normalizer<EventRow> for SecurityEventNormalizer {
    fn normalize(&self, record: &EventRow) -> Normalized {
        self.normalize_row(record)
    }
}

/// First non-empty of two spellings of a column.
fn field<'a>(row: &'a EventRow, primary: &str, fallback: &str) -> &'a str {
    row.get(primary)
        .filter(|v| !v.is_empty())
        .or_else(|| row.get(fallback))
        .map(String::as_str)
        .unwrap_or("")
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

/// Parse a `TimeCreated` cell. ISO separators `T` become spaces, a `Z`
/// marker and anything after it is dropped, as is a trailing numeric offset.
/// The remaining wall-clock time is taken as UTC.
pub fn parse_time_created(raw: &str) -> Option<DateTime<Utc>> {
    let spaced = raw.trim().replace('T', " ");
    let cleaned = spaced.split('Z').next().unwrap_or("").trim_end();
    if cleaned.is_empty() {
        return None;
    }

    try_formats(cleaned).or_else(|| {
        let without_offset = RE_TRAILING_OFFSET.replace(cleaned, "");
        if without_offset.len() == cleaned.len() {
            None
        } else {
            try_formats(&without_offset)
        }
    })
}

fn try_formats(s: &str) -> Option<DateTime<Utc>> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Open a CSV export and stream its rows lazily.
///
/// Failing to open the file or read its header row is an error. Rows that
/// fail to parse later on are logged and skipped.
pub fn read_rows(path: &Path) -> WatchResult<impl Iterator<Item = EventRow>> {
    let file = std::fs::File::open(path)?;
    rows_from_reader(file)
}

/// Same as `read_rows` over any reader.
pub fn rows_from_reader<R: Read>(reader: R) -> WatchResult<impl Iterator<Item = EventRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();

    let rows = rdr
        .into_records()
        .enumerate()
        .filter_map(move |(idx, result)| match result {
            Ok(record) => Some(
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect::<EventRow>(),
            ),
            Err(e) => {
                log::debug!("Skipping malformed CSV row {}: {}", idx + 1, e);
                None
            }
        });
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(pairs: &[(&str, &str)]) -> EventRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    const MESSAGE: &str = "An account failed to log on.\n\nNetwork Information:\n\tWorkstation Name:\tWS01\n\tSource Network Address:\t203.0.113.7\n\tSource Port:\t50123";

    #[test]
    fn test_failed_logon_row() {
        let r = row(&[("Id", "4625"), ("TimeCreated", "2026-03-04 05:06:07"), ("Message", MESSAGE)]);
        let n = SecurityEventNormalizer::new().normalize_row(&r);
        assert_eq!(n.timestamp, Some(Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()));
        assert_eq!(n.key.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_other_event_ids_discarded() {
        let r = row(&[("Id", "4624"), ("TimeCreated", "2026-03-04 05:06:07"), ("Message", MESSAGE)]);
        assert!(SecurityEventNormalizer::new().normalize_row(&r).is_discard());
    }

    #[test]
    fn test_event_id_column_contains() {
        let r = row(&[("EventID", "Security-4625"), ("timecreated", "2026-03-04 05:06:07"), ("message", MESSAGE)]);
        let n = SecurityEventNormalizer::new().normalize_row(&r);
        assert!(!n.is_discard());
        assert_eq!(n.key.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_missing_address_still_counts() {
        let r = row(&[("Id", "4625"), ("TimeCreated", "2026-03-04 05:06:07"), ("Message", "Source Network Address:\t-")]);
        let n = SecurityEventNormalizer::new().normalize_row(&r);
        assert!(!n.is_discard());
        assert!(n.key.is_none());
    }

    #[test]
    fn test_unparseable_time_discarded() {
        let r = row(&[("Id", "4625"), ("TimeCreated", "yesterday"), ("Message", MESSAGE)]);
        assert!(SecurityEventNormalizer::new().normalize_row(&r).is_discard());
        let r = row(&[("Id", "4625"), ("Message", MESSAGE)]);
        assert!(SecurityEventNormalizer::new().normalize_row(&r).is_discard());
    }

    #[test]
    fn test_time_formats() {
        let base = Utc.with_ymd_and_hms(2026, 3, 4, 17, 6, 7).unwrap();
        assert_eq!(parse_time_created("2026-03-04 17:06:07"), Some(base));
        assert_eq!(parse_time_created("2026-03-04T17:06:07Z"), Some(base));
        assert_eq!(parse_time_created("03/04/2026 5:06:07 PM"), Some(base));
        assert_eq!(parse_time_created("2026-03-04 17:06:07+00:00"), Some(base));

        let frac = parse_time_created("2026-03-04T17:06:07.1234567Z").unwrap();
        assert_eq!(frac.timestamp(), base.timestamp());
        assert!(frac > base);
    }

    #[test]
    fn test_time_garbage() {
        assert_eq!(parse_time_created(""), None);
        assert_eq!(parse_time_created("Z"), None);
        assert_eq!(parse_time_created("13/45/2026 1:00:00 PM"), None);
    }

    #[test]
    fn test_rows_from_reader() {
        let csv_text = "Id,TimeCreated,Message\n\
                        4625,2026-03-04 05:06:07,\"Source Network Address:  10.9.8.7\"\n\
                        4624,2026-03-04 05:06:08,\"Source Network Address:  10.9.8.7\"\n";
        let rows: Vec<EventRow> = rows_from_reader(csv_text.as_bytes()).unwrap().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Id"], "4625");
        let n = SecurityEventNormalizer::new().normalize_row(&rows[0]);
        assert_eq!(n.key.as_deref(), Some("10.9.8.7"));
    }

    #[test]
    fn test_short_rows_are_tolerated() {
        let csv_text = "Id,TimeCreated,Message\n4625,2026-03-04 05:06:07\n";
        let rows: Vec<EventRow> = rows_from_reader(csv_text.as_bytes()).unwrap().collect();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains_key("Message"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = read_rows(Path::new("/definitely/not/here/events.csv"));
        assert!(result.is_err());
    }
}
