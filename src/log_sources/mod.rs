//! Log source abstraction layer for authwatch.
//!
//! A log source has two halves: a reader that yields raw records lazily
//! (`tail::TailLines` for text logs, `security_csv::read_rows` for event
//! exports) and a `Normalizer` that turns one raw record into a
//! `Normalized` observation or a discard.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

pub mod security_csv;
pub mod syslog;
pub mod tail;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which adapter interprets the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Syslog-style auth log (`/var/log/auth.log`, `/var/log/secure`).
    Linux,
    /// CSV export of Windows Security events.
    Windows,
}

impl SourceMode {
    /// Label used in alert lines.
    pub fn label(&self) -> &'static str {
        match self {
            SourceMode::Linux => "LINUX",
            SourceMode::Windows => "WINDOWS",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Linux => write!(f, "linux"),
            SourceMode::Windows => write!(f, "windows"),
        }
    }
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(SourceMode::Linux),
            "windows" => Ok(SourceMode::Windows),
            other => Err(format!("unknown mode '{}' (expected linux or windows)", other)),
        }
    }
}

/// What a normalizer extracted from one raw record.
///
/// A record with no timestamp is a discard: irrelevant, or too malformed to
/// place in time. A record with a timestamp but no key still counts, under
/// the shared unknown key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Normalized {
    pub timestamp: Option<DateTime<Utc>>,
    pub key: Option<String>,
}

impl Normalized {
    /// The record is not an authentication failure or has no usable time.
    pub fn discard() -> Self {
        Self::default()
    }

    /// An authentication failure at `timestamp`, attributed to `key` if known.
    pub fn failure(timestamp: DateTime<Utc>, key: Option<String>) -> Self {
        Self {
            timestamp: Some(timestamp),
            key,
        }
    }

    pub fn is_discard(&self) -> bool {
        self.timestamp.is_none()
    }
}

/// Turns a raw record of type `R` into a normalized observation.
///
/// Implemented by the built-in adapters and by any `Fn(&R) -> Normalized`
/// closure, so tests and callers can plug in ad-hoc formats.
pub trait Normalizer<R: ?Sized> {
    fn normalize(&self, record: &R) -> Normalized;
}

impl<R: ?Sized, F> Normalizer<R> for F
where
    F: Fn(&R) -> Normalized,
{
    fn normalize(&self, record: &R) -> Normalized {
        self(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mode_parse_and_label() {
        assert_eq!("linux".parse::<SourceMode>().unwrap(), SourceMode::Linux);
        assert_eq!("WINDOWS".parse::<SourceMode>().unwrap(), SourceMode::Windows);
        assert!("bsd".parse::<SourceMode>().is_err());
        assert_eq!(SourceMode::Linux.label(), "LINUX");
        assert_eq!(SourceMode::Windows.to_string(), "windows");
    }

    #[test]
    fn test_closure_is_a_normalizer() {
        let ts = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let n = move |line: &str| {
            if line.starts_with("FAIL") {
                Normalized::failure(ts, line.split_whitespace().nth(1).map(str::to_string))
            } else {
                Normalized::discard()
            }
        };
        assert_eq!(n.normalize("FAIL 1.2.3.4").key.as_deref(), Some("1.2.3.4"));
        assert!(n.normalize("OK 1.2.3.4").is_discard());
        assert!(!n.normalize("FAIL").is_discard());
    }
}
