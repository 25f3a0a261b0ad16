//! Parser for syslog-style auth logs (`/var/log/auth.log`, `/var/log/secure`).
//!
//! A line is an authentication failure when it contains one of the failure
//! markers. Its timestamp comes from the first three whitespace-separated
//! tokens, `Mon DD HH:MM:SS`, with the year supplied from outside since
//! syslog omits it. The key is the IPv4 address after `from` or `rhost=`.
//!
//! Design: substring check first, so a non-matching line costs almost
//! nothing. The regex only runs on failure lines.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use crate::log_sources::{Normalized, Normalizer};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Markers used when the configuration does not name any.
pub const DEFAULT_FAILURE_MARKERS: &[&str] = &["Failed password", "authentication failure"];

/// "... from 1.2.3.4 ..." (sshd) or "... rhost=1.2.3.4 ..." (pam_unix)
static RE_SOURCE_IP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:from|rhost=)\s*(\d+\.\d+\.\d+\.\d+)").expect("regex")
});

// ---------------------------------------------------------------------------
// SyslogNormalizer
// ---------------------------------------------------------------------------

pub struct SyslogNormalizer {
    markers: Vec<String>,
    year: i32,
}

impl SyslogNormalizer {
    /// Normalizer with the default markers, stamping timestamps with
    /// `year` or, if `None`, the current UTC year.
    pub fn new(year: Option<i32>) -> Self {
        Self::with_markers(
            DEFAULT_FAILURE_MARKERS.iter().map(|m| m.to_string()).collect(),
            year,
        )
    }

    /// Normalizer with custom failure markers. Empty markers are ignored.
    pub fn with_markers(markers: Vec<String>, year: Option<i32>) -> Self {
        Self {
            markers: markers.into_iter().filter(|m| !m.is_empty()).collect(),
            year: year.unwrap_or_else(|| Utc::now().year()),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// True if the line carries any failure marker.
    pub fn is_failure(&self, line: &str) -> bool {
        self.markers.iter().any(|m| line.contains(m.as_str()))
    }

    /// Normalize one log line.
    pub fn normalize_line(&self, line: &str) -> Normalized {
        if !self.is_failure(line) {
            return Normalized::discard();
        }

        let mut tokens = line.split_whitespace();
        let (Some(month), Some(day), Some(time)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Normalized::discard();
        };

        match parse_syslog_timestamp(self.year, month, day, time) {
            Some(timestamp) => Normalized::failure(timestamp, extract_source_ip(line)),
            None => Normalized::discard(),
        }
    }
}

impl Normalizer<str> for SyslogNormalizer {
    fn normalize(&self, record: &str) -> Normalized {
        self.normalize_line(record)
    }
}

impl Normalizer<String> for SyslogNormalizer {
    fn normalize(&self, record: &String) -> Normalized {
        self.normalize_line(record)
    }
}

fn extract_source_ip(line: &str) -> Option<String> {
    RE_SOURCE_IP
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

fn parse_syslog_timestamp(year: i32, month: &str, day: &str, time: &str) -> Option<DateTime<Utc>> {
    let month_num = match month {
        "Jan" => 1, "Feb" => 2, "Mar" => 3, "Apr" => 4,
        "May" => 5, "Jun" => 6, "Jul" => 7, "Aug" => 8,
        "Sep" => 9, "Oct" => 10, "Nov" => 11, "Dec" => 12,
        _ => return None,
    };
    let day_num: u32 = day.parse().ok()?;
    let naive = NaiveDateTime::new(
        NaiveDate::from_ymd_opt(year, month_num, day_num)?,
        NaiveTime::parse_from_str(time, "%H:%M:%S").ok()?,
    );
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn normalizer() -> SyslogNormalizer {
        SyslogNormalizer::new(Some(2026))
    }

    #[test]
    fn test_failed_password() {
        let line = "Jan  5 14:23:01 webserver sshd[12345]: Failed password for admin from 192.168.1.100 port 54321 ssh2";
        let n = normalizer().normalize_line(line);
        assert_eq!(n.timestamp, Some(Utc.with_ymd_and_hms(2026, 1, 5, 14, 23, 1).unwrap()));
        assert_eq!(n.key.as_deref(), Some("192.168.1.100"));
    }

    #[test]
    fn test_failed_password_invalid_user() {
        let line = "Feb 12 03:44:55 prod sshd[9999]: Failed password for invalid user oracle from 10.0.0.5 port 22222 ssh2";
        let n = normalizer().normalize_line(line);
        assert_eq!(n.key.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn test_pam_rhost() {
        let line = "Feb  5 14:00:00 server sshd[1234]: pam_unix(sshd:auth): authentication failure; logname= uid=0 euid=0 tty=ssh ruser= rhost=192.168.1.50  user=root";
        let n = normalizer().normalize_line(line);
        assert_eq!(n.key.as_deref(), Some("192.168.1.50"));
        assert_eq!(n.timestamp, Some(Utc.with_ymd_and_hms(2026, 2, 5, 14, 0, 0).unwrap()));
    }

    #[test]
    fn test_failure_without_address_has_no_key() {
        let line = "Mar  1 08:00:00 box sudo: pam_unix(sudo:auth): authentication failure; logname=bob uid=1000 euid=0 tty=/dev/pts/0 ruser=bob rhost=  user=bob";
        let n = normalizer().normalize_line(line);
        assert!(!n.is_discard());
        assert!(n.key.is_none());
    }

    #[test]
    fn test_non_failure_line_discarded() {
        let line = "Mar  1 08:00:00 bastion sshd[1111]: Accepted password for deploy from 172.16.0.50 port 60000 ssh2";
        assert!(normalizer().normalize_line(line).is_discard());
    }

    #[test]
    fn test_markers_are_case_sensitive() {
        let line = "Mar  1 08:00:00 bastion sshd[1111]: FAILED PASSWORD for deploy from 172.16.0.50 port 60000 ssh2";
        assert!(normalizer().normalize_line(line).is_discard());
    }

    #[test]
    fn test_bad_month_discarded() {
        let line = "Foo  1 08:00:00 bastion sshd[1111]: Failed password for root from 1.2.3.4 port 1 ssh2";
        assert!(normalizer().normalize_line(line).is_discard());
    }

    #[test]
    fn test_bad_time_or_day_discarded() {
        let n = normalizer();
        assert!(n.normalize_line("Jan 32 08:00:00 h sshd[1]: Failed password for x from 1.2.3.4").is_discard());
        assert!(n.normalize_line("Jan  3 25:00:00 h sshd[1]: Failed password for x from 1.2.3.4").is_discard());
        assert!(n.normalize_line("Failed password").is_discard());
        assert!(n.normalize_line("").is_discard());
    }

    #[test]
    fn test_feb_29_depends_on_year() {
        let line = "Feb 29 12:00:00 h sshd[1]: Failed password for x from 1.2.3.4 port 2 ssh2";
        assert!(SyslogNormalizer::new(Some(2025)).normalize_line(line).is_discard());
        assert!(!SyslogNormalizer::new(Some(2024)).normalize_line(line).is_discard());
    }

    #[test]
    fn test_custom_markers() {
        let n = SyslogNormalizer::with_markers(vec!["Invalid user".into(), String::new()], Some(2026));
        let line = "May 20 16:45:30 firewall sshd[3333]: Invalid user testuser from 203.0.113.50 port 12345";
        assert_eq!(n.normalize_line(line).key.as_deref(), Some("203.0.113.50"));
        let other = "May 20 16:45:31 firewall sshd[3333]: Failed password for root from 203.0.113.50 port 1 ssh2";
        assert!(n.normalize_line(other).is_discard());
    }

    #[test]
    fn test_default_year_is_current() {
        assert_eq!(SyslogNormalizer::new(None).year(), Utc::now().year());
    }

    #[test]
    fn test_trait_object_paths_agree() {
        let n = normalizer();
        let line = String::from("Jul  3 11:00:00 db sshd[5555]: Failed password for admin from 198.51.100.1 port 33333 ssh2");
        let via_str = Normalizer::<str>::normalize(&n, line.as_str());
        let via_string = Normalizer::<String>::normalize(&n, &line);
        assert_eq!(via_str, via_string);
    }
}
