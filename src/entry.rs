// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Model listing entries and parse human-readable sizes and dates.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

/// One entry extracted from a directory-listing document.
///
/// `name` carries a trailing `/` iff the entry is a directory. Entries are
/// plain values in document order; equality is value equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Entry name, `/`-suffixed for directories.
    pub name: String,
    /// Modification time when the listing carried one.
    pub modified: Option<NaiveDateTime>,
    /// Size in bytes when the listing carried one.
    pub size: Option<u64>,
    /// Free-form description column, if any.
    pub description: Option<String>,
}

impl FileEntry {
    /// Build an entry with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modified: None,
            size: None,
            description: None,
        }
    }

    /// True when the name marks this entry as a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// How a matched date/time literal is interpreted.
enum TimeFormat {
    /// Full date and time, parsed naively.
    Naive(&'static str),
    /// Date only; midnight is assumed.
    DateOnly(&'static str),
    /// RFC-2822-like with a named zone; normalized to UTC.
    Rfc2822,
    /// Numeric `±ZZZZ` offset; normalized to UTC.
    Offset(&'static str),
}

/// Anchored ISO-8601 pattern, shared with the table strategy's
/// `datetime` attribute probing.
pub(crate) static RE_ISO8601: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d+-\d+T\d+:\d{2}:\d{2}Z").expect("iso8601 regex"));

/// The recognized date/time shapes, tried in order; the first pattern that
/// structurally matches wins even when a later one would also match.
static DATETIME_FORMATS: LazyLock<Vec<(Regex, TimeFormat)>> = LazyLock::new(|| {
    fn row(pattern: &str, fmt: TimeFormat) -> (Regex, TimeFormat) {
        (Regex::new(pattern).expect("datetime regex"), fmt)
    }
    vec![
        row(
            r"^\d+-[A-S][a-y]{2}-\d{4} \d+:\d{2}:\d{2}",
            TimeFormat::Naive("%d-%b-%Y %H:%M:%S"),
        ),
        row(
            r"^\d+-[A-S][a-y]{2}-\d{4} \d+:\d{2}",
            TimeFormat::Naive("%d-%b-%Y %H:%M"),
        ),
        row(
            r"^\d{4}-\d+-\d+ \d+:\d{2}:\d{2}",
            TimeFormat::Naive("%Y-%m-%d %H:%M:%S"),
        ),
        row(
            r"^\d{4}-\d+-\d+T\d+:\d{2}:\d{2}Z",
            TimeFormat::Naive("%Y-%m-%dT%H:%M:%SZ"),
        ),
        row(
            r"^\d{4}-\d+-\d+ \d+:\d{2}",
            TimeFormat::Naive("%Y-%m-%d %H:%M"),
        ),
        row(
            r"^\d{4}-[A-S][a-y]{2}-\d+ \d+:\d{2}:\d{2}",
            TimeFormat::Naive("%Y-%b-%d %H:%M:%S"),
        ),
        row(
            r"^\d{4}-[A-S][a-y]{2}-\d+ \d+:\d{2}",
            TimeFormat::Naive("%Y-%b-%d %H:%M"),
        ),
        row(
            r"^[F-W][a-u]{2} [A-S][a-y]{2} +\d+ \d{2}:\d{2}:\d{2} \d{4}",
            TimeFormat::Naive("%a %b %d %H:%M:%S %Y"),
        ),
        row(
            r"^[F-W][a-u]{2}, \d+ [A-S][a-y]{2} \d{4} \d{2}:\d{2}:\d{2} .+",
            TimeFormat::Rfc2822,
        ),
        row(r"^\d{4}-\d+-\d+", TimeFormat::DateOnly("%Y-%m-%d")),
        row(
            r"^\d+/\d+/\d{4} \d{2}:\d{2}:\d{2} [+-]\d{4}",
            TimeFormat::Offset("%d/%m/%Y %H:%M:%S %z"),
        ),
        row(r"^\d{2} [A-S][a-y]{2} \d{4}", TimeFormat::DateOnly("%d %b %Y")),
    ]
});

/// Prefix pattern for a human-readable size column.
static RE_FILESIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:\d+(\.\d+)? ?[BKMGTPEZY]|\d+|-)").expect("size regex")
});

fn interpret(text: &str, fmt: &TimeFormat) -> Option<NaiveDateTime> {
    match fmt {
        TimeFormat::Naive(f) => NaiveDateTime::parse_from_str(text, f).ok(),
        TimeFormat::DateOnly(f) => NaiveDate::parse_from_str(text, f)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
        TimeFormat::Rfc2822 => DateTime::parse_from_rfc2822(text)
            .ok()
            .map(|dt| dt.naive_utc()),
        TimeFormat::Offset(f) => DateTime::parse_from_str(text, f)
            .ok()
            .map(|dt| dt.naive_utc()),
    }
}

/// Match a date/time literal at the start of `line`.
///
/// Returns the parsed value and the number of bytes consumed. The first
/// structurally matching pattern decides; if its literal then fails to
/// interpret, no later pattern is consulted.
#[must_use]
pub fn parse_datetime_prefix(line: &str) -> Option<(NaiveDateTime, usize)> {
    for (regex, fmt) in DATETIME_FORMATS.iter() {
        if let Some(found) = regex.find(line) {
            return interpret(found.as_str(), fmt).map(|dt| (dt, found.end()));
        }
    }
    None
}

/// Parse a whole date/time cell, ignoring trailing text after the match.
#[must_use]
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    parse_datetime_prefix(text).map(|(dt, _)| dt)
}

/// Match a size literal at the start of `line`; returns it and the bytes
/// consumed. `-` matches but stands for "no size".
#[must_use]
pub fn match_size_prefix(line: &str) -> Option<(&str, usize)> {
    RE_FILESIZE
        .find(line)
        .map(|found| (found.as_str(), found.end()))
}

/// Convert a human-readable size (`1M`, `2.5 G`, `1024`) into bytes.
///
/// Unit letters are binary multiples of 1024. `-` and empty input yield
/// `None`, as does anything unrecognized.
#[must_use]
pub fn human_to_bytes(text: &str) -> Option<u64> {
    if text.is_empty() || text == "-" {
        return None;
    }
    if let Ok(value) = text.parse::<u64>() {
        return Some(value);
    }
    if !text.is_ascii() {
        return None;
    }
    let (number, letter) = text.split_at(text.len() - 1);
    let exponent = "BKMGTPEZY".find(letter.trim().to_ascii_uppercase().as_str())? as u32;
    let number: f64 = number.trim().parse().ok()?;
    let multiplier = 1u128 << (10 * exponent);
    Some((number * multiplier as f64) as u64)
}

/// Render a byte count the way listing pages do (`3.5K`, `1.2M`, ...).
#[must_use]
pub fn format_size(num: u64) -> String {
    let mut value = num as f64;
    for unit in ["", "K", "M", "G", "T", "P", "E", "Z"] {
        if value < 1024.0 {
            return if unit.is_empty() {
                format!("{num}")
            } else {
                format!("{value:3.1}{unit}")
            };
        }
        value /= 1024.0;
    }
    format!("{value:.1}Y")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn human_to_bytes_handles_units() {
        assert_eq!(human_to_bytes("1M"), Some(1_048_576));
        assert_eq!(human_to_bytes("1G"), Some(1_073_741_824));
        assert_eq!(human_to_bytes("-"), None);
        assert_eq!(human_to_bytes("1024"), Some(1024));
        assert_eq!(human_to_bytes("2.5K"), Some(2560));
        assert_eq!(human_to_bytes("3 k"), Some(3072));
        assert_eq!(human_to_bytes(""), None);
        assert_eq!(human_to_bytes("junk"), None);
    }

    #[test]
    fn format_size_round_trips_common_cases() {
        assert_eq!(format_size(512), "512");
        assert_eq!(format_size(1024), "1.0K");
        assert_eq!(format_size(1_572_864), "1.5M");
    }

    fn parsed(text: &str) -> NaiveDateTime {
        parse_datetime(text).expect(text)
    }

    #[test]
    fn every_datetime_shape_parses() {
        let dt = parsed("01-Jan-2020 00:00:00");
        assert_eq!((dt.year(), dt.month(), dt.day()), (2020, 1, 1));
        let dt = parsed("02-Feb-2021 10:30");
        assert_eq!((dt.day(), dt.hour(), dt.minute()), (2, 10, 30));
        let dt = parsed("2020-01-02 03:04:05");
        assert_eq!((dt.month(), dt.second()), (1, 5));
        let dt = parsed("2020-01-02T03:04:05Z");
        assert_eq!((dt.hour(), dt.minute()), (3, 4));
        let dt = parsed("2020-01-02 03:04");
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (3, 4, 0));
        let dt = parsed("2020-Mar-04 05:06:07");
        assert_eq!((dt.month(), dt.day()), (3, 4));
        let dt = parsed("2020-Mar-04 05:06");
        assert_eq!((dt.hour(), dt.minute()), (5, 6));
        let dt = parsed("Wed Jan  1 12:00:00 2020");
        assert_eq!((dt.year(), dt.day(), dt.hour()), (2020, 1, 12));
        let dt = parsed("Wed, 01 Jan 2020 12:00:00 GMT");
        assert_eq!((dt.year(), dt.hour()), (2020, 12));
        let dt = parsed("2020-01-02");
        assert_eq!((dt.day(), dt.hour()), (2, 0));
        let dt = parsed("02/01/2020 12:00:00 +0200");
        assert_eq!((dt.day(), dt.month(), dt.hour()), (2, 1, 10));
        let dt = parsed("02 Jan 2020");
        assert_eq!((dt.year(), dt.day()), (2020, 2));
    }

    #[test]
    fn datetime_patterns_apply_in_listed_order() {
        // Matches both the full datetime and the date-only pattern; the
        // earlier, more specific one must win.
        let (dt, consumed) = parse_datetime_prefix("2020-01-02 03:04:05  rest").expect("prefix");
        assert_eq!(dt.second(), 5);
        assert_eq!(consumed, "2020-01-02 03:04:05".len());
        // Date-only input falls through to the date-only pattern.
        let (dt, consumed) = parse_datetime_prefix("2020-01-02  1.0K").expect("prefix");
        assert_eq!((dt.hour(), dt.minute()), (0, 0));
        assert_eq!(consumed, "2020-01-02".len());
    }

    #[test]
    fn size_prefix_consumes_units_and_dashes() {
        assert_eq!(match_size_prefix("1.0K  A file"), Some(("1.0K", 4)));
        assert_eq!(match_size_prefix("- "), Some(("-", 1)));
        assert_eq!(match_size_prefix("1024"), Some(("1024", 4)));
        assert_eq!(match_size_prefix("n/a"), None);
    }
}
