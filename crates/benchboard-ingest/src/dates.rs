//! Spreadsheet date decoding.
//!
//! Cells arrive either as 1900-system serial numbers or as free text.
//! Both decode to a plain calendar date.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};
use serde_json::Value;

const TEXT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
];

const TEXT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Decodes a JSON cell value. Numbers are serials, strings are free text,
/// everything else is absent.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_excel_serial),
        Value::String(s) => parse_date_text(s),
        _ => None,
    }
}

/// Converts a 1900-system serial to a date. Fractional parts (time of day)
/// are dropped. Serial 60 is the phantom 1900-02-29 and maps to 1900-03-01.
pub fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let whole = serial.floor();
    if whole > u32::MAX as f64 {
        return None;
    }
    let days = whole as u64;
    match days {
        0..=59 => NaiveDate::from_ymd_opt(1899, 12, 31)?.checked_add_days(Days::new(days)),
        60 => NaiveDate::from_ymd_opt(1900, 3, 1),
        _ => NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(days)),
    }
}

/// Parses a free-text date. Numeric-looking strings are not treated as
/// serials.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for format in TEXT_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    TEXT_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}
