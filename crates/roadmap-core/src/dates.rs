//! Cell date normalisation into canonical `YYYY-MM-DD` strings.
//!
//! Every entry point returns an empty string when the input cannot be read as a
//! calendar date. Raw text is never passed through.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use regex::Regex;

use crate::CellValue;

pub const CANONICAL_FORMAT: &str = "%Y-%m-%d";

/// Largest serial the spreadsheet epoch maps inside 9999-12-31.
const MAX_SERIAL: f64 = 2_958_465.0;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const TEXT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const TEXT_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"];

fn day_mon_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})-([A-Za-z]{3})-(\d{4})$").expect("day-mon-year pattern compiles")
    })
}

/// Spreadsheet serial epoch. Day 60 is the phantom 1900-02-29, so anchoring on
/// 1899-12-30 keeps every serial after February 1900 aligned with the sheet.
fn serial_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

#[derive(Debug, Clone, Copy)]
pub struct DateParser {
    reference_zone: FixedOffset,
}

impl Default for DateParser {
    fn default() -> Self {
        Self {
            reference_zone: Utc.fix(),
        }
    }
}

impl DateParser {
    /// Parser that renders date-times in the given fixed offset (seconds east of UTC).
    pub fn with_offset_seconds(offset_secs: i32) -> Self {
        match FixedOffset::east_opt(offset_secs) {
            Some(reference_zone) => Self { reference_zone },
            None => Self::default(),
        }
    }

    pub fn reference_zone(&self) -> FixedOffset {
        self.reference_zone
    }

    pub fn parse_cell(&self, cell: &CellValue) -> String {
        self.parse_cell_date(cell)
            .map(|d| d.format(CANONICAL_FORMAT).to_string())
            .unwrap_or_default()
    }

    pub fn parse_cell_date(&self, cell: &CellValue) -> Option<NaiveDate> {
        match cell {
            CellValue::Date(d) => Some(*d),
            CellValue::DateTime(dt) => Some(dt.with_timezone(&self.reference_zone).date_naive()),
            CellValue::Number(serial) => from_serial(*serial),
            CellValue::Text(text) => self.parse_text_date(text),
            CellValue::Empty | CellValue::Bool(_) => None,
        }
    }

    pub fn parse_text(&self, text: &str) -> String {
        self.parse_text_date(text)
            .map(|d| d.format(CANONICAL_FORMAT).to_string())
            .unwrap_or_default()
    }

    fn parse_text_date(&self, text: &str) -> Option<NaiveDate> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(caps) = day_mon_year_re().captures(text) {
            return from_day_mon_year(&caps[1], &caps[2], &caps[3]);
        }
        for fmt in TEXT_DATE_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
                return Some(d);
            }
        }
        for fmt in TEXT_DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
                return Some(dt.date());
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&self.reference_zone).date_naive());
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
            return Some(dt.with_timezone(&self.reference_zone).date_naive());
        }
        None
    }
}

/// Days since the spreadsheet epoch; any time-of-day fraction is dropped.
pub fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(0.0..=MAX_SERIAL).contains(&serial) {
        return None;
    }
    serial_epoch()?.checked_add_signed(Duration::days(serial.floor() as i64))
}

fn from_day_mon_year(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    let month = month.to_ascii_lowercase();
    let month_index = MONTHS.iter().position(|m| *m == month)? as u32 + 1;
    NaiveDate::from_ymd_opt(year.parse().ok()?, month_index, day.parse().ok()?)
}
