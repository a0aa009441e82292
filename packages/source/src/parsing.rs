//! Cell coercion for the dashboard datasets.
//!
//! Every raw CSV cell is coerced into a [`Value`] according to its
//! [`ColumnKind`]. Empty cells are plain nulls; cells that are present but
//! cannot be parsed are reported as a [`CoercionFailure`] so the loader can
//! count them before substituting a null.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use van311_dataset_models::{ColumnKind, Value};

/// A non-empty cell that could not be parsed for its column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionFailure;

/// Parses a timestamp that carries an explicit UTC offset
/// (`2024-01-05T10:00:00-08:00`).
#[must_use]
pub fn parse_offset_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .ok()
}

/// Parses a timestamp without an offset in any of the layouts the
/// open-data exports use. Date-only values are midnight.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parses a calendar date (`YYYY-MM-DD`, `YYYY/MM/DD`, or `MM/DD/YYYY`).
/// A trailing time-of-day component is accepted and discarded.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    // Date followed by a time component we don't care about.
    let (date, _) = s.split_once(['T', ' '])?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Parses a `YYYY-MM` month label and returns it normalised with a
/// zero-padded month. Full dates are truncated to their month.
#[must_use]
pub fn parse_year_month(s: &str) -> Option<String> {
    if let Some((year, month)) = s.split_once('-')
        && year.len() == 4
        && !month.contains('-')
        && let (Ok(year), Ok(month)) = (year.parse::<i32>(), month.parse::<u32>())
        && (1..=12).contains(&month)
    {
        return Some(format!("{year:04}-{month:02}"));
    }
    parse_date(s).map(|d| d.format("%Y-%m").to_string())
}

/// Parses an integer, accepting integral floats such as `"42.0"` and
/// thousands separators such as `"1,024"`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn parse_integer(s: &str) -> Option<i64> {
    let cleaned = s.replace(',', "");
    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(i);
    }
    let f = cleaned.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        return Some(f as i64);
    }
    None
}

/// Parses a float, stripping a trailing percent sign.
#[must_use]
pub fn parse_float(s: &str) -> Option<f64> {
    let trimmed = s.strip_suffix('%').unwrap_or(s).trim();
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Coerces one raw cell into a [`Value`].
///
/// # Errors
///
/// Returns [`CoercionFailure`] if the cell is non-empty but cannot be
/// parsed as `kind`.
pub fn coerce_cell(kind: ColumnKind, raw: &str) -> Result<Value, CoercionFailure> {
    let s = raw.trim();
    if s.is_empty() {
        return Ok(Value::Null);
    }

    let value = match kind {
        ColumnKind::Text => Some(Value::Text(s.to_string())),
        ColumnKind::Integer => parse_integer(s).map(Value::Int),
        ColumnKind::Count => parse_integer(s).filter(|i| *i >= 0).map(Value::Int),
        ColumnKind::Float => parse_float(s).map(Value::Float),
        ColumnKind::Timestamp => parse_offset_timestamp(s)
            .map(Value::TimestampTz)
            .or_else(|| parse_timestamp(s).map(Value::Timestamp)),
        ColumnKind::Date => parse_date(s).map(Value::Date),
        ColumnKind::YearMonth => parse_year_month(s).map(Value::Text),
    };

    value.ok_or(CoercionFailure)
}
