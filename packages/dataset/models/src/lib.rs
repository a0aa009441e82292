#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tabular value and dataset schema types for the 311 dashboard.
//!
//! Every dataset the dashboard reads (service requests, inquiry volume,
//! contact-centre metrics) is loaded into a `DuckDB` table whose columns
//! are described by [`ColumnKind`] and tagged with a [`ColumnRole`]. Cells
//! crossing the Rust side of that boundary are [`Value`]s.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};

/// Names of the columns added by the derivation stage.
pub mod columns {
    /// Calendar month of the open timestamp (1-12).
    pub const MONTH: &str = "month";
    /// Day of week of the open timestamp (0 = Monday ... 6 = Sunday).
    pub const WEEKDAY: &str = "weekday";
    /// Hour of day of the open timestamp (0-23).
    pub const HOUR: &str = "hour";
    /// Elapsed days between open and close timestamps.
    pub const COMPLETION_DAYS: &str = "completion_days";
    /// Calls handled as a percentage of calls offered.
    pub const HANDLED_PCT: &str = "handled_pct";
    /// Calls abandoned as a percentage of calls offered.
    pub const ABANDONED_PCT: &str = "abandoned_pct";
    /// `YYYY-MM` label of a date column.
    pub const YEAR_MONTH: &str = "year_month";

    /// Ingestion order of a row, used to break ties by first appearance.
    pub const ROW_ID: &str = "__row";

    /// Name of the UTC companion stored next to every timestamp column.
    ///
    /// The timestamp column itself holds local wall-clock time, which is
    /// what calendar derivations read. Elapsed-time derivations read the
    /// companion so that offset changes between two instants are honoured.
    #[must_use]
    pub fn utc(column: &str) -> String {
        format!("{column} (UTC)")
    }
}

/// The three datasets the dashboard is built from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DatasetKind {
    /// One row per reported 311 case.
    ServiceRequests,
    /// Monthly inquiry counts per contact channel.
    InquiryVolume,
    /// Daily contact-centre performance snapshots.
    ContactCentre,
}

impl DatasetKind {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::ServiceRequests, Self::InquiryVolume, Self::ContactCentre]
    }
}

/// How the raw text of a column is coerced into a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnKind {
    /// Free text, kept verbatim (trimmed).
    Text,
    /// Signed integer.
    Integer,
    /// Non-negative integer count. Negative values are coercion failures.
    Count,
    /// Floating point number.
    Float,
    /// Date and time of day. Date-only cells are taken as midnight.
    Timestamp,
    /// Calendar date. Any time-of-day component is discarded.
    Date,
    /// Calendar month, normalised to a `YYYY-MM` text label.
    YearMonth,
}

/// The semantic meaning of a source column.
///
/// Dataset definitions tag their columns with a role so that derivation
/// and aggregation can bind to columns by meaning rather than by the
/// header text of one particular export.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnRole {
    // ── Service requests ────────────────────────────────
    /// Request type a resident selected (e.g. "Pothole Repair").
    RequestType,
    /// Department-level grouping of request types.
    Category,
    /// How or why the case was closed.
    ClosureCategory,
    /// When the case was opened.
    OpenTimestamp,
    /// When the case was closed.
    CloseTimestamp,
    /// Named municipal neighbourhood.
    LocalArea,
    /// WGS84 latitude.
    Latitude,
    /// WGS84 longitude.
    Longitude,

    // ── Inquiry volume ──────────────────────────────────
    /// Calendar month of an inquiry count.
    YearMonth,
    /// Contact channel (web, chat, phone, ...).
    Channel,
    /// Number of inquiries.
    RecordCount,

    // ── Contact centre ──────────────────────────────────
    /// Day of a contact-centre snapshot.
    Date,
    /// Calls offered to agents.
    CallsOffered,
    /// Calls answered by agents.
    CallsHandled,
    /// Calls the caller hung up on before an answer.
    CallsAbandoned,
    /// Average seconds until answer.
    AverageSpeedOfAnswer,
    /// Percentage of calls answered within the target time.
    ServiceLevel,
}

/// A single table cell.
///
/// Values are totally ordered so they can be used as grouping keys and
/// sorted chronologically: `Null` sorts first, numbers compare numerically
/// across `Int`/`Float` (floats by [`f64::total_cmp`]), and other variants
/// compare within their own kind.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Missing or uncoercible cell.
    #[default]
    Null,
    /// Text cell.
    Text(String),
    /// Integer cell.
    Int(i64),
    /// Floating point cell. `NaN` is treated as null.
    Float(f64),
    /// Date and time cell without a known UTC offset.
    Timestamp(NaiveDateTime),
    /// Date and time cell that carried an explicit UTC offset.
    TimestampTz(DateTime<FixedOffset>),
    /// Date cell.
    Date(NaiveDate),
}

impl Value {
    /// Returns `true` for `Null` and for a `NaN` float.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Returns the text content, if this is a `Text` cell.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an `Int` cell.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric content of an `Int` or non-`NaN` `Float` cell.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    /// Returns the local wall-clock time of a timestamp cell.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::TimestampTz(ts) => Some(ts.naive_local()),
            _ => None,
        }
    }

    /// Returns the UTC instant of a timestamp cell. Timestamps without an
    /// offset are taken to already be in UTC.
    #[must_use]
    pub fn as_utc(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::TimestampTz(ts) => Some(ts.naive_utc()),
            _ => None,
        }
    }

    /// Returns the date content of a `Date` or timestamp cell.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::Timestamp(_) | Self::TimestampTz(_) => self.as_timestamp().map(|ts| ts.date()),
            _ => None,
        }
    }

    const fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::Text(_) => 2,
            Self::Date(_) => 3,
            Self::Timestamp(_) | Self::TimestampTz(_) => 4,
        }
    }
}

impl Ord for Value {
    #[allow(clippy::cast_precision_loss)]
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (
                Self::Timestamp(_) | Self::TimestampTz(_),
                Self::Timestamp(_) | Self::TimestampTz(_),
            ) => self.as_utc().cmp(&other.as_utc()),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(_) => serializer.serialize_none(),
            Self::Timestamp(ts) => {
                serializer.collect_str(&ts.format("%Y-%m-%dT%H:%M:%S"))
            }
            Self::TimestampTz(ts) => serializer.collect_str(&ts.to_rfc3339()),
            Self::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Text(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) if v.is_nan() => Ok(()),
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            Self::TimestampTz(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S %:z")),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::TimestampTz(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
