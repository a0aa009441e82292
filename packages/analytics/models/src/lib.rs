#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Output types of the aggregation pipeline.
//!
//! Defines the [`AggregateTable`] handed to the presentation layer, the
//! reductions and orderings used to build one, the catalogue of named
//! tables ([`TableName`]), and the filter and summary types the dashboard
//! exposes alongside them.

use chrono::NaiveDate;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};
use van311_dataset_models::{DatasetKind, Value, columns};

/// How a metric column is computed from the rows of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "column")]
pub enum Reduction {
    /// Number of rows in the group.
    Count,
    /// Arithmetic mean of the non-null cells of a column.
    Mean(String),
    /// Sum of the non-null cells of a column.
    Sum(String),
}

/// A named metric column of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    /// Output column name.
    pub name: String,
    /// Reduction producing the column.
    pub reduction: Reduction,
}

impl MetricSpec {
    /// A row count named `name`.
    #[must_use]
    pub fn count(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reduction: Reduction::Count,
        }
    }

    /// The mean of `column`, named `name`.
    #[must_use]
    pub fn mean(name: &str, column: &str) -> Self {
        Self {
            name: name.to_string(),
            reduction: Reduction::Mean(column.to_string()),
        }
    }

    /// The sum of `column`, named `name`.
    #[must_use]
    pub fn sum(name: &str, column: &str) -> Self {
        Self {
            name: name.to_string(),
            reduction: Reduction::Sum(column.to_string()),
        }
    }
}

/// Row order of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOrder {
    /// Descending by the named metric; ties keep first-occurrence order.
    MetricDesc(String),
    /// Ascending by key tuple (natural / chronological order).
    KeysAsc,
    /// Order in which each key tuple first appears in the input.
    FirstSeen,
}

/// One row of an [`AggregateTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRow {
    /// Key values, aligned with [`AggregateTable::key_columns`].
    pub keys: Vec<Value>,
    /// Metric values, aligned with [`AggregateTable::metric_columns`].
    pub metrics: Vec<Value>,
}

/// The result of a grouping and reduction step.
///
/// Serializes as `{ name, keyColumns, metricColumns, rows }` where each row
/// is an object keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateTable {
    /// Identifier of the table (a [`TableName`] for the named tables).
    pub name: String,
    /// Grouping key column names.
    pub key_columns: Vec<String>,
    /// Metric column names.
    pub metric_columns: Vec<String>,
    /// Rows in presentation order.
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new(name: String, key_columns: Vec<String>, metric_columns: Vec<String>) -> Self {
        Self {
            name,
            key_columns,
            metric_columns,
            rows: Vec::new(),
        }
    }

    /// Returns the table with its name replaced.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All column names: keys first, then metrics.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.key_columns
            .iter()
            .chain(&self.metric_columns)
            .map(String::as_str)
    }
}

struct RowObject<'a> {
    table: &'a AggregateTable,
    row: &'a AggregateRow,
}

impl Serialize for RowObject<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(
            self.table.key_columns.len() + self.table.metric_columns.len(),
        ))?;
        for (column, value) in self.table.key_columns.iter().zip(&self.row.keys) {
            map.serialize_entry(column, value)?;
        }
        for (column, value) in self.table.metric_columns.iter().zip(&self.row.metrics) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl Serialize for AggregateTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<RowObject<'_>> = self
            .rows
            .iter()
            .map(|row| RowObject { table: self, row })
            .collect();

        let mut state = serializer.serialize_struct("AggregateTable", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("keyColumns", &self.key_columns)?;
        state.serialize_field("metricColumns", &self.metric_columns)?;
        state.serialize_field("rows", &rows)?;
        state.end()
    }
}

/// Calendar component selected in the combined request-trend view.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum TrendPeriod {
    /// Month of year (1-12).
    Month,
    /// Day of week (0 = Monday).
    Weekday,
    /// Hour of day (0-23).
    Hour,
}

impl TrendPeriod {
    /// All periods in display order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Month, Self::Weekday, Self::Hour]
    }

    /// The derived column holding this component.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Month => columns::MONTH,
            Self::Weekday => columns::WEEKDAY,
            Self::Hour => columns::HOUR,
        }
    }
}

/// Identifier of every aggregate the dashboard serves.
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
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TableName {
    /// Twenty most frequent (request type, category) pairs.
    #[strum(serialize = "top-20-request-types-by-category")]
    #[serde(rename = "top-20-request-types-by-category")]
    Top20RequestTypesByCategory,
    /// Twenty most frequent request types.
    #[strum(serialize = "top-20-request-types")]
    #[serde(rename = "top-20-request-types")]
    Top20RequestTypes,
    /// Requests per category.
    CategoryCounts,
    /// Requests per month of year.
    MonthlyTrend,
    /// Requests per day of week.
    WeekdayTrend,
    /// Requests per hour of day.
    HourlyTrend,
    /// Month, weekday and hour counts stacked in one table.
    RequestTrends,
    /// Requests per month, category and request type.
    TrendsByCategoryAndRequestType,
    /// Requests per closure category.
    ClosureCategoryBreakdown,
    /// Requests per local area.
    RequestsByLocalArea,
    /// Mean completion time per category.
    CompletionTimeByCategory,
    /// Mean completion time per local area.
    CompletionTimeByNeighborhood,
    /// Mean completion time per month opened.
    CompletionTimeByMonth,
    /// Inquiries per month.
    InquiryVolumeByMonth,
    /// Inquiries per channel.
    InquiryVolumeByChannel,
    /// Monthly contact-centre call totals and averages.
    ContactCentreMonthlyMetrics,
}

impl TableName {
    /// All named tables in catalogue order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Top20RequestTypesByCategory,
            Self::Top20RequestTypes,
            Self::CategoryCounts,
            Self::MonthlyTrend,
            Self::WeekdayTrend,
            Self::HourlyTrend,
            Self::RequestTrends,
            Self::TrendsByCategoryAndRequestType,
            Self::ClosureCategoryBreakdown,
            Self::RequestsByLocalArea,
            Self::CompletionTimeByCategory,
            Self::CompletionTimeByNeighborhood,
            Self::CompletionTimeByMonth,
            Self::InquiryVolumeByMonth,
            Self::InquiryVolumeByChannel,
            Self::ContactCentreMonthlyMetrics,
        ]
    }

    /// Short description shown in table listings.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Top20RequestTypesByCategory => {
                "Top 20 service request types with their category, by request count"
            }
            Self::Top20RequestTypes => "Top 20 service request types by request count",
            Self::CategoryCounts => "Service requests per category",
            Self::MonthlyTrend => "Service requests per month of year",
            Self::WeekdayTrend => "Service requests per day of week (0 = Monday)",
            Self::HourlyTrend => "Service requests per hour of day",
            Self::RequestTrends => "Monthly, weekday and hourly request counts in one table",
            Self::TrendsByCategoryAndRequestType => {
                "Service requests per month, category and request type"
            }
            Self::ClosureCategoryBreakdown => "Service requests per closure category",
            Self::RequestsByLocalArea => "Service requests per local area",
            Self::CompletionTimeByCategory => "Average completion time in days per category",
            Self::CompletionTimeByNeighborhood => {
                "Average completion time in days per local area"
            }
            Self::CompletionTimeByMonth => {
                "Average completion time in days per month the request was opened"
            }
            Self::InquiryVolumeByMonth => "Inquiries per month across all channels",
            Self::InquiryVolumeByChannel => "Inquiries per channel",
            Self::ContactCentreMonthlyMetrics => {
                "Monthly call totals, handled/abandoned percentages, answer speed and service level"
            }
        }
    }

    /// The dataset the table is computed from.
    #[must_use]
    pub const fn dataset(self) -> DatasetKind {
        match self {
            Self::InquiryVolumeByMonth | Self::InquiryVolumeByChannel => DatasetKind::InquiryVolume,
            Self::ContactCentreMonthlyMetrics => DatasetKind::ContactCentre,
            _ => DatasetKind::ServiceRequests,
        }
    }
}

/// Dashboard filter selections. Every field is optional; unset fields do
/// not filter.
///
/// `category`, `request_type` and `local_area` narrow the service-request
/// rows before aggregation. `period` selects one block of
/// [`TableName::RequestTrends`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardFilters {
    /// Exact category.
    pub category: Option<String>,
    /// Exact service request type.
    pub request_type: Option<String>,
    /// Exact local area.
    pub local_area: Option<String>,
    /// Calendar component for the combined trend table.
    pub period: Option<TrendPeriod>,
}

/// Option lists for the dashboard's filter dropdowns, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    /// Distinct categories.
    pub categories: Vec<String>,
    /// Distinct service request types.
    pub request_types: Vec<String>,
    /// Distinct local areas.
    pub local_areas: Vec<String>,
    /// Distinct inquiry channels.
    pub channels: Vec<String>,
    /// Trend periods accepted by the `period` filter.
    pub periods: Vec<TrendPeriod>,
}

/// Headline numbers for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    /// Service requests after filtering.
    pub total_requests: u64,
    /// Requests whose open timestamp parsed.
    pub requests_with_open_timestamp: u64,
    /// Requests with a non-negative completion time.
    pub completed_requests: u64,
    /// Mean completion time in days over completed requests.
    pub mean_completion_days: Option<f64>,
    /// Earliest open date.
    pub first_opened: Option<NaiveDate>,
    /// Latest open date.
    pub last_opened: Option<NaiveDate>,
    /// Inquiries across all months and channels.
    pub total_inquiries: i64,
    /// Calls offered across all days.
    pub total_calls_offered: i64,
    /// Calls handled across all days.
    pub total_calls_handled: i64,
    /// Calls abandoned across all days.
    pub total_calls_abandoned: i64,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn sample() -> AggregateTable {
        let mut table = AggregateTable::new(
            "sample".to_string(),
            vec!["type".to_string()],
            vec!["count".to_string()],
        );
        table.rows.push(AggregateRow {
            keys: vec![Value::from("Pothole Repair")],
            metrics: vec![Value::Int(2)],
        });
        table.rows.push(AggregateRow {
            keys: vec![Value::from("Garbage Pickup")],
            metrics: vec![Value::Int(1)],
        });
        table
    }

    #[test]
    fn serializes_rows_as_objects() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["keyColumns"], serde_json::json!(["type"]));
        assert_eq!(
            json["rows"][0],
            serde_json::json!({ "type": "Pothole Repair", "count": 2 })
        );
    }

    #[test]
    fn lists_key_columns_before_metrics() {
        let table = sample();
        assert_eq!(table.columns().collect::<Vec<_>>(), ["type", "count"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn table_names_round_trip_through_identifiers() {
        for name in TableName::all() {
            assert_eq!(TableName::from_str(name.as_ref()).unwrap(), *name);
        }
        assert_eq!(
            TableName::Top20RequestTypesByCategory.to_string(),
            "top-20-request-types-by-category"
        );
        assert_eq!(
            TableName::CompletionTimeByNeighborhood.to_string(),
            "completion-time-by-neighborhood"
        );
        assert!(TableName::from_str("no-such-table").is_err());
    }

    #[test]
    fn table_name_serde_matches_display() {
        for name in TableName::all() {
            let json = serde_json::to_value(name).unwrap();
            assert_eq!(json, serde_json::Value::String(name.to_string()));
        }
    }

    #[test]
    fn trend_period_parses_case_insensitively() {
        assert_eq!(TrendPeriod::from_str("weekday").unwrap(), TrendPeriod::Weekday);
        assert_eq!(TrendPeriod::from_str("Hour").unwrap(), TrendPeriod::Hour);
        assert_eq!(TrendPeriod::Month.to_string(), "Month");
        assert_eq!(TrendPeriod::Hour.column(), columns::HOUR);
    }

    #[test]
    fn filters_deserialize_from_camel_case() {
        let filters: DashboardFilters =
            serde_json::from_str(r#"{"requestType":"Pothole Repair","period":"month"}"#).unwrap();
        assert_eq!(filters.request_type.as_deref(), Some("Pothole Repair"));
        assert_eq!(filters.period, Some(TrendPeriod::Month));
        assert!(filters.category.is_none());
    }
}
