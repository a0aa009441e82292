#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the 311 dashboard server.
//!
//! Aggregate tables, filter options and summaries are serialized straight
//! from `van311_analytics_models`; this crate only adds the envelope types
//! of the HTTP API.

use std::str::FromStr as _;

use serde::{Deserialize, Serialize};
use van311_analytics_models::{DashboardFilters, TableName, TrendPeriod};
use van311_dataset_models::DatasetKind;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

/// One entry of the table catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTableInfo {
    /// Table identifier.
    pub name: TableName,
    /// Human-readable description.
    pub description: String,
    /// Dataset the table is computed from.
    pub dataset: DatasetKind,
}

impl From<TableName> for ApiTableInfo {
    fn from(name: TableName) -> Self {
        Self {
            name,
            description: name.description().to_string(),
            dataset: name.dataset(),
        }
    }
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Message shown to the user.
    pub error: String,
}

impl ApiError {
    /// Creates an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Query parameters accepted by the table and summary endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQueryParams {
    /// Exact category.
    pub category: Option<String>,
    /// Exact service request type.
    pub request_type: Option<String>,
    /// Exact local area.
    pub local_area: Option<String>,
    /// `month`, `weekday` or `hour`.
    pub period: Option<String>,
}

impl FilterQueryParams {
    /// Converts the query into dashboard filters. Blank values are treated
    /// as unset.
    ///
    /// # Errors
    ///
    /// Returns a message if `period` is not a known trend period.
    pub fn to_filters(&self) -> Result<DashboardFilters, String> {
        fn non_blank(value: Option<&String>) -> Option<String> {
            value
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        }

        let period = non_blank(self.period.as_ref())
            .map(|p| TrendPeriod::from_str(&p).map_err(|_| format!("Unknown period '{p}'")))
            .transpose()?;

        Ok(DashboardFilters {
            category: non_blank(self.category.as_ref()),
            request_type: non_blank(self.request_type.as_ref()),
            local_area: non_blank(self.local_area.as_ref()),
            period,
        })
    }
}
