#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Derivation and aggregation pipeline for the 311 dashboard.
//!
//! [`DashboardState`] owns the `DuckDB` database holding the three ingested
//! datasets after derivation. Every aggregate is a read-only query over
//! that state, parameterised by a
//! [`DashboardFilters`](van311_analytics_models::DashboardFilters) value and
//! returns a freshly allocated
//! [`AggregateTable`](van311_analytics_models::AggregateTable).

pub mod aggregate;
pub mod derive;
pub mod summary;
pub mod tables;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use van311_dataset_models::{ColumnRole, DatasetKind};
use van311_source::config::SourceLocators;
use van311_source::progress::ProgressCallback;
use van311_source::store::{self, raw_table};
use van311_source::{SourceError, load_dataset, registry};

/// Errors that can occur during analytics operations.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// A column needed by a derivation or aggregation is absent.
    #[error("Missing column '{column}'")]
    SchemaMismatch {
        /// Name (or role) of the missing column.
        column: String,
    },

    /// The aggregation produced no rows.
    #[error("No data available for {table}")]
    NoData {
        /// Identifier of the requested table.
        table: String,
    },

    /// The requested table identifier is not known.
    #[error("Unknown table '{name}'")]
    UnknownTable {
        /// Identifier as requested.
        name: String,
    },

    /// A query against the dashboard database failed.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// A dataset failed to load.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Role to column-name bindings of one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnBindings(BTreeMap<ColumnRole, String>);

impl ColumnBindings {
    /// Returns the column bound to `role`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::SchemaMismatch`] if nothing is bound.
    pub fn column(&self, role: ColumnRole) -> Result<&str, AnalyticsError> {
        self.0
            .get(&role)
            .map(String::as_str)
            .ok_or_else(|| AnalyticsError::SchemaMismatch {
                column: role.to_string(),
            })
    }
}

impl From<BTreeMap<ColumnRole, String>> for ColumnBindings {
    fn from(map: BTreeMap<ColumnRole, String>) -> Self {
        Self(map)
    }
}

/// Ingested and derived datasets, held in one `DuckDB` connection.
///
/// Each dataset lives in two tables: `{kind}_raw` as decoded, and `{kind}`
/// with the derived columns added. Read-only once built.
#[derive(Debug)]
pub struct DashboardState {
    /// `duckdb::Connection` is `Send` but not `Sync`, so a `Mutex` is
    /// needed to share it between request handlers.
    conn: Mutex<duckdb::Connection>,
    /// Role bindings of the service-request columns.
    pub service_requests: ColumnBindings,
    /// Role bindings of the inquiry-volume columns.
    pub inquiry_volume: ColumnBindings,
    /// Role bindings of the contact-centre columns.
    pub contact_centre: ColumnBindings,
}

impl DashboardState {
    /// Runs derivation over the `{kind}_raw` tables of `conn`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::SchemaMismatch`] if a bound column is
    /// missing from its table.
    pub fn from_raw_tables(
        conn: duckdb::Connection,
        service_requests: ColumnBindings,
        inquiry_volume: ColumnBindings,
        contact_centre: ColumnBindings,
    ) -> Result<Self, AnalyticsError> {
        let requests = derive::derive_service_requests(
            &conn,
            &raw_table(DatasetKind::ServiceRequests),
            DatasetKind::ServiceRequests.as_ref(),
            &service_requests,
        )?;
        let inquiries = derive::materialize(
            &conn,
            &raw_table(DatasetKind::InquiryVolume),
            DatasetKind::InquiryVolume.as_ref(),
            &[],
        )?;
        let days = derive::derive_contact_centre(
            &conn,
            &raw_table(DatasetKind::ContactCentre),
            DatasetKind::ContactCentre.as_ref(),
            &contact_centre,
        )?;

        log::info!(
            "Dashboard state ready: {requests} service requests, {inquiries} inquiry rows, \
             {days} contact-centre days",
        );

        Ok(Self {
            conn: Mutex::new(conn),
            service_requests,
            inquiry_volume,
            contact_centre,
        })
    }

    /// Loads all three datasets concurrently into a fresh in-memory
    /// database and derives them.
    ///
    /// `progress` is called once per dataset to obtain the callback that
    /// receives that dataset's load progress.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Source`] if any dataset fails to load, or
    /// [`AnalyticsError::SchemaMismatch`] if derivation cannot find a
    /// bound column.
    pub async fn load(
        locators: &SourceLocators,
        progress: impl Fn(DatasetKind) -> Arc<dyn ProgressCallback>,
    ) -> Result<Self, AnalyticsError> {
        let requests_def = registry::definition(DatasetKind::ServiceRequests);
        let inquiry_def = registry::definition(DatasetKind::InquiryVolume);
        let contact_def = registry::definition(DatasetKind::ContactCentre);

        let requests_locator = locators.resolve(DatasetKind::ServiceRequests);
        let inquiry_locator = locators.resolve(DatasetKind::InquiryVolume);
        let contact_locator = locators.resolve(DatasetKind::ContactCentre);

        let requests_table = raw_table(DatasetKind::ServiceRequests);
        let inquiry_table = raw_table(DatasetKind::InquiryVolume);
        let contact_table = raw_table(DatasetKind::ContactCentre);

        let conn = duckdb::Connection::open_in_memory()?;

        tokio::try_join!(
            load_dataset(
                &requests_def,
                &requests_locator,
                &conn,
                &requests_table,
                progress(DatasetKind::ServiceRequests)
            ),
            load_dataset(
                &inquiry_def,
                &inquiry_locator,
                &conn,
                &inquiry_table,
                progress(DatasetKind::InquiryVolume)
            ),
            load_dataset(
                &contact_def,
                &contact_locator,
                &conn,
                &contact_table,
                progress(DatasetKind::ContactCentre)
            ),
        )?;

        Self::from_raw_tables(
            conn,
            requests_def.bindings().into(),
            inquiry_def.bindings().into(),
            contact_def.bindings().into(),
        )
    }

    /// Locks the shared connection. A poisoned lock is recovered, since
    /// the tables are never written after construction.
    pub fn connection(&self) -> MutexGuard<'_, duckdb::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of rows in the derived table of a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Database`] if the table cannot be read.
    pub fn row_count(&self, kind: DatasetKind) -> Result<u64, AnalyticsError> {
        Ok(store::row_count(&self.connection(), kind.as_ref())?)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use van311_dataset_models::{DatasetKind, Value};
    use van311_source::progress::null_progress;
    use van311_source::registry;
    use van311_source::store::raw_table;

    use crate::DashboardState;

    pub const TYPE: &str = "Service request type";
    pub const CATEGORY: &str = "Category";
    pub const CLOSURE: &str = "Category_cr";
    pub const AREA: &str = "Local area";

    const REQUESTS_HEADER: &str = "Service request type,Category,Category_cr,\
        Service request open timestamp,Service request close date,Local area,Latitude,Longitude";

    /// Type, category, closure category, open, close, area.
    pub const SAMPLE_REQUESTS: &[&str] = &[
        "Pothole Repair,Maintenance,Service Provided,2024-01-05T10:00:00,2024-01-07T10:00:00,Kitsilano,,",
        "Pothole Repair,Maintenance,Service Provided,2024-01-08T14:30:00,2024-01-09T02:30:00,Downtown,,",
        "Garbage Pickup,Garbage,Alternate Service Required,2024-02-03T08:15:00,2024-02-02T08:15:00,Kitsilano,,",
        "Graffiti Removal,Maintenance,,,2024-03-01T00:00:00,Downtown,,",
        "Garbage Pickup,Garbage,Service Provided,2024-03-10T23:59:00,,Kitsilano,,",
    ];

    pub const INQUIRIES: &str = "Year Month;Channel;Number of Records\n\
        2023-02;Web;40\n\
        2023-01;Phone;100\n\
        2023-01;Web;30\n\
        2023-02;Phone;90\n";

    pub const CALLS: &str =
        "Date;CallsOffered;CallsHandled;CallsAbandoned;AverageSpeedofAnswer;ServiceLevel\n\
        2023-01-02;100;80;20;30.0;80.0\n\
        2023-01-03;0;0;0;0.0;0.0\n\
        2023-01-04;200;150;30;50.0;70.0\n\
        2023-02-01;50;45;5;20.0;90.0\n";

    pub fn text(s: &str) -> Value {
        Value::from(s)
    }

    /// Decodes the three CSV bodies with the embedded definitions and
    /// derives them.
    pub fn state_from_csv(requests: &str, inquiries: &str, calls: &str) -> DashboardState {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        for (kind, body) in [
            (DatasetKind::ServiceRequests, requests),
            (DatasetKind::InquiryVolume, inquiries),
            (DatasetKind::ContactCentre, calls),
        ] {
            registry::definition(kind)
                .decode(&conn, &raw_table(kind), "fixture", body.as_bytes(), &null_progress())
                .unwrap();
        }

        DashboardState::from_raw_tables(
            conn,
            registry::definition(DatasetKind::ServiceRequests).bindings().into(),
            registry::definition(DatasetKind::InquiryVolume).bindings().into(),
            registry::definition(DatasetKind::ContactCentre).bindings().into(),
        )
        .unwrap()
    }

    /// The fixture state with its service requests replaced by `rows`.
    pub fn state_with_requests(rows: &[&str]) -> DashboardState {
        let mut requests = REQUESTS_HEADER.to_string();
        for row in rows {
            requests.push('\n');
            requests.push_str(row);
        }
        requests.push('\n');
        state_from_csv(&requests, INQUIRIES, CALLS)
    }

    pub fn state() -> DashboardState {
        state_with_requests(SAMPLE_REQUESTS)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use van311_dataset_models::columns;
    use van311_source::progress::null_progress;

    use super::*;

    fn write_fixture(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("van311_analytics_{name}"));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_binding_is_schema_mismatch() {
        let err = ColumnBindings::default()
            .column(ColumnRole::Category)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::SchemaMismatch { column } if column == "category"));
    }

    #[test]
    fn from_raw_tables_derives_columns() {
        let state = fixtures::state();
        let conn = state.connection();
        let requests = store::table_columns(&conn, "service_requests").unwrap();
        assert!(requests.iter().any(|c| c == columns::MONTH));
        assert!(requests.iter().any(|c| c == columns::COMPLETION_DAYS));
        let calls = store::table_columns(&conn, "contact_centre").unwrap();
        assert!(calls.iter().any(|c| c == columns::HANDLED_PCT));
        assert!(calls.iter().any(|c| c == columns::YEAR_MONTH));
        drop(conn);

        assert_eq!(state.row_count(DatasetKind::ServiceRequests).unwrap(), 5);
        assert_eq!(state.row_count(DatasetKind::InquiryVolume).unwrap(), 4);
        assert_eq!(state.row_count(DatasetKind::ContactCentre).unwrap(), 4);
    }

    #[tokio::test]
    async fn load_reads_all_three_datasets() {
        let requests = write_fixture(
            "requests.csv",
            "Service request type,Category,Category_cr,Service request open timestamp,\
             Service request close date,Local area,Latitude,Longitude\n\
             Pothole Repair,Maintenance,Service Provided,2024-01-05T10:00:00-08:00,2024-01-07,Kitsilano,49.26,-123.16\n\
             Garbage Pickup,Garbage,,not a date,,Downtown,,\n",
        );
        let inquiry = write_fixture(
            "inquiry.csv",
            "Year Month;Channel;Number of Records\n2024-01;Web;12\n",
        );
        let contact = write_fixture(
            "contact.csv",
            "Date;CallsOffered;CallsHandled;CallsAbandoned;AverageSpeedofAnswer;ServiceLevel\n\
             2024-01-02;10;9;1;15.0;90.0\n",
        );

        let mut locators = SourceLocators::default();
        locators.set(DatasetKind::ServiceRequests, requests.display().to_string());
        locators.set(DatasetKind::InquiryVolume, inquiry.display().to_string());
        locators.set(DatasetKind::ContactCentre, contact.display().to_string());

        let state = DashboardState::load(&locators, |_| null_progress())
            .await
            .unwrap();

        assert_eq!(state.row_count(DatasetKind::ServiceRequests).unwrap(), 2);
        assert_eq!(state.row_count(DatasetKind::InquiryVolume).unwrap(), 1);
        assert_eq!(state.row_count(DatasetKind::ContactCentre).unwrap(), 1);

        let months = store::query_rows(
            &state.connection(),
            "SELECT month FROM service_requests ORDER BY \"__row\"",
            &[],
            1,
        )
        .unwrap();
        assert_eq!(months[0][0], van311_dataset_models::Value::Int(1));
        assert!(months[1][0].is_null());

        for path in [requests, inquiry, contact] {
            std::fs::remove_file(path).ok();
        }
    }

    #[tokio::test]
    async fn load_fails_when_a_source_is_missing() {
        let mut locators = SourceLocators::default();
        for kind in DatasetKind::all() {
            locators.set(
                *kind,
                std::env::temp_dir()
                    .join("van311_analytics_missing.csv")
                    .display()
                    .to_string(),
            );
        }
        let err = DashboardState::load(&locators, |_| null_progress())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::Source(SourceError::Unavailable { .. })
        ));
    }
}
