#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Dataset ingestion for the Vancouver 311 dashboard.
//!
//! Each of the three input CSVs is described by an embedded
//! [`DatasetDefinition`](dataset_def::DatasetDefinition). [`load_dataset`]
//! fetches the bytes behind a locator (local path or `http(s)` URL) and
//! decodes them into a `DuckDB` table with typed columns (see [`store`]).

pub mod config;
pub mod dataset_def;
pub mod parsing;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::dataset_def::DatasetDefinition;
use crate::progress::ProgressCallback;

/// Errors that can occur while loading a dataset.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The locator could not be read (missing file, network failure,
    /// non-success HTTP status).
    #[error("Source unavailable at {locator}: {message}")]
    Unavailable {
        /// Path or URL that was requested.
        locator: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The bytes are not delimited text.
    #[error("Failed to parse {locator}: {source}")]
    Unparsable {
        /// Path or URL that was read.
        locator: String,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// A required column is missing from the header row.
    #[error("{locator} is missing required column '{column}'")]
    SchemaMismatch {
        /// Path or URL that was read.
        locator: String,
        /// Name of the missing column.
        column: String,
    },

    /// Decoded rows could not be written to `DuckDB`.
    #[error("Failed to store {locator}: {source}")]
    Store {
        /// Path or URL that was read.
        locator: String,
        /// Underlying database error.
        #[source]
        source: duckdb::Error,
    },

    /// A dataset definition or configuration value is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },
}

/// Where a dataset's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Remote file fetched over HTTP(S).
    Url(String),
    /// Local file.
    Path(PathBuf),
}

impl SourceLocator {
    /// Classifies a locator string. Anything starting with `http://` or
    /// `https://` is a URL, everything else a filesystem path.
    #[must_use]
    pub fn parse(locator: &str) -> Self {
        let trimmed = locator.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Reads the raw bytes behind a locator.
///
/// # Errors
///
/// Returns [`SourceError::Unavailable`] if the file cannot be read or the
/// download fails after retries.
pub async fn fetch_bytes(locator: &SourceLocator) -> Result<Vec<u8>, SourceError> {
    match locator {
        SourceLocator::Path(path) => {
            tokio::fs::read(path)
                .await
                .map_err(|e| SourceError::Unavailable {
                    locator: locator.to_string(),
                    message: e.to_string(),
                })
        }
        SourceLocator::Url(url) => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .connect_timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| SourceError::Unavailable {
                    locator: url.clone(),
                    message: e.to_string(),
                })?;
            retry::send_bytes(url, || client.get(url)).await
        }
    }
}

/// Fetches one dataset and decodes it into the `DuckDB` table `table`.
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`SourceError`] if the locator is unavailable, the content is
/// not delimited text, a required column is missing, or the rows cannot
/// be stored.
pub async fn load_dataset(
    definition: &DatasetDefinition,
    locator: &str,
    conn: &duckdb::Connection,
    table: &str,
    progress: Arc<dyn ProgressCallback>,
) -> Result<u64, SourceError> {
    let locator = SourceLocator::parse(locator);
    log::info!("Loading {} from {locator}", definition.name);
    progress.set_message(format!("{}: reading", definition.name));

    let bytes = fetch_bytes(&locator).await?;
    log::debug!("[{}] read {} bytes", definition.name, bytes.len());

    progress.set_message(format!("{}: decoding", definition.name));
    let rows = definition.decode(conn, table, &locator.to_string(), &bytes, &progress)?;

    progress.finish(format!("{}: {rows} rows", definition.name));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use van311_dataset_models::{DatasetKind, Value};

    use super::*;
    use crate::progress::null_progress;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("van311_source_{name}"));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn classifies_locators() {
        assert_eq!(
            SourceLocator::parse("https://opendata.vancouver.ca/x.csv"),
            SourceLocator::Url("https://opendata.vancouver.ca/x.csv".to_string())
        );
        assert_eq!(
            SourceLocator::parse("HTTP://example.org/a.csv"),
            SourceLocator::Url("HTTP://example.org/a.csv".to_string())
        );
        assert_eq!(
            SourceLocator::parse(" data/a.csv "),
            SourceLocator::Path(PathBuf::from("data/a.csv"))
        );
    }

    #[tokio::test]
    async fn loads_local_contact_centre_file() {
        let path = temp_file(
            "contact_centre.csv",
            "Date;CallsOffered;CallsHandled;CallsAbandoned;AverageSpeedofAnswer;ServiceLevel\n\
             2023-01-02;100;90;10;35.5;80.1\n\
             2023-01-03;0;0;0;;\n",
        );

        let definition = registry::definition(DatasetKind::ContactCentre);
        let conn = duckdb::Connection::open_in_memory().unwrap();
        let rows = load_dataset(
            &definition,
            &path.to_string_lossy(),
            &conn,
            "contact_centre_raw",
            null_progress(),
        )
        .await
        .unwrap();

        assert_eq!(rows, 2);
        let stored = store::query_rows(
            &conn,
            "SELECT \"CallsOffered\", \"AverageSpeedofAnswer\", \"Date\" \
             FROM contact_centre_raw ORDER BY \"__row\"",
            &[],
            3,
        )
        .unwrap();
        assert_eq!(stored[0][0], Value::Int(100));
        assert_eq!(stored[0][1], Value::Float(35.5));
        assert!(stored[0][2].as_date().is_some());
        assert!(stored[1][1].is_null());

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let definition = registry::definition(DatasetKind::InquiryVolume);
        let missing = std::env::temp_dir().join("van311_source_does_not_exist.csv");
        let conn = duckdb::Connection::open_in_memory().unwrap();
        let err = load_dataset(
            &definition,
            &missing.to_string_lossy(),
            &conn,
            "inquiry_volume_raw",
            null_progress(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn header_without_required_column_is_schema_mismatch() {
        let path = temp_file(
            "inquiry_missing.csv",
            "Year Month;Channel\n2023-01;Web\n",
        );
        let definition = registry::definition(DatasetKind::InquiryVolume);
        let conn = duckdb::Connection::open_in_memory().unwrap();
        let err = load_dataset(
            &definition,
            &path.to_string_lossy(),
            &conn,
            "inquiry_volume_raw",
            null_progress(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SourceError::SchemaMismatch { ref column, .. } if column == "Number of Records"
        ));
        std::fs::remove_file(path).ok();
    }
}
