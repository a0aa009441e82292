//! Config-driven dataset definition.
//!
//! [`DatasetDefinition`] captures everything the loader needs to know about
//! one of the dashboard's CSV inputs: its delimiter, the columns it must
//! carry, how each column is coerced, and the semantic role each column
//! plays. A single generic decoder writes all three datasets into `DuckDB`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use van311_dataset_models::{ColumnKind, ColumnRole, DatasetKind, Value};

use crate::SourceError;
use crate::parsing::{CoercionFailure, coerce_cell};
use crate::progress::ProgressCallback;
use crate::store;

/// Rows decoded between progress callback updates.
const PROGRESS_BATCH: u64 = 10_000;

/// A complete, config-driven dataset definition.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetDefinition {
    /// Which dataset this is.
    pub id: DatasetKind,
    /// Human-readable name (e.g. `"311 service requests"`).
    pub name: String,
    /// Single-character field delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Locator used when no configuration overrides it.
    pub default_locator: String,
    /// Columns that must be present in the header row.
    pub columns: Vec<ColumnDefinition>,
}

/// One expected column of a dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDefinition {
    /// Header text as it appears in the source file.
    pub name: String,
    /// How cells are coerced.
    pub kind: ColumnKind,
    /// Semantic role of the column.
    pub role: ColumnRole,
}

const fn default_delimiter() -> char {
    ','
}

impl DatasetDefinition {
    /// Returns the role → header name bindings of this dataset.
    #[must_use]
    pub fn bindings(&self) -> BTreeMap<ColumnRole, String> {
        self.columns
            .iter()
            .map(|c| (c.role, c.name.clone()))
            .collect()
    }

    /// Returns the delimiter as a byte for the `csv` reader.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if the delimiter is not ASCII.
    fn delimiter_byte(&self) -> Result<u8, SourceError> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| SourceError::Config {
                message: format!(
                    "{}: delimiter {:?} is not a single ASCII character",
                    self.name, self.delimiter
                ),
            })
    }

    /// Decodes delimited text into the `DuckDB` table `table`, with one
    /// column per [`ColumnDefinition`] in definition order. Returns the
    /// number of rows written.
    ///
    /// Columns the file carries beyond the definition are ignored. Cells
    /// that fail coercion, including cells that are not valid UTF-8, become
    /// nulls; the number of failures per column is logged once at `warn`
    /// level.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::SchemaMismatch`] if a defined column is
    /// missing from the header row, [`SourceError::Unparsable`] if the
    /// header row is not delimited text, or [`SourceError::Store`] if the
    /// rows cannot be written.
    pub fn decode(
        &self,
        conn: &duckdb::Connection,
        table: &str,
        locator: &str,
        bytes: &[u8],
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<u64, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter_byte()?)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| SourceError::Unparsable {
                locator: locator.to_string(),
                source: e,
            })?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut positions = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let Some(pos) = headers.iter().position(|h| *h == column.name) else {
                return Err(SourceError::SchemaMismatch {
                    locator: locator.to_string(),
                    column: column.name.clone(),
                });
            };
            positions.push(pos);
        }

        let store_err = |source: duckdb::Error| SourceError::Store {
            locator: locator.to_string(),
            source,
        };

        let schema: Vec<(String, ColumnKind)> = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.kind))
            .collect();
        store::create_table(conn, table, &schema).map_err(store_err)?;
        let mut writer =
            store::RowWriter::new(conn, table, self.columns.iter().map(|c| c.kind).collect())
                .map_err(store_err)?;

        let mut failures = vec![0_u64; self.columns.len()];
        let mut decoded: u64 = 0;

        for result in reader.byte_records() {
            let record = result.map_err(|e| SourceError::Unparsable {
                locator: locator.to_string(),
                source: e,
            })?;

            let row: Vec<Value> = self
                .columns
                .iter()
                .zip(&positions)
                .zip(failures.iter_mut())
                .map(|((column, pos), failed)| {
                    let raw = record.get(*pos).unwrap_or_default();
                    std::str::from_utf8(raw)
                        .map_err(|_| CoercionFailure)
                        .and_then(|text| coerce_cell(column.kind, text))
                        .unwrap_or_else(|_| {
                            *failed += 1;
                            Value::Null
                        })
                })
                .collect();

            writer.push(&row).map_err(store_err)?;

            decoded += 1;
            if decoded % PROGRESS_BATCH == 0 {
                progress.inc(PROGRESS_BATCH);
            }
        }
        writer.finish().map_err(store_err)?;
        progress.inc(decoded % PROGRESS_BATCH);

        for (column, failed) in self.columns.iter().zip(&failures) {
            if *failed > 0 {
                log::warn!(
                    "[{}] {failed} '{}' cells could not be parsed as {} and were set to null",
                    self.name,
                    column.name,
                    column.kind,
                );
            }
        }

        log::info!("[{}] decoded {decoded} rows from {locator}", self.name);

        Ok(decoded)
    }
}

/// Parses a [`DatasetDefinition`] from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or missing required fields.
pub fn parse_dataset_toml(toml_str: &str) -> Result<DatasetDefinition, String> {
    toml::from_str(toml_str).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::null_progress;

    const DEFINITION: &str = r#"
        id = "inquiry_volume"
        name = "Inquiry volume"
        delimiter = ";"
        default_locator = "data/inquiry.csv"

        [[columns]]
        name = "Year Month"
        kind = "year_month"
        role = "year_month"

        [[columns]]
        name = "Channel"
        kind = "text"
        role = "channel"

        [[columns]]
        name = "Number of Records"
        kind = "count"
        role = "record_count"
    "#;

    fn definition() -> DatasetDefinition {
        parse_dataset_toml(DEFINITION).unwrap()
    }

    fn decode(csv: &[u8]) -> Result<(duckdb::Connection, u64), SourceError> {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        let rows = definition().decode(&conn, "inquiries", "memory", csv, &null_progress())?;
        Ok((conn, rows))
    }

    fn stored(conn: &duckdb::Connection) -> Vec<Vec<Value>> {
        store::query_rows(
            conn,
            "SELECT \"Year Month\", \"Channel\", \"Number of Records\" \
             FROM inquiries ORDER BY \"__row\"",
            &[],
            3,
        )
        .unwrap()
    }

    #[test]
    fn parses_definition() {
        let def = definition();
        assert_eq!(def.id, DatasetKind::InquiryVolume);
        assert_eq!(def.delimiter, ';');
        let bindings = def.bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(
            bindings.get(&ColumnRole::Channel).map(String::as_str),
            Some("Channel")
        );
        assert!(!bindings.contains_key(&ColumnRole::Latitude));
    }

    #[test]
    fn decodes_rows_in_definition_order() {
        let csv = "Channel;Extra;Number of Records;Year Month\n\
                   Web;x;120;2023-01\n\
                   Phone;y;80;2023-2\n";
        let (conn, rows) = decode(csv.as_bytes()).unwrap();

        assert_eq!(rows, 2);
        assert_eq!(
            store::table_columns(&conn, "inquiries").unwrap(),
            ["__row", "Year Month", "Channel", "Number of Records"]
        );
        assert_eq!(
            stored(&conn)[1],
            vec![Value::from("2023-02"), Value::from("Phone"), Value::Int(80)]
        );
    }

    #[test]
    fn coerces_bad_cells_to_null() {
        let csv = "Year Month;Channel;Number of Records\n\
                   someday;Web;-5\n\
                   2023-03;Chat;\n";
        let (conn, rows) = decode(csv.as_bytes()).unwrap();

        assert_eq!(rows, 2);
        let stored = stored(&conn);
        let first = &stored[0];
        assert!(first[0].is_null());
        assert_eq!(first[1], Value::from("Web"));
        assert!(first[2].is_null());
    }

    #[test]
    fn non_utf8_cell_is_null_and_row_survives() {
        let mut csv = b"Year Month;Channel;Number of Records\n2023-01;Web;4\n2023-02;C".to_vec();
        csv.push(0xf4);
        csv.extend_from_slice(b"te;9\n");
        let (conn, rows) = decode(&csv).unwrap();

        assert_eq!(rows, 2);
        let stored = stored(&conn);
        assert_eq!(
            stored[0],
            vec![Value::from("2023-01"), Value::from("Web"), Value::Int(4)]
        );
        assert_eq!(
            stored[1],
            vec![Value::from("2023-02"), Value::Null, Value::Int(9)]
        );
    }

    #[test]
    fn missing_column_is_schema_mismatch() {
        let csv = "Year Month;Channel\n2023-01;Web\n";
        match decode(csv.as_bytes()) {
            Err(SourceError::SchemaMismatch { column, .. }) => {
                assert_eq!(column, "Number of Records");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a schema mismatch"),
        }
    }

    #[test]
    fn binary_header_is_unparsable() {
        let bytes = [0xff, 0xfe, b';', 0x00, b'\n', 0xc3, 0x28];
        assert!(matches!(
            decode(&bytes),
            Err(SourceError::Unparsable { .. })
        ));
    }

    #[test]
    fn strips_byte_order_mark() {
        let csv = "\u{feff}Year Month;Channel;Number of Records\n2023-01;Web;1\n";
        let (_conn, rows) = decode(csv.as_bytes()).unwrap();
        assert_eq!(rows, 1);
    }
}
