//! `DuckDB` storage for decoded datasets.
//!
//! Every dataset is written to its own table. Besides the defined columns,
//! each table carries a [`columns::ROW_ID`] ordinal (ingestion order) and,
//! next to every timestamp column, a [`columns::utc`] companion holding the
//! same instant in UTC.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use duckdb::types::{TimeUnit, Value as SqlValue};
use van311_dataset_models::{ColumnKind, DatasetKind, Value, columns};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Name of the table a dataset is decoded into before derivation.
#[must_use]
pub fn raw_table(kind: DatasetKind) -> String {
    format!("{kind}_raw")
}

/// Quotes an identifier for use in SQL.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `DuckDB` column type used to store a [`ColumnKind`].
#[must_use]
pub const fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text | ColumnKind::YearMonth => "VARCHAR",
        ColumnKind::Integer | ColumnKind::Count => "BIGINT",
        ColumnKind::Float => "DOUBLE",
        ColumnKind::Timestamp => "TIMESTAMP",
        ColumnKind::Date => "DATE",
    }
}

/// Creates (or replaces) a table holding the given columns plus the row
/// ordinal and the UTC companions of timestamp columns.
///
/// # Errors
///
/// Returns an error if the `CREATE TABLE` statement fails.
pub fn create_table(
    conn: &duckdb::Connection,
    table: &str,
    columns: &[(String, ColumnKind)],
) -> duckdb::Result<()> {
    let mut defs = vec![format!("{} BIGINT", quote_ident(columns::ROW_ID))];
    for (name, kind) in columns {
        defs.push(format!("{} {}", quote_ident(name), sql_type(*kind)));
        if *kind == ColumnKind::Timestamp {
            defs.push(format!("{} TIMESTAMP", quote_ident(&columns::utc(name))));
        }
    }

    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {} ({})",
        quote_ident(table),
        defs.join(", ")
    ))
}

/// Inserts rows into a table made by [`create_table`], inside a single
/// transaction.
pub struct RowWriter<'conn> {
    conn: &'conn duckdb::Connection,
    stmt: duckdb::Statement<'conn>,
    kinds: Vec<ColumnKind>,
    rows: i64,
}

impl<'conn> RowWriter<'conn> {
    /// Starts a transaction and prepares the insert statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started or the table
    /// does not exist.
    pub fn new(
        conn: &'conn duckdb::Connection,
        table: &str,
        kinds: Vec<ColumnKind>,
    ) -> duckdb::Result<Self> {
        let width = 1 + kinds
            .iter()
            .map(|k| if *k == ColumnKind::Timestamp { 2 } else { 1 })
            .sum::<usize>();
        let placeholders = vec!["?"; width].join(", ");

        conn.execute_batch("BEGIN TRANSACTION")?;
        let stmt = conn.prepare(&format!(
            "INSERT INTO {} VALUES ({placeholders})",
            quote_ident(table)
        ))?;

        Ok(Self {
            conn,
            stmt,
            kinds,
            rows: 0,
        })
    }

    /// Inserts one row. `cells` are given in column order, without the row
    /// ordinal or UTC companions.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn push(&mut self, cells: &[Value]) -> duckdb::Result<()> {
        let mut params = Vec::with_capacity(cells.len() + 2);
        params.push(SqlValue::BigInt(self.rows));
        for (kind, cell) in self.kinds.iter().zip(cells) {
            if *kind == ColumnKind::Timestamp {
                params.push(cell.as_timestamp().map_or(SqlValue::Null, timestamp_to_sql));
                params.push(cell.as_utc().map_or(SqlValue::Null, timestamp_to_sql));
            } else {
                params.push(to_sql(cell));
            }
        }

        self.stmt.execute(duckdb::params_from_iter(params))?;
        self.rows += 1;
        Ok(())
    }

    /// Commits the transaction and returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn finish(self) -> duckdb::Result<u64> {
        let Self { conn, stmt, rows, .. } = self;
        drop(stmt);
        conn.execute_batch("COMMIT")?;
        Ok(u64::try_from(rows).unwrap_or(0))
    }
}

fn timestamp_to_sql(ts: NaiveDateTime) -> SqlValue {
    SqlValue::Timestamp(TimeUnit::Microsecond, ts.and_utc().timestamp_micros())
}

/// Converts a cell into a `DuckDB` parameter value.
#[must_use]
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Int(i) => SqlValue::BigInt(*i),
        Value::Float(f) if f.is_nan() => SqlValue::Null,
        Value::Float(f) => SqlValue::Double(*f),
        Value::Timestamp(_) | Value::TimestampTz(_) => {
            value.as_timestamp().map_or(SqlValue::Null, timestamp_to_sql)
        }
        Value::Date(d) => SqlValue::Date32(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
    }
}

/// Converts a `DuckDB` result value into a cell. Types the dashboard never
/// stores come back as null.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Boolean(b) => Value::Int(i64::from(b)),
        SqlValue::TinyInt(i) => Value::Int(i64::from(i)),
        SqlValue::SmallInt(i) => Value::Int(i64::from(i)),
        SqlValue::Int(i) => Value::Int(i64::from(i)),
        SqlValue::BigInt(i) => Value::Int(i),
        SqlValue::HugeInt(i) => i64::try_from(i).map_or(Value::Float(i as f64), Value::Int),
        SqlValue::UTinyInt(i) => Value::Int(i64::from(i)),
        SqlValue::USmallInt(i) => Value::Int(i64::from(i)),
        SqlValue::UInt(i) => Value::Int(i64::from(i)),
        SqlValue::UBigInt(i) => i64::try_from(i).map_or(Value::Float(i as f64), Value::Int),
        SqlValue::Float(f) => Value::Float(f64::from(f)),
        SqlValue::Double(f) => Value::Float(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            DateTime::from_timestamp_micros(micros).map_or(Value::Null, |dt| {
                Value::Timestamp(dt.naive_utc())
            })
        }
        SqlValue::Date32(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map_or(Value::Null, Value::Date),
        _ => Value::Null,
    }
}

/// Runs a query and collects the first `width` columns of every result row.
///
/// # Errors
///
/// Returns an error if the query fails to prepare or execute.
pub fn query_rows(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[Value],
    width: usize,
) -> duckdb::Result<Vec<Vec<Value>>> {
    log::trace!("query_rows: {sql}");

    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(duckdb::params_from_iter(params.iter().map(to_sql)))?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(width);
        for idx in 0..width {
            cells.push(from_sql(row.get::<_, SqlValue>(idx)?));
        }
        out.push(cells);
    }

    Ok(out)
}

/// Column names of a table, in table order. Empty if the table does not
/// exist.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn table_columns(conn: &duckdb::Connection, table: &str) -> duckdb::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = ? ORDER BY ordinal_position",
    )?;
    let mut rows = stmt.query([table])?;
    let mut names = Vec::new();

    while let Some(row) = rows.next()? {
        names.push(row.get::<_, String>(0)?);
    }

    Ok(names)
}

/// Number of rows in a table.
///
/// # Errors
///
/// Returns an error if the table does not exist.
pub fn row_count(conn: &duckdb::Connection, table: &str) -> duckdb::Result<u64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> duckdb::Connection {
        duckdb::Connection::open_in_memory().unwrap()
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("Local area"), "\"Local area\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn timestamp_columns_get_utc_companion() {
        let conn = conn();
        create_table(
            &conn,
            "cases",
            &[
                ("Area".to_string(), ColumnKind::Text),
                ("Opened".to_string(), ColumnKind::Timestamp),
            ],
        )
        .unwrap();

        assert_eq!(
            table_columns(&conn, "cases").unwrap(),
            ["__row", "Area", "Opened", "Opened (UTC)"]
        );
        assert!(table_columns(&conn, "missing").unwrap().is_empty());
    }

    #[test]
    fn writes_and_reads_back_cells() {
        let conn = conn();
        let kinds = vec![
            ColumnKind::Text,
            ColumnKind::Count,
            ColumnKind::Float,
            ColumnKind::Timestamp,
            ColumnKind::Date,
        ];
        let columns: Vec<(String, ColumnKind)> = ["t", "n", "f", "ts", "d"]
            .iter()
            .zip(&kinds)
            .map(|(name, kind)| ((*name).to_string(), *kind))
            .collect();
        create_table(&conn, "cells", &columns).unwrap();

        let offset = DateTime::parse_from_rfc3339("2024-03-11T10:00:00-07:00").unwrap();
        let mut writer = RowWriter::new(&conn, "cells", kinds).unwrap();
        writer
            .push(&[
                Value::from("Kitsilano"),
                Value::Int(3),
                Value::Float(f64::NAN),
                Value::from(offset),
                Value::from(NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()),
            ])
            .unwrap();
        writer
            .push(&[Value::Null, Value::Null, Value::Float(1.5), Value::Null, Value::Null])
            .unwrap();
        assert_eq!(writer.finish().unwrap(), 2);
        assert_eq!(row_count(&conn, "cells").unwrap(), 2);

        let rows = query_rows(
            &conn,
            "SELECT * FROM cells ORDER BY \"__row\"",
            &[],
            7,
        )
        .unwrap();

        assert_eq!(rows[0][0], Value::Int(0));
        assert_eq!(rows[0][1], Value::from("Kitsilano"));
        assert_eq!(rows[0][2], Value::Int(3));
        assert!(rows[0][3].is_null());
        assert_eq!(rows[0][4].to_string(), "2024-03-11 10:00:00");
        assert_eq!(rows[0][5].to_string(), "2024-03-11 17:00:00");
        assert_eq!(rows[0][6], Value::from(NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()));
        assert_eq!(rows[1][3], Value::Float(1.5));
        assert!(rows[1][4].is_null());
        assert!(rows[1][5].is_null());
    }

    #[test]
    fn binds_parameters() {
        let conn = conn();
        let rows = query_rows(
            &conn,
            "SELECT CAST(? AS VARCHAR), CAST(? AS DOUBLE) * 2, SUM(x) FROM (VALUES (1), (2)) t(x)",
            &[Value::from("hi"), Value::Float(1.25)],
            3,
        )
        .unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::from("hi"), Value::Float(2.5), Value::Int(3)]]
        );
    }
}
