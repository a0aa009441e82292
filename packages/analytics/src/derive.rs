//! Derived columns.
//!
//! A derivation reads a source table and materialises a new table holding
//! every source column plus the derived ones. Source columns that share a
//! name with a derived column are replaced rather than duplicated, so
//! running a derivation over its own output yields the same table.

use van311_dataset_models::{ColumnRole, columns};
use van311_source::store::{self, quote_ident};

use crate::{AnalyticsError, ColumnBindings};

/// Microseconds in one day.
const MICROS_PER_DAY: i64 = 86_400_000_000;

/// A column computed by a SQL expression over other columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedColumn {
    /// Output column name.
    pub name: &'static str,
    /// Expression producing the column.
    pub expr: String,
    /// Source columns the expression reads.
    pub inputs: Vec<String>,
}

impl DerivedColumn {
    fn new(name: &'static str, expr: String, inputs: &[&str]) -> Self {
        Self {
            name,
            expr,
            inputs: inputs.iter().map(ToString::to_string).collect(),
        }
    }
}

/// `month` (1-12), `weekday` (0 = Monday) and `hour` (0-23) of the local
/// wall-clock open time. Null when the open timestamp is null.
#[must_use]
pub fn calendar_columns(open_column: &str) -> Vec<DerivedColumn> {
    let open = quote_ident(open_column);
    vec![
        DerivedColumn::new(columns::MONTH, format!("month({open})"), &[open_column]),
        DerivedColumn::new(
            columns::WEEKDAY,
            format!("isodow({open}) - 1"),
            &[open_column],
        ),
        DerivedColumn::new(columns::HOUR, format!("hour({open})"), &[open_column]),
    ]
}

/// `completion_days`: elapsed seconds between the open and close instants
/// divided by 86400. Reads the UTC companions so that an offset change
/// between open and close is honoured. Null when either timestamp is null.
/// Negative values are kept; completion aggregates filter them out.
#[must_use]
pub fn completion_time_column(open_column: &str, close_column: &str) -> DerivedColumn {
    let open_utc = columns::utc(open_column);
    let close_utc = columns::utc(close_column);
    DerivedColumn::new(
        columns::COMPLETION_DAYS,
        format!(
            "CAST(epoch_us({}) - epoch_us({}) AS DOUBLE) / {MICROS_PER_DAY}",
            quote_ident(&close_utc),
            quote_ident(&open_utc),
        ),
        &[&open_utc, &close_utc],
    )
}

fn percentage_of(part: &str, whole: &str) -> String {
    format!(
        "CAST({} AS DOUBLE) * 100 / NULLIF({}, 0)",
        quote_ident(part),
        quote_ident(whole)
    )
}

/// `handled_pct` and `abandoned_pct` as percentages of calls offered. Both
/// are null when calls offered is zero or any operand is null.
#[must_use]
pub fn call_percentage_columns(offered: &str, handled: &str, abandoned: &str) -> Vec<DerivedColumn> {
    vec![
        DerivedColumn::new(
            columns::HANDLED_PCT,
            percentage_of(handled, offered),
            &[handled, offered],
        ),
        DerivedColumn::new(
            columns::ABANDONED_PCT,
            percentage_of(abandoned, offered),
            &[abandoned, offered],
        ),
    ]
}

/// `year_month`: the `YYYY-MM` label of a date column.
#[must_use]
pub fn year_month_column(date_column: &str) -> DerivedColumn {
    DerivedColumn::new(
        columns::YEAR_MONTH,
        format!("strftime({}, '%Y-%m')", quote_ident(date_column)),
        &[date_column],
    )
}

/// Creates (or replaces) `target` as every column of `source` plus
/// `derived`. Returns the number of rows.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if `source` does not exist or
/// lacks a column a derivation reads.
pub fn materialize(
    conn: &duckdb::Connection,
    source: &str,
    target: &str,
    derived: &[DerivedColumn],
) -> Result<u64, AnalyticsError> {
    let existing = store::table_columns(conn, source)?;
    if existing.is_empty() {
        return Err(AnalyticsError::SchemaMismatch {
            column: source.to_string(),
        });
    }
    for input in derived.iter().flat_map(|d| &d.inputs) {
        if !existing.contains(input) {
            return Err(AnalyticsError::SchemaMismatch {
                column: input.clone(),
            });
        }
    }

    let select: Vec<String> = existing
        .iter()
        .filter(|c| !derived.iter().any(|d| d.name == c.as_str()))
        .map(|c| quote_ident(c))
        .chain(
            derived
                .iter()
                .map(|d| format!("{} AS {}", d.expr, quote_ident(d.name))),
        )
        .collect();

    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {} AS SELECT {} FROM {} ORDER BY {}",
        quote_ident(target),
        select.join(", "),
        quote_ident(source),
        quote_ident(columns::ROW_ID),
    ))?;

    let rows = store::row_count(conn, target)?;
    log::debug!("Materialized {target} from {source}: {rows} rows");
    Ok(rows)
}

/// Calendar components plus completion time for the service-request table.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if the open or close
/// timestamp is unbound or absent.
pub fn derive_service_requests(
    conn: &duckdb::Connection,
    source: &str,
    target: &str,
    bindings: &ColumnBindings,
) -> Result<u64, AnalyticsError> {
    let open = bindings.column(ColumnRole::OpenTimestamp)?;
    let close = bindings.column(ColumnRole::CloseTimestamp)?;

    let mut derived = calendar_columns(open);
    derived.push(completion_time_column(open, close));
    materialize(conn, source, target, &derived)
}

/// Call percentages plus year-month label for the contact-centre table.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if a bound column is absent.
pub fn derive_contact_centre(
    conn: &duckdb::Connection,
    source: &str,
    target: &str,
    bindings: &ColumnBindings,
) -> Result<u64, AnalyticsError> {
    let mut derived = call_percentage_columns(
        bindings.column(ColumnRole::CallsOffered)?,
        bindings.column(ColumnRole::CallsHandled)?,
        bindings.column(ColumnRole::CallsAbandoned)?,
    );
    derived.push(year_month_column(bindings.column(ColumnRole::Date)?));
    materialize(conn, source, target, &derived)
}
