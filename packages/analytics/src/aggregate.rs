//! Grouping and reduction pushed down into `DuckDB`.
//!
//! A [`Selection`] names a table and the row predicates to apply to it;
//! [`group_by`] turns a selection plus key columns, metrics and an order
//! into one `GROUP BY` query and reads the result back as an
//! [`AggregateTable`].

use van311_analytics_models::{AggregateRow, AggregateTable, GroupOrder, MetricSpec, Reduction};
use van311_dataset_models::{Value, columns};
use van311_source::store::{self, quote_ident};

use crate::AnalyticsError;

/// Alias of the first-appearance ordinal of each group.
const FIRST_SEEN: &str = "__first";

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Equals { column: String, value: Value },
    AtLeast { column: String, bound: f64 },
}

impl Condition {
    fn column(&self) -> &str {
        match self {
            Self::Equals { column, .. } | Self::AtLeast { column, .. } => column,
        }
    }
}

/// The rows of one table that satisfy every added condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    table: String,
    conditions: Vec<Condition>,
}

impl Selection {
    /// Every row of `table`.
    #[must_use]
    pub fn all(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: Vec::new(),
        }
    }

    /// Keeps rows whose `column` equals `value`.
    #[must_use]
    pub fn equals(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Equals {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Keeps rows whose `column` is non-null and at least `bound`.
    #[must_use]
    pub fn at_least(mut self, column: &str, bound: f64) -> Self {
        self.conditions.push(Condition::AtLeast {
            column: column.to_string(),
            bound,
        });
        self
    }

    /// Table the selection reads from.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Builds the `WHERE` clause (empty when unconditional) and its
    /// parameters. `not_null` columns must additionally be non-null.
    fn where_clause(&self, not_null: &[&str]) -> (String, Vec<Value>) {
        let mut predicates = Vec::new();
        let mut params = Vec::new();

        for condition in &self.conditions {
            match condition {
                Condition::Equals { column, value } => {
                    predicates.push(format!("{} = ?", quote_ident(column)));
                    params.push(value.clone());
                }
                Condition::AtLeast { column, bound } => {
                    predicates.push(format!("{} >= ?", quote_ident(column)));
                    params.push(Value::Float(*bound));
                }
            }
        }
        predicates.extend(
            not_null
                .iter()
                .map(|column| format!("{} IS NOT NULL", quote_ident(column))),
        );

        if predicates.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", predicates.join(" AND ")), params)
        }
    }

    /// Fails with [`AnalyticsError::SchemaMismatch`] if the table or any
    /// referenced column does not exist.
    fn check_columns<'a>(
        &'a self,
        conn: &duckdb::Connection,
        referenced: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), AnalyticsError> {
        let existing = store::table_columns(conn, &self.table)?;
        if existing.is_empty() {
            return Err(AnalyticsError::SchemaMismatch {
                column: self.table.clone(),
            });
        }

        let conditions = self.conditions.iter().map(Condition::column);
        for column in referenced.into_iter().chain(conditions) {
            if !existing.iter().any(|c| c == column) {
                return Err(AnalyticsError::SchemaMismatch {
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn reduction_sql(reduction: &Reduction) -> String {
    match reduction {
        Reduction::Count => "COUNT(*)".to_string(),
        Reduction::Mean(column) => format!("AVG({})", quote_ident(column)),
        Reduction::Sum(column) => format!("SUM({})", quote_ident(column)),
    }
}

/// Groups the selected rows by `keys` and computes `metrics` per group.
///
/// Rows with a null in any key column are left out, so no group has a
/// null key and no group has zero rows. `limit` keeps only the first rows
/// after ordering.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if the table, a key column
/// or a metric column does not exist, or if a [`GroupOrder::MetricDesc`]
/// names a metric that is not computed.
pub fn group_by(
    conn: &duckdb::Connection,
    selection: &Selection,
    keys: &[&str],
    metrics: &[MetricSpec],
    order: &GroupOrder,
    limit: Option<usize>,
) -> Result<AggregateTable, AnalyticsError> {
    let metric_columns = metrics.iter().filter_map(|m| match &m.reduction {
        Reduction::Count => None,
        Reduction::Mean(column) | Reduction::Sum(column) => Some(column.as_str()),
    });
    selection.check_columns(conn, keys.iter().copied().chain(metric_columns))?;

    if let GroupOrder::MetricDesc(metric) = order
        && !metrics.iter().any(|m| m.name == *metric)
    {
        return Err(AnalyticsError::SchemaMismatch {
            column: metric.clone(),
        });
    }

    let quoted_keys: Vec<String> = keys.iter().map(|k| quote_ident(k)).collect();
    let mut select = quoted_keys.clone();
    select.extend(
        metrics
            .iter()
            .map(|m| format!("{} AS {}", reduction_sql(&m.reduction), quote_ident(&m.name))),
    );
    select.push(format!(
        "MIN({}) AS {}",
        quote_ident(columns::ROW_ID),
        quote_ident(FIRST_SEEN)
    ));

    let (where_clause, params) = selection.where_clause(keys);
    let mut sql = format!(
        "SELECT {} FROM {}{where_clause}",
        select.join(", "),
        quote_ident(selection.table())
    );
    if !quoted_keys.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", quoted_keys.join(", ")));
    }
    sql.push_str(" HAVING COUNT(*) > 0");

    let first_seen = quote_ident(FIRST_SEEN);
    let order_by = match order {
        GroupOrder::MetricDesc(metric) => {
            format!("{} DESC NULLS LAST, {first_seen}", quote_ident(metric))
        }
        GroupOrder::KeysAsc => quoted_keys
            .iter()
            .cloned()
            .chain(std::iter::once(first_seen))
            .collect::<Vec<_>>()
            .join(", "),
        GroupOrder::FirstSeen => first_seen,
    };
    sql.push_str(&format!(" ORDER BY {order_by}"));
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let rows = store::query_rows(conn, &sql, &params, keys.len() + metrics.len())?;

    let mut table = AggregateTable::new(
        String::new(),
        keys.iter().map(ToString::to_string).collect(),
        metrics.iter().map(|m| m.name.clone()).collect(),
    );
    table.rows = rows
        .into_iter()
        .map(|mut cells| {
            let metrics = cells.split_off(keys.len());
            AggregateRow {
                keys: cells,
                metrics,
            }
        })
        .collect();

    Ok(table)
}

/// Distinct non-null values of `column` among the selected rows, in
/// first-seen order.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if the column does not exist.
pub fn distinct_values(
    conn: &duckdb::Connection,
    selection: &Selection,
    column: &str,
) -> Result<Vec<Value>, AnalyticsError> {
    let grouped = group_by(conn, selection, &[column], &[], &GroupOrder::FirstSeen, None)?;
    Ok(grouped
        .rows
        .into_iter()
        .filter_map(|row| row.keys.into_iter().next())
        .collect())
}

/// Evaluates aggregate `expressions` over the selected rows and returns
/// the single result row, one value per expression. `referenced` lists
/// the columns the expressions read.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if the table or a
/// referenced column does not exist.
pub fn reduce(
    conn: &duckdb::Connection,
    selection: &Selection,
    expressions: &[String],
    referenced: &[&str],
) -> Result<Vec<Value>, AnalyticsError> {
    selection.check_columns(conn, referenced.iter().copied())?;

    let (where_clause, params) = selection.where_clause(&[]);
    let sql = format!(
        "SELECT {} FROM {}{where_clause}",
        expressions.join(", "),
        quote_ident(selection.table())
    );

    Ok(store::query_rows(conn, &sql, &params, expressions.len())?
        .into_iter()
        .next()
        .unwrap_or_else(|| vec![Value::Null; expressions.len()]))
}
