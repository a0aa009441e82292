//! Headline numbers for the dashboard.

use van311_analytics_models::{DashboardFilters, DashboardSummary};
use van311_dataset_models::{ColumnRole, DatasetKind, Value, columns};
use van311_source::store::quote_ident;

use crate::aggregate::{Selection, reduce};
use crate::tables::request_selection;
use crate::{AnalyticsError, ColumnBindings, DashboardState};

fn count(value: &Value) -> u64 {
    value.as_i64().and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

/// Sums of the `roles` columns over a whole dataset; zero when empty.
fn totals(
    conn: &duckdb::Connection,
    kind: DatasetKind,
    bindings: &ColumnBindings,
    roles: &[ColumnRole],
) -> Result<Vec<i64>, AnalyticsError> {
    let columns = roles
        .iter()
        .map(|role| bindings.column(*role))
        .collect::<Result<Vec<_>, _>>()?;
    let sums: Vec<String> = columns
        .iter()
        .map(|c| format!("COALESCE(SUM({}), 0)", quote_ident(c)))
        .collect();

    Ok(reduce(conn, &Selection::all(kind.as_ref()), &sums, &columns)?
        .iter()
        .map(|v| v.as_i64().unwrap_or(0))
        .collect())
}

/// Summarises the (filtered) service requests plus the inquiry and call
/// totals.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if a bound column is absent.
pub fn summarize(
    state: &DashboardState,
    filters: &DashboardFilters,
) -> Result<DashboardSummary, AnalyticsError> {
    let requests = request_selection(state, filters)?;
    let open_column = state.service_requests.column(ColumnRole::OpenTimestamp)?;
    let open = quote_ident(open_column);
    let days = quote_ident(columns::COMPLETION_DAYS);
    let conn = state.connection();

    let headline = reduce(
        &conn,
        &requests,
        &[
            "COUNT(*)".to_string(),
            format!("COUNT({open})"),
            format!("COUNT(*) FILTER (WHERE {days} >= 0)"),
            format!("AVG({days}) FILTER (WHERE {days} >= 0)"),
            format!("MIN(CAST({open} AS DATE))"),
            format!("MAX(CAST({open} AS DATE))"),
        ],
        &[open_column, columns::COMPLETION_DAYS],
    )?;

    let inquiries = totals(
        &conn,
        DatasetKind::InquiryVolume,
        &state.inquiry_volume,
        &[ColumnRole::RecordCount],
    )?;
    let calls = totals(
        &conn,
        DatasetKind::ContactCentre,
        &state.contact_centre,
        &[
            ColumnRole::CallsOffered,
            ColumnRole::CallsHandled,
            ColumnRole::CallsAbandoned,
        ],
    )?;

    Ok(DashboardSummary {
        total_requests: count(&headline[0]),
        requests_with_open_timestamp: count(&headline[1]),
        completed_requests: count(&headline[2]),
        mean_completion_days: headline[3].as_f64(),
        first_opened: headline[4].as_date(),
        last_opened: headline[5].as_date(),
        total_inquiries: inquiries[0],
        total_calls_offered: calls[0],
        total_calls_handled: calls[1],
        total_calls_abandoned: calls[2],
    })
}
