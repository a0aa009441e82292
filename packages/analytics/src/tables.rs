//! The named aggregate tables served to the dashboard.

use std::str::FromStr as _;

use van311_analytics_models::{
    AggregateRow, AggregateTable, DashboardFilters, FilterOptions, GroupOrder, MetricSpec,
    TableName, TrendPeriod,
};
use van311_dataset_models::{ColumnRole, DatasetKind, Value, columns};

use crate::aggregate::{Selection, distinct_values, group_by};
use crate::{AnalyticsError, DashboardState};

/// Rows kept by the top-N request type tables.
pub const TOP_N: usize = 20;

const COUNT: &str = "count";
const MEAN_COMPLETION_DAYS: &str = "mean_completion_days";
const RECORDS: &str = "records";

/// Looks up a table identifier.
///
/// # Errors
///
/// Returns [`AnalyticsError::UnknownTable`] if `name` is not a
/// [`TableName`].
pub fn parse_table_name(name: &str) -> Result<TableName, AnalyticsError> {
    TableName::from_str(name.trim()).map_err(|_| AnalyticsError::UnknownTable {
        name: name.to_string(),
    })
}

/// Service requests narrowed by the category, request type and local area
/// filters. The filters become query predicates; no rows are copied.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if a filtered column is
/// unbound.
pub fn request_selection(
    state: &DashboardState,
    filters: &DashboardFilters,
) -> Result<Selection, AnalyticsError> {
    let bindings = &state.service_requests;
    let mut selection = Selection::all(DatasetKind::ServiceRequests.as_ref());

    for (role, selected) in [
        (ColumnRole::Category, &filters.category),
        (ColumnRole::RequestType, &filters.request_type),
        (ColumnRole::LocalArea, &filters.local_area),
    ] {
        if let Some(selected) = selected {
            selection = selection.equals(bindings.column(role)?, selected.as_str());
        }
    }

    Ok(selection)
}

/// Narrows a selection to requests with a non-null, non-negative
/// completion time.
#[must_use]
pub fn completed(selection: Selection) -> Selection {
    selection.at_least(columns::COMPLETION_DAYS, 0.0)
}

fn count_desc(
    conn: &duckdb::Connection,
    selection: &Selection,
    keys: &[&str],
    limit: Option<usize>,
) -> Result<AggregateTable, AnalyticsError> {
    group_by(
        conn,
        selection,
        keys,
        &[MetricSpec::count(COUNT)],
        &GroupOrder::MetricDesc(COUNT.to_string()),
        limit,
    )
}

fn count_by_key(
    conn: &duckdb::Connection,
    selection: &Selection,
    keys: &[&str],
) -> Result<AggregateTable, AnalyticsError> {
    group_by(
        conn,
        selection,
        keys,
        &[MetricSpec::count(COUNT)],
        &GroupOrder::KeysAsc,
        None,
    )
}

fn completion_time(
    conn: &duckdb::Connection,
    selection: Selection,
    key: &str,
    order: &GroupOrder,
) -> Result<AggregateTable, AnalyticsError> {
    group_by(
        conn,
        &completed(selection),
        &[key],
        &[
            MetricSpec::mean(MEAN_COMPLETION_DAYS, columns::COMPLETION_DAYS),
            MetricSpec::count(COUNT),
        ],
        order,
        None,
    )
}

/// Month, weekday and hour counts stacked under a `metric` label column,
/// restricted to one block when `period` is set.
fn request_trends(
    conn: &duckdb::Connection,
    selection: &Selection,
    period: Option<TrendPeriod>,
) -> Result<AggregateTable, AnalyticsError> {
    let mut stacked = AggregateTable::new(
        String::new(),
        vec!["metric".to_string(), "value".to_string()],
        vec![COUNT.to_string()],
    );

    for block in TrendPeriod::all()
        .iter()
        .filter(|p| period.is_none_or(|selected| selected == **p))
    {
        let counts = count_by_key(conn, selection, &[block.column()])?;
        stacked
            .rows
            .extend(counts.rows.into_iter().map(|row| AggregateRow {
                keys: std::iter::once(Value::from(block.to_string()))
                    .chain(row.keys)
                    .collect(),
                metrics: row.metrics,
            }));
    }

    Ok(stacked)
}

fn inquiry_volume(
    conn: &duckdb::Connection,
    state: &DashboardState,
    key: ColumnRole,
    order: &GroupOrder,
) -> Result<AggregateTable, AnalyticsError> {
    let b = &state.inquiry_volume;
    group_by(
        conn,
        &Selection::all(DatasetKind::InquiryVolume.as_ref()),
        &[b.column(key)?],
        &[MetricSpec::sum(RECORDS, b.column(ColumnRole::RecordCount)?)],
        order,
        None,
    )
}

fn contact_centre_monthly(
    conn: &duckdb::Connection,
    state: &DashboardState,
) -> Result<AggregateTable, AnalyticsError> {
    let b = &state.contact_centre;
    group_by(
        conn,
        &Selection::all(DatasetKind::ContactCentre.as_ref()),
        &[columns::YEAR_MONTH],
        &[
            MetricSpec::sum("calls_offered", b.column(ColumnRole::CallsOffered)?),
            MetricSpec::sum("calls_handled", b.column(ColumnRole::CallsHandled)?),
            MetricSpec::sum("calls_abandoned", b.column(ColumnRole::CallsAbandoned)?),
            MetricSpec::mean("handled_pct", columns::HANDLED_PCT),
            MetricSpec::mean("abandoned_pct", columns::ABANDONED_PCT),
            MetricSpec::mean(
                "average_speed_of_answer",
                b.column(ColumnRole::AverageSpeedOfAnswer)?,
            ),
            MetricSpec::mean("service_level", b.column(ColumnRole::ServiceLevel)?),
        ],
        &GroupOrder::KeysAsc,
        None,
    )
}

/// Builds one named table.
///
/// Service-request tables honour the category, request type and local
/// area filters; `period` only affects [`TableName::RequestTrends`]. The
/// inquiry and contact-centre tables ignore filters.
///
/// # Errors
///
/// Returns [`AnalyticsError::NoData`] if the table has no rows (for
/// example when the filters match nothing), or
/// [`AnalyticsError::SchemaMismatch`] if a required column is missing.
pub fn build_table(
    state: &DashboardState,
    name: TableName,
    filters: &DashboardFilters,
) -> Result<AggregateTable, AnalyticsError> {
    let requests = request_selection(state, filters)?;
    let b = &state.service_requests;
    let conn = state.connection();

    let table = match name {
        TableName::Top20RequestTypesByCategory => count_desc(
            &conn,
            &requests,
            &[
                b.column(ColumnRole::RequestType)?,
                b.column(ColumnRole::Category)?,
            ],
            Some(TOP_N),
        )?,
        TableName::Top20RequestTypes => count_desc(
            &conn,
            &requests,
            &[b.column(ColumnRole::RequestType)?],
            Some(TOP_N),
        )?,
        TableName::CategoryCounts => {
            count_desc(&conn, &requests, &[b.column(ColumnRole::Category)?], None)?
        }
        TableName::MonthlyTrend => count_by_key(&conn, &requests, &[columns::MONTH])?,
        TableName::WeekdayTrend => count_by_key(&conn, &requests, &[columns::WEEKDAY])?,
        TableName::HourlyTrend => count_by_key(&conn, &requests, &[columns::HOUR])?,
        TableName::RequestTrends => request_trends(&conn, &requests, filters.period)?,
        TableName::TrendsByCategoryAndRequestType => count_by_key(
            &conn,
            &requests,
            &[
                columns::MONTH,
                b.column(ColumnRole::Category)?,
                b.column(ColumnRole::RequestType)?,
            ],
        )?,
        TableName::ClosureCategoryBreakdown => count_desc(
            &conn,
            &requests,
            &[b.column(ColumnRole::ClosureCategory)?],
            None,
        )?,
        TableName::RequestsByLocalArea => {
            count_desc(&conn, &requests, &[b.column(ColumnRole::LocalArea)?], None)?
        }
        TableName::CompletionTimeByCategory => completion_time(
            &conn,
            requests,
            b.column(ColumnRole::Category)?,
            &GroupOrder::MetricDesc(MEAN_COMPLETION_DAYS.to_string()),
        )?,
        TableName::CompletionTimeByNeighborhood => completion_time(
            &conn,
            requests,
            b.column(ColumnRole::LocalArea)?,
            &GroupOrder::MetricDesc(MEAN_COMPLETION_DAYS.to_string()),
        )?,
        TableName::CompletionTimeByMonth => {
            completion_time(&conn, requests, columns::MONTH, &GroupOrder::KeysAsc)?
        }
        TableName::InquiryVolumeByMonth => {
            inquiry_volume(&conn, state, ColumnRole::YearMonth, &GroupOrder::KeysAsc)?
        }
        TableName::InquiryVolumeByChannel => inquiry_volume(
            &conn,
            state,
            ColumnRole::Channel,
            &GroupOrder::MetricDesc(RECORDS.to_string()),
        )?,
        TableName::ContactCentreMonthlyMetrics => contact_centre_monthly(&conn, state)?,
    };

    if table.is_empty() {
        log::debug!("{name}: no rows for {filters:?}");
        return Err(AnalyticsError::NoData {
            table: name.to_string(),
        });
    }

    log::debug!("{name}: {} rows", table.len());
    Ok(table.named(name.to_string()))
}

/// Builds a table from its identifier.
///
/// # Errors
///
/// Returns [`AnalyticsError::UnknownTable`] for an unknown identifier, or
/// any error of [`build_table`].
pub fn build_named_table(
    state: &DashboardState,
    name: &str,
    filters: &DashboardFilters,
) -> Result<AggregateTable, AnalyticsError> {
    build_table(state, parse_table_name(name)?, filters)
}

fn labels(
    conn: &duckdb::Connection,
    selection: &Selection,
    column: &str,
) -> Result<Vec<String>, AnalyticsError> {
    Ok(distinct_values(conn, selection, column)?
        .iter()
        .map(ToString::to_string)
        .collect())
}

/// Option lists for the dashboard's filter dropdowns.
///
/// # Errors
///
/// Returns [`AnalyticsError::SchemaMismatch`] if a listed column is
/// unbound or absent.
pub fn filter_options(state: &DashboardState) -> Result<FilterOptions, AnalyticsError> {
    let b = &state.service_requests;
    let requests = Selection::all(DatasetKind::ServiceRequests.as_ref());
    let inquiries = Selection::all(DatasetKind::InquiryVolume.as_ref());
    let conn = state.connection();

    Ok(FilterOptions {
        categories: labels(&conn, &requests, b.column(ColumnRole::Category)?)?,
        request_types: labels(&conn, &requests, b.column(ColumnRole::RequestType)?)?,
        local_areas: labels(&conn, &requests, b.column(ColumnRole::LocalArea)?)?,
        channels: labels(
            &conn,
            &inquiries,
            state.inquiry_volume.column(ColumnRole::Channel)?,
        )?,
        periods: TrendPeriod::all().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use van311_source::store;

    use super::*;
    use crate::fixtures::{self, text};

    fn build(name: TableName) -> AggregateTable {
        build_table(&fixtures::state(), name, &DashboardFilters::default()).unwrap()
    }

    fn metric(table: &AggregateTable, row: usize, column: &str) -> Value {
        let idx = table
            .metric_columns
            .iter()
            .position(|c| c == column)
            .unwrap();
        table.rows[row].metrics[idx].clone()
    }

    #[test]
    fn every_table_builds_from_the_fixture() {
        let state = fixtures::state();
        for name in TableName::all() {
            let table = build_table(&state, *name, &DashboardFilters::default()).unwrap();
            assert_eq!(table.name, name.to_string());
            assert!(!table.is_empty(), "{name} is empty");
        }
    }

    #[test]
    fn top_request_types_by_category() {
        let table = build(TableName::Top20RequestTypesByCategory);
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.rows[0].keys,
            vec![text("Pothole Repair"), text("Maintenance")]
        );
        assert_eq!(table.rows[0].metrics, vec![Value::Int(2)]);
        assert_eq!(table.rows[2].keys[0], text("Graffiti Removal"));
    }

    #[test]
    fn completion_aggregates_exclude_negative_and_null_times() {
        let table = build(TableName::CompletionTimeByCategory);
        // Garbage rows are -1 day and open-ended; neither qualifies.
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].keys, vec![text("Maintenance")]);
        assert_eq!(metric(&table, 0, MEAN_COMPLETION_DAYS), Value::Float(1.25));
        assert_eq!(metric(&table, 0, COUNT), Value::Int(2));

        let state = fixtures::state();
        let conn = state.connection();
        let selection = completed(Selection::all("service_requests"));
        for days in distinct_values(&conn, &selection, columns::COMPLETION_DAYS).unwrap() {
            assert!(days.as_f64().unwrap() >= 0.0);
        }
    }

    #[test]
    fn completion_time_by_neighborhood_sorts_by_mean() {
        let table = build(TableName::CompletionTimeByNeighborhood);
        assert_eq!(table.rows[0].keys, vec![text("Kitsilano")]);
        assert_eq!(table.rows[1].keys, vec![text("Downtown")]);
    }

    #[test]
    fn completion_time_by_month_uses_completed_subset() {
        let table = build(TableName::CompletionTimeByMonth);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].keys, vec![Value::Int(1)]);
    }

    #[test]
    fn trends_are_chronological() {
        let weekday = build(TableName::WeekdayTrend);
        let keys: Vec<_> = weekday.rows.iter().map(|r| r.keys[0].clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let hourly = build(TableName::HourlyTrend);
        assert_eq!(hourly.len(), 4);
    }

    #[test]
    fn request_trends_stack_and_filter_by_period() {
        let all = build(TableName::RequestTrends);
        let labels: Vec<_> = all.rows.iter().map(|r| r.keys[0].clone()).collect();
        assert_eq!(labels.first(), Some(&text("Month")));
        assert_eq!(labels.last(), Some(&text("Hour")));

        let filters = DashboardFilters {
            period: Some(TrendPeriod::Weekday),
            ..DashboardFilters::default()
        };
        let weekday = build_table(&fixtures::state(), TableName::RequestTrends, &filters).unwrap();
        assert!(weekday.rows.iter().all(|r| r.keys[0] == text("Weekday")));
        assert_eq!(
            weekday
                .rows
                .iter()
                .map(|r| r.metrics[0].as_i64().unwrap())
                .sum::<i64>(),
            4
        );
    }

    #[test]
    fn filters_narrow_service_request_tables() {
        let filters = DashboardFilters {
            category: Some("Garbage".to_string()),
            ..DashboardFilters::default()
        };
        let table =
            build_table(&fixtures::state(), TableName::RequestsByLocalArea, &filters).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].keys, vec![text("Kitsilano")]);
        assert_eq!(table.rows[0].metrics, vec![Value::Int(2)]);
    }

    #[test]
    fn filters_become_predicates_over_the_stored_table() {
        let state = fixtures::state();
        let filters = DashboardFilters {
            local_area: Some("Downtown".to_string()),
            category: Some("Maintenance".to_string()),
            ..DashboardFilters::default()
        };

        let selection = request_selection(&state, &filters).unwrap();
        assert_eq!(selection.table(), "service_requests");
        assert_eq!(
            selection,
            Selection::all("service_requests")
                .equals(fixtures::CATEGORY, "Maintenance")
                .equals(fixtures::AREA, "Downtown")
        );

        let table_count = || {
            store::query_rows(
                &state.connection(),
                "SELECT COUNT(*) FROM information_schema.tables",
                &[],
                1,
            )
            .unwrap()
        };
        let before = table_count();
        for _ in 0..3 {
            let table = build_table(&state, TableName::CategoryCounts, &filters).unwrap();
            assert_eq!(table.rows[0].metrics, vec![Value::Int(2)]);
        }
        assert_eq!(table_count(), before);
        assert_eq!(state.row_count(DatasetKind::ServiceRequests).unwrap(), 5);
    }

    #[test]
    fn filters_matching_nothing_yield_no_data() {
        let filters = DashboardFilters {
            request_type: Some("Unheard Of".to_string()),
            ..DashboardFilters::default()
        };
        let err = build_table(&fixtures::state(), TableName::CategoryCounts, &filters).unwrap_err();
        assert!(matches!(err, AnalyticsError::NoData { table } if table == "category-counts"));
    }

    #[test]
    fn inquiry_tables() {
        let by_month = build(TableName::InquiryVolumeByMonth);
        assert_eq!(by_month.rows[0].keys, vec![text("2023-01")]);
        assert_eq!(metric(&by_month, 0, RECORDS), Value::Int(130));
        assert_eq!(metric(&by_month, 1, RECORDS), Value::Int(130));

        let by_channel = build(TableName::InquiryVolumeByChannel);
        assert_eq!(by_channel.rows[0].keys, vec![text("Phone")]);
        assert_eq!(metric(&by_channel, 0, RECORDS), Value::Int(190));
    }

    #[test]
    fn contact_centre_monthly_excludes_zero_offered_days_from_means() {
        let table = build(TableName::ContactCentreMonthlyMetrics);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].keys, vec![text("2023-01")]);
        assert_eq!(metric(&table, 0, "calls_offered"), Value::Int(300));
        // Mean of 80% and 75%; the zero-offered day does not count as 0%.
        assert_eq!(metric(&table, 0, "handled_pct"), Value::Float(77.5));
        assert_eq!(metric(&table, 0, "abandoned_pct"), Value::Float(17.5));
    }

    #[test]
    fn unknown_table_name() {
        let err = build_named_table(
            &fixtures::state(),
            "no-such-table",
            &DashboardFilters::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalyticsError::UnknownTable { .. }));
        assert!(
            build_named_table(
                &fixtures::state(),
                "monthly-trend",
                &DashboardFilters::default()
            )
            .is_ok()
        );
    }

    #[test]
    fn filter_options_in_first_seen_order() {
        let options = filter_options(&fixtures::state()).unwrap();
        assert_eq!(options.categories, vec!["Maintenance", "Garbage"]);
        assert_eq!(
            options.request_types,
            vec!["Pothole Repair", "Garbage Pickup", "Graffiti Removal"]
        );
        assert_eq!(options.local_areas, vec!["Kitsilano", "Downtown"]);
        assert_eq!(options.channels, vec!["Web", "Phone"]);
        assert_eq!(options.periods.len(), 3);
    }
}
