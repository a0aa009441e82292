//! Plain-text rendering of aggregate tables and summaries.

use std::fmt::Write as _;

use van311_analytics_models::{AggregateTable, DashboardSummary};
use van311_dataset_models::Value;

const fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

/// Renders a table with aligned columns: text left-aligned, numbers
/// right-aligned, nulls blank.
#[must_use]
pub fn render_table(table: &AggregateTable) -> String {
    let headers: Vec<&str> = table.columns().collect();
    let cells: Vec<Vec<&Value>> = table
        .rows
        .iter()
        .map(|row| row.keys.iter().chain(&row.metrics).collect())
        .collect();
    let text: Vec<Vec<String>> = cells
        .iter()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            text.iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{h:<w$}"))
        .collect();
    let _ = writeln!(out, "{}", header_line.join("  ").trim_end());
    let rule = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    let _ = writeln!(out, "{}", "-".repeat(rule));

    for (values, strings) in cells.iter().zip(&text) {
        let line: Vec<String> = values
            .iter()
            .zip(strings)
            .zip(&widths)
            .map(|((value, s), w)| {
                if is_numeric(value) {
                    format!("{s:>w$}")
                } else {
                    format!("{s:<w$}")
                }
            })
            .collect();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    }

    out
}

fn or_dash(value: Option<impl std::fmt::Display>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Renders the dashboard summary as `label: value` lines.
#[must_use]
pub fn render_summary(summary: &DashboardSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Service requests:            {}", summary.total_requests);
    let _ = writeln!(
        out,
        "  with open timestamp:       {}",
        summary.requests_with_open_timestamp
    );
    let _ = writeln!(out, "  completed:                 {}", summary.completed_requests);
    let _ = writeln!(
        out,
        "  mean completion (days):    {}",
        or_dash(summary.mean_completion_days.map(|d| format!("{d:.2}")))
    );
    let _ = writeln!(out, "  first opened:              {}", or_dash(summary.first_opened));
    let _ = writeln!(out, "  last opened:               {}", or_dash(summary.last_opened));
    let _ = writeln!(out, "Inquiries:                   {}", summary.total_inquiries);
    let _ = writeln!(out, "Calls offered:               {}", summary.total_calls_offered);
    let _ = writeln!(out, "  handled:                   {}", summary.total_calls_handled);
    let _ = writeln!(out, "  abandoned:                 {}", summary.total_calls_abandoned);
    out
}
