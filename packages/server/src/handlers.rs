//! HTTP handler functions for the dashboard API.

use actix_web::{HttpResponse, web};
use van311_analytics::{AnalyticsError, summary, tables};
use van311_analytics_models::TableName;
use van311_server_models::{ApiError, ApiHealth, ApiTableInfo, FilterQueryParams};

use crate::AppState;

/// Maps an analytics failure onto a status code and error body.
fn error_response(e: &AnalyticsError) -> HttpResponse {
    match e {
        AnalyticsError::UnknownTable { .. } => {
            HttpResponse::BadRequest().json(ApiError::new(e.to_string()))
        }
        AnalyticsError::NoData { .. } => {
            HttpResponse::NotFound().json(ApiError::new("No data available"))
        }
        AnalyticsError::SchemaMismatch { .. }
        | AnalyticsError::Database(_)
        | AnalyticsError::Source(_) => {
            log::error!("Aggregation failed: {e}");
            HttpResponse::InternalServerError().json(ApiError::new(e.to_string()))
        }
    }
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/tables`
///
/// Lists every named table.
pub async fn table_list() -> HttpResponse {
    let catalogue: Vec<ApiTableInfo> = TableName::all()
        .iter()
        .map(|name| ApiTableInfo::from(*name))
        .collect();
    HttpResponse::Ok().json(catalogue)
}

/// `GET /api/tables/{name}`
///
/// Builds one named table for the filters in the query string.
pub async fn table(
    state: web::Data<AppState>,
    name: web::Path<String>,
    params: web::Query<FilterQueryParams>,
) -> HttpResponse {
    let filters = match params.to_filters() {
        Ok(filters) => filters,
        Err(message) => return HttpResponse::BadRequest().json(ApiError::new(message)),
    };

    match tables::build_named_table(&state.dashboard, &name, &filters) {
        Ok(table) => HttpResponse::Ok().json(table),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/filters`
///
/// Option lists for the filter dropdowns.
pub async fn filters(state: web::Data<AppState>) -> HttpResponse {
    match tables::filter_options(&state.dashboard) {
        Ok(options) => HttpResponse::Ok().json(options),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/summary`
pub async fn dashboard_summary(
    state: web::Data<AppState>,
    params: web::Query<FilterQueryParams>,
) -> HttpResponse {
    let filters = match params.to_filters() {
        Ok(filters) => filters,
        Err(message) => return HttpResponse::BadRequest().json(ApiError::new(message)),
    };

    match summary::summarize(&state.dashboard, &filters) {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => error_response(&e),
    }
}
