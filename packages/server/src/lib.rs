#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the 311 dashboard.
//!
//! Serves the named aggregate tables, the filter option lists and the
//! dashboard summary as JSON. The datasets are loaded and derived once at
//! startup; every request aggregates from that read-only state.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use van311_analytics::DashboardState;
use van311_source::config::ServerConfig;

/// Shared application state.
pub struct AppState {
    /// Ingested and derived datasets.
    pub dashboard: Arc<DashboardState>,
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/tables", web::get().to(handlers::table_list))
            .route("/tables/{name}", web::get().to(handlers::table))
            .route("/filters", web::get().to(handlers::filters))
            .route("/summary", web::get().to(handlers::dashboard_summary)),
    );
}

/// Starts the dashboard API server over already loaded state.
///
/// This is a regular async function; the caller provides the async
/// runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server(
    dashboard: Arc<DashboardState>,
    server: &ServerConfig,
) -> std::io::Result<()> {
    let state = web::Data::new(AppState { dashboard });

    log::info!("Starting server on {}:{}", server.bind_addr, server.port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((server.bind_addr.as_str(), server.port))?
    .run()
    .await
}
