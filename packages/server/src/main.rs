#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Standalone entry point for the dashboard API server.
//!
//! Reads configuration from `VAN311_CONFIG` and the environment, loads the
//! three datasets, then serves the API.

use std::sync::Arc;

use van311_analytics::DashboardState;
use van311_source::config::DashboardConfig;
use van311_source::progress::null_progress;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = DashboardConfig::load(None)?;

    log::info!("Loading datasets...");
    let dashboard = DashboardState::load(&config.sources, |_| null_progress()).await?;

    van311_server::run_server(Arc::new(dashboard), &config.server).await?;

    Ok(())
}
