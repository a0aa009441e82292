#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the 311 dashboard pipeline.
//!
//! Loads the three datasets (with one progress spinner each), then prints
//! a named table, the filter option lists or the summary, or serves the
//! HTTP API.
//!
//! Uses `indicatif-log-bridge` (via [`van311_cli_utils::init_logger`]) to
//! route `log` output through `indicatif::MultiProgress`.

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use van311_analytics::{DashboardState, summary, tables};
use van311_analytics_models::{DashboardFilters, TableName, TrendPeriod};
use van311_cli_utils::{IndicatifProgress, MultiProgress};
use van311_dataset_models::DatasetKind;
use van311_source::config::DashboardConfig;
use van311_source::registry;

#[derive(Parser)]
#[command(name = "van311", about = "Vancouver 311 dashboard pipeline")]
struct Cli {
    /// Path to a TOML configuration file (overrides `VAN311_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Service-requests CSV, as a local path or http(s) URL
    #[arg(long, global = true)]
    service_requests: Option<String>,
    /// Inquiry-volume CSV, as a local path or http(s) URL
    #[arg(long, global = true)]
    inquiry_volume: Option<String>,
    /// Contact-centre metrics CSV, as a local path or http(s) URL
    #[arg(long, global = true)]
    contact_centre: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every named table
    Tables,
    /// Build and print one named table
    Show {
        /// Table identifier (e.g., "category-counts")
        name: String,
        #[command(flatten)]
        filters: FilterArgs,
        /// Print JSON instead of an aligned text table
        #[arg(long)]
        json: bool,
    },
    /// Print the option lists for the dashboard filters
    Filters,
    /// Print the dashboard summary
    Summary {
        #[command(flatten)]
        filters: FilterArgs,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Serve the dashboard API
    Serve {
        /// Address to bind (overrides `BIND_ADDR`)
        #[arg(long)]
        bind: Option<String>,
        /// Port to bind (overrides `PORT`)
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Dashboard filter selections. Omitted flags mean "all".
#[derive(Args)]
struct FilterArgs {
    /// Only requests in this category
    #[arg(long)]
    category: Option<String>,
    /// Only requests of this service request type
    #[arg(long)]
    request_type: Option<String>,
    /// Only requests in this local area
    #[arg(long)]
    local_area: Option<String>,
    /// Trend period for `request-trends` (month, weekday, hour)
    #[arg(long)]
    period: Option<TrendPeriod>,
}

impl From<FilterArgs> for DashboardFilters {
    fn from(args: FilterArgs) -> Self {
        Self {
            category: args.category,
            request_type: args.request_type,
            local_area: args.local_area,
            period: args.period,
        }
    }
}

async fn load_state(
    config: &DashboardConfig,
    multi: &MultiProgress,
) -> Result<DashboardState, Box<dyn std::error::Error>> {
    let state = DashboardState::load(&config.sources, |kind| {
        IndicatifProgress::rows_spinner(multi, &registry::definition(kind).name)
    })
    .await?;
    Ok(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = van311_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = DashboardConfig::load(cli.config.as_deref())?;
    for (kind, flag) in [
        (DatasetKind::ServiceRequests, cli.service_requests),
        (DatasetKind::InquiryVolume, cli.inquiry_volume),
        (DatasetKind::ContactCentre, cli.contact_centre),
    ] {
        if let Some(locator) = flag {
            config.sources.set(kind, locator);
        }
    }

    match cli.command {
        Commands::Tables => {
            for name in TableName::all() {
                println!("{:<40} {}", name.to_string(), name.description());
            }
        }
        Commands::Show {
            name,
            filters,
            json,
        } => {
            let state = load_state(&config, &multi).await?;
            let table = tables::build_named_table(&state, &name, &filters.into())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                print!("{}", render::render_table(&table));
            }
        }
        Commands::Filters => {
            let state = load_state(&config, &multi).await?;
            let options = tables::filter_options(&state)?;
            println!("{}", serde_json::to_string_pretty(&options)?);
        }
        Commands::Summary { filters, json } => {
            let state = load_state(&config, &multi).await?;
            let summary = summary::summarize(&state, &filters.into())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render::render_summary(&summary));
            }
        }
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let dashboard = Arc::new(load_state(&config, &multi).await?);
            log::info!(
                "Loaded {} service requests",
                dashboard.row_count(DatasetKind::ServiceRequests)?
            );

            // The server uses actix-web's runtime, so we need to run it
            // in a blocking task to avoid nesting tokio runtimes.
            let server = config.server;
            tokio::task::spawn_blocking(move || {
                actix_web::rt::System::new()
                    .block_on(van311_server::run_server(dashboard, &server))
            })
            .await??;
        }
    }

    Ok(())
}
