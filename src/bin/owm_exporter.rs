// owm_exporter - Prometheus metrics exporter for api.openweathermap.org
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use owm_exporter::cache::TtlCache;
use owm_exporter::client::{OpenWeatherClient, DEFAULT_API_URL};
use owm_exporter::collector::Collector;
use owm_exporter::config::Config;
use owm_exporter::fetcher::CachingFetcher;
use owm_exporter::http::RequestState;
use owm_exporter::metrics::{ExporterMetrics, ProcessMetrics};
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9111);
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_CONFIG_FILE: &str = "config.yaml";
const DEFAULT_TELEMETRY_PATH: &str = "/metrics";

#[derive(Debug, Parser)]
#[clap(name = "owm_exporter", version = clap::crate_version!())]
struct OwmExporterApplication {
    /// Path to YAML file with the API key and locations to fetch current conditions for
    #[clap(long = "config.file", default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Base URL for the OpenWeatherMap API
    #[clap(long, default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Timeout for fetching current conditions for all locations during a scrape, in
    /// milliseconds. Shorter scrape timeouts sent by Prometheus take precedence.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Path under which to expose metrics
    #[clap(long = "web.telemetry-path", default_value_t = DEFAULT_TELEMETRY_PATH.into())]
    telemetry_path: String,

    /// Exclude default metrics about the exporter process itself (process_*)
    #[clap(long)]
    disable_default_metrics: bool,

    /// Address to bind to. By default, owm_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = OwmExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    if let Err(e) = owm_exporter::http::validate_telemetry_path(&opts.telemetry_path) {
        tracing::error!(message = "invalid telemetry path", error = %e);
        process::exit(1)
    }

    let config = Config::from_file(&opts.config_file).unwrap_or_else(|e| {
        tracing::error!(message = "error reading configuration", path = %opts.config_file.display(), error = %e);
        process::exit(1)
    });

    tracing::info!(
        message = "loaded configuration",
        path = %opts.config_file.display(),
        targets = config.targets.len(),
    );

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = OpenWeatherClient::new(http_client, &opts.api_url, &config.api_key).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize API client", api_url = %opts.api_url, error = %e);
        process::exit(1)
    });

    let metrics = ExporterMetrics::new();
    let cache = Arc::new(TtlCache::new());
    let fetcher = CachingFetcher::new(client, cache, metrics.clone());
    let collector = Collector::new(config.targets, Box::new(fetcher), metrics);
    let process = if opts.disable_default_metrics {
        None
    } else {
        Some(ProcessMetrics::new())
    };
    let context = Arc::new(RequestState::new(collector, process, timeout, &opts.telemetry_path));
    let app = owm_exporter::http::app(context);

    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr(), api_url = %opts.api_url);

    server
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
