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

use crate::collector::Collector;
use crate::metrics::{self, ProcessMetrics};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;

const TEXT_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";
const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";
const HEALTH_PATH: &str = "/health";
// Deadline used when the configured timeout is too large to add to the current time.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// State shared by all HTTP handlers.
pub struct RequestState {
    collector: Collector,
    process: Option<ProcessMetrics>,
    timeout: Duration,
    telemetry_path: String,
}

impl RequestState {
    /// Create new state for handlers. `timeout` is the longest a single scrape may take.
    /// Process metrics are only included in each scrape if `process` is set.
    pub fn new(
        collector: Collector,
        process: Option<ProcessMetrics>,
        timeout: Duration,
        telemetry_path: &str,
    ) -> Self {
        RequestState {
            collector,
            process,
            timeout,
            telemetry_path: telemetry_path.to_owned(),
        }
    }
}

/// Ensure the metrics path can be routed without clashing with the other endpoints.
pub fn validate_telemetry_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        Err(format!("telemetry path {} must start with '/'", path))
    } else if path == "/" || path == HEALTH_PATH {
        Err(format!("telemetry path {} is reserved", path))
    } else {
        Ok(())
    }
}

/// Build the router serving metrics, health checks, and the landing page.
///
/// # Panics
///
/// If the telemetry path of `state` is not valid according to `validate_telemetry_path`.
pub fn app(state: Arc<RequestState>) -> Router {
    let telemetry_path = state.telemetry_path.clone();
    Router::new()
        .route(&telemetry_path, get(text_metrics_handler))
        .route(HEALTH_PATH, get(health_handler))
        .route("/", get(landing_page_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn text_metrics_handler(State(state): State<Arc<RequestState>>, headers: HeaderMap) -> impl IntoResponse {
    text_metrics(&state, &headers).await
}

async fn text_metrics(state: &RequestState, headers: &HeaderMap) -> (StatusCode, HeaderMap, String) {
    let timeout = scrape_timeout(headers, state.timeout);
    let observations = state.collector.scrape(deadline_after(Instant::now(), timeout)).await;
    let mut res_headers = HeaderMap::new();

    match metrics::render(&observations, state.collector.metrics(), state.process.as_ref()) {
        Ok(buf) => {
            tracing::debug!(message = "encoded metrics to text format", num_bytes = buf.len());
            res_headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
            (StatusCode::OK, res_headers, buf)
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics to text format", error = %e);
            (StatusCode::INTERNAL_SERVER_ERROR, res_headers, String::new())
        }
    }
}

/// Use the scrape timeout sent by Prometheus when it's shorter than our own.
fn scrape_timeout(headers: &HeaderMap, max: Duration) -> Duration {
    headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(|d| d.min(max))
        .unwrap_or(max)
}

fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn landing_page_handler(State(state): State<Arc<RequestState>>) -> Html<String> {
    Html(landing_page(&state.telemetry_path))
}

fn landing_page(telemetry_path: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>owm exporter</title></head>
<body>
<h1>owm exporter</h1>
<p>Prometheus exporter for api.openweathermap.org</p>
<p>Version: {version}</p>
<ul>
<li><a href="{metrics}">Metrics</a></li>
<li><a href="{health}">Health</a></li>
</ul>
</body>
</html>
"#,
        version = env!("CARGO_PKG_VERSION"),
        metrics = telemetry_path,
        health = HEALTH_PATH,
    )
}
