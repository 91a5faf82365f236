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

//! Prometheus metrics exporter for api.openweathermap.org
//!
//! ## Features
//!
//! `owm_exporter` fetches current weather conditions for a list of locations using the
//! [OpenWeatherMap current weather API] and emits them as Prometheus metrics. Conditions are
//! fetched when Prometheus scrapes the exporter. Each location has a refresh interval; scrapes
//! within that interval are served from an in-memory cache instead of making another API request.
//!
//! The following metrics are emitted for each location that could be fetched during a scrape.
//!
//! * `owm_current_temperature{location=$NAME}` - Temperature, in degrees celsius.
//! * `owm_current_temperature_min{location=$NAME}` - Minimum currently observed temperature, in degrees celsius.
//! * `owm_current_temperature_max{location=$NAME}` - Maximum currently observed temperature, in degrees celsius.
//! * `owm_current_temperature_feel{location=$NAME}` - "Feels like" temperature, in degrees celsius.
//! * `owm_current_humidity{location=$NAME}` - Relative humidity (0-100).
//! * `owm_current_pressure{location=$NAME}` - Atmospheric pressure, in hPa.
//! * `owm_current_wind_speed{location=$NAME}` - Wind speed, in meters per second.
//! * `owm_current_wind_direction{location=$NAME}` - Wind direction, in degrees.
//!
//! The following metrics are only emitted when the API reports a non-zero value.
//!
//! * `owm_current_clouds{location=$NAME}` - Cloudiness, in percent.
//! * `owm_current_rain_1h{location=$NAME}` - Rain volume for the last hour, in millimeters.
//! * `owm_current_rain_3h{location=$NAME}` - Rain volume for the last three hours, in millimeters.
//! * `owm_current_snow_1h{location=$NAME}` - Snow volume for the last hour, in millimeters.
//! * `owm_current_snow_3h{location=$NAME}` - Snow volume for the last three hours, in millimeters.
//!
//! The following metrics about the exporter itself are always emitted.
//!
//! * `owm_exporter_build_info{version=$VERSION}` - Build information.
//! * `owm_exporter_scrapes_total` - Total number of scrapes.
//! * `owm_exporter_scrape_duration_seconds` - Histogram of time taken to fetch all locations.
//! * `owm_exporter_last_scrape_error` - 1 if any location failed during the last scrape, 0 otherwise.
//! * `owm_exporter_api_requests_total{location=$NAME}` - Requests made to the API, per location.
//! * `owm_exporter_cache_hits_total{location=$NAME}` - Scrapes served from cache, per location.
//! * `owm_exporter_scrape_errors_total{collector=collect.current.$NAME}` - Failures, per location.
//!
//! On Linux, `process_*` metrics (CPU time, memory, file descriptors, threads, start time) are also
//! emitted unless `--disable-default-metrics` is passed.
//!
//! [OpenWeatherMap current weather API]: https://openweathermap.org/current
//!
//! ## Build
//!
//! `owm_exporter` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/owm_exporter.git && cd owm_exporter
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Configuration
//!
//! `owm_exporter` reads an API key and the locations to fetch from a YAML file, `config.yaml`
//! by default. Pick a different file with `--config.file`. Each location needs a unique name,
//! coordinates, and how often (in seconds) the API may be called for it.
//!
//! ```yaml
//! apiKey: "YOUR_API_KEY"
//! targets:
//!   - name: prague
//!     lat: 50.08
//!     lon: 14.43
//!     interval: 600
//!   - name: boston
//!     lat: 42.36
//!     lon: -71.06
//!     interval: 600
//! ```
//!
//! ### Run
//!
//! ```text
//! ./owm_exporter --config.file /etc/owm_exporter/config.yaml
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9111` at `/metrics`. Once `owm_exporter`
//! is running, configure scrapes of it by your Prometheus server. Add the host running
//! `owm_exporter` as a target under the Prometheus `scrape_configs` section as described by
//! the example below. A failed location never fails the scrape itself, check
//! `owm_exporter_last_scrape_error` instead.
//!
//! ```yaml
//! # Sample config for Prometheus.
//!
//! global:
//!   scrape_interval:     1m
//!   evaluation_interval: 1m
//!   external_labels:
//!     monitor: 'my_prom'
//!
//! scrape_configs:
//! - job_name: owm_exporter
//!   static_configs:
//!   - targets: ['example:9111']
//! ```
//!

pub mod cache;
pub mod client;
pub mod collector;
pub mod config;
pub mod fetcher;
pub mod http;
pub mod metrics;
pub mod weather;
