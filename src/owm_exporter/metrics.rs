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

use crate::collector::{Observation, WeatherField};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::{Registry, Unit};
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

const NAMESPACE: &str = "owm";
const SUBSYSTEM: &str = "exporter";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LocationLabels {
    pub location: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CollectorLabels {
    pub collector: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildLabels {
    version: String,
}

/// Metrics about the exporter itself that live for the lifetime of the process.
///
/// Cloning is cheap and clones share the same underlying values, so the same
/// instance can be handed to the `Collector` and the `CachingFetcher` and registered
/// in each per-scrape `Registry`. All metrics share the prefix "owm_exporter_".
#[derive(Clone, Debug)]
pub struct ExporterMetrics {
    scrapes: Counter,
    scrape_duration: Histogram,
    last_scrape_error: Gauge,
    api_requests: Family<LocationLabels, Counter>,
    cache_hits: Family<LocationLabels, Counter>,
    scrape_errors: Family<CollectorLabels, Counter>,
}

impl ExporterMetrics {
    pub fn new() -> Self {
        ExporterMetrics {
            scrapes: Counter::default(),
            scrape_duration: Histogram::new(exponential_buckets(0.005, 2.0, 12)),
            last_scrape_error: Gauge::default(),
            api_requests: Family::default(),
            cache_hits: Family::default(),
            scrape_errors: Family::default(),
        }
    }

    /// Count a new scrape and reset the error flag for it.
    pub fn scrape_started(&self) {
        self.scrapes.inc();
        self.last_scrape_error.set(0);
    }

    pub fn scrape_finished(&self, elapsed: Duration) {
        self.scrape_duration.observe(elapsed.as_secs_f64());
    }

    /// Count an error for `collector` and flag the current scrape as failed.
    pub fn scrape_error(&self, collector: &str) {
        self.scrape_errors
            .get_or_create(&CollectorLabels {
                collector: collector.to_owned(),
            })
            .inc();
        self.last_scrape_error.set(1);
    }

    pub fn api_request(&self, location: &str) {
        self.api_requests.get_or_create(&location_labels(location)).inc();
    }

    pub fn cache_hit(&self, location: &str) {
        self.cache_hits.get_or_create(&location_labels(location)).inc();
    }

    pub fn scrapes(&self) -> u64 {
        self.scrapes.get()
    }

    pub fn last_scrape_error(&self) -> bool {
        self.last_scrape_error.get() != 0
    }

    // Reading a labeled count creates the series if it doesn't exist yet, so these
    // are only for asserting on counts in tests.
    #[cfg(test)]
    pub(crate) fn api_requests(&self, location: &str) -> u64 {
        self.api_requests.get_or_create(&location_labels(location)).get()
    }

    #[cfg(test)]
    pub(crate) fn cache_hits(&self, location: &str) -> u64 {
        self.cache_hits.get_or_create(&location_labels(location)).get()
    }

    #[cfg(test)]
    pub(crate) fn scrape_errors(&self, collector: &str) -> u64 {
        self.scrape_errors
            .get_or_create(&CollectorLabels {
                collector: collector.to_owned(),
            })
            .get()
    }

    /// Register each metric, along with build information, with the provided `Registry`.
    pub fn register(&self, reg: &mut Registry) {
        let sub = reg.sub_registry_with_prefix(SUBSYSTEM);
        sub.register(
            "build",
            "Build information about the exporter",
            Info::new(BuildLabels {
                version: env!("CARGO_PKG_VERSION").to_owned(),
            }),
        );
        sub.register(
            "scrapes",
            "Total number of times OWM was scraped for metrics",
            self.scrapes.clone(),
        );
        sub.register_with_unit(
            "scrape_duration",
            "Time taken to fetch conditions for all targets",
            Unit::Seconds,
            self.scrape_duration.clone(),
        );
        sub.register(
            "last_scrape_error",
            "Whether the last scrape of metrics from OWM resulted in an error (1 for error, 0 for success)",
            self.last_scrape_error.clone(),
        );
        sub.register(
            "api_requests",
            "Total number of API requests for given location",
            self.api_requests.clone(),
        );
        sub.register(
            "cache_hits",
            "Total number of cache hits for given location",
            self.cache_hits.clone(),
        );
        sub.register(
            "scrape_errors",
            "Total number of times an error occurred scraping OWM",
            self.scrape_errors.clone(),
        );
    }
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn location_labels(location: &str) -> LocationLabels {
    LocationLabels {
        location: location.to_owned(),
    }
}

/// Metrics about the exporter process itself (`process_*`), sampled on each scrape.
///
/// These are read from `/proc` and are only available on Linux. Elsewhere nothing is emitted.
pub struct ProcessMetrics {
    #[cfg(target_os = "linux")]
    collector: prometheus::process_collector::ProcessCollector,
}

impl ProcessMetrics {
    pub fn new() -> Self {
        ProcessMetrics {
            #[cfg(target_os = "linux")]
            collector: prometheus::process_collector::ProcessCollector::for_self(),
        }
    }

    /// Register the current value of each process metric with the provided `Registry`.
    #[cfg(target_os = "linux")]
    pub fn register(&self, reg: &mut Registry) {
        use prometheus::core::Collector as _;
        use prometheus::proto::MetricType;

        for family in self.collector.collect() {
            let metric = match family.get_metric().first() {
                Some(m) => m,
                None => continue,
            };

            // Help is terminated with a period when encoded, don't end up with two.
            let help = family.get_help().trim_end_matches('.');
            let name = family.get_name();

            match family.get_field_type() {
                MetricType::COUNTER => {
                    let counter = Counter::<f64, AtomicU64>::default();
                    counter.inc_by(metric.get_counter().get_value());
                    // The "_total" suffix is added back when encoded
                    reg.register(name.strip_suffix("_total").unwrap_or(name), help, counter);
                }
                MetricType::GAUGE => {
                    let gauge = Gauge::<f64, AtomicU64>::default();
                    gauge.set(metric.get_gauge().get_value());
                    reg.register(name, help, gauge);
                }
                other => {
                    tracing::debug!(message = "skipping unsupported process metric", name = name, kind = ?other);
                }
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn register(&self, _reg: &mut Registry) {}
}

impl Default for ProcessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode the observations from a single scrape, the exporter metrics, and optionally
/// process metrics in the OpenMetrics text format.
///
/// A new `Registry` is built for each call so that gauges only include the targets
/// successfully fetched by that scrape, even when scrapes run concurrently. Weather
/// gauges without any observations are left out entirely.
pub fn render(
    observations: &[Observation],
    metrics: &ExporterMetrics,
    process: Option<&ProcessMetrics>,
) -> Result<String, fmt::Error> {
    let mut reg = Registry::default();
    let owm = reg.sub_registry_with_prefix(NAMESPACE);

    for field in WeatherField::ALL {
        let family = Family::<LocationLabels, Gauge<f64, AtomicU64>>::default();
        let mut observed = false;

        for obs in observations.iter().filter(|o| o.field == field) {
            family.get_or_create(&location_labels(&obs.location)).set(obs.value);
            observed = true;
        }

        if observed {
            owm.register(field.name(), field.help(), family);
        }
    }

    metrics.register(owm);

    if let Some(p) = process {
        p.register(&mut reg);
    }

    let mut buf = String::new();
    encode(&mut buf, &reg)?;
    Ok(buf)
}
