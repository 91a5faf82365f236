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

use crate::config::Target;
use crate::fetcher::Fetcher;
use crate::metrics::ExporterMetrics;
use crate::weather::WeatherReading;
use std::time;
use tokio::time::Instant;

/// A gauge emitted for each target, one per field of a `WeatherReading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeatherField {
    Temperature,
    TemperatureMin,
    TemperatureMax,
    TemperatureFeel,
    Humidity,
    Pressure,
    WindSpeed,
    WindDirection,
    Clouds,
    Rain1h,
    Rain3h,
    Snow1h,
    Snow3h,
}

impl WeatherField {
    pub const ALL: [WeatherField; 13] = [
        WeatherField::Temperature,
        WeatherField::TemperatureMin,
        WeatherField::TemperatureMax,
        WeatherField::TemperatureFeel,
        WeatherField::Humidity,
        WeatherField::Pressure,
        WeatherField::WindSpeed,
        WeatherField::WindDirection,
        WeatherField::Clouds,
        WeatherField::Rain1h,
        WeatherField::Rain3h,
        WeatherField::Snow1h,
        WeatherField::Snow3h,
    ];

    /// Metric name, without the "owm_" prefix.
    pub fn name(self) -> &'static str {
        match self {
            Self::Temperature => "current_temperature",
            Self::TemperatureMin => "current_temperature_min",
            Self::TemperatureMax => "current_temperature_max",
            Self::TemperatureFeel => "current_temperature_feel",
            Self::Humidity => "current_humidity",
            Self::Pressure => "current_pressure",
            Self::WindSpeed => "current_wind_speed",
            Self::WindDirection => "current_wind_direction",
            Self::Clouds => "current_clouds",
            Self::Rain1h => "current_rain_1h",
            Self::Rain3h => "current_rain_3h",
            Self::Snow1h => "current_snow_1h",
            Self::Snow3h => "current_snow_3h",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Self::Temperature => "The current temperature in celsius",
            Self::TemperatureMin => "The minimal currently observed temperature in celsius",
            Self::TemperatureMax => "The maximal currently observed temperature in celsius",
            Self::TemperatureFeel => "The current temperature feel like in celsius",
            Self::Humidity => "The current relative humidity (0-100)",
            Self::Pressure => "The current atmospheric pressure in hPa",
            Self::WindSpeed => "The current wind speed in meters per second",
            Self::WindDirection => "The current wind direction in degrees",
            Self::Clouds => "The current cloudiness in percent",
            Self::Rain1h => "Rain volume for the last 1 hour in millimeters",
            Self::Rain3h => "Rain volume for the last 3 hours in millimeters",
            Self::Snow1h => "Snow volume for the last 1 hour in millimeters",
            Self::Snow3h => "Snow volume for the last 3 hours in millimeters",
        }
    }
}

/// Value of a single gauge for a single target from one scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub field: WeatherField,
    pub location: String,
    pub value: f64,
}

impl Observation {
    fn new(field: WeatherField, location: &str, value: f64) -> Self {
        Observation {
            field,
            location: location.to_owned(),
            value,
        }
    }
}

/// Fetches conditions for every configured target once per scrape.
///
/// A target that can't be fetched is logged, counted as an error for the collector
/// `collect.current.$NAME`, and marks the scrape as failed. It never stops the
/// remaining targets from being fetched.
pub struct Collector {
    targets: Vec<Target>,
    fetcher: Box<dyn Fetcher>,
    metrics: ExporterMetrics,
}

impl Collector {
    pub fn new(targets: Vec<Target>, fetcher: Box<dyn Fetcher>, metrics: ExporterMetrics) -> Self {
        Collector {
            targets,
            fetcher,
            metrics,
        }
    }

    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    /// Fetch each target in order, giving up on any request still running at `deadline`.
    pub async fn scrape(&self, deadline: Instant) -> Vec<Observation> {
        let start = time::Instant::now();
        self.metrics.scrape_started();

        let mut out = Vec::with_capacity(self.targets.len() * WeatherField::ALL.len());
        for target in &self.targets {
            tracing::debug!(message = "processing target", target = %target.name);

            match self.fetcher.fetch(target, deadline).await {
                Ok(reading) => add_observations(&target.name, &reading, &mut out),
                Err(e) => {
                    tracing::error!(message = "error fetching current conditions", target = %target.name, error = %e);
                    self.metrics.scrape_error(&format!("collect.current.{}", target.name));
                }
            }
        }

        self.metrics.scrape_finished(start.elapsed());
        out
    }
}

fn add_observations(location: &str, r: &WeatherReading, out: &mut Vec<Observation>) {
    let always = [
        (WeatherField::Temperature, r.temperature),
        (WeatherField::TemperatureMin, r.temperature_min),
        (WeatherField::TemperatureMax, r.temperature_max),
        (WeatherField::TemperatureFeel, r.feels_like),
        (WeatherField::Humidity, r.humidity),
        (WeatherField::Pressure, r.pressure),
        (WeatherField::WindSpeed, r.wind_speed),
        (WeatherField::WindDirection, r.wind_direction),
    ];

    let optional = [
        (WeatherField::Clouds, r.clouds),
        (WeatherField::Rain1h, r.rain_1h),
        (WeatherField::Rain3h, r.rain_3h),
        (WeatherField::Snow1h, r.snow_1h),
        (WeatherField::Snow3h, r.snow_3h),
    ];

    out.extend(always.into_iter().map(|(f, v)| Observation::new(f, location, v)));
    out.extend(
        optional
            .into_iter()
            .filter_map(|(f, v)| v.map(|v| Observation::new(f, location, v))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::fetcher::tests::{current, target, FakeApi, Reply};
    use crate::fetcher::{CachingFetcher, FetchError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// `Fetcher` returning a fixed reading per target name, or an error for unknown names.
    #[derive(Default)]
    struct ScriptedFetcher {
        readings: Mutex<HashMap<String, WeatherReading>>,
    }

    impl ScriptedFetcher {
        fn with(readings: &[(&str, WeatherReading)]) -> Arc<Self> {
            let f = ScriptedFetcher::default();
            for (name, r) in readings {
                f.set(name, r.clone());
            }
            Arc::new(f)
        }

        fn set(&self, name: &str, reading: WeatherReading) {
            self.readings.lock().unwrap().insert(name.to_owned(), reading);
        }
    }

    #[async_trait]
    impl Fetcher for Arc<ScriptedFetcher> {
        async fn fetch(&self, target: &Target, _deadline: Instant) -> Result<WeatherReading, FetchError> {
            let reading = self.readings.lock().unwrap().get(&target.name).cloned();
            reading.ok_or(FetchError::Timeout)
        }
    }

    fn reading(temperature: f64) -> WeatherReading {
        WeatherReading {
            location: "Somewhere".to_owned(),
            temperature,
            temperature_min: temperature - 2.0,
            temperature_max: temperature + 2.0,
            feels_like: temperature - 1.0,
            pressure: 1013.0,
            humidity: 55.0,
            visibility: 10000.0,
            wind_speed: 3.5,
            wind_direction: 180.0,
            ..Default::default()
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn for_location<'a>(obs: &'a [Observation], location: &str) -> Vec<&'a Observation> {
        obs.iter().filter(|o| o.location == location).collect()
    }

    fn value(obs: &[Observation], location: &str, field: WeatherField) -> Option<f64> {
        obs.iter()
            .find(|o| o.location == location && o.field == field)
            .map(|o| o.value)
    }

    #[tokio::test]
    async fn scrape_all_targets() {
        let fetcher = ScriptedFetcher::with(&[("a", reading(10.0)), ("b", reading(20.0))]);
        let metrics = ExporterMetrics::new();
        let targets = vec![target("a", Duration::ZERO), target("b", Duration::ZERO)];
        let collector = Collector::new(targets, Box::new(fetcher), metrics.clone());

        let obs = collector.scrape(deadline()).await;
        assert_eq!(8, for_location(&obs, "a").len());
        assert_eq!(8, for_location(&obs, "b").len());
        assert_eq!(Some(10.0), value(&obs, "a", WeatherField::Temperature));
        assert_eq!(Some(8.0), value(&obs, "a", WeatherField::TemperatureMin));
        assert_eq!(Some(12.0), value(&obs, "a", WeatherField::TemperatureMax));
        assert_eq!(Some(9.0), value(&obs, "a", WeatherField::TemperatureFeel));
        assert_eq!(Some(55.0), value(&obs, "a", WeatherField::Humidity));
        assert_eq!(Some(1013.0), value(&obs, "a", WeatherField::Pressure));
        assert_eq!(Some(3.5), value(&obs, "a", WeatherField::WindSpeed));
        assert_eq!(Some(180.0), value(&obs, "a", WeatherField::WindDirection));
        assert_eq!(Some(20.0), value(&obs, "b", WeatherField::Temperature));

        assert_eq!(1, metrics.scrapes());
        assert!(!metrics.last_scrape_error());
    }

    #[tokio::test]
    async fn scrape_failure_is_isolated() {
        let fetcher = ScriptedFetcher::with(&[("b", reading(20.0))]);
        let metrics = ExporterMetrics::new();
        let targets = vec![target("a", Duration::ZERO), target("b", Duration::ZERO)];
        let collector = Collector::new(targets, Box::new(Arc::clone(&fetcher)), metrics.clone());

        let obs = collector.scrape(deadline()).await;
        assert!(for_location(&obs, "a").is_empty());
        assert_eq!(8, for_location(&obs, "b").len());
        assert_eq!(1, metrics.scrape_errors("collect.current.a"));
        assert_eq!(0, metrics.scrape_errors("collect.current.b"));
        assert!(metrics.last_scrape_error());

        // Error flag only reflects the most recent scrape
        fetcher.set("a", reading(10.0));
        let obs = collector.scrape(deadline()).await;
        assert_eq!(8, for_location(&obs, "a").len());
        assert!(!metrics.last_scrape_error());
        assert_eq!(1, metrics.scrape_errors("collect.current.a"));
        assert_eq!(2, metrics.scrapes());
    }

    #[tokio::test]
    async fn scrape_all_targets_failing() {
        let fetcher = ScriptedFetcher::with(&[]);
        let metrics = ExporterMetrics::new();
        let targets = vec![target("a", Duration::ZERO), target("b", Duration::ZERO)];
        let collector = Collector::new(targets, Box::new(fetcher), metrics.clone());

        let obs = collector.scrape(deadline()).await;
        assert!(obs.is_empty());
        assert_eq!(1, metrics.scrape_errors("collect.current.a"));
        assert_eq!(1, metrics.scrape_errors("collect.current.b"));
        assert!(metrics.last_scrape_error());
    }

    #[tokio::test]
    async fn scrape_no_targets() {
        let metrics = ExporterMetrics::new();
        let collector = Collector::new(Vec::new(), Box::new(ScriptedFetcher::with(&[])), metrics.clone());

        assert!(collector.scrape(deadline()).await.is_empty());
        assert_eq!(1, metrics.scrapes());
        assert!(!metrics.last_scrape_error());
    }

    #[tokio::test]
    async fn scrape_optional_fields_suppressed() {
        let fetcher = ScriptedFetcher::with(&[("a", reading(10.0))]);
        let collector = Collector::new(
            vec![target("a", Duration::ZERO)],
            Box::new(fetcher),
            ExporterMetrics::new(),
        );

        let obs = collector.scrape(deadline()).await;
        for field in [
            WeatherField::Clouds,
            WeatherField::Rain1h,
            WeatherField::Rain3h,
            WeatherField::Snow1h,
            WeatherField::Snow3h,
        ] {
            assert_eq!(None, value(&obs, "a", field));
        }
    }

    #[tokio::test]
    async fn scrape_optional_fields_present() {
        let mut r = reading(10.0);
        r.clouds = Some(42.0);
        r.snow_3h = Some(1.5);
        let fetcher = ScriptedFetcher::with(&[("a", r)]);
        let collector = Collector::new(
            vec![target("a", Duration::ZERO)],
            Box::new(fetcher),
            ExporterMetrics::new(),
        );

        let obs = collector.scrape(deadline()).await;
        let clouds: Vec<_> = obs.iter().filter(|o| o.field == WeatherField::Clouds).collect();
        assert_eq!(1, clouds.len());
        assert_eq!(42.0, clouds[0].value);
        assert_eq!(Some(1.5), value(&obs, "a", WeatherField::Snow3h));
        assert_eq!(None, value(&obs, "a", WeatherField::Rain1h));
        assert_eq!(10, obs.len());
    }

    #[tokio::test]
    async fn rescrape_within_interval_uses_cache() {
        let api = Arc::new(FakeApi::new(Reply::Ok(current(15.0))));
        let metrics = ExporterMetrics::new();
        let fetcher = CachingFetcher::new(Arc::clone(&api), Arc::new(TtlCache::new()), metrics.clone());
        let collector = Collector::new(
            vec![target("a", Duration::from_secs(300))],
            Box::new(fetcher),
            metrics.clone(),
        );

        let first = collector.scrape(deadline()).await;
        api.set_reply(Reply::Ok(current(99.0)));
        let second = collector.scrape(deadline()).await;

        assert_eq!(first, second);
        assert_eq!(1, api.calls());
        assert_eq!(1, metrics.api_requests("a"));
        assert_eq!(1, metrics.cache_hits("a"));
        assert_eq!(2, metrics.scrapes());
    }

    #[tokio::test]
    async fn rescrape_after_failure_serves_nothing_stale() {
        let api = Arc::new(FakeApi::new(Reply::Ok(current(15.0))));
        let metrics = ExporterMetrics::new();
        let fetcher = CachingFetcher::new(Arc::clone(&api), Arc::new(TtlCache::new()), metrics.clone());
        let collector = Collector::new(vec![target("a", Duration::ZERO)], Box::new(fetcher), metrics.clone());

        assert!(!collector.scrape(deadline()).await.is_empty());
        api.set_reply(Reply::Unauthorized);
        assert!(collector.scrape(deadline()).await.is_empty());

        assert_eq!(2, metrics.api_requests("a"));
        assert_eq!(1, metrics.scrape_errors("collect.current.a"));
        assert!(metrics.last_scrape_error());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scrapes() {
        let api = Arc::new(FakeApi::new(Reply::Ok(current(15.0))));
        let metrics = ExporterMetrics::new();
        let fetcher = CachingFetcher::new(Arc::clone(&api), Arc::new(TtlCache::new()), metrics.clone());
        let collector = Arc::new(Collector::new(
            vec![target("a", Duration::from_secs(300)), target("b", Duration::from_secs(300))],
            Box::new(fetcher),
            metrics.clone(),
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let collector = Arc::clone(&collector);
            handles.push(tokio::spawn(async move { collector.scrape(deadline()).await }));
        }

        for h in handles {
            let obs = h.await.unwrap();
            assert_eq!(Some(15.0), value(&obs, "a", WeatherField::Temperature));
            assert_eq!(Some(15.0), value(&obs, "b", WeatherField::Temperature));
            assert_eq!(18, obs.len());
        }

        assert_eq!(16, metrics.scrapes());
        assert!(!metrics.last_scrape_error());
        for location in ["a", "b"] {
            assert!(metrics.api_requests(location) >= 1);
            assert_eq!(16, metrics.api_requests(location) + metrics.cache_hits(location));
        }
    }
}
