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

use crate::cache::TtlCache;
use crate::client::{ClientError, WeatherApi};
use crate::config::Target;
use crate::metrics::ExporterMetrics;
use crate::weather::WeatherReading;
use async_trait::async_trait;
use std::error;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug)]
pub enum FetchError {
    Client(ClientError),
    Timeout,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(e) => write!(f, "{}", e),
            Self::Timeout => write!(f, "deadline exceeded fetching current conditions"),
        }
    }
}

impl error::Error for FetchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Client(e) => Some(e),
            Self::Timeout => None,
        }
    }
}

impl From<ClientError> for FetchError {
    fn from(e: ClientError) -> Self {
        Self::Client(e)
    }
}

/// Produce the current conditions for a single target.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Get a reading for `target`, giving up at `deadline`.
    async fn fetch(&self, target: &Target, deadline: Instant) -> Result<WeatherReading, FetchError>;
}

/// `Fetcher` that serves readings from a `TtlCache` while they are fresh and makes
/// a single request to the API otherwise.
///
/// Cache hits and API requests are counted per target. Failed or timed out requests
/// are counted but leave the cache untouched. No retries are made: the next scrape
/// is the retry.
pub struct CachingFetcher<A> {
    api: A,
    cache: Arc<TtlCache>,
    metrics: ExporterMetrics,
}

impl<A> CachingFetcher<A>
where
    A: WeatherApi,
{
    pub fn new(api: A, cache: Arc<TtlCache>, metrics: ExporterMetrics) -> Self {
        CachingFetcher { api, cache, metrics }
    }
}

#[async_trait]
impl<A> Fetcher for CachingFetcher<A>
where
    A: WeatherApi,
{
    async fn fetch(&self, target: &Target, deadline: Instant) -> Result<WeatherReading, FetchError> {
        if let Some(reading) = self.cache.lookup(&target.name, target.interval) {
            tracing::debug!(message = "using cached conditions", target = %target.name);
            self.metrics.cache_hit(&target.name);
            return Ok(reading);
        }

        tracing::info!(message = "fetching current conditions", target = %target.name);
        // Counted before the request so that timeouts and cancelled scrapes are included.
        self.metrics.api_request(&target.name);

        let current = tokio::time::timeout_at(deadline, self.api.current(target.latitude, target.longitude))
            .await
            .map_err(|_| FetchError::Timeout)??;

        let reading = WeatherReading::from(current);
        self.cache.store(&target.name, reading.clone());
        Ok(reading)
    }
}
