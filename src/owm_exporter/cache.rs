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

use crate::weather::WeatherReading;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    reading: WeatherReading,
    fetched: Instant,
}

/// Most recent reading per target, along with when it was fetched.
///
/// All access goes through a single lock that is never held across an `.await` so the
/// cache can be shared between concurrent scrapes. There is at most one entry per target
/// name and entries are replaced in place, never removed.
#[derive(Debug, Default)]
pub struct TtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the reading stored for `name` if it was fetched less than `interval` ago.
    pub fn lookup(&self, name: &str, interval: Duration) -> Option<WeatherReading> {
        self.lookup_at(name, interval, Instant::now())
    }

    /// Get the reading stored for `name` if it was fetched less than `interval` before `now`.
    ///
    /// An entry exactly `interval` old is stale.
    pub fn lookup_at(&self, name: &str, interval: Duration, now: Instant) -> Option<WeatherReading> {
        let entries = self.lock();
        entries
            .get(name)
            .filter(|e| now.saturating_duration_since(e.fetched) < interval)
            .map(|e| e.reading.clone())
    }

    /// Store `reading` for `name` as fetched right now, replacing any existing entry.
    pub fn store(&self, name: &str, reading: WeatherReading) {
        self.store_at(name, reading, Instant::now())
    }

    /// Store `reading` for `name` as fetched at `fetched`, replacing any existing entry.
    pub fn store_at(&self, name: &str, reading: WeatherReading, fetched: Instant) {
        let mut entries = self.lock();
        entries.insert(name.to_owned(), CacheEntry { reading, fetched });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // Every critical section is a single map operation so a panic while the
        // lock is held can't leave a partially written entry behind.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
