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

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_yaml::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "unable to read config: {}", e),
            Self::Parse(e) => write!(f, "unable to parse config: {}", e),
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

/// A location to fetch current weather conditions for.
///
/// The name of a target is used as the key for cached responses and as the value
/// of the `location` label of all metrics emitted for it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub name: String,
    #[serde(rename = "lat", deserialize_with = "coordinate")]
    pub latitude: f64,
    #[serde(rename = "lon", deserialize_with = "coordinate")]
    pub longitude: f64,
    /// Minimum time between requests to the API for this target. Zero means
    /// conditions are fetched on every scrape.
    #[serde(default, deserialize_with = "interval")]
    pub interval: Duration,
}

/// Validated exporter configuration loaded from YAML.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Config {
    /// Read, parse, and validate configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("apiKey must not be empty".to_owned()));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Invalid("target name must not be empty".to_owned()));
            }

            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate target name {}", target.name)));
            }

            if !(-90.0..=90.0).contains(&target.latitude) {
                return Err(ConfigError::Invalid(format!(
                    "latitude {} for target {} must be between -90 and 90",
                    target.latitude, target.name
                )));
            }

            if !(-180.0..=180.0).contains(&target.longitude) {
                return Err(ConfigError::Invalid(format!(
                    "longitude {} for target {} must be between -180 and 180",
                    target.longitude, target.name
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cfg: Config = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

// Manual impl so that the API key never ends up in logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("targets", &self.targets)
            .finish()
    }
}

/// Accept coordinates as either numbers or numeric strings.
fn coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Coordinate {
        Number(f64),
        Text(String),
    }

    match Coordinate::deserialize(deserializer)? {
        Coordinate::Number(v) => Ok(v),
        Coordinate::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| D::Error::custom(format!("invalid coordinate {:?}: {}", s, e))),
    }
}

/// Interval in (possibly fractional) seconds.
fn interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(|e| D::Error::custom(format!("invalid interval {}: {}", secs, e)))
}
