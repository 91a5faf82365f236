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

use crate::client::{CurrentWeather, Precipitation};

/// Normalized snapshot of current conditions at a single location.
///
/// Temperatures are in degrees celsius, pressure in hPa, visibility in meters, wind
/// speed in meters per second, wind direction in degrees, cloud cover in percent, and
/// precipitation in millimeters.
///
/// Optional fields are `None` when the API didn't report a value or reported zero. A
/// missing value is not exported as a metric rather than exported as a misleading zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherReading {
    pub location: String,
    pub temperature: f64,
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub feels_like: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub visibility: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub clouds: Option<f64>,
    pub rain_1h: Option<f64>,
    pub rain_3h: Option<f64>,
    pub snow_1h: Option<f64>,
    pub snow_3h: Option<f64>,
}

impl From<CurrentWeather> for WeatherReading {
    fn from(cw: CurrentWeather) -> Self {
        let (rain_1h, rain_3h) = volumes(cw.rain.as_ref());
        let (snow_1h, snow_3h) = volumes(cw.snow.as_ref());

        WeatherReading {
            location: cw.name,
            temperature: cw.main.temp,
            temperature_min: cw.main.temp_min,
            temperature_max: cw.main.temp_max,
            feels_like: cw.main.feels_like,
            pressure: cw.main.pressure,
            humidity: cw.main.humidity,
            visibility: cw.visibility.unwrap_or_default(),
            wind_speed: cw.wind.speed,
            wind_direction: cw.wind.deg,
            clouds: non_zero(cw.clouds.and_then(|c| c.all)),
            rain_1h,
            rain_3h,
            snow_1h,
            snow_3h,
        }
    }
}

fn volumes(p: Option<&Precipitation>) -> (Option<f64>, Option<f64>) {
    match p {
        Some(p) => (non_zero(p.one_hour), non_zero(p.three_hours)),
        None => (None, None),
    }
}

fn non_zero(v: Option<f64>) -> Option<f64> {
    v.filter(|v| *v != 0.0)
}
