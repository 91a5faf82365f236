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

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;

pub const DEFAULT_API_URL: &str = "https://api.openweathermap.org/data/2.5/";

/// Error making a request to the OpenWeatherMap API.
///
/// None of the variants include the API key: URLs are stored without their query
/// string and wrapped `reqwest` errors have their URL removed.
#[derive(Debug)]
pub enum ClientError {
    InvalidUrl(String),
    Transport(reqwest::Error),
    Unauthorized,
    Unexpected(StatusCode, Url),
    Decode(reqwest::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(msg) => write!(f, "invalid API URL: {}", msg),
            Self::Transport(e) => write!(f, "request failed: {}", e),
            Self::Unauthorized => write!(f, "API key rejected"),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Decode(e) => write!(f, "unable to decode response: {}", e),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

/// Source of current weather conditions for a pair of coordinates.
#[async_trait]
pub trait WeatherApi: Send + Sync {
    async fn current(&self, latitude: f64, longitude: f64) -> Result<CurrentWeather, ClientError>;
}

pub struct OpenWeatherClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl OpenWeatherClient {
    const USER_AGENT: &'static str = "owm_exporter (https://github.com/56quarters/owm_exporter)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: &str, api_key: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(format!("{} cannot be a base URL", base_url)));
        }

        Ok(OpenWeatherClient {
            client,
            base_url,
            api_key: api_key.to_owned(),
        })
    }

    fn current_url(&self, latitude: f64, longitude: f64) -> Url {
        let mut url = self.base_url.clone();
        // Checked in new() that this URL can be a base, so this always succeeds.
        if let Ok(mut p) = url.path_segments_mut() {
            p.pop_if_empty().push("weather");
        }

        url.query_pairs_mut()
            .clear()
            .append_pair("lat", &latitude.to_string())
            .append_pair("lon", &longitude.to_string())
            .append_pair("units", "metric")
            .append_pair("appid", &self.api_key);

        url
    }
}

impl fmt::Debug for OpenWeatherClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenWeatherClient")
            .field("client", &self.client)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl WeatherApi for OpenWeatherClient {
    async fn current(&self, latitude: f64, longitude: f64) -> Result<CurrentWeather, ClientError> {
        let request_url = self.current_url(latitude, longitude);
        let display_url = without_query(&request_url);
        tracing::debug!(message = "making current weather request", url = %display_url, latitude = latitude, longitude = longitude);

        let res = self
            .client
            .get(request_url)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.without_url()))?;

        let status = res.status();
        if status == StatusCode::OK {
            res.json::<CurrentWeather>()
                .await
                .map_err(|e| ClientError::Decode(e.without_url()))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(ClientError::Unauthorized)
        } else {
            Err(ClientError::Unexpected(status, display_url))
        }
    }
}

fn without_query(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_query(None);
    out
}

/// Current conditions as returned by the `/weather` endpoint.
///
/// Only the fields exported as metrics are modeled. Every section is optional
/// in responses from the API and defaults to zero values when missing.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CurrentWeather {
    #[serde(default)]
    pub main: MainConditions,
    #[serde(default)]
    pub visibility: Option<f64>,
    #[serde(default)]
    pub wind: Wind,
    #[serde(default)]
    pub clouds: Option<Clouds>,
    #[serde(default)]
    pub rain: Option<Precipitation>,
    #[serde(default)]
    pub snow: Option<Precipitation>,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MainConditions {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Wind {
    pub speed: f64,
    pub deg: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Clouds {
    pub all: Option<f64>,
}

/// Rain or snow volume, in millimeters.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Precipitation {
    #[serde(rename = "1h")]
    pub one_hour: Option<f64>,
    #[serde(rename = "3h")]
    pub three_hours: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const API_KEY: &str = "secret-key-123";

    fn client(base_url: &str) -> OpenWeatherClient {
        OpenWeatherClient::new(Client::new(), base_url, API_KEY).unwrap()
    }

    #[test]
    fn current_url_with_trailing_slash() {
        let c = client(DEFAULT_API_URL);
        let url = c.current_url(50.08, 14.43);
        assert_eq!(
            "https://api.openweathermap.org/data/2.5/weather?lat=50.08&lon=14.43&units=metric&appid=secret-key-123",
            url.as_str()
        );
    }

    #[test]
    fn current_url_without_trailing_slash() {
        let c = client("http://localhost:1234/owm");
        let url = c.current_url(-1.5, 2.0);
        assert_eq!("/owm/weather", url.path());
        assert_eq!(Some("lat=-1.5&lon=2&units=metric&appid=secret-key-123"), url.query());
    }

    #[test]
    fn invalid_base_url() {
        let res = OpenWeatherClient::new(Client::new(), "not a url", API_KEY);
        assert!(matches!(res, Err(ClientError::InvalidUrl(_))));

        let res = OpenWeatherClient::new(Client::new(), "mailto:someone@example.com", API_KEY);
        assert!(matches!(res, Err(ClientError::InvalidUrl(_))));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = client(DEFAULT_API_URL);
        assert!(!format!("{:?}", c).contains(API_KEY));
    }

    #[test]
    fn decode_full_response() {
        let body = json!({
            "coord": {"lon": 14.43, "lat": 50.08},
            "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
            "main": {"temp": 12.5, "feels_like": 11.2, "temp_min": 10.0, "temp_max": 14.1, "pressure": 1012, "humidity": 81},
            "visibility": 10000,
            "wind": {"speed": 4.6, "deg": 250},
            "clouds": {"all": 75},
            "rain": {"1h": 0.31},
            "name": "Prague",
            "cod": 200
        });

        let cw: CurrentWeather = serde_json::from_value(body).unwrap();
        assert_eq!(12.5, cw.main.temp);
        assert_eq!(1012.0, cw.main.pressure);
        assert_eq!(Some(10000.0), cw.visibility);
        assert_eq!(250.0, cw.wind.deg);
        assert_eq!(Some(75.0), cw.clouds.unwrap().all);
        assert_eq!(Some(0.31), cw.rain.unwrap().one_hour);
        assert_eq!(None, cw.snow);
        assert_eq!("Prague", cw.name);
    }

    #[test]
    fn decode_sparse_response() {
        let cw: CurrentWeather = serde_json::from_value(json!({"main": {"temp": 3.0}, "wind": {"speed": 0.0}})).unwrap();
        assert_eq!(3.0, cw.main.temp);
        assert_eq!(0.0, cw.main.humidity);
        assert_eq!(0.0, cw.wind.deg);
        assert_eq!(None, cw.clouds);
        assert_eq!("", cw.name);
    }

    #[tokio::test]
    async fn current_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("lat", "50.08"))
            .and(query_param("lon", "14.43"))
            .and(query_param("units", "metric"))
            .and(query_param("appid", API_KEY))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "main": {"temp": 21.5, "feels_like": 21.0, "temp_min": 20.0, "temp_max": 23.0, "pressure": 1015, "humidity": 40},
                "wind": {"speed": 2.1, "deg": 90},
                "name": "Prague"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cw = client(&server.uri()).current(50.08, 14.43).await.unwrap();
        assert_eq!(21.5, cw.main.temp);
        assert_eq!(90.0, cw.wind.deg);
        assert_eq!("Prague", cw.name);
    }

    #[tokio::test]
    async fn current_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"cod": 401, "message": "Invalid API key"})))
            .mount(&server)
            .await;

        let err = client(&server.uri()).current(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
    }

    #[tokio::test]
    async fn current_unexpected_status_hides_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server.uri()).current(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, ClientError::Unexpected(StatusCode::SERVICE_UNAVAILABLE, _)));
        assert!(!err.to_string().contains(API_KEY));
    }

    #[tokio::test]
    async fn current_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client(&server.uri()).current(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(!err.to_string().contains(API_KEY));
    }

    #[tokio::test]
    async fn current_connection_refused_hides_key() {
        // Nothing listens on the discard port locally.
        let err = client("http://127.0.0.1:9/").current(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(!err.to_string().contains(API_KEY));
    }
}
