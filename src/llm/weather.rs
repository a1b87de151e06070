use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::llm::types::{FailureKind, GenerationError, WeatherSource};
use crate::pipeline::types::{Location, WeatherCondition, WeatherObservation};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_provider_timing;

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    #[serde(default)]
    weather: Vec<WeatherEntry>,
    main: MainReadings,
}

#[derive(Debug, Deserialize)]
struct WeatherEntry {
    main: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct MainReadings {
    temp: f32,
}

impl CurrentWeather {
    fn into_observation(self) -> WeatherObservation {
        let entry = self.weather.into_iter().next();
        WeatherObservation {
            condition: entry
                .as_ref()
                .map(|entry| WeatherCondition::from_main(&entry.main))
                .unwrap_or(WeatherCondition::Neutral),
            temperature_c: self.main.temp,
            description: entry.map(|entry| entry.description).unwrap_or_default(),
        }
    }
}

/// OpenWeatherMap current conditions. Unavailable without an API key.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    api_key: String,
    endpoint: String,
    default_country: String,
    timeout: Duration,
}

impl OpenWeatherClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.weather_api_key.trim().to_string(),
            endpoint: config.weather_endpoint.clone(),
            default_country: config.weather_country_code.clone(),
            timeout: config.weather_timeout(),
        }
    }

    fn query_for(&self, location: &Location) -> String {
        let country = if location.has_country() {
            location.country.as_str()
        } else {
            self.default_country.as_str()
        };
        if country.is_empty() {
            location.city.clone()
        } else {
            format!("{},{}", location.city, country)
        }
    }

    fn request_url(&self, location: &Location) -> Option<Url> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("q", self.query_for(location)),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ],
        )
        .map_err(|err| warn!("Invalid WEATHER_ENDPOINT '{}': {}", self.endpoint, err))
        .ok()
    }

    async fn fetch(&self, url: Url) -> Result<WeatherObservation, GenerationError> {
        let response = get_http_client()
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                let text = err.to_string().replace(&self.api_key, "[redacted]");
                GenerationError::from_reqwest(&err, text)
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::from_status(status, &body));
        }
        let current = response.json::<CurrentWeather>().await.map_err(|err| {
            GenerationError::new(FailureKind::InvalidResponse, err.to_string())
        })?;
        Ok(current.into_observation())
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn lookup(&self, location: &Location) -> Option<WeatherObservation> {
        if self.api_key.is_empty() || location.city.trim().is_empty() {
            debug!("Weather lookup skipped for '{}'", location);
            return None;
        }
        let url = self.request_url(location)?;
        let metadata = json!({ "location": location.to_string() });
        match log_provider_timing("openweathermap", "current", "lookup", Some(metadata), || {
            self.fetch(url)
        })
        .await
        {
            Ok(observation) => Some(observation),
            Err(err) => {
                warn!("Weather unavailable for {}: {}", location, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_current_weather_payload() {
        let current: CurrentWeather = serde_json::from_value(json!({
            "weather": [{ "main": "Rain", "description": "light rain" }],
            "main": { "temp": 26.4, "humidity": 88 }
        }))
        .expect("json");
        let observation = current.into_observation();
        assert_eq!(observation.condition, WeatherCondition::Rain);
        assert_eq!(observation.description, "light rain");
        assert!((observation.temperature_c - 26.4).abs() < f32::EPSILON);
    }

    #[test]
    fn query_uses_default_country_when_missing() {
        let client = OpenWeatherClient::from_config(&Config::default());
        assert_eq!(client.query_for(&Location::parse("Pune")), "Pune,IN");
        assert_eq!(client.query_for(&Location::parse("London, GB")), "London,GB");
        let url = client.request_url(&Location::parse("New York, US")).expect("url");
        assert!(url.as_str().contains("q=New+York%2CUS"));
        assert!(url.as_str().contains("units=metric"));
    }

    #[tokio::test]
    async fn missing_key_means_unavailable() {
        let client = OpenWeatherClient::from_config(&Config::default());
        assert!(client.lookup(&Location::parse("Mumbai")).await.is_none());
    }
}
