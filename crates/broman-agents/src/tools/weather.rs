use std::time::Duration;

use async_trait::async_trait;
use broman_common::{Error, Result};
use broman_config::WeatherConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Auto,
    Celsius,
    Fahrenheit,
}

impl Units {
    fn temperature_param(self) -> &'static str {
        match self {
            Units::Fahrenheit => "fahrenheit",
            Units::Auto | Units::Celsius => "celsius",
        }
    }

    fn temperature_symbol(self) -> &'static str {
        match self {
            Units::Fahrenheit => "°F",
            Units::Auto | Units::Celsius => "°C",
        }
    }

    fn wind_param(self) -> &'static str {
        match self {
            Units::Fahrenheit => "mph",
            Units::Auto | Units::Celsius => "kmh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherArgs {
    pub city: String,
    #[serde(default)]
    pub units: Units,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub wind_speed: f64,
    pub unit_temperature: String,
    pub unit_wind: String,
    pub summary: String,
    pub provider: String,
}

impl WeatherReport {
    /// `city: condition, temperature+unit, wind speed+unit`
    pub fn one_line(&self) -> String {
        format!(
            "{}: {}, {}{}, wind {} {} ({})",
            self.city,
            self.summary,
            self.temperature,
            self.unit_temperature,
            self.wind_speed,
            self.unit_wind,
            self.provider
        )
    }
}

/// Why a lookup produced no report. Callers render it; nobody propagates it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeatherError {
    #[error("geocoding failed: {0}")]
    GeocodingFailed(u16),
    #[error("city_not_found")]
    CityNotFound,
    #[error("weather failed: {0}")]
    ForecastFailed(u16),
    #[error("no_current_weather")]
    NoCurrentWeather,
    #[error("request failed: {0}")]
    Request(String),
}

/// Geocode a city and fetch its current conditions.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn current(&self, city: &str, units: Units) -> std::result::Result<WeatherReport, WeatherError>;
}

/// Open-Meteo geocoding + forecast APIs. Both calls share one bounded timeout.
pub struct OpenMeteoProvider {
    client: Client,
    geocoding_url: String,
    forecast_url: String,
    language: String,
}

impl OpenMeteoProvider {
    pub fn new(config: &WeatherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Provider(format!("failed to build weather client: {e}")))?;

        Ok(Self {
            client,
            geocoding_url: config.geocoding_url.clone(),
            forecast_url: config.forecast_url.clone(),
            language: config.language.clone(),
        })
    }

    async fn geocode(&self, city: &str) -> std::result::Result<GeoPlace, WeatherError> {
        let resp = self
            .client
            .get(&self.geocoding_url)
            .query(&[
                ("name", city),
                ("count", "1"),
                ("language", self.language.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(WeatherError::GeocodingFailed(resp.status().as_u16()));
        }

        let body: GeoResponse = resp
            .json()
            .await
            .map_err(|e| WeatherError::Request(format!("bad geocoding body: {e}")))?;

        body.results
            .and_then(|places| places.into_iter().next())
            .ok_or(WeatherError::CityNotFound)
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn provider_id(&self) -> &str {
        "open-meteo"
    }

    async fn current(&self, city: &str, units: Units) -> std::result::Result<WeatherReport, WeatherError> {
        let place = self.geocode(city).await?;
        debug!(city = %place.name, lat = place.latitude, lon = place.longitude, "geocoded");

        let latitude = place.latitude.to_string();
        let longitude = place.longitude.to_string();
        let resp = self
            .client
            .get(&self.forecast_url)
            .query(&[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("current", "temperature_2m,weather_code,wind_speed_10m"),
                ("temperature_unit", units.temperature_param()),
                ("wind_speed_unit", units.wind_param()),
                ("timezone", "auto"),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            warn!("open-meteo forecast returned {}", resp.status());
            return Err(WeatherError::ForecastFailed(resp.status().as_u16()));
        }

        let body: ForecastResponse = resp
            .json()
            .await
            .map_err(|e| WeatherError::Request(format!("bad forecast body: {e}")))?;
        let current = body.current.ok_or(WeatherError::NoCurrentWeather)?;

        Ok(WeatherReport {
            city: place.name,
            latitude: place.latitude,
            longitude: place.longitude,
            temperature: current.temperature_2m,
            wind_speed: current.wind_speed_10m,
            unit_temperature: units.temperature_symbol().to_string(),
            unit_wind: units.wind_param().to_string(),
            summary: describe_weather_code(current.weather_code),
            provider: self.provider_id().to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    results: Option<Vec<GeoPlace>>,
}

#[derive(Debug, Deserialize)]
struct GeoPlace {
    name: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<CurrentConditions>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temperature_2m: f64,
    weather_code: i64,
    wind_speed_10m: f64,
}

/// WMO weather interpretation codes.
pub fn describe_weather_code(code: i64) -> String {
    let text = match code {
        0 => "☀️ Clear",
        1 => "🌤 Mainly clear",
        2 => "⛅ Partly cloudy",
        3 => "☁️ Overcast",
        45 => "🌫 Fog",
        48 => "🌫 Rime fog",
        51 => "🌦 Light drizzle",
        53 => "🌦 Drizzle",
        55 => "🌦 Dense drizzle",
        61 => "🌧 Light rain",
        63 => "🌧 Rain",
        65 => "🌧 Heavy rain",
        71 => "❄️ Light snow",
        73 => "❄️ Snow",
        75 => "❄️ Heavy snow",
        80 => "🌦 Light showers",
        81 => "🌦 Showers",
        82 => "🌧 Violent showers",
        95 => "⛈ Thunderstorm",
        96 => "⛈ Thunderstorm with hail",
        99 => "⛈ Severe thunderstorm with hail",
        other => return format!("Weather code: {other}"),
    };
    text.to_string()
}
