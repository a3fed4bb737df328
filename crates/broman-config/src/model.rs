use broman_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration, read once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub llm: LlmConfig,
    pub shipping: ShippingConfig,
    pub forecast: ForecastConfig,
    pub weather: WeatherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 400,
            system_prompt: None,
        }
    }
}

/// Fixed-rate currency conversion for shipping quotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShippingConfig {
    pub exchange_rate: f64,
    pub source_currency: String,
    pub target_currency: String,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            exchange_rate: 0.92,
            source_currency: "USD".to_string(),
            target_currency: "EUR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Base address of the remote predictor. Absent means local-only.
    pub remote_url: Option<String>,
    pub remote_key: Option<String>,
    pub timeout_secs: u64,
    /// How many recent samples a caller keeps before evicting the oldest.
    pub window: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_key: None,
            timeout_secs: 5,
            window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub geocoding_url: String,
    pub forecast_url: String,
    pub language: String,
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            geocoding_url: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            language: "ru".to_string(),
            timeout_secs: 10,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let rate = self.shipping.exchange_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::Config(format!(
                "shipping.exchange_rate must be a positive number, got {rate}"
            )));
        }
        if self.forecast.timeout_secs == 0 {
            return Err(Error::Config(
                "forecast.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.weather.timeout_secs == 0 {
            return Err(Error::Config(
                "weather.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.forecast.window < 2 {
            return Err(Error::Config(
                "forecast.window must hold at least 2 samples".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shipping.exchange_rate, 0.92);
        assert_eq!(config.forecast.window, 20);
        assert!(config.forecast.remote_url.is_none());
    }

    #[test]
    fn rejects_non_positive_rate() {
        let mut config = AppConfig::default();
        config.shipping.exchange_rate = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.shipping.exchange_rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_keeps_section_defaults() {
        let config: AppConfig = serde_yaml::from_str("shipping:\n  exchange_rate: 0.5\n").unwrap();
        assert_eq!(config.shipping.exchange_rate, 0.5);
        assert_eq!(config.shipping.target_currency, "EUR");
        assert_eq!(config.gateway.port, 3000);
    }
}
