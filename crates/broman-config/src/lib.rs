pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, ForecastConfig, GatewayConfig, LlmConfig, ShippingConfig, WeatherConfig,
};
