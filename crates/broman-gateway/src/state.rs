use std::sync::Arc;

use broman_agents::{AgentRuntime, FallbackRouter, ForecastEngine};
use broman_common::Result;
use broman_config::AppConfig;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub config: AppConfig,
    pub runtime: AgentRuntime,
    pub fallback: Arc<FallbackRouter>,
    pub forecast: ForecastEngine,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let runtime = AgentRuntime::from_config(&config)?;
        let forecast = ForecastEngine::from_config(&config.forecast)?;
        Ok(Self::from_parts(config, runtime, forecast))
    }

    /// Assemble state from prebuilt parts; the fallback shares the runtime's tools.
    pub fn from_parts(config: AppConfig, runtime: AgentRuntime, forecast: ForecastEngine) -> Self {
        let fallback = Arc::new(FallbackRouter::from_toolbox(runtime.toolbox()));
        Self {
            config,
            runtime,
            fallback,
            forecast,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}
