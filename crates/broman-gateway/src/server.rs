use broman_common::{Error, Result};
use broman_config::AppConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::{AppState, SharedState};

/// Binds the configured address and serves the HTTP API until Ctrl-C.
pub struct GatewayServer {
    state: SharedState,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Result<Self> {
        Ok(Self {
            state: AppState::new(config)?.shared(),
        })
    }

    pub fn from_state(state: SharedState) -> Self {
        Self { state }
    }

    pub async fn run(self) -> Result<()> {
        let gateway = &self.state.config.gateway;
        let listener = TcpListener::bind((gateway.host.as_str(), gateway.port))
            .await
            .map_err(|e| {
                Error::Gateway(format!("failed to bind {}:{}: {e}", gateway.host, gateway.port))
            })?;
        info!("gateway listening on http://{}", listener.local_addr()?);
        if !self.state.runtime.has_provider() {
            info!("no LLM provider configured, chat answers come from the fallback router");
        }

        let app = build_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
