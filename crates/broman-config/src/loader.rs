use std::path::{Path, PathBuf};

use broman_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::AppConfig;

/// Loads [`AppConfig`] from an optional file, then applies environment overrides.
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { path: None }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// `~/.broman/config.yml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".broman").join("config.yml"))
    }

    /// Read the file (if any), the `.env` file (if any) and the process environment.
    pub fn load(&self) -> Result<AppConfig> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("ignoring unreadable .env file: {e}"),
        }
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Same as [`ConfigLoader::load`] but with an injectable environment.
    pub fn load_with_env<F>(&self, env: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.resolve_path() {
            Some(path) => {
                info!("loading config from {}", path.display());
                Self::read_file(&path)?
            }
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config, env)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_path(&self) -> Option<PathBuf> {
        match &self.path {
            Some(path) => Some(path.clone()),
            None => Self::default_path().filter(|p| p.is_file()),
        }
    }

    fn read_file(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_env_overrides<F>(config: &mut AppConfig, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(key) = get("OPENAI_API_KEY") {
        config.llm.api_key = Some(key);
    }
    if let Some(url) = get("OPENAI_BASE_URL") {
        config.llm.base_url = Some(url);
    }
    if let Some(model) = get("BROMAN_DEFAULT_MODEL").or_else(|| get("NEXT_PUBLIC_DEFAULT_MODEL")) {
        config.llm.model = model;
    }
    if let Some(rate) = get("EUR_RATE") {
        config.shipping.exchange_rate = rate
            .parse()
            .map_err(|_| Error::Config(format!("EUR_RATE is not a number: '{rate}'")))?;
    }
    if let Some(url) = get("TOTO_PROXY_URL") {
        config.forecast.remote_url = Some(url);
    }
    if let Some(key) = get("TOTO_PROXY_KEY") {
        config.forecast.remote_key = Some(key);
    }
    if let Some(host) = get("BROMAN_HOST") {
        config.gateway.host = host;
    }
    if let Some(port) = get("BROMAN_PORT") {
        config.gateway.port = port
            .parse()
            .map_err(|_| Error::Config(format!("BROMAN_PORT is not a port: '{port}'")))?;
    }
    Ok(())
}
