//! Short-horizon forecasts of a numeric series.
//!
//! A configured remote predictor is tried first. Any failure there (transport,
//! status, malformed body, timeout) silently falls through to the local
//! exponential-smoothing-plus-drift method, so callers always get a result.

use std::collections::VecDeque;
use std::time::Duration;

use broman_common::{Error, Result};
use broman_config::ForecastConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, instrument, warn};

use crate::tools::shipping::round2;

pub const DEFAULT_HORIZON: u32 = 3;
pub const MAX_HORIZON: u32 = 8;
pub const EMA_ALPHA: f64 = 0.35;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    CharsPerSec,
    LatencyMs,
}

impl Metric {
    /// Anything other than `latency_ms` is treated as `chars_per_sec`.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("latency_ms") => Metric::LatencyMs,
            _ => Metric::CharsPerSec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Engine {
    Local,
    Remote(String),
}

impl Engine {
    pub fn label(&self) -> &str {
        match self {
            Engine::Local => "local",
            Engine::Remote(name) => name,
        }
    }
}

impl Serialize for Engine {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResult {
    pub engine: Engine,
    pub horizon: u32,
    pub last_value: f64,
    pub predictions: Vec<f64>,
}

/// Missing, zero or NaN means the default; everything else lands in `1..=8`.
pub fn clamp_horizon(requested: Option<f64>) -> u32 {
    match requested {
        Some(h) if h.is_finite() && h != 0.0 => h.clamp(1.0, MAX_HORIZON as f64).floor() as u32,
        _ => DEFAULT_HORIZON,
    }
}

/// `s0 = x0`, `si = a*xi + (1-a)*s(i-1)`; returns the last `s`, or 0 when empty.
pub fn ema(series: &[f64], alpha: f64) -> f64 {
    let Some((&first, rest)) = series.split_first() else {
        return 0.0;
    };
    rest.iter()
        .fold(first, |s, &x| alpha * x + (1.0 - alpha) * s)
}

/// EMA of the whole series plus the EMA gap between its upper and lower half,
/// extrapolated linearly over the horizon.
pub fn local_forecast(series: &[f64], horizon: u32) -> Vec<f64> {
    if series.len() < 2 {
        return Vec::new();
    }
    let base = ema(series, EMA_ALPHA);
    let half = (series.len() / 2).max(1);
    let drift = ema(&series[half..], EMA_ALPHA) - ema(&series[..half], EMA_ALPHA);

    (1..=horizon)
        .map(|step| round2(base + drift * step as f64))
        .collect()
}

#[derive(Serialize)]
struct RemoteRequest<'a> {
    series: &'a [f64],
    horizon: u32,
    metric: Metric,
}

#[derive(Deserialize)]
struct RemoteResponse {
    predictions: Option<Vec<serde_json::Value>>,
    engine: Option<String>,
}

/// Client for an external `POST /forecast` predictor.
pub struct RemotePredictor {
    client: Client,
    url: String,
    key: Option<String>,
}

impl RemotePredictor {
    pub fn new(base_url: &str, key: Option<String>, timeout: Duration) -> Result<Self> {
        let base = url::Url::parse(base_url.trim())
            .map_err(|e| Error::Config(format!("invalid forecast url {base_url:?}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Provider(format!("failed to build forecast client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/forecast", base.as_str().trim_end_matches('/')),
            key: key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub async fn predict(
        &self,
        series: &[f64],
        horizon: u32,
        metric: Metric,
    ) -> Result<(Vec<f64>, String)> {
        let mut request = self.client.post(&self.url).json(&RemoteRequest {
            series,
            horizon,
            metric,
        });
        if let Some(key) = &self.key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::Provider(format!("forecast proxy request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Provider(format!("proxy {}", resp.status().as_u16())));
        }

        let body: RemoteResponse = resp
            .json()
            .await
            .map_err(|e| Error::Provider(format!("bad response: {e}")))?;

        let raw = body
            .predictions
            .ok_or_else(|| Error::Provider("bad response: missing predictions".to_string()))?;
        let predictions: Vec<f64> = raw
            .iter()
            .map(|v| v.as_f64().filter(|x| x.is_finite()))
            .collect::<Option<_>>()
            .ok_or_else(|| Error::Provider("bad response: non-numeric prediction".to_string()))?;
        if predictions.len() != horizon as usize {
            return Err(Error::Provider(format!(
                "bad response: expected {horizon} predictions, got {}",
                predictions.len()
            )));
        }

        let engine = body
            .engine
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "remote".to_string());
        Ok((predictions, engine))
    }
}

pub struct ForecastEngine {
    remote: Option<RemotePredictor>,
}

impl ForecastEngine {
    pub fn local() -> Self {
        Self { remote: None }
    }

    pub fn with_remote(remote: RemotePredictor) -> Self {
        Self {
            remote: Some(remote),
        }
    }

    pub fn from_config(config: &ForecastConfig) -> Result<Self> {
        match config.remote_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(Self::with_remote(RemotePredictor::new(
                url,
                config.remote_key.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(Self::local()),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Never fails: fewer than two finite samples yields an empty local result.
    #[instrument(skip(self, series), fields(samples = series.len()))]
    pub async fn forecast(&self, series: &[f64], horizon: u32, metric: Metric) -> ForecastResult {
        let series: Vec<f64> = series.iter().copied().filter(|x| x.is_finite()).collect();
        let horizon = horizon.clamp(1, MAX_HORIZON);
        let last_value = series.last().copied().unwrap_or(0.0);

        if series.len() < 2 {
            return ForecastResult {
                engine: Engine::Local,
                horizon,
                last_value,
                predictions: Vec::new(),
            };
        }

        if let Some(remote) = &self.remote {
            match remote.predict(&series, horizon, metric).await {
                Ok((predictions, engine)) => {
                    debug!(engine = %engine, "remote forecast succeeded");
                    return ForecastResult {
                        engine: Engine::Remote(engine),
                        horizon,
                        last_value,
                        predictions,
                    };
                }
                Err(e) => warn!("remote forecast failed, using local method: {e}"),
            }
        }

        ForecastResult {
            engine: Engine::Local,
            horizon,
            last_value,
            predictions: local_forecast(&series, horizon),
        }
    }
}

/// Caller-side FIFO that keeps only the most recent samples of a series.
#[derive(Debug, Clone)]
pub struct SeriesWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl SeriesWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Non-finite samples are dropped.
    pub fn push(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}
