mod logging;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use broman_agents::{
    AgentRuntime, ChatOptions, CompletionGuard, FallbackRouter, ForecastEngine, Metric,
    SeriesWindow, clamp_horizon, evaluate,
};
use broman_common::Message;
use broman_config::{AppConfig, ConfigLoader};
use broman_gateway::GatewayServer;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const TURN_BUFFER: usize = 32;

#[derive(Parser)]
#[command(name = "broman", version, about = "Tool-augmented conversational assistant")]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ~/.broman/config.yml when present.
    #[arg(long, global = true, env = "BROMAN_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ask a single question and stream the answer
    Ask {
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Interactive session reading one message per line
    Chat {
        #[arg(long)]
        model: Option<String>,
        /// Print a throughput and latency forecast after every reply
        #[arg(long)]
        forecast: bool,
    },
    /// Evaluate an arithmetic expression
    Calc {
        #[arg(required = true, allow_hyphen_values = true)]
        expr: Vec<String>,
    },
    /// Forecast the next values of a series
    Forecast {
        #[arg(required = true, allow_hyphen_values = true)]
        values: Vec<f64>,
        #[arg(long)]
        horizon: Option<f64>,
        /// chars_per_sec or latency_ms
        #[arg(long)]
        metric: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_json);

    match cli.command {
        Commands::Calc { expr } => {
            let expr = expr.join(" ");
            match evaluate(&expr) {
                Ok(value) => println!("{value}"),
                Err(e) => bail!("{expr}: {e}"),
            }
        }
        Commands::Forecast {
            values,
            horizon,
            metric,
        } => {
            let config = load_config(cli.config)?;
            let engine = ForecastEngine::from_config(&config.forecast)?;
            let result = engine
                .forecast(
                    &values,
                    clamp_horizon(horizon),
                    Metric::from_label(metric.as_deref()),
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Serve { host, port } => {
            let mut config = load_config(cli.config)?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            GatewayServer::new(config)?.run().await?;
        }
        Commands::Ask { text, model } => {
            let config = load_config(cli.config)?;
            let session = Session::new(&config, model)?;
            let conversation = vec![Message::user(text.join(" "))];
            session.turn(conversation).await?;
        }
        Commands::Chat { model, forecast } => {
            let config = load_config(cli.config)?;
            let session = Session::new(&config, model)?;
            let tracker = if forecast {
                Some(TurnTracker::new(&config)?)
            } else {
                None
            };
            run_chat(session, tracker).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    loader.load().context("failed to load configuration")
}

struct Session {
    runtime: AgentRuntime,
    fallback: Arc<FallbackRouter>,
    options: ChatOptions,
}

struct TurnStats {
    text: String,
    latency_ms: f64,
    chars_per_sec: Option<f64>,
}

impl Session {
    fn new(config: &AppConfig, model: Option<String>) -> Result<Self> {
        let runtime = AgentRuntime::from_config(config)?;
        if !runtime.has_provider() {
            info!("no model provider configured, answers come from the fallback router");
        }
        let fallback = Arc::new(FallbackRouter::from_toolbox(runtime.toolbox()));
        Ok(Self {
            runtime,
            fallback,
            options: ChatOptions {
                system: None,
                model,
            },
        })
    }

    /// Run one guarded turn, printing fragments to stdout as they arrive.
    async fn turn(&self, conversation: Vec<Message>) -> Result<TurnStats> {
        let started = Instant::now();
        let upstream = self.runtime.stream_reply(&conversation, &self.options);
        let (mut rx, handle) = CompletionGuard::new(self.fallback.clone()).spawn(
            upstream,
            conversation,
            TURN_BUFFER,
        );

        let mut stdout = std::io::stdout();
        let mut text = String::new();
        let mut first: Option<Instant> = None;
        while let Some(fragment) = rx.recv().await {
            first.get_or_insert_with(Instant::now);
            stdout.write_all(fragment.as_bytes())?;
            stdout.flush()?;
            text.push_str(&fragment);
        }
        println!();

        let outcome = handle.await.context("chat turn task failed")?;
        info!(?outcome, chars = text.chars().count(), "turn finished");

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let chars_per_sec = first.and_then(|t| {
            let elapsed = t.elapsed().as_secs_f64();
            (elapsed > 0.0).then(|| text.chars().count() as f64 / elapsed)
        });
        Ok(TurnStats {
            text,
            latency_ms,
            chars_per_sec,
        })
    }
}

/// Keeps recent per-turn samples and forecasts where they are heading.
struct TurnTracker {
    engine: ForecastEngine,
    throughput: SeriesWindow,
    latency: SeriesWindow,
}

impl TurnTracker {
    fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            engine: ForecastEngine::from_config(&config.forecast)?,
            throughput: SeriesWindow::new(config.forecast.window),
            latency: SeriesWindow::new(config.forecast.window),
        })
    }

    async fn record(&mut self, stats: &TurnStats) -> Result<()> {
        if let Some(rate) = stats.chars_per_sec {
            self.throughput.push(rate);
        }
        self.latency.push(stats.latency_ms);

        let horizon = clamp_horizon(None);
        let throughput = self
            .engine
            .forecast(&self.throughput.to_vec(), horizon, Metric::CharsPerSec)
            .await;
        let latency = self
            .engine
            .forecast(&self.latency.to_vec(), horizon, Metric::LatencyMs)
            .await;

        eprintln!(
            "[forecast] chars/sec {} | latency ms {}",
            serde_json::to_string(&throughput)?,
            serde_json::to_string(&latency)?
        );
        Ok(())
    }
}

async fn run_chat(session: Session, mut tracker: Option<TurnTracker>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<Message> = Vec::new();

    eprintln!("broman chat: one message per line, /exit to quit");
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }

        history.push(Message::user(line));
        let stats = session.turn(history.clone()).await?;
        history.push(Message::assistant(stats.text.as_str()));

        if let Some(tracker) = tracker.as_mut() {
            tracker.record(&stats).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_forecast_flags() {
        let cli = Cli::try_parse_from([
            "broman", "forecast", "1", "2.5", "-3", "--horizon", "4", "--metric", "latency_ms",
        ])
        .unwrap();
        match cli.command {
            Commands::Forecast {
                values,
                horizon,
                metric,
            } => {
                assert_eq!(values, vec![1.0, 2.5, -3.0]);
                assert_eq!(horizon, Some(4.0));
                assert_eq!(metric.as_deref(), Some("latency_ms"));
            }
            _ => panic!("expected forecast command"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["broman", "chat", "--forecast", "--log-json"]).unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Commands::Chat { forecast: true, .. }));
    }

    #[test]
    fn ask_requires_text() {
        assert!(Cli::try_parse_from(["broman", "ask"]).is_err());
    }
}
