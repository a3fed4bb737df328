pub mod math;
pub mod shipping;
pub mod time;
pub mod weather;

use std::sync::Arc;

use broman_common::{Error, Result};
use broman_config::ShippingConfig;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::normalize::normalize_city;
use crate::providers::ToolDefinition;

pub use math::{MathArgs, MathOutcome};
pub use shipping::{ShippingArgs, ShippingQuote};
pub use time::{TimeArgs, TimeReport};
pub use weather::{OpenMeteoProvider, Units, WeatherArgs, WeatherError, WeatherProvider, WeatherReport};

/// Result of a tool invocation, handed back to the model as a tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    fn json(value: &serde_json::Value) -> Self {
        match serde_json::to_string(value) {
            Ok(content) => Self::success(content),
            Err(e) => Self::error(format!("failed to serialize tool output: {e}")),
        }
    }
}

/// The tools the model may call. The set is closed; dispatch is a `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Time,
    Weather,
    Math,
    ShippingCost,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Time,
        ToolKind::Weather,
        ToolKind::Math,
        ToolKind::ShippingCost,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Time => "time",
            ToolKind::Weather => "weather",
            ToolKind::Math => "math",
            ToolKind::ShippingCost => "shippingCost",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::Time => {
                "Returns the current time in an IANA time zone (for example Europe/London)."
            }
            ToolKind::Weather => "Current weather for a city via Open-Meteo.",
            ToolKind::Math => "Evaluates an arithmetic expression (+ - * / % ( )).",
            ToolKind::ShippingCost => {
                "Fixed shipping quote: source total = basePrice x weightKg; target total at a fixed exchange rate."
            }
        }
    }

    pub fn input_schema(self) -> serde_json::Value {
        match self {
            ToolKind::Time => serde_json::json!({
                "type": "object",
                "properties": {
                    "timezone": {
                        "type": "string",
                        "description": "IANA zone name such as 'Europe/Moscow'. Defaults to UTC."
                    }
                },
                "required": []
            }),
            ToolKind::Weather => serde_json::json!({
                "type": "object",
                "properties": {
                    "city": { "type": "string" },
                    "units": { "type": "string", "enum": ["auto", "celsius", "fahrenheit"] }
                },
                "required": ["city"]
            }),
            ToolKind::Math => serde_json::json!({
                "type": "object",
                "properties": {
                    "expr": { "type": "string" }
                },
                "required": ["expr"]
            }),
            ToolKind::ShippingCost => serde_json::json!({
                "type": "object",
                "properties": {
                    "fromCity": { "type": "string" },
                    "toCity": { "type": "string" },
                    "basePrice": { "type": "number", "description": "Price per kilogram in the source currency." },
                    "weightKg": { "type": "number", "minimum": 0 }
                },
                "required": ["fromCity", "toCity", "basePrice", "weightKg"]
            }),
        }
    }

    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A parsed tool invocation carrying its typed input.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Time(TimeArgs),
    Weather(WeatherArgs),
    Math(MathArgs),
    ShippingCost(ShippingArgs),
}

impl ToolCall {
    pub fn parse(name: &str, input: serde_json::Value) -> Result<Self> {
        let kind = ToolKind::from_name(name)
            .ok_or_else(|| Error::Agent(format!("unknown tool: {name}")))?;

        // Models send `{}` or nothing at all for tools without required fields.
        let input = if input.is_null() {
            serde_json::json!({})
        } else {
            input
        };

        Ok(match kind {
            ToolKind::Time => ToolCall::Time(decode(name, input)?),
            ToolKind::Weather => ToolCall::Weather(decode(name, input)?),
            ToolKind::Math => ToolCall::Math(decode(name, input)?),
            ToolKind::ShippingCost => ToolCall::ShippingCost(decode(name, input)?),
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::Time(_) => ToolKind::Time,
            ToolCall::Weather(_) => ToolKind::Weather,
            ToolCall::Math(_) => ToolKind::Math,
            ToolCall::ShippingCost(_) => ToolKind::ShippingCost,
        }
    }
}

fn decode<T: DeserializeOwned>(name: &str, input: serde_json::Value) -> Result<T> {
    serde_json::from_value(input)
        .map_err(|e| Error::Agent(format!("invalid arguments for '{name}': {e}")))
}

/// Executes tool calls. Failures come back as error outputs, never as `Err`.
pub struct Toolbox {
    weather: Arc<dyn WeatherProvider>,
    shipping: ShippingConfig,
}

impl Toolbox {
    pub fn new(weather: Arc<dyn WeatherProvider>, shipping: ShippingConfig) -> Self {
        Self { weather, shipping }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        ToolKind::ALL.into_iter().map(ToolKind::definition).collect()
    }

    pub fn weather(&self) -> &Arc<dyn WeatherProvider> {
        &self.weather
    }

    pub fn shipping(&self) -> &ShippingConfig {
        &self.shipping
    }

    /// Parse and run a call by name, as the model requested it.
    pub async fn execute_named(&self, name: &str, input: serde_json::Value) -> ToolOutput {
        match ToolCall::parse(name, input) {
            Ok(call) => self.execute(call).await,
            Err(e) => {
                warn!("rejected tool call '{name}': {e}");
                ToolOutput::error(e.to_string())
            }
        }
    }

    pub async fn execute(&self, call: ToolCall) -> ToolOutput {
        debug!(tool = call.kind().name(), "executing tool");
        match call {
            ToolCall::Time(args) => {
                let report = time::current_time(args.timezone.as_deref());
                ToolOutput::json(&serde_json::json!(report))
            }
            ToolCall::Weather(args) => {
                let city = normalize_city(&args.city);
                match self.weather.current(&city, args.units).await {
                    Ok(report) => ToolOutput::json(&serde_json::json!(report)),
                    Err(e) => ToolOutput::json(&serde_json::json!({
                        "city": city,
                        "error": e.to_string(),
                    })),
                }
            }
            ToolCall::Math(args) => {
                let outcome = math::run(&args);
                ToolOutput::json(&serde_json::json!(outcome))
            }
            ToolCall::ShippingCost(args) => match shipping::quote(&args, &self.shipping) {
                Ok(quote) => ToolOutput::json(&quote.to_json()),
                Err(e) => ToolOutput::error(e.to_string()),
            },
        }
    }
}
