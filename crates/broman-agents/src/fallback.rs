//! Deterministic answers for turns where the model produced nothing.
//!
//! Rules are tried in a fixed order (arithmetic, shipping, weather, time) and
//! the first that matches the latest user message produces the answer. The
//! time rule always matches, so routing cannot come up empty.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use broman_common::{Message, Result, last_user_text};
use broman_config::ShippingConfig;
use regex::Regex;
use tracing::{debug, instrument};

use crate::calc;
use crate::normalize::{normalize_city, strip_temporal};
use crate::tools::shipping::{self, ShippingArgs};
use crate::tools::time;
use crate::tools::{Toolbox, Units, WeatherProvider};

static EXPR_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9+\-*/()%.,\s]+").expect("expression run regex should compile")
});

static OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+\-*/()%]").expect("operator regex should compile"));

static SHIPPING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)доставк|shipment|shipping").expect("shipping keyword regex should compile")
});

static WEATHER_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)погод|weather").expect("weather keyword regex should compile"));

/// "погода … в <city> [сейчас]?" and its English counterpart.
static WEATHER_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:погод[аы]?|weather)(?:\s+\S+){0,3}?\s+(?:в|во|на|in|at)\s+([^?!.:,]+?)(?:\s+(?:прямо\s+сейчас|сейчас|сегодня|right\s+now|now|today))?[\s?!.:,]*$",
    )
    .expect("weather phrase regex should compile")
});

static LOCATIVE_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:в|во|на|in|at)\s+([A-Za-z\x{0400}-\x{052F}Ёё][A-Za-z\x{0400}-\x{052F}0-9Ёё\- ]{1,50})",
    )
    .expect("locative phrase regex should compile")
});

static TIMEZONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z]+/[A-Za-z_]+(?:/[A-Za-z_]+)?)").expect("timezone regex should compile")
});

pub const SHIPPING_PROMPT: &str =
    "Please provide the shipping parameters: fromCity, toCity, basePrice and weightKg.";

pub const CITY_PROMPT: &str =
    "Please name a city for the weather lookup (for example: \"What is the weather in Rostov-on-Don?\").";

/// Produces the single answer sent when the primary stream stayed silent.
#[async_trait]
pub trait Fallback: Send + Sync {
    async fn answer(&self, conversation: &[Message]) -> Result<String>;
}

/// Which rule a message routes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Arithmetic(String),
    Shipping,
    Weather,
    Time,
}

/// First matching rule wins; `Time` is the unconditional default.
pub fn classify(text: &str) -> Intent {
    if let Some(expr) = pick_expression(text) {
        Intent::Arithmetic(expr)
    } else if SHIPPING_KEYWORD.is_match(text) {
        Intent::Shipping
    } else if WEATHER_KEYWORD.is_match(text) {
        Intent::Weather
    } else {
        Intent::Time
    }
}

/// Longest arithmetic-looking run containing a digit and an operator.
/// Ties go to the earliest run.
pub fn pick_expression(text: &str) -> Option<String> {
    EXPR_RUN
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|c| c.chars().any(|ch| ch.is_ascii_digit()) && OPERATOR.is_match(c))
        .fold(None, |best: Option<&str>, c| match best {
            Some(b) if b.len() >= c.len() => Some(b),
            _ => Some(c),
        })
        .map(str::to_string)
}

pub fn pick_timezone(text: &str) -> Option<String> {
    TIMEZONE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Locality named in a weather question, normalized for geocoding.
pub fn pick_city(text: &str) -> Option<String> {
    if let Some(city) = WEATHER_PHRASE.captures(text).and_then(|c| c.get(1)) {
        return Some(normalize_city(city.as_str()));
    }
    LOCATIVE_PHRASE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| normalize_city(&strip_temporal(m.as_str().trim())))
        .filter(|city| !city.is_empty())
}

pub struct FallbackRouter {
    weather: Arc<dyn WeatherProvider>,
    shipping: ShippingConfig,
}

impl FallbackRouter {
    pub fn new(weather: Arc<dyn WeatherProvider>, shipping: ShippingConfig) -> Self {
        Self { weather, shipping }
    }

    /// Share the collaborators the model-facing tools already use.
    pub fn from_toolbox(toolbox: &Toolbox) -> Self {
        Self::new(Arc::clone(toolbox.weather()), toolbox.shipping().clone())
    }

    /// Route a single user message. Every branch ends in text.
    #[instrument(skip_all)]
    pub async fn route(&self, text: &str) -> String {
        let intent = classify(text);
        debug!(?intent, "routing fallback answer");

        match intent {
            Intent::Arithmetic(expr) => match calc::evaluate(&expr) {
                Ok(value) => format!("Result: {value}"),
                Err(e) => format!("Expression: {expr}\nError: {e}"),
            },
            Intent::Shipping => self.shipping_answer(text),
            Intent::Weather => self.weather_answer(text).await,
            Intent::Time => {
                let zone = pick_timezone(text);
                let report = time::current_time(zone.as_deref());
                format!(
                    "Current time in {}: {}\n(fallback answer)",
                    report.timezone, report.now
                )
            }
        }
    }

    fn shipping_answer(&self, text: &str) -> String {
        let Some(args) = ShippingArgs::from_text(text) else {
            return SHIPPING_PROMPT.to_string();
        };
        match shipping::quote(&args, &self.shipping) {
            Ok(quote) => quote.summary(),
            Err(e) => format!("{SHIPPING_PROMPT}\n({e})"),
        }
    }

    async fn weather_answer(&self, text: &str) -> String {
        let Some(city) = pick_city(text) else {
            return CITY_PROMPT.to_string();
        };
        match self.weather.current(&city, Units::Auto).await {
            Ok(report) => report.one_line(),
            Err(e) => format!("Could not get weather for \"{city}\": {e}"),
        }
    }
}

#[async_trait]
impl Fallback for FallbackRouter {
    async fn answer(&self, conversation: &[Message]) -> Result<String> {
        Ok(self.route(last_user_text(conversation)).await)
    }
}
