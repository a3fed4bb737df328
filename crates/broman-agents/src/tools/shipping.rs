use std::sync::LazyLock;

use broman_common::{Error, Result};
use broman_config::ShippingConfig;
use regex::Regex;
use serde::Deserialize;

static JSON_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.+\}").expect("json block regex should compile"));

static FROM_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:fromCity|from|откуда)\s*[:=]\s*"?([^",\n]+)"?"#)
        .expect("from field regex should compile")
});

static TO_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:toCity|to|куда)\s*[:=]\s*"?([^",\n]+)"?"#)
        .expect("to field regex should compile")
});

static PRICE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:basePrice|price)\s*[:=]\s*([0-9]+(?:[.,][0-9]+)?)")
        .expect("price field regex should compile")
});

static WEIGHT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:weightKg|weight)\s*[:=]\s*([0-9]+(?:[.,][0-9]+)?)")
        .expect("weight field regex should compile")
});

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingArgs {
    pub from_city: String,
    pub to_city: String,
    /// Price per kilogram in the source currency.
    pub base_price: f64,
    pub weight_kg: f64,
}

impl ShippingArgs {
    /// Pull shipping parameters out of free text: an embedded JSON object
    /// first, then `key = value` fields.
    pub fn from_text(text: &str) -> Option<Self> {
        Self::from_json_block(text).or_else(|| Self::from_fields(text))
    }

    fn from_json_block(text: &str) -> Option<Self> {
        let block = JSON_BLOCK.find(text)?;
        let value: serde_json::Value = serde_json::from_str(block.as_str()).ok()?;
        let obj = value.as_object()?;

        let pick = |primary: &str, alias: &str| {
            obj.get(primary)
                .filter(|v| !v.is_null())
                .or_else(|| obj.get(alias).filter(|v| !v.is_null()))
        };

        Self::complete(
            pick("fromCity", "from").and_then(text_of),
            pick("toCity", "to").and_then(text_of),
            pick("basePrice", "price").and_then(number_of),
            pick("weightKg", "weight").and_then(number_of),
        )
    }

    fn from_fields(text: &str) -> Option<Self> {
        let capture = |re: &Regex| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        };

        Self::complete(
            capture(&FROM_FIELD),
            capture(&TO_FIELD),
            capture(&PRICE_FIELD).and_then(|v| parse_decimal(&v)),
            capture(&WEIGHT_FIELD).and_then(|v| parse_decimal(&v)),
        )
    }

    fn complete(
        from_city: Option<String>,
        to_city: Option<String>,
        base_price: Option<f64>,
        weight_kg: Option<f64>,
    ) -> Option<Self> {
        let from_city = from_city.filter(|s| !s.is_empty())?;
        let to_city = to_city.filter(|s| !s.is_empty())?;
        let base_price = base_price.filter(|v| v.is_finite())?;
        let weight_kg = weight_kg.filter(|v| v.is_finite())?;
        Some(Self {
            from_city,
            to_city,
            base_price,
            weight_kg,
        })
    }
}

fn text_of(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_of(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim().replacen(',', ".", 1).parse().ok()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShippingQuote {
    pub from_city: String,
    pub to_city: String,
    pub base_price: f64,
    pub weight_kg: f64,
    pub total_source: f64,
    pub total_target: f64,
    pub rate: f64,
    pub source_currency: String,
    pub target_currency: String,
}

/// `total_source = round2(base_price * weight_kg)`, converted at the fixed rate.
pub fn quote(args: &ShippingArgs, config: &ShippingConfig) -> Result<ShippingQuote> {
    if !args.base_price.is_finite() || !args.weight_kg.is_finite() {
        return Err(Error::Agent(
            "basePrice and weightKg must be finite numbers".to_string(),
        ));
    }
    if args.weight_kg < 0.0 {
        return Err(Error::Agent("weightKg cannot be negative".to_string()));
    }

    let total_source = round2(args.base_price * args.weight_kg);
    let total_target = round2(total_source * config.exchange_rate);

    Ok(ShippingQuote {
        from_city: args.from_city.clone(),
        to_city: args.to_city.clone(),
        base_price: args.base_price,
        weight_kg: args.weight_kg,
        total_source,
        total_target,
        rate: config.exchange_rate,
        source_currency: config.source_currency.clone(),
        target_currency: config.target_currency.clone(),
    })
}

impl ShippingQuote {
    pub fn summary(&self) -> String {
        format!(
            "Shipping {} → {}\nTotal: {} {} • {} {} (rate {})",
            self.from_city,
            self.to_city,
            self.total_source,
            self.source_currency,
            self.total_target,
            self.target_currency,
            self.rate
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("fromCity".into(), self.from_city.clone().into());
        obj.insert("toCity".into(), self.to_city.clone().into());
        obj.insert("basePrice".into(), self.base_price.into());
        obj.insert("weightKg".into(), self.weight_kg.into());
        obj.insert(
            format!("total{}", self.source_currency),
            self.total_source.into(),
        );
        obj.insert(
            format!("total{}", self.target_currency),
            self.total_target.into(),
        );
        obj.insert(
            format!("{}Rate", self.target_currency.to_lowercase()),
            self.rate.into(),
        );
        serde_json::Value::Object(obj)
    }
}
