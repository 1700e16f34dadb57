//! Formal configurator pricing.
//!
//! Pure and deterministic: every adjustment is a fixed table lookup keyed on
//! the lead's configuration. The same configuration always yields the same
//! breakdown, which is what makes a resend or a re-run reproducible.

use crate::models::{LeadCategory, Money};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Outcome of pricing a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum Price {
    Amount(Money),
    /// Category has no price list; a human prices it.
    OnRequest,
}

impl Price {
    pub fn amount(&self) -> Option<Money> {
        match self {
            Price::Amount(money) => Some(*money),
            Price::OnRequest => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceLine {
    pub label: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub lines: Vec<PriceLine>,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("configuration incomplete: field '{field}' {reason}")]
    ConfigurationIncomplete { field: &'static str, reason: String },
}

impl PricingError {
    fn missing(field: &'static str) -> Self {
        PricingError::ConfigurationIncomplete {
            field,
            reason: "is required".to_string(),
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        PricingError::ConfigurationIncomplete {
            field,
            reason: reason.into(),
        }
    }
}

// Dakkapel price list
const DAKKAPEL_BASE: Money = Money::euros(7_500);
/// Inclusive upper bound in cm → surcharge.
const DAKKAPEL_WIDTH_BANDS: [(u32, Money); 4] = [
    (250, Money::euros(0)),
    (350, Money::euros(1_250)),
    (450, Money::euros(2_500)),
    (u32::MAX, Money::euros(4_000)),
];
const DAKKAPEL_MATERIALS: [(&str, Money); 3] = [
    ("kunststof", Money::euros(0)),
    ("hout", Money::euros(950)),
    ("aluminium", Money::euros(1_400)),
];
const DAKKAPEL_PER_WINDOW: Money = Money::euros(325);
const DAKKAPEL_OPTIONS: [(&str, &str, Money); 4] = [
    ("rolluiken", "Rolluiken", Money::euros(650)),
    ("horren", "Horren", Money::euros(180)),
    ("ventilatie", "Ventilatieroosters", Money::euros(120)),
    ("afvoer", "Afvoer bouwafval", Money::euros(240)),
];

// Kozijnen price list
const KOZIJN_MATERIALS: [(&str, Money); 3] = [
    ("kunststof", Money::euros(650)),
    ("hout", Money::euros(890)),
    ("aluminium", Money::euros(1_050)),
];
const KOZIJN_TRIPLE_GLAS_PER_FRAME: Money = Money::euros(180);
const KOZIJN_MONTAGE: Money = Money::euros(250);

/// Prices a configuration, returning only the total.
pub fn price(category: LeadCategory, configuration: &Value) -> Result<Price, PricingError> {
    quote(category, configuration).map(|breakdown| breakdown.price)
}

/// Prices a configuration with the per-adjustment breakdown shown in quotes.
pub fn quote(category: LeadCategory, configuration: &Value) -> Result<PriceBreakdown, PricingError> {
    match category {
        LeadCategory::Dakkapel => quote_dakkapel(as_object(configuration)?),
        LeadCategory::Kozijnen => quote_kozijnen(as_object(configuration)?),
        LeadCategory::Renovatie => Ok(PriceBreakdown {
            lines: Vec::new(),
            price: Price::OnRequest,
        }),
    }
}

fn quote_dakkapel(config: &Map<String, Value>) -> Result<PriceBreakdown, PricingError> {
    let width = required_u32(config, "width_cm")?;
    if width == 0 {
        return Err(PricingError::invalid("width_cm", "must be greater than zero"));
    }
    let material = required_material(config, &DAKKAPEL_MATERIALS)?;
    let windows = optional_u32(config, "windows")?;

    let mut lines = vec![PriceLine {
        label: "Basisprijs dakkapel".to_string(),
        amount: DAKKAPEL_BASE,
    }];

    let width_surcharge = DAKKAPEL_WIDTH_BANDS
        .iter()
        .find(|(upper, _)| width <= *upper)
        .map(|(_, amount)| *amount)
        .unwrap_or(Money::ZERO);
    if width_surcharge != Money::ZERO {
        lines.push(PriceLine {
            label: format!("Breedte {} cm", width),
            amount: width_surcharge,
        });
    }

    if material.1 != Money::ZERO {
        lines.push(PriceLine {
            label: format!("Materiaal {}", material.0),
            amount: material.1,
        });
    }

    if windows > 0 {
        lines.push(PriceLine {
            label: format!("{} raam/ramen", windows),
            amount: DAKKAPEL_PER_WINDOW * windows,
        });
    }

    for (key, label, amount) in DAKKAPEL_OPTIONS {
        if flag(config, key)? {
            lines.push(PriceLine {
                label: label.to_string(),
                amount,
            });
        }
    }

    let total = lines.iter().map(|line| line.amount).sum();
    Ok(PriceBreakdown {
        lines,
        price: Price::Amount(total),
    })
}

fn quote_kozijnen(config: &Map<String, Value>) -> Result<PriceBreakdown, PricingError> {
    let frames = required_u32(config, "frames")?;
    if frames == 0 {
        return Err(PricingError::invalid("frames", "must be at least 1"));
    }
    let (material, per_frame) = required_material(config, &KOZIJN_MATERIALS)?;

    let mut lines = vec![PriceLine {
        label: format!("{} kozijn(en) {}", frames, material),
        amount: per_frame * frames,
    }];

    if flag(config, "triple_glas")? {
        lines.push(PriceLine {
            label: "Triple glas".to_string(),
            amount: KOZIJN_TRIPLE_GLAS_PER_FRAME * frames,
        });
    }
    if flag(config, "montage")? {
        lines.push(PriceLine {
            label: "Montage".to_string(),
            amount: KOZIJN_MONTAGE,
        });
    }

    let total = lines.iter().map(|line| line.amount).sum();
    Ok(PriceBreakdown {
        lines,
        price: Price::Amount(total),
    })
}

fn as_object(configuration: &Value) -> Result<&Map<String, Value>, PricingError> {
    configuration
        .as_object()
        .ok_or_else(|| PricingError::invalid("configuration", "must be a JSON object"))
}

fn parse_u32(field: &'static str, value: &Value) -> Result<u32, PricingError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| PricingError::invalid(field, "must be a non-negative integer")),
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| PricingError::invalid(field, format!("'{}' is not a whole number", s))),
        _ => Err(PricingError::invalid(field, "must be a number")),
    }
}

fn required_u32(config: &Map<String, Value>, field: &'static str) -> Result<u32, PricingError> {
    match config.get(field) {
        None | Some(Value::Null) => Err(PricingError::missing(field)),
        Some(value) => parse_u32(field, value),
    }
}

fn optional_u32(config: &Map<String, Value>, field: &'static str) -> Result<u32, PricingError> {
    match config.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => parse_u32(field, value),
    }
}

fn required_material<'a>(
    config: &Map<String, Value>,
    table: &'a [(&'a str, Money)],
) -> Result<(&'a str, Money), PricingError> {
    let raw = config
        .get("material")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PricingError::missing("material"))?;

    table
        .iter()
        .find(|(name, _)| *name == raw)
        .copied()
        .ok_or_else(|| PricingError::invalid("material", format!("'{}' is not on the price list", raw)))
}

/// Option flags may arrive as booleans or as form strings.
fn flag(config: &Map<String, Value>, field: &'static str) -> Result<bool, PricingError> {
    match config.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "ja" | "yes" | "1" | "on" => Ok(true),
            "false" | "nee" | "no" | "0" | "off" | "" => Ok(false),
            other => Err(PricingError::invalid(field, format!("'{}' is not a yes/no value", other))),
        },
        Some(Value::Number(n)) => Ok(n.as_u64().unwrap_or(0) > 0),
        Some(_) => Err(PricingError::invalid(field, "must be a boolean")),
    }
}
