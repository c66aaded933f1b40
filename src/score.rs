use serde::Serialize;
use serde_json::{Map, Value};

/// Display text for a score that is missing entirely.
pub const EMPTY_DISPLAY: &str = "—";

/// A raw score value as stored by the backend, decoded once at the boundary.
///
/// The score column is loosely typed: it may hold nothing, a `"num/den"`
/// fraction, a JSON object carrying a `score` field, or free-form legacy text.
#[derive(Debug, Clone, PartialEq)]
pub enum RawScore {
    Empty,
    /// Both sides parsed as finite numbers. `text` is the original input.
    Fraction { num: f64, den: f64, text: String },
    JsonPayload(Map<String, Value>),
    Opaque(String),
}

impl RawScore {
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return RawScore::Empty;
        }

        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => return RawScore::JsonPayload(map),
                Ok(_) => return RawScore::Opaque(trimmed.to_string()),
                Err(_) => {}
            }
        }

        match parse_fraction(trimmed) {
            Some((num, den)) => RawScore::Fraction {
                num,
                den,
                text: raw.to_string(),
            },
            None => RawScore::Opaque(trimmed.to_string()),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => RawScore::Empty,
            Value::String(text) => RawScore::from_text(text),
            Value::Object(map) => RawScore::JsonPayload(map.clone()),
            other => RawScore::Opaque(other.to_string()),
        }
    }

    pub fn from_column(value: Option<&str>) -> Self {
        value.map(RawScore::from_text).unwrap_or(RawScore::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedScore {
    pub display_text: String,
    /// `None` when no percentage can be computed.
    pub percentage: Option<f64>,
}

impl NormalizedScore {
    fn unparseable(display_text: impl Into<String>) -> Self {
        Self {
            display_text: display_text.into(),
            percentage: None,
        }
    }

    /// The percentage with `NaN` standing in for "not computable".
    pub fn percentage_or_nan(&self) -> f64 {
        self.percentage.unwrap_or(f64::NAN)
    }
}

pub fn normalize(raw: &RawScore) -> NormalizedScore {
    match raw {
        RawScore::Empty => NormalizedScore::unparseable(EMPTY_DISPLAY),
        RawScore::Fraction { num, den, text } => {
            let percentage = 100.0 * num / den;
            if *den > 0.0 && percentage.is_finite() {
                NormalizedScore {
                    display_text: text.clone(),
                    percentage: Some(percentage),
                }
            } else {
                NormalizedScore::unparseable(text.trim())
            }
        }
        RawScore::JsonPayload(map) => match map.get("score") {
            Some(inner) => normalize(&RawScore::from_value(inner)),
            None => NormalizedScore::unparseable(Value::Object(map.clone()).to_string()),
        },
        RawScore::Opaque(text) => NormalizedScore::unparseable(text.trim()),
    }
}

pub fn parse_score(value: &Value) -> NormalizedScore {
    normalize(&RawScore::from_value(value))
}

pub fn parse_score_text(raw: Option<&str>) -> NormalizedScore {
    normalize(&RawScore::from_column(raw))
}

fn parse_fraction(text: &str) -> Option<(f64, f64)> {
    let (num, den) = text.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if num.is_finite() && den.is_finite() {
        Some((num, den))
    } else {
        None
    }
}
