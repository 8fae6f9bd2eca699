use crate::domain::signal::{Signal, SignalCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One tracked symbol as returned by the recommendations endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub symbol: String,

    #[serde(default, alias = "currentPrice", deserialize_with = "lenient_f64")]
    pub current_price: Option<f64>,

    #[serde(default, alias = "predictedPrice", deserialize_with = "lenient_f64")]
    pub predicted_price: Option<f64>,

    #[serde(default, rename = "recommendation", deserialize_with = "lenient_code")]
    pub signal_code: Option<SignalCode>,

    /// Some payloads carry the code as `signal`, alongside or instead of `recommendation`.
    #[serde(default, rename = "signal", deserialize_with = "lenient_code")]
    pub signal_alt: Option<SignalCode>,

    #[serde(default, rename = "recommendation_str", deserialize_with = "lenient_text")]
    pub signal_label: Option<String>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub rmse: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub mae: Option<f64>,

    #[serde(default, alias = "lastUpdated", deserialize_with = "non_blank")]
    pub last_updated: Option<String>,

    #[serde(default, deserialize_with = "lenient_text")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionState {
    Pending,
    Resolved,
}

/// Resolution check shared by rendering, auto-predict selection and KPI counts.
///
/// Only `predicted_price` and `last_updated` are consulted; whatever the signal fields claim is
/// irrelevant here.
pub fn classify(record: &RecommendationRecord) -> PredictionState {
    let has_timestamp = record.last_updated.is_some();
    let has_prediction = record.predicted_price.is_some_and(f64::is_finite);
    if has_timestamp && has_prediction {
        PredictionState::Resolved
    } else {
        PredictionState::Pending
    }
}

impl RecommendationRecord {
    /// Minimal record, mostly useful for fixtures.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            current_price: None,
            predicted_price: None,
            signal_code: None,
            signal_alt: None,
            signal_label: None,
            rmse: None,
            mae: None,
            last_updated: None,
            status: None,
        }
    }

    pub fn state(&self) -> PredictionState {
        classify(self)
    }

    pub fn is_pending(&self) -> bool {
        classify(self) == PredictionState::Pending
    }

    /// Signed percentage move from current to predicted price, when both are usable.
    pub fn change_pct(&self) -> Option<f64> {
        let current = self.current_price.filter(|p| p.is_finite() && *p > 0.0)?;
        let predicted = self.predicted_price.filter(|p| p.is_finite())?;
        Some((predicted - current) / current * 100.0)
    }

    /// The code to interpret: a numeric one from either field wins, then the first present.
    pub fn code(&self) -> Option<&SignalCode> {
        let codes = [self.signal_code.as_ref(), self.signal_alt.as_ref()];
        codes
            .iter()
            .flatten()
            .find(|c| matches!(c, SignalCode::Numeric(_)))
            .or_else(|| codes.iter().flatten().next())
            .copied()
    }

    pub fn signal(&self) -> Option<Signal> {
        Signal::normalize(
            self.code(),
            self.signal_label.as_deref(),
            || self.change_pct().and_then(Signal::from_change_pct),
        )
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    let value = match raw {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse::<f64>().ok(),
        None => None,
    };
    Ok(value.filter(|n| n.is_finite()))
}

// Never fails: a code of an unexpected type is kept as text so it normalizes to unresolved.
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<SignalCode>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64().map(SignalCode::Numeric),
        Some(Value::String(s)) => Some(SignalCode::Text(s)),
        Some(other) => Some(SignalCode::Text(other.to_string())),
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}
