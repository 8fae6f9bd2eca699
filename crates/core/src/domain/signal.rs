use serde::{Deserialize, Serialize};
use std::fmt;

// Backend threshold for turning a price delta into a signal.
pub const SIGNAL_BAND_PCT: f64 = 1.5;

/// Normalized trading recommendation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Raw `recommendation` field as the backend sends it: an integer code or a string code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalCode {
    Numeric(f64),
    Text(String),
}

impl Signal {
    /// Fixed category order used by summaries and KPI tiles.
    pub const ALL: [Signal; 3] = [Signal::Buy, Signal::Sell, Signal::Hold];

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }

    pub fn from_numeric(code: f64) -> Option<Self> {
        if code == 1.0 {
            Some(Signal::Buy)
        } else if code == -1.0 {
            Some(Signal::Sell)
        } else if code == 0.0 {
            Some(Signal::Hold)
        } else {
            None
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Signal::Buy),
            "SELL" => Some(Signal::Sell),
            "HOLD" => Some(Signal::Hold),
            // Numeric codes sometimes arrive quoted.
            "1" => Some(Signal::Buy),
            "-1" => Some(Signal::Sell),
            "0" => Some(Signal::Hold),
            _ => None,
        }
    }

    /// Backend rule: above +1.5% is a buy, below -1.5% a sell, anything in between a hold.
    pub fn from_change_pct(change_pct: f64) -> Option<Self> {
        if !change_pct.is_finite() {
            return None;
        }
        if change_pct > SIGNAL_BAND_PCT {
            Some(Signal::Buy)
        } else if change_pct < -SIGNAL_BAND_PCT {
            Some(Signal::Sell)
        } else {
            Some(Signal::Hold)
        }
    }

    /// The one place signal codes are interpreted.
    ///
    /// Precedence: a numeric `code`, then a string `code`, then `label`. When neither field is
    /// present at all, `derived` (usually the price-delta rule) is used. A present but
    /// unrecognized code (e.g. "PENDING") yields `None` and is never overridden by derivation.
    pub fn normalize(
        code: Option<&SignalCode>,
        label: Option<&str>,
        derived: impl FnOnce() -> Option<Signal>,
    ) -> Option<Self> {
        if let Some(SignalCode::Numeric(n)) = code {
            return Self::from_numeric(*n);
        }

        let code_text = match code {
            Some(SignalCode::Text(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        };
        let label = label.filter(|s| !s.trim().is_empty());

        match (code_text, label) {
            (Some(text), Some(label)) => Self::from_label(text).or_else(|| Self::from_label(label)),
            (Some(text), None) => Self::from_label(text),
            (None, Some(label)) => Self::from_label(label),
            (None, None) => derived(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown signal: {s}"))
    }
}
