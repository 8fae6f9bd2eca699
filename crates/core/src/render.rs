use crate::domain::signal::SIGNAL_BAND_PCT;
use crate::domain::{PredictionState, Signal};
use crate::view::DisplayRecord;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

const DEFAULT_PENDING_STATUS: &str = "Recalculation needed";
const NOT_AVAILABLE: &str = "N/A";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("record has a blank symbol")]
    BlankSymbol,

    #[error("{symbol}: resolved record without a usable current price")]
    MissingCurrentPrice { symbol: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    Refresh,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRow {
    pub symbol: String,
    pub current_price: String,
    pub status: String,
    pub loading: bool,
    pub actions: Vec<RowAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRow {
    pub symbol: String,
    pub current_price: String,
    pub predicted_price: String,
    pub change_pct: String,
    pub trend: Trend,
    /// `None` when the backend sent a code we don't recognize.
    pub signal: Option<Signal>,
    pub rmse: String,
    pub mae: String,
    pub last_updated: Option<String>,
    pub actions: Vec<RowAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisplayRow {
    Pending(PendingRow),
    Resolved(ResolvedRow),
}

impl DisplayRow {
    pub fn symbol(&self) -> &str {
        match self {
            DisplayRow::Pending(r) => &r.symbol,
            DisplayRow::Resolved(r) => &r.symbol,
        }
    }
}

/// Turns one projected record into row data. Never fetches, never mutates.
pub fn render_row(display: &DisplayRecord<'_>) -> Result<DisplayRow, RenderError> {
    let record = display.record;
    let symbol = record.symbol.trim();
    if symbol.is_empty() {
        return Err(RenderError::BlankSymbol);
    }

    match display.state {
        PredictionState::Pending => Ok(DisplayRow::Pending(PendingRow {
            symbol: symbol.to_string(),
            current_price: format_price(record.current_price.unwrap_or(0.0)),
            status: record
                .status
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_PENDING_STATUS)
                .to_string(),
            loading: true,
            actions: vec![RowAction::Refresh, RowAction::Remove],
        })),
        PredictionState::Resolved => {
            let (Some(current), Some(change)) = (record.current_price, record.change_pct()) else {
                return Err(RenderError::MissingCurrentPrice {
                    symbol: symbol.to_string(),
                });
            };
            let predicted = record.predicted_price.unwrap_or_default();

            Ok(DisplayRow::Resolved(ResolvedRow {
                symbol: symbol.to_string(),
                current_price: format_price(current),
                predicted_price: format_price(predicted),
                change_pct: format_change_pct(change),
                trend: trend(current, predicted),
                signal: display.signal,
                rmse: format_metric(record.rmse),
                mae: format_metric(record.mae),
                last_updated: record.last_updated.clone(),
                actions: vec![RowAction::Refresh, RowAction::Remove],
            }))
        }
    }
}

/// Renders every record, skipping the ones that fail so one bad row never blanks the table.
pub fn render_rows(displays: &[DisplayRecord<'_>]) -> (Vec<DisplayRow>, usize) {
    let mut rows = Vec::with_capacity(displays.len());
    let mut skipped = 0;
    for display in displays {
        match render_row(display) {
            Ok(row) => rows.push(row),
            Err(err) => {
                skipped += 1;
                tracing::warn!(error = %err, "skipping row that failed to render");
            }
        }
    }
    (rows, skipped)
}

/// `+8.33`, `-2.10`, `0.00`.
pub fn format_change_pct(change: f64) -> String {
    if change > 0.0 {
        format!("+{change:.2}")
    } else {
        format!("{change:.2}")
    }
}

fn trend(current: f64, predicted: f64) -> Trend {
    let band = SIGNAL_BAND_PCT / 100.0;
    if predicted > current * (1.0 + band) {
        Trend::Up
    } else if predicted < current * (1.0 - band) {
        Trend::Down
    } else {
        Trend::Flat
    }
}

fn format_metric(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{v:.4}"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Two decimals with thousands separators: `1234567.5` -> `1,234,567.50`.
pub fn format_price(p: f64) -> String {
    let fixed = format!("{:.2}", p.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i != 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if p < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

impl fmt::Display for DisplayRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayRow::Pending(r) => write!(
                f,
                "{:<8} {:>12} {:>12} {:>8}  {:<7} {}",
                r.symbol, r.current_price, "-", "-", "PENDING", r.status
            ),
            DisplayRow::Resolved(r) => write!(
                f,
                "{:<8} {:>12} {:>12} {:>7}%  {:<7} rmse={} mae={}",
                r.symbol,
                r.current_price,
                r.predicted_price,
                r.change_pct,
                r.signal.map_or("?", Signal::as_str),
                r.rmse,
                r.mae
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecommendationRecord, SignalCode};

    fn nbl() -> RecommendationRecord {
        let mut r = RecommendationRecord::new("NBL");
        r.current_price = Some(240.0);
        r.predicted_price = Some(260.0);
        r.last_updated = Some("2024-01-01".to_string());
        r.signal_code = Some(SignalCode::Numeric(1.0));
        r
    }

    #[test]
    fn resolved_row_has_signed_delta_and_badge() {
        let record = nbl();
        let row = render_row(&DisplayRecord::new(&record)).unwrap();
        let DisplayRow::Resolved(row) = row else {
            panic!("expected resolved row");
        };
        assert_eq!(row.change_pct, "+8.33");
        assert_eq!(row.signal, Some(Signal::Buy));
        assert_eq!(row.trend, Trend::Up);
        assert_eq!(row.current_price, "240.00");
        assert_eq!(row.rmse, "N/A");
        assert_eq!(row.actions, vec![RowAction::Refresh, RowAction::Remove]);
    }

    #[test]
    fn pending_row_is_placeholder_with_predict_and_remove() {
        let mut record = RecommendationRecord::new("SCB");
        record.status = Some("Calculating".to_string());
        let DisplayRow::Pending(row) = render_row(&DisplayRecord::new(&record)).unwrap() else {
            panic!("expected pending row");
        };
        assert_eq!(row.current_price, "0.00");
        assert_eq!(row.status, "Calculating");
        assert!(row.loading);
        assert_eq!(row.actions, vec![RowAction::Refresh, RowAction::Remove]);

        record.status = None;
        let DisplayRow::Pending(row) = render_row(&DisplayRecord::new(&record)).unwrap() else {
            panic!("expected pending row");
        };
        assert_eq!(row.status, DEFAULT_PENDING_STATUS);
    }

    #[test]
    fn bad_shapes_are_skipped_not_fatal() {
        let mut no_price = nbl();
        no_price.symbol = "HBL".to_string();
        no_price.current_price = None;
        let blank = RecommendationRecord::new("  ");
        let good = nbl();

        let records = [no_price, blank, good];
        let displays: Vec<_> = records.iter().map(DisplayRecord::new).collect();
        let (rows, skipped) = render_rows(&displays);
        assert_eq!(skipped, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol(), "NBL");
    }

    #[test]
    fn rendering_is_idempotent() {
        let record = nbl();
        let d = DisplayRecord::new(&record);
        assert_eq!(render_row(&d), render_row(&d));
    }

    #[test]
    fn formats_prices_and_metrics() {
        assert_eq!(format_price(1234567.5), "1,234,567.50");
        assert_eq!(format_price(999.999), "1,000.00");
        assert_eq!(format_price(-12.3), "-12.30");
        assert_eq!(format_metric(Some(3.14159)), "3.1416");
        assert_eq!(format_change_pct(-2.1), "-2.10");
        assert_eq!(format_change_pct(0.0), "0.00");
    }
}
