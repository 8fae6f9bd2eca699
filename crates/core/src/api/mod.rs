//! Client side of the remote recommendation service.
//!
//! The orchestrator only talks to the service through [`RecommendationApi`], so tests can swap
//! in [`mock::MockRecommendationApi`].

pub mod error;
pub mod http;
pub mod mock;

use crate::domain::RecommendationRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub use error::FetchError;

/// Which server-side query backs the record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Watchlist,
    All,
}

impl Scope {
    pub fn as_query(self) -> &'static str {
        match self {
            Scope::Watchlist => "watchlist",
            Scope::All => "all",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchlistAction {
    Added,
    Removed,
}

/// Bulk refresh runs for minutes on the backend; a client-side timeout is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshAllOutcome {
    Completed,
    TimedOut,
}

#[async_trait::async_trait]
pub trait RecommendationApi: Send + Sync {
    async fn fetch_records(&self, scope: Scope) -> Result<Vec<RecommendationRecord>, FetchError>;

    /// Asks the backend to recompute one symbol. Only success/failure matters.
    async fn refresh_symbol(&self, symbol: &str) -> Result<(), FetchError>;

    async fn refresh_all(&self, scope: Scope) -> Result<RefreshAllOutcome, FetchError>;

    async fn toggle_watchlist(&self, symbol: &str) -> Result<WatchlistAction, FetchError>;
}

/// `{success, data?, message?, action?}` wrapper every endpoint answers with.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub action: Option<WatchlistAction>,
}

impl<T> Envelope<T> {
    pub fn into_success(self, fallback: &str) -> Result<Self, FetchError> {
        if self.success {
            return Ok(self);
        }
        let message = self
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
            .to_string();
        Err(FetchError::Backend(message))
    }
}

/// Trims symbols and drops later duplicates so the snapshot stays keyed by symbol.
pub fn normalize_records(records: Vec<RecommendationRecord>) -> Vec<RecommendationRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut out = Vec::with_capacity(records.len());
    for mut record in records {
        record.symbol = record.symbol.trim().to_string();
        if !seen.insert(record.symbol.clone()) {
            tracing::warn!(symbol = %record.symbol, "duplicate symbol in recommendation payload; keeping first");
            continue;
        }
        out.push(record);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_failure_prefers_backend_message() {
        let env: Envelope<serde_json::Value> =
            serde_json::from_value(json!({"success": false, "message": "Stock not found"})).unwrap();
        assert_eq!(
            env.into_success("fallback").unwrap_err(),
            FetchError::Backend("Stock not found".to_string())
        );

        let env: Envelope<serde_json::Value> = serde_json::from_value(json!({"success": false})).unwrap();
        assert_eq!(
            env.into_success("Failed to fetch recommendations").unwrap_err().message(),
            "Failed to fetch recommendations"
        );
    }

    #[test]
    fn envelope_parses_toggle_action() {
        let env: Envelope<serde_json::Value> =
            serde_json::from_value(json!({"success": true, "action": "removed"})).unwrap();
        let env = env.into_success("x").unwrap();
        assert_eq!(env.action, Some(WatchlistAction::Removed));
    }

    #[test]
    fn normalize_records_dedups_by_symbol() {
        let out = normalize_records(vec![
            RecommendationRecord::new(" NBL "),
            RecommendationRecord::new("SCB"),
            RecommendationRecord::new("NBL"),
        ]);
        let symbols: Vec<_> = out.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["NBL", "SCB"]);
    }
}
