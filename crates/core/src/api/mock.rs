//! Recording mock of [`RecommendationApi`] for tests.
//!
//! Fetch responses are scripted per call; refresh failures are configured per symbol. Calls can
//! be held on a [`Notify`] gate to create in-flight overlap deterministically.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::{FetchError, RecommendationApi, RefreshAllOutcome, Scope, WatchlistAction};
use crate::domain::RecommendationRecord;

/// A recorded call to the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Fetch(Scope),
    Refresh(String),
    RefreshAll(Scope),
    Toggle(String),
}

type FetchResult = Result<Vec<RecommendationRecord>, FetchError>;

pub struct MockRecommendationApi {
    calls: Mutex<Vec<MockCall>>,
    fetch_script: Mutex<VecDeque<(FetchResult, Option<Arc<Notify>>)>>,
    default_records: Mutex<Vec<RecommendationRecord>>,
    failing_refreshes: Mutex<HashSet<String>>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
    refresh_started: Arc<Notify>,
    watchlist: Mutex<HashSet<String>>,
    refresh_all_outcome: Mutex<Result<RefreshAllOutcome, FetchError>>,
}

impl Default for MockRecommendationApi {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockRecommendationApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fetch_script: Mutex::new(VecDeque::new()),
            default_records: Mutex::new(Vec::new()),
            failing_refreshes: Mutex::new(HashSet::new()),
            refresh_gate: Mutex::new(None),
            refresh_started: Arc::new(Notify::new()),
            watchlist: Mutex::new(HashSet::new()),
            refresh_all_outcome: Mutex::new(Ok(RefreshAllOutcome::Completed)),
        }
    }

    /// Records served by every fetch that has no scripted response.
    pub fn with_records(self, records: Vec<RecommendationRecord>) -> Self {
        *lock(&self.default_records) = records;
        self
    }

    /// Queue a one-shot fetch response.
    pub fn push_fetch(&self, result: FetchResult) {
        lock(&self.fetch_script).push_back((result, None));
    }

    /// Queue a one-shot fetch response that is held until `gate` is notified.
    pub fn push_gated_fetch(&self, result: FetchResult, gate: Arc<Notify>) {
        lock(&self.fetch_script).push_back((result, Some(gate)));
    }

    pub fn with_failing_refresh(self, symbol: &str) -> Self {
        lock(&self.failing_refreshes).insert(symbol.to_string());
        self
    }

    /// Every `refresh_symbol` call waits on `gate` before answering.
    pub fn with_refresh_gate(self, gate: Arc<Notify>) -> Self {
        *lock(&self.refresh_gate) = Some(gate);
        self
    }

    pub fn with_watchlist(self, symbols: &[&str]) -> Self {
        lock(&self.watchlist).extend(symbols.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_refresh_all_outcome(self, outcome: Result<RefreshAllOutcome, FetchError>) -> Self {
        *lock(&self.refresh_all_outcome) = outcome;
        self
    }

    /// Notified each time a `refresh_symbol` call starts.
    pub fn refresh_started(&self) -> Arc<Notify> {
        Arc::clone(&self.refresh_started)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Fetch(_)))
            .count()
    }

    pub fn refreshed_symbols(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Refresh(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl RecommendationApi for MockRecommendationApi {
    async fn fetch_records(&self, scope: Scope) -> Result<Vec<RecommendationRecord>, FetchError> {
        self.record(MockCall::Fetch(scope));
        let scripted = lock(&self.fetch_script).pop_front();
        match scripted {
            Some((result, gate)) => {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                result
            }
            None => Ok(lock(&self.default_records).clone()),
        }
    }

    async fn refresh_symbol(&self, symbol: &str) -> Result<(), FetchError> {
        self.record(MockCall::Refresh(symbol.to_string()));
        self.refresh_started.notify_one();

        let gate = lock(&self.refresh_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if lock(&self.failing_refreshes).contains(symbol) {
            return Err(FetchError::Backend(format!(
                "Not enough history to predict {symbol}"
            )));
        }
        Ok(())
    }

    async fn refresh_all(&self, scope: Scope) -> Result<RefreshAllOutcome, FetchError> {
        self.record(MockCall::RefreshAll(scope));
        lock(&self.refresh_all_outcome).clone()
    }

    async fn toggle_watchlist(&self, symbol: &str) -> Result<WatchlistAction, FetchError> {
        self.record(MockCall::Toggle(symbol.to_string()));
        let mut watchlist = lock(&self.watchlist);
        if watchlist.remove(symbol) {
            Ok(WatchlistAction::Removed)
        } else {
            watchlist.insert(symbol.to_string());
            Ok(WatchlistAction::Added)
        }
    }
}
