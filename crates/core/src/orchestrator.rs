//! Owner of the dashboard's shared state.
//!
//! The record set, the view selections and the auto-predict flag live here and nowhere else.
//! Fetch responses are applied last-write-wins by request id; filter, search and view-mode
//! changes re-project the last snapshot.

use crate::api::{FetchError, RecommendationApi, RefreshAllOutcome, Scope, WatchlistAction};
use crate::domain::{RecommendationRecord, Signal};
use crate::kpi::{compute_counts, Counts, FilterControl, FilterControls};
use crate::render::{render_rows, DisplayRow};
use crate::sequencer::{AutoPredictSequencer, SequenceReport};
use crate::view::{apply_search, project, ViewMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Refreshing ALL market stocks may take 10-20 minutes; confirm to proceed")]
    ConfirmationRequired,

    #[error("symbol must be non-empty")]
    EmptySymbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Applied { records: usize, pending: usize },
    /// A newer response (or a scope switch) already superseded this request.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub action: WatchlistAction,
    /// The symbol was added but its first prediction failed.
    pub prediction_error: Option<String>,
}

/// Everything a front end needs to draw one frame.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub view_mode: ViewMode,
    pub active_filter: Option<Signal>,
    pub search: String,
    pub controls: Vec<FilterControl>,
    pub counts: Counts,
    pub rows: Vec<DisplayRow>,
    pub skipped: usize,
    pub error: Option<String>,
    pub loading: bool,
    pub auto_predict_running: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct DashboardState {
    records: Arc<Vec<RecommendationRecord>>,
    applied_request: u64,
    view_mode: ViewMode,
    filter: Option<Signal>,
    search: String,
    controls: FilterControls,
    error: Option<String>,
    loaded: bool,
    last_fetched_at: Option<DateTime<Utc>>,
}

pub struct Orchestrator<A> {
    api: Arc<A>,
    state: RwLock<DashboardState>,
    issued_requests: AtomicU64,
    sequencer: AutoPredictSequencer,
    revision: watch::Sender<u64>,
}

impl<A: RecommendationApi> Orchestrator<A> {
    pub fn new(api: Arc<A>, predict_delay: Duration) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            api,
            state: RwLock::new(DashboardState::default()),
            issued_requests: AtomicU64::new(0),
            sequencer: AutoPredictSequencer::new(predict_delay),
            revision,
        }
    }

    pub fn with_view_mode(mut self, mode: ViewMode) -> Self {
        self.state.get_mut().view_mode = mode;
        self
    }

    pub fn with_filter(mut self, filter: Option<Signal>) -> Self {
        let state = self.state.get_mut();
        state.filter = filter;
        state.controls.sync(filter);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Bumped on every visible state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    pub fn is_auto_predict_running(&self) -> bool {
        self.sequencer.is_running()
    }

    pub async fn records(&self) -> Arc<Vec<RecommendationRecord>> {
        Arc::clone(&self.state.read().await.records)
    }

    pub async fn pending_symbols(&self) -> Vec<String> {
        self.records()
            .await
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.symbol.clone())
            .collect()
    }

    /// Fetches the current scope and replaces the record set if this request is still the
    /// latest one.
    pub async fn refresh(&self) -> Result<RefreshOutcome, FetchError> {
        let request_id = self.issued_requests.fetch_add(1, Ordering::AcqRel) + 1;
        let scope = self.state.read().await.view_mode.scope();

        let result = self.api.fetch_records(scope).await;

        let mut state = self.state.write().await;
        if request_id <= state.applied_request || scope != state.view_mode.scope() {
            tracing::debug!(
                request_id,
                applied = state.applied_request,
                %scope,
                "discarding superseded fetch response"
            );
            return Ok(RefreshOutcome::Stale);
        }

        match result {
            Ok(records) => {
                let pending = records.iter().filter(|r| r.is_pending()).count();
                let count = records.len();
                state.records = Arc::new(records);
                state.applied_request = request_id;
                state.error = None;
                state.loaded = true;
                state.last_fetched_at = Some(Utc::now());
                drop(state);
                self.bump();

                tracing::info!(%scope, records = count, pending, "recommendations refreshed");
                Ok(RefreshOutcome::Applied {
                    records: count,
                    pending,
                })
            }
            Err(err) => {
                // Keep the last good snapshot; the banner replaces the table in the front end.
                state.error = Some(err.message().to_string());
                drop(state);
                self.bump();

                tracing::warn!(%scope, kind = err.kind(), error = %err, "recommendation fetch failed");
                Err(err)
            }
        }
    }

    async fn refresh_logged(&self) {
        if let Err(err) = self.refresh().await {
            tracing::debug!(error = %err, "follow-up refresh failed");
        }
    }

    async fn record_error(&self, message: String) {
        self.state.write().await.error = Some(message);
        self.bump();
    }

    pub async fn view(&self) -> DashboardView {
        let state = self.state.read().await;

        let projected = project(&state.records, state.view_mode, state.filter);
        let projected = apply_search(projected, &state.search);
        let (rows, skipped) = render_rows(&projected);

        DashboardView {
            view_mode: state.view_mode,
            active_filter: state.filter,
            search: state.search.clone(),
            controls: state.controls.controls().to_vec(),
            counts: compute_counts(&state.records),
            rows,
            skipped,
            error: state.error.clone(),
            loading: !state.loaded && state.error.is_none(),
            auto_predict_running: self.sequencer.is_running(),
            last_fetched_at: state.last_fetched_at,
        }
    }

    /// Selects a filter control and re-projects. Never fetches.
    pub async fn set_filter(&self, filter: Option<Signal>) -> DashboardView {
        {
            let mut state = self.state.write().await;
            state.filter = filter;
            state.controls.sync(filter);
        }
        self.bump();
        self.view().await
    }

    /// Updates the symbol search box. Never fetches.
    pub async fn set_search(&self, query: &str) -> DashboardView {
        self.state.write().await.search = query.trim().to_string();
        self.bump();
        self.view().await
    }

    /// Switches scope; always re-fetches.
    pub async fn set_view_mode(&self, mode: ViewMode) -> Result<RefreshOutcome, FetchError> {
        self.state.write().await.view_mode = mode;
        self.bump();
        self.refresh().await
    }

    /// Retries all pending symbols sequentially, then refetches once.
    pub async fn auto_predict(&self) -> Option<SequenceReport> {
        let records = self.records().await;
        self.sequencer
            .run(&records, self.api.as_ref(), |_report| async move {
                self.refresh_logged().await;
            })
            .await
    }

    /// Manual per-row predict. Refetches whether or not the backend accepted it.
    pub async fn predict_symbol(&self, symbol: &str) -> Result<RefreshOutcome, OrchestratorError> {
        let symbol = normalize_symbol(symbol)?;
        let predicted = self.api.refresh_symbol(&symbol).await;
        let refreshed = self.refresh().await;

        if let Err(err) = predicted {
            tracing::warn!(%symbol, error = %err, "manual predict failed");
            return Err(err.into());
        }
        Ok(refreshed?)
    }

    pub async fn remove_symbol(&self, symbol: &str) -> Result<WatchlistAction, OrchestratorError> {
        let symbol = normalize_symbol(symbol)?;
        let action = self.api.toggle_watchlist(&symbol).await?;
        tracing::info!(%symbol, ?action, "watchlist toggled");
        self.refresh_logged().await;
        Ok(action)
    }

    /// Adds a symbol and kicks off its first prediction.
    pub async fn add_symbol(&self, symbol: &str) -> Result<AddOutcome, OrchestratorError> {
        let symbol = normalize_symbol(symbol)?;
        let action = self.api.toggle_watchlist(&symbol).await?;

        let mut prediction_error = None;
        if action == WatchlistAction::Added {
            if let Err(err) = self.api.refresh_symbol(&symbol).await {
                tracing::warn!(%symbol, error = %err, "added to watchlist, but first prediction failed");
                prediction_error = Some(err.message().to_string());
            }
        }

        self.refresh_logged().await;
        Ok(AddOutcome {
            action,
            prediction_error,
        })
    }

    /// Bulk recompute for the current scope. The all-market scope needs `confirmed`.
    pub async fn refresh_all(&self, confirmed: bool) -> Result<RefreshAllOutcome, OrchestratorError> {
        let scope = self.state.read().await.view_mode.scope();
        if scope == Scope::All && !confirmed {
            return Err(OrchestratorError::ConfirmationRequired);
        }

        tracing::info!(%scope, "refresh-all requested");
        let outcome = match self.api.refresh_all(scope).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.record_error(err.message().to_string()).await;
                return Err(err.into());
            }
        };

        // Some symbols may have finished even when the request timed out.
        self.refresh_logged().await;
        Ok(outcome)
    }
}

impl<A: RecommendationApi + 'static> Orchestrator<A> {
    /// Starts an auto-predict run in the background when something is pending and no run is
    /// active.
    pub async fn maybe_start_auto_predict(
        self: &Arc<Self>,
    ) -> Option<JoinHandle<Option<SequenceReport>>> {
        if self.sequencer.is_running() {
            return None;
        }
        if !self.records().await.iter().any(RecommendationRecord::is_pending) {
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let report = this.auto_predict().await;
            this.bump();
            report
        }))
    }

    /// One poll tick: refetch, then schedule retries for anything still pending.
    pub async fn poll_once(self: &Arc<Self>) -> Result<RefreshOutcome, FetchError> {
        let outcome = self.refresh().await?;
        if matches!(outcome, RefreshOutcome::Applied { pending, .. } if pending > 0) {
            let _ = self.maybe_start_auto_predict().await;
        }
        Ok(outcome)
    }

    /// Timer-driven polling until `shutdown` resolves. The first tick fires immediately.
    pub async fn run_polling(self: Arc<Self>, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = interval.as_secs(), "polling started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_once().await {
                        tracing::warn!(error = %err, "poll tick failed");
                    }
                }
            }
        }
        tracing::info!("polling stopped");
    }
}

fn normalize_symbol(symbol: &str) -> Result<String, OrchestratorError> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(OrchestratorError::EmptySymbol);
    }
    Ok(symbol)
}
