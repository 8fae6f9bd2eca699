//! Sequential auto-predict retries for pending symbols.
//!
//! One run at a time (in-flight flag), one retry at a time inside a run, and exactly one
//! completion callback per run.

use crate::api::RecommendationApi;
use crate::domain::RecommendationRecord;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SequenceReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct AutoPredictSequencer {
    in_flight: AtomicBool,
    delay: Duration,
}

/// Clears the in-flight flag on every exit path: normal return, early return, panic, or the
/// run's future being dropped mid-await.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl AutoPredictSequencer {
    /// `delay` is the pause between two consecutive retries.
    pub fn new(delay: Duration) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            delay,
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Retries every pending record, one after another, then awaits `on_done` once.
    ///
    /// Returns `None` without doing anything when a run is already in flight. The flag stays
    /// set while `on_done` runs, so a refetch triggered from there cannot start a nested run.
    pub async fn run<A, F, Fut>(
        &self,
        records: &[RecommendationRecord],
        api: &A,
        on_done: F,
    ) -> Option<SequenceReport>
    where
        A: RecommendationApi + ?Sized,
        F: FnOnce(SequenceReport) -> Fut,
        Fut: Future<Output = ()>,
    {
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            tracing::debug!("auto-predict already in flight; skipping");
            return None;
        };

        let mut queue: VecDeque<String> = records
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.symbol.clone())
            .collect();

        let mut report = SequenceReport::default();
        if queue.is_empty() {
            return Some(report);
        }

        tracing::info!(pending = queue.len(), "auto-predict run started");

        while let Some(symbol) = queue.pop_front() {
            if report.attempted != 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            report.attempted += 1;
            match api.refresh_symbol(&symbol).await {
                Ok(()) => {
                    report.succeeded += 1;
                    tracing::debug!(%symbol, "auto-predict retry ok");
                }
                Err(err) => {
                    tracing::warn!(%symbol, error = %err, "auto-predict retry failed; continuing");
                    report.failed.push((symbol, err.to_string()));
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            "auto-predict run finished"
        );

        on_done(report.clone()).await;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockCall, MockRecommendationApi};
    use crate::api::Scope;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn resolved(symbol: &str) -> RecommendationRecord {
        let mut r = RecommendationRecord::new(symbol);
        r.current_price = Some(100.0);
        r.predicted_price = Some(101.0);
        r.last_updated = Some("2024-01-01".to_string());
        r
    }

    fn pending(symbol: &str) -> RecommendationRecord {
        RecommendationRecord::new(symbol)
    }

    #[tokio::test]
    async fn retries_pending_in_order_then_refetches_once() {
        let api = MockRecommendationApi::new();
        let seq = AutoPredictSequencer::new(Duration::ZERO);
        let records = vec![pending("ADBL"), resolved("NBL"), pending("HBL"), pending("SCB")];

        assert!(!seq.is_running());
        let report = seq
            .run(&records, &api, |_| async {
                // Stand-in for the orchestrator's refetch.
                let _ = api.fetch_records(Scope::Watchlist).await;
            })
            .await
            .unwrap();
        assert!(!seq.is_running());

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(
            api.calls(),
            vec![
                MockCall::Refresh("ADBL".into()),
                MockCall::Refresh("HBL".into()),
                MockCall::Refresh("SCB".into()),
                MockCall::Fetch(Scope::Watchlist),
            ]
        );
    }

    #[tokio::test]
    async fn failed_retry_does_not_abort_run() {
        let api = MockRecommendationApi::new().with_failing_refresh("HBL");
        let seq = AutoPredictSequencer::new(Duration::ZERO);
        let records = vec![pending("ADBL"), pending("HBL"), pending("SCB")];
        let done = AtomicUsize::new(0);

        let report = seq
            .run(&records, &api, |_| async {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(api.refreshed_symbols(), vec!["ADBL", "HBL", "SCB"]);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "HBL");
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!seq.is_running());
    }

    #[tokio::test]
    async fn second_run_while_in_flight_is_noop() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(MockRecommendationApi::new().with_refresh_gate(Arc::clone(&gate)));
        let started = api.refresh_started();
        let seq = Arc::new(AutoPredictSequencer::new(Duration::ZERO));
        let records = vec![pending("ADBL"), pending("SCB")];

        let first = {
            let api = Arc::clone(&api);
            let seq = Arc::clone(&seq);
            let records = records.clone();
            tokio::spawn(async move { seq.run(&records, api.as_ref(), |_| async {}).await })
        };

        started.notified().await;
        assert!(seq.is_running());

        let second = seq.run(&records, api.as_ref(), |_| async {}).await;
        assert!(second.is_none());

        gate.notify_one();
        started.notified().await;
        gate.notify_one();

        let report = first.await.unwrap().unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(api.refreshed_symbols(), vec!["ADBL", "SCB"]);
        assert!(!seq.is_running());
    }

    #[tokio::test]
    async fn nothing_pending_skips_callback() {
        let api = MockRecommendationApi::new();
        let seq = AutoPredictSequencer::new(Duration::ZERO);
        let called = AtomicUsize::new(0);

        let report = seq
            .run(&[resolved("NBL")], &api, |_| async {
                called.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(report, SequenceReport::default());
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn flag_released_when_run_is_dropped_mid_flight() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(MockRecommendationApi::new().with_refresh_gate(gate));
        let started = api.refresh_started();
        let seq = Arc::new(AutoPredictSequencer::new(Duration::ZERO));

        let handle = {
            let api = Arc::clone(&api);
            let seq = Arc::clone(&seq);
            tokio::spawn(async move {
                seq.run(&[pending("SCB")], api.as_ref(), |_| async {}).await
            })
        };

        started.notified().await;
        assert!(seq.is_running());
        handle.abort();
        let _ = handle.await;
        assert!(!seq.is_running());
    }
}
