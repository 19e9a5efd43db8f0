//! Harness for provoking, timing, and classifying race conditions
//!
//! Launches many simultaneous callers against an operation (typically
//! one routed through the coordinator), records each call's outcome and
//! duration, and flags patterns that suggest contention or broken
//! admission control. Intended for tests and diagnostics.

pub mod analysis;
pub mod scenarios;
pub mod timeline;

pub use analysis::{CallRecord, HarnessRun, RaceIndicator, RunAnalysis, DEFAULT_VARIANCE_RATIO};
pub use scenarios::{BenchmarkRow, BenchmarkTable, CapacityReport};
pub use timeline::{DebugRun, Timeline, TimelineEvent, TimelineEventKind};

use crate::coordination::pessimistic::panic_message;
use crate::domain::{ConcurrencyLevel, RunId};
use chrono::Utc;
use futures_util::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarnessOptions {
    /// Std dev / mean ratio above which duration variance is flagged
    pub variance_ratio: f64,
    /// Pause between concurrency levels in a benchmark
    pub benchmark_cooldown: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            variance_ratio: DEFAULT_VARIANCE_RATIO,
            benchmark_cooldown: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConcurrencyHarness {
    options: HarnessOptions,
}

impl ConcurrencyHarness {
    pub fn new(options: HarnessOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> HarnessOptions {
        self.options
    }

    /// Launch `concurrency` calls of `operation` at once and time each one.
    ///
    /// Each call receives its launch index and a clone of `params`. Calls
    /// run as separate tasks, so on a multi-thread runtime they execute in
    /// parallel. A panicking call is recorded as a failure.
    pub async fn simulate_concurrent_requests<F, Fut, P, T, E>(
        &self,
        operation: F,
        concurrency: ConcurrencyLevel,
        params: P,
    ) -> HarnessRun
    where
        F: Fn(usize, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        P: Clone + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        self.simulate_from(Instant::now(), operation, concurrency, params)
            .await
    }

    /// Same as [`simulate_concurrent_requests`](Self::simulate_concurrent_requests)
    /// with call offsets measured from `run_clock`
    pub(crate) async fn simulate_from<F, Fut, P, T, E>(
        &self,
        run_clock: Instant,
        operation: F,
        concurrency: ConcurrencyLevel,
        params: P,
    ) -> HarnessRun
    where
        F: Fn(usize, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        P: Clone + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let level = concurrency.into_inner();
        let operation = Arc::new(operation);
        let run_id = RunId::generate();
        let started_at = Utc::now();

        let mut tasks = JoinSet::new();
        for index in 0..level {
            let operation = Arc::clone(&operation);
            let params = params.clone();
            tasks.spawn(async move {
                let call_clock = Instant::now();
                let offset = call_clock.saturating_duration_since(run_clock);
                let result = AssertUnwindSafe(async move { (*operation)(index, params).await })
                    .catch_unwind()
                    .await;
                let duration = call_clock.elapsed();

                let error = match result {
                    Ok(Ok(_)) => None,
                    Ok(Err(error)) => Some(error.to_string()),
                    Err(panic) => Some(panic_message(&*panic)),
                };
                CallRecord {
                    index,
                    success: error.is_none(),
                    duration,
                    started_at: offset,
                    error,
                }
            });
        }

        let mut records = Vec::with_capacity(level);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(record) => records.push(record),
                Err(error) => warn!(run = %run_id, %error, "Simulated call did not complete"),
            }
        }
        records.sort_by_key(|record| record.index);

        let analysis = RunAnalysis::from_records(&records, self.options.variance_ratio);
        let run = HarnessRun {
            run_id,
            started_at,
            concurrency_level: concurrency,
            total_duration: run_clock.elapsed(),
            records,
            analysis,
        };
        info!(
            run = %run.run_id,
            concurrency = level,
            successes = run.analysis.successes,
            failures = run.analysis.failures,
            indicators = run.analysis.indicators.len(),
            "Concurrent simulation finished"
        );
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn level(n: usize) -> ConcurrencyLevel {
        ConcurrencyLevel::try_new(n).expect("valid level")
    }

    #[tokio::test]
    async fn test_single_caller_always_succeeds() {
        let harness = ConcurrencyHarness::default();

        let run = harness
            .simulate_concurrent_requests(
                |index, ()| async move { Ok::<_, String>(index) },
                level(1),
                (),
            )
            .await;

        assert_eq!(run.records.len(), 1);
        assert_eq!(run.analysis.success_rate, 1.0);
        assert!(run.records[0].success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_records_every_call_in_index_order() {
        let harness = ConcurrencyHarness::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let run = harness
            .simulate_concurrent_requests(
                |index, calls: Arc<AtomicUsize>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if index % 2 == 0 {
                        Ok(())
                    } else {
                        Err(format!("call {index} rejected"))
                    }
                },
                level(10),
                Arc::clone(&calls),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        let indices: Vec<_> = run.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
        assert_eq!(run.analysis.successes, 5);
        assert_eq!(run.records[3].error.as_deref(), Some("call 3 rejected"));
    }

    #[tokio::test]
    async fn test_panicking_call_is_recorded_as_failure() {
        let harness = ConcurrencyHarness::default();

        let run = harness
            .simulate_concurrent_requests(
                |index, ()| async move {
                    if index == 1 {
                        panic!("handler crashed");
                    }
                    Ok::<_, String>(())
                },
                level(3),
                (),
            )
            .await;

        assert_eq!(run.records.len(), 3);
        assert_eq!(run.analysis.failures, 1);
        assert_eq!(run.records[1].error.as_deref(), Some("handler crashed"));
    }
}
