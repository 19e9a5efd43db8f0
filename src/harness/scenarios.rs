//! Ready-made scenarios built on the concurrent simulation

use crate::domain::{ConcurrencyLevel, ResourceKey};
use crate::harness::analysis::{millis, HarnessRun};
use crate::harness::ConcurrencyHarness;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of driving more admissions than a resource can hold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityReport {
    pub resource_id: ResourceKey,
    pub capacity: usize,
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    /// Admissions beyond capacity; anything above zero is a race
    pub over_capacity: usize,
    pub passed: bool,
    pub run: HarnessRun,
}

/// One concurrency level of a benchmark
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRow {
    pub level: usize,
    pub total_time: Duration,
    pub throughput_per_sec: f64,
    pub success_rate: f64,
    pub avg_duration: Duration,
}

impl BenchmarkRow {
    pub fn from_run(run: &HarnessRun) -> Self {
        let secs = run.total_duration.as_secs_f64();
        Self {
            level: run.concurrency_level.into_inner(),
            total_time: run.total_duration,
            throughput_per_sec: if secs > 0.0 {
                run.analysis.total as f64 / secs
            } else {
                0.0
            },
            success_rate: run.analysis.success_rate,
            avg_duration: run.analysis.avg_duration,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchmarkTable {
    pub rows: Vec<BenchmarkRow>,
}

impl BenchmarkTable {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>8} | {:>12} | {:>12} | {:>9} | {:>10}",
            "level", "total ms", "ops/sec", "success", "avg ms"
        );
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{:>8} | {:>12.2} | {:>12.1} | {:>8.1}% | {:>10.3}",
                row.level,
                millis(row.total_time),
                row.throughput_per_sec,
                row.success_rate * 100.0,
                millis(row.avg_duration)
            );
        }
        out
    }
}

impl ConcurrencyHarness {
    /// Drive `attempts` simultaneous admissions and check none exceed `capacity`.
    ///
    /// `check_in` receives the resource and the attempt index and should
    /// fail with a capacity-style message once the resource is full.
    pub async fn test_capacity_race_condition<F, Fut, T, E>(
        &self,
        check_in: F,
        resource_id: ResourceKey,
        capacity: usize,
        attempts: ConcurrencyLevel,
    ) -> CapacityReport
    where
        F: Fn(ResourceKey, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let run = self
            .simulate_concurrent_requests(
                move |index, resource: ResourceKey| check_in(resource, index),
                attempts,
                resource_id.clone(),
            )
            .await;

        let successes = run.analysis.successes;
        let over_capacity = successes.saturating_sub(capacity);
        if over_capacity > 0 {
            warn!(
                resource = %resource_id,
                capacity,
                successes,
                over_capacity,
                "Capacity exceeded under concurrent admission"
            );
        } else {
            info!(resource = %resource_id, capacity, successes, "Capacity held under concurrent admission");
        }

        CapacityReport {
            resource_id,
            capacity,
            attempts: run.analysis.total,
            successes,
            failures: run.analysis.failures,
            over_capacity,
            passed: over_capacity == 0,
            run,
        }
    }

    /// Run the same operation at each concurrency level, cooling down between levels
    pub async fn benchmark_concurrency<F, Fut, T, E>(
        &self,
        operation: F,
        levels: &[ConcurrencyLevel],
    ) -> BenchmarkTable
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let operation = Arc::new(operation);
        let cooldown = self.options().benchmark_cooldown;
        let mut rows = Vec::with_capacity(levels.len());

        for (position, level) in levels.iter().enumerate() {
            if position > 0 && !cooldown.is_zero() {
                tokio::time::sleep(cooldown).await;
            }
            let operation = Arc::clone(&operation);
            let run = self
                .simulate_concurrent_requests(move |index, ()| (*operation)(index), *level, ())
                .await;
            let row = BenchmarkRow::from_run(&run);
            info!(
                level = row.level,
                throughput = row.throughput_per_sec,
                success_rate = row.success_rate,
                "Benchmark level finished"
            );
            rows.push(row);
        }

        BenchmarkTable { rows }
    }
}
