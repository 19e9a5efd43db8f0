//! Version-checked optimistic read/compute/commit
//!
//! Each attempt snapshots the key's version, reads the current domain
//! state, and computes a candidate from it without holding any lock. The
//! key's lock is then taken briefly as a commit gate. Because every
//! acquisition bumps the version, the gate's version equals
//! `snapshot + 1` exactly when nobody else acquired the key since the
//! snapshot; otherwise the attempt is discarded and retried. A snapshot
//! taken while the key was held never validates, since the holder may
//! still be writing the state that was read.
//!
//! The compute step is a plain synchronous `Fn(&S) -> Result<N, E>`: it
//! cannot await and only sees the state by shared reference. Side effects
//! belong in the commit step, which only runs after the version check
//! passed and while the gate is held.
//!
//! A failure or panic in any of the three steps ends the loop with
//! `OperationFailed`; only version conflicts are retried.

use crate::coordination::lock_table::ResourceLockTable;
use crate::coordination::pessimistic::panic_message;
use crate::domain::{
    CoordinationFailure, LockTimeout, LockVersion, MaxRetries, OperationOutcome, ResourceKey,
};
use futures_util::future;
use futures_util::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tuning for the optimistic loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticOptions {
    pub max_retries: MaxRetries,
    /// How long one attempt may wait for the commit gate
    pub commit_gate_timeout: LockTimeout,
}

impl OptimisticOptions {
    pub fn default_max_retries() -> MaxRetries {
        MaxRetries::try_new(3).expect("3 is a valid retry limit")
    }

    pub fn default_commit_gate_timeout() -> LockTimeout {
        LockTimeout::from_millis(100).expect("100ms is a valid timeout")
    }
}

impl Default for OptimisticOptions {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            commit_gate_timeout: Self::default_commit_gate_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimisticExecutor {
    table: Arc<ResourceLockTable>,
    options: OptimisticOptions,
}

impl OptimisticExecutor {
    pub fn new(table: Arc<ResourceLockTable>, options: OptimisticOptions) -> Self {
        Self { table, options }
    }

    pub fn options(&self) -> OptimisticOptions {
        self.options
    }

    /// Read, compute, and validate a candidate state without a commit step.
    ///
    /// A success means the candidate was computed from state that no other
    /// caller acquired the key over; the candidate is returned as data.
    pub async fn with_optimistic_lock<S, N, E, R, RFut, C>(
        &self,
        key: &ResourceKey,
        read: R,
        compute: C,
    ) -> OperationOutcome<N>
    where
        R: FnMut() -> RFut,
        RFut: Future<Output = Result<S, E>>,
        C: Fn(&S) -> Result<N, E>,
        E: Display,
    {
        self.with_optimistic_commit(key, read, compute, |candidate, _version| {
            future::ready(Ok::<N, E>(candidate))
        })
        .await
    }

    /// Read, compute, validate, then run `commit` while the gate is held.
    pub async fn with_optimistic_commit<S, N, T, E, R, RFut, C, K, KFut>(
        &self,
        key: &ResourceKey,
        mut read: R,
        compute: C,
        commit: K,
    ) -> OperationOutcome<T>
    where
        R: FnMut() -> RFut,
        RFut: Future<Output = Result<S, E>>,
        C: Fn(&S) -> Result<N, E>,
        K: FnOnce(N, LockVersion) -> KFut,
        KFut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.options.max_retries.into_inner();
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            // A snapshot taken while someone holds the key may predate their write.
            let (snapshot, held_at_snapshot) = self.table.observe(key);

            let state = match AssertUnwindSafe(async { read().await }).catch_unwind().await {
                Ok(Ok(state)) => state,
                Ok(Err(error)) => {
                    return self.operation_failed(key, error.to_string(), snapshot, attempt)
                }
                Err(panic) => {
                    return self.operation_failed(key, panic_message(&*panic), snapshot, attempt)
                }
            };
            let candidate = match std::panic::catch_unwind(AssertUnwindSafe(|| compute(&state))) {
                Ok(Ok(candidate)) => candidate,
                Ok(Err(error)) => {
                    return self.operation_failed(key, error.to_string(), snapshot, attempt)
                }
                Err(panic) => {
                    return self.operation_failed(key, panic_message(&*panic), snapshot, attempt)
                }
            };

            let gate = match self
                .table
                .acquire_guard(key, self.options.commit_gate_timeout)
                .await
            {
                Ok(gate) => gate,
                Err(failure) => {
                    self.table.record_version_conflict(key);
                    debug!(key = %key, attempt, "Commit gate busy; retrying");
                    last_failure = Some(failure);
                    continue;
                }
            };

            let expected = snapshot.next();
            if held_at_snapshot || gate.version() != expected {
                let found = gate.version();
                drop(gate);
                self.table.record_version_conflict(key);
                let conflict = CoordinationFailure::VersionConflict {
                    key: key.clone(),
                    expected,
                    found,
                };
                debug!(key = %key, attempt, %conflict, "Optimistic attempt lost the race");
                last_failure = Some(conflict);
                continue;
            }

            let version = gate.version();
            let committed = AssertUnwindSafe(async move { commit(candidate, version).await })
                .catch_unwind()
                .await;
            drop(gate);

            return match committed {
                Ok(Ok(data)) => {
                    debug!(key = %key, version = %version, attempt, "Optimistic commit accepted");
                    OperationOutcome::Success {
                        data,
                        version,
                        attempts: attempt,
                    }
                }
                Ok(Err(error)) => self.operation_failed(key, error.to_string(), version, attempt),
                Err(panic) => self.operation_failed(key, panic_message(&*panic), version, attempt),
            };
        }

        warn!(key = %key, attempts = max_attempts, "Optimistic retries exhausted");
        OperationOutcome::Failure(CoordinationFailure::MaxRetriesExceeded {
            key: key.clone(),
            attempts: max_attempts,
            last_failure: last_failure.map(Box::new),
        })
    }

    fn operation_failed<T>(
        &self,
        key: &ResourceKey,
        message: String,
        version: LockVersion,
        attempt: u32,
    ) -> OperationOutcome<T> {
        debug!(key = %key, version = %version, attempt, error = %message, "Optimistic operation failed");
        OperationOutcome::Failure(CoordinationFailure::OperationFailed {
            key: key.clone(),
            message,
            version,
            attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureReason;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(table: &Arc<ResourceLockTable>) -> OptimisticExecutor {
        OptimisticExecutor::new(Arc::clone(table), OptimisticOptions::default())
    }

    fn key(raw: &str) -> ResourceKey {
        ResourceKey::try_new(raw).expect("valid key")
    }

    #[tokio::test]
    async fn test_uncontended_attempt_commits_first_time() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:1");

        let outcome = executor
            .with_optimistic_lock(
                &payment,
                || async { Ok::<_, String>(10_u32) },
                |balance| Ok(balance + 5),
            )
            .await;

        assert_eq!(outcome.data(), Some(&15));
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.version(), Some(LockVersion::new(1)));
        assert!(!table.is_held(&payment));
    }

    #[tokio::test]
    async fn test_concurrent_acquisition_forces_a_retry() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:2");
        let reads = AtomicU32::new(0);

        let outcome = executor
            .with_optimistic_lock(
                &payment,
                || {
                    // Another writer takes and releases the key during the first read.
                    if reads.fetch_add(1, Ordering::SeqCst) == 0 {
                        assert!(table.try_acquire(&payment).acquired);
                        assert!(table.release_lock(&payment));
                    }
                    async { Ok::<_, String>(1_u32) }
                },
                |value| Ok(value * 2),
            )
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(table.metrics(&payment).version_conflict, 1);
    }

    #[tokio::test]
    async fn test_snapshot_taken_during_a_write_is_not_trusted() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:held");
        assert!(table.try_acquire(&payment).acquired);
        let reads = AtomicU32::new(0);

        let outcome = executor
            .with_optimistic_lock(
                &payment,
                || {
                    // The holder finishes right after the first read.
                    if reads.fetch_add(1, Ordering::SeqCst) == 0 {
                        assert!(table.release_lock(&payment));
                    }
                    async { Ok::<_, String>(7_u32) }
                },
                |value| Ok(*value),
            )
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.version(), Some(LockVersion::new(3)));
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_version_conflicts() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:3");

        let outcome = executor
            .with_optimistic_lock(
                &payment,
                || {
                    assert!(table.try_acquire(&payment).acquired);
                    assert!(table.release_lock(&payment));
                    async { Ok::<_, String>(()) }
                },
                |_| Ok(()),
            )
            .await;

        assert_eq!(outcome.reason(), Some(FailureReason::VersionConflicts));
        assert_eq!(outcome.attempts(), 3);
        match outcome.failure() {
            Some(CoordinationFailure::MaxRetriesExceeded { last_failure, .. }) => {
                assert!(matches!(
                    last_failure.as_deref(),
                    Some(CoordinationFailure::VersionConflict { .. })
                ));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_busy_gate_counts_as_a_conflict() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:4");
        assert!(table.try_acquire(&payment).acquired);

        let outcome = executor
            .with_optimistic_lock(&payment, || async { Ok::<_, String>(0) }, |v| Ok(v + 1))
            .await;

        assert_eq!(outcome.reason(), Some(FailureReason::VersionConflicts));
        let metrics = table.metrics(&payment);
        assert_eq!(metrics.version_conflict, 3);
        assert_eq!(metrics.timeout, 3);
    }

    #[tokio::test]
    async fn test_failed_compute_does_not_retry() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:5");

        let outcome: OperationOutcome<u32> = executor
            .with_optimistic_lock(
                &payment,
                || async { Ok::<_, String>(0_u32) },
                |_| Err("Payment already processed".to_string()),
            )
            .await;

        assert_eq!(outcome.reason(), Some(FailureReason::OperationFailed));
        assert_eq!(
            outcome.error_message().as_deref(),
            Some("Payment already processed")
        );
        assert_eq!(table.current_version(&payment), LockVersion::initial());
    }

    #[tokio::test]
    async fn test_panicking_compute_is_reported_as_failure() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:panic-compute");
        let reads = AtomicU32::new(0);

        let outcome: OperationOutcome<u32> = executor
            .with_optimistic_lock(
                &payment,
                || {
                    reads.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(0_u32) }
                },
                |_| -> Result<u32, String> { panic!("ledger row missing") },
            )
            .await;

        assert_eq!(outcome.reason(), Some(FailureReason::OperationFailed));
        assert_eq!(outcome.error_message().as_deref(), Some("ledger row missing"));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert!(!table.is_held(&payment));
    }

    #[tokio::test]
    async fn test_panicking_read_is_reported_as_failure() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:panic-read");

        let outcome = executor
            .with_optimistic_commit(
                &payment,
                || async {
                    if true {
                        panic!("payment store offline");
                    }
                    Ok::<u32, String>(0)
                },
                |value| Ok(value + 1),
                |candidate, _version| async move { Ok(candidate) },
            )
            .await;

        assert_eq!(outcome.reason(), Some(FailureReason::OperationFailed));
        assert_eq!(
            outcome.error_message().as_deref(),
            Some("payment store offline")
        );
        assert_eq!(table.current_version(&payment), LockVersion::initial());

        let retried = executor
            .with_optimistic_lock(&payment, || async { Ok::<_, String>(1_u32) }, |v| Ok(*v))
            .await;
        assert!(retried.is_success());
    }

    #[tokio::test]
    async fn test_failure_after_a_conflict_reports_its_attempt() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:late-failure");
        let reads = AtomicU32::new(0);

        let outcome: OperationOutcome<u32> = executor
            .with_optimistic_lock(
                &payment,
                || {
                    let read = reads.fetch_add(1, Ordering::SeqCst);
                    if read == 0 {
                        assert!(table.try_acquire(&payment).acquired);
                        assert!(table.release_lock(&payment));
                    }
                    async move { Ok::<_, String>(read) }
                },
                |read| {
                    if *read == 0 {
                        Ok(0)
                    } else {
                        Err("Payment already processed".to_string())
                    }
                },
            )
            .await;

        assert_eq!(outcome.reason(), Some(FailureReason::OperationFailed));
        assert_eq!(outcome.attempts(), 2);
    }

    #[tokio::test]
    async fn test_commit_runs_once_under_the_gate() {
        let table = Arc::new(ResourceLockTable::default());
        let executor = executor(&table);
        let payment = key("payment:6");
        let commits = AtomicU32::new(0);

        let outcome = executor
            .with_optimistic_commit(
                &payment,
                || async { Ok::<_, String>(40_u32) },
                |total| Ok(total + 2),
                |candidate, version| {
                    assert!(table.is_held(&payment));
                    commits.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(format!("{candidate}@{version}")) }
                },
            )
            .await;

        assert_eq!(outcome.data().map(String::as_str), Some("42@1"));
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert!(!table.is_held(&payment));
    }
}
