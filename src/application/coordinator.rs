use crate::config::Settings;
use crate::coordination::{
    FairnessPolicy, OptimisticExecutor, OptimisticOptions, PessimisticExecutor, ResourceLockTable,
};
use crate::domain::{LockTimeout, LockVersion, OperationOutcome, ResourceKey};
use crate::notifier::Notifier;
use crate::Result;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Wait bound for `with_lock` calls that do not pass their own timeout
    pub default_timeout: LockTimeout,
    pub fairness: FairnessPolicy,
    pub optimistic: OptimisticOptions,
}

impl CoordinatorOptions {
    pub fn default_lock_timeout() -> LockTimeout {
        LockTimeout::from_millis(5000).expect("5s is a valid timeout")
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            default_timeout: Self::default_lock_timeout(),
            fairness: FairnessPolicy::default(),
            optimistic: OptimisticOptions::default(),
        }
    }
}

/// One independent coordination domain
///
/// Owns a lock table shared by its pessimistic and optimistic executors,
/// plus a notifier for publishing results. Clones share all state;
/// separately constructed coordinators share nothing.
#[derive(Debug, Clone)]
pub struct Coordinator {
    table: Arc<ResourceLockTable>,
    pessimistic: PessimisticExecutor,
    optimistic: OptimisticExecutor,
    notifier: Notifier,
}

impl Coordinator {
    pub fn new(options: CoordinatorOptions) -> Self {
        let table = Arc::new(ResourceLockTable::new(options.fairness));
        Self {
            pessimistic: PessimisticExecutor::new(Arc::clone(&table), options.default_timeout),
            optimistic: OptimisticExecutor::new(Arc::clone(&table), options.optimistic),
            notifier: Notifier::new(),
            table,
        }
    }

    #[instrument(skip(settings))]
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let options = settings.coordinator_options()?;
        info!(
            fairness = ?options.fairness,
            default_timeout_ms = options.default_timeout.as_duration().as_millis() as u64,
            max_retries = options.optimistic.max_retries.into_inner(),
            "Coordinator configured"
        );
        Ok(Self::new(options))
    }

    pub fn lock_table(&self) -> &Arc<ResourceLockTable> {
        &self.table
    }

    pub fn pessimistic(&self) -> &PessimisticExecutor {
        &self.pessimistic
    }

    pub fn optimistic(&self) -> &OptimisticExecutor {
        &self.optimistic
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn with_lock<F, Fut, T, E>(&self, key: &ResourceKey, operation: F) -> OperationOutcome<T>
    where
        F: FnOnce(LockVersion) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.pessimistic.with_lock(key, operation).await
    }

    pub async fn with_lock_timeout<F, Fut, T, E>(
        &self,
        key: &ResourceKey,
        timeout: LockTimeout,
        operation: F,
    ) -> OperationOutcome<T>
    where
        F: FnOnce(LockVersion) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.pessimistic
            .with_lock_timeout(key, timeout, operation)
            .await
    }

    pub async fn with_optimistic_lock<S, N, E, R, RFut, C>(
        &self,
        key: &ResourceKey,
        read: R,
        compute: C,
    ) -> OperationOutcome<N>
    where
        R: FnMut() -> RFut,
        RFut: Future<Output = std::result::Result<S, E>>,
        C: Fn(&S) -> std::result::Result<N, E>,
        E: Display,
    {
        self.optimistic
            .with_optimistic_lock(key, read, compute)
            .await
    }

    pub async fn with_optimistic_commit<S, N, T, E, R, RFut, C, K, KFut>(
        &self,
        key: &ResourceKey,
        read: R,
        compute: C,
        commit: K,
    ) -> OperationOutcome<T>
    where
        R: FnMut() -> RFut,
        RFut: Future<Output = std::result::Result<S, E>>,
        C: Fn(&S) -> std::result::Result<N, E>,
        K: FnOnce(N, LockVersion) -> KFut,
        KFut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.optimistic
            .with_optimistic_commit(key, read, compute, commit)
            .await
    }

    /// Administrative reset of every key's counters, e.g. between harness runs
    pub fn reset_metrics(&self) {
        self.table.reset_metrics();
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(CoordinatorOptions::default())
    }
}
