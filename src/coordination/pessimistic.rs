//! Run an operation while holding a key's exclusive lock

use crate::coordination::lock_table::ResourceLockTable;
use crate::domain::{CoordinationFailure, LockTimeout, LockVersion, OperationOutcome, ResourceKey};
use futures_util::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes operations under exclusive, timeout-bounded locks
///
/// The lock is released on every exit path: normal completion, a failed
/// operation, a panicking operation, or the calling future being dropped.
/// No automatic retries; the caller decides whether to try again.
#[derive(Debug, Clone)]
pub struct PessimisticExecutor {
    table: Arc<ResourceLockTable>,
    default_timeout: LockTimeout,
}

impl PessimisticExecutor {
    pub fn new(table: Arc<ResourceLockTable>, default_timeout: LockTimeout) -> Self {
        Self {
            table,
            default_timeout,
        }
    }

    pub fn table(&self) -> &Arc<ResourceLockTable> {
        &self.table
    }

    pub fn default_timeout(&self) -> LockTimeout {
        self.default_timeout
    }

    /// [`with_lock_timeout`](Self::with_lock_timeout) using the configured default timeout
    pub async fn with_lock<F, Fut, T, E>(&self, key: &ResourceKey, operation: F) -> OperationOutcome<T>
    where
        F: FnOnce(LockVersion) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.with_lock_timeout(key, self.default_timeout, operation)
            .await
    }

    /// Acquire `key`, run `operation` with the acquired version, release.
    ///
    /// If the lock is not acquired within `timeout` the operation never runs.
    pub async fn with_lock_timeout<F, Fut, T, E>(
        &self,
        key: &ResourceKey,
        timeout: LockTimeout,
        operation: F,
    ) -> OperationOutcome<T>
    where
        F: FnOnce(LockVersion) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let guard = match self.table.acquire_guard(key, timeout).await {
            Ok(guard) => guard,
            Err(failure) => return OperationOutcome::Failure(failure),
        };
        let version = guard.version();

        let result = AssertUnwindSafe(async move { operation(version).await })
            .catch_unwind()
            .await;
        drop(guard);

        match result {
            Ok(Ok(data)) => {
                debug!(key = %key, version = %version, "Locked operation completed");
                OperationOutcome::Success {
                    data,
                    version,
                    attempts: 1,
                }
            }
            Ok(Err(error)) => {
                let message = error.to_string();
                debug!(key = %key, version = %version, error = %message, "Locked operation failed");
                OperationOutcome::Failure(CoordinationFailure::OperationFailed {
                    key: key.clone(),
                    message,
                    version,
                    attempt: 1,
                })
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                warn!(key = %key, version = %version, error = %message, "Locked operation panicked");
                OperationOutcome::Failure(CoordinationFailure::OperationFailed {
                    key: key.clone(),
                    message,
                    version,
                    attempt: 1,
                })
            }
        }
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "operation panicked".to_string()
    }
}
