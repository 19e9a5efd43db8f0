//! Results of coordinated operations
//!
//! Every coordinated call returns an [`OperationOutcome`]. Failures are
//! values, not errors: callers branch on the outcome and never rely on
//! panics or `Err` propagation across the lock boundary.

use crate::domain::types::{LockVersion, ResourceKey};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Flat discriminant of a coordination failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    #[display("timeout")]
    Timeout,
    #[display("operation_failed")]
    OperationFailed,
    #[display("version_conflict")]
    VersionConflict,
    #[display("version_conflicts")]
    VersionConflicts,
}

/// Why a coordinated operation did not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationFailure {
    /// The bounded wait expired before the lock was acquired
    #[error("timed out after {waited:?} waiting for lock on {key}")]
    LockTimeout {
        key: ResourceKey,
        waited: Duration,
        version: LockVersion,
    },

    /// The caller's operation failed while the lock was held
    #[error("operation on {key} failed: {message}")]
    OperationFailed {
        key: ResourceKey,
        message: String,
        version: LockVersion,
        /// Attempt on which it failed; always 1 on the pessimistic path
        attempt: u32,
    },

    /// One optimistic attempt saw the version move under it
    #[error("version conflict on {key}: expected commit version {expected}, found {found}")]
    VersionConflict {
        key: ResourceKey,
        expected: LockVersion,
        found: LockVersion,
    },

    /// The optimistic loop ran out of attempts
    #[error("gave up on {key} after {attempts} conflicting attempts")]
    MaxRetriesExceeded {
        key: ResourceKey,
        attempts: u32,
        last_failure: Option<Box<CoordinationFailure>>,
    },
}

impl CoordinationFailure {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::LockTimeout { .. } => FailureReason::Timeout,
            Self::OperationFailed { .. } => FailureReason::OperationFailed,
            Self::VersionConflict { .. } => FailureReason::VersionConflict,
            Self::MaxRetriesExceeded { .. } => FailureReason::VersionConflicts,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::LockTimeout { key, .. }
            | Self::OperationFailed { key, .. }
            | Self::VersionConflict { key, .. }
            | Self::MaxRetriesExceeded { key, .. } => key,
        }
    }

    /// Version observed when the failure happened, where one applies
    pub fn version(&self) -> Option<LockVersion> {
        match self {
            Self::LockTimeout { version, .. } | Self::OperationFailed { version, .. } => {
                Some(*version)
            }
            Self::VersionConflict { found, .. } => Some(*found),
            Self::MaxRetriesExceeded { .. } => None,
        }
    }
}

/// Result of one coordinated operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome<T> {
    Success {
        data: T,
        version: LockVersion,
        attempts: u32,
    },
    Failure(CoordinationFailure),
}

impl<T> OperationOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure(_) => None,
        }
    }

    pub fn version(&self) -> Option<LockVersion> {
        match self {
            Self::Success { version, .. } => Some(*version),
            Self::Failure(failure) => failure.version(),
        }
    }

    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(failure) => Some(failure.reason()),
        }
    }

    pub fn failure(&self) -> Option<&CoordinationFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(failure) => Some(failure),
        }
    }

    /// Human-readable failure message, if the operation failed
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(CoordinationFailure::OperationFailed { message, .. }) => {
                Some(message.clone())
            }
            Self::Failure(failure) => Some(failure.to_string()),
        }
    }

    /// Number of attempts made; pessimistic calls always report 1
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } => *attempts,
            Self::Failure(CoordinationFailure::MaxRetriesExceeded { attempts, .. }) => *attempts,
            Self::Failure(CoordinationFailure::OperationFailed { attempt, .. }) => *attempt,
            Self::Failure(_) => 1,
        }
    }

    pub fn into_result(self) -> Result<T, CoordinationFailure> {
        match self {
            Self::Success { data, .. } => Ok(data),
            Self::Failure(failure) => Err(failure),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationOutcome<U> {
        match self {
            Self::Success {
                data,
                version,
                attempts,
            } => OperationOutcome::Success {
                data: f(data),
                version,
                attempts,
            },
            Self::Failure(failure) => OperationOutcome::Failure(failure),
        }
    }
}
