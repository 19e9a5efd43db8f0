use crate::domain::types::{
    ConcurrencyLevelError, EventNameError, LockTimeoutError, MaxRetriesError, ResourceKeyError,
    RoomNameError, UserIdError,
};
use thiserror::Error;

/// Slotwarden error types
///
/// These cover configuration and boundary validation only. Coordination
/// failures (timeouts, conflicts, failed operations) are never raised as
/// errors; they travel inside [`crate::domain::OperationOutcome`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid resource key: {0}")]
    InvalidResourceKey(#[from] ResourceKeyError),

    #[error("Invalid lock timeout: {0}")]
    InvalidTimeout(#[from] LockTimeoutError),

    #[error("Invalid retry limit: {0}")]
    InvalidRetries(#[from] MaxRetriesError),

    #[error("Invalid concurrency level: {0}")]
    InvalidConcurrency(#[from] ConcurrencyLevelError),

    #[error("Invalid event name: {0}")]
    InvalidEventName(#[from] EventNameError),

    #[error("Invalid room name: {0}")]
    InvalidRoomName(#[from] RoomNameError),

    #[error("Invalid user id: {0}")]
    InvalidUserId(#[from] UserIdError),

    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

impl Error {
    pub fn invalid_setting(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ResourceKey;

    #[test]
    fn test_validation_errors_convert_into_crate_error() {
        let err: Error = ResourceKey::try_new("   ")
            .map_err(Error::from)
            .expect_err("blank keys are rejected");
        assert!(matches!(err, Error::InvalidResourceKey(_)));
        assert!(err.to_string().starts_with("Invalid resource key"));
    }

    #[test]
    fn test_invalid_setting_names_the_field() {
        let err = Error::invalid_setting("locks.fairness", "unknown policy 'lottery'");
        assert_eq!(
            err.to_string(),
            "Invalid setting locks.fairness: unknown policy 'lottery'"
        );
    }
}
