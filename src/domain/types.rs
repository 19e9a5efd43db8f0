//! Validated domain types for the coordination layer
//!
//! Newtypes for the values that cross the coordinator's boundary, so that
//! an empty resource key or a zero timeout cannot be constructed.

use nutype::nutype;
#[allow(unused_imports)] // These are used by nutype derive macros
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Key naming the resource a lock protects (e.g. `slot:2024-06-01T10:00`)
///
/// Callers must agree on key naming; nothing here enforces it. Limited to
/// 512 characters since keys are often composed from several identifiers.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 512),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct ResourceKey(String);

/// Monotonic version of a lock record, bumped on every acquisition
///
/// A key that has never been acquired is at version 0; the first
/// acquisition yields version 1.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display
))]
pub struct LockVersion(u64);

impl LockVersion {
    /// Version of a key that has never been acquired
    pub fn initial() -> Self {
        Self::new(0)
    }

    pub fn next(self) -> Self {
        Self::new(self.into_inner().saturating_add(1))
    }

    pub fn is_initial(self) -> bool {
        self.into_inner() == 0
    }
}

/// Upper bound on how long a caller waits for a lock
#[nutype(
    validate(predicate = |d| !d.is_zero()),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)
)]
pub struct LockTimeout(Duration);

impl LockTimeout {
    pub fn from_millis(millis: u64) -> Result<Self, LockTimeoutError> {
        Self::try_new(Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> Duration {
        self.into_inner()
    }
}

/// Number of optimistic attempts before giving up
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)
)]
pub struct MaxRetries(u32);

/// Number of simultaneous callers a harness run launches
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)
)]
pub struct ConcurrencyLevel(usize);

/// Name of a published event (e.g. `slot.booked`)
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct EventName(String);

/// Delivery room on the real-time gateway
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct RoomName(String);

impl RoomName {
    /// Per-user room used by `notify_user`
    pub fn for_user(user_id: &UserId) -> Result<Self, RoomNameError> {
        Self::try_new(format!("user:{user_id}"))
    }
}

/// Identifier of an application user
///
/// Limited to 128 characters so the derived `user:{id}` room always fits
/// in a [`RoomName`].
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct UserId(String);

/// Unique identifier for one harness run
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct RunId(Uuid);

impl RunId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Unique identifier for a gateway subscriber
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn test_resource_key_rejects_blank_input(#[case] raw: &str) {
        assert!(ResourceKey::try_new(raw).is_err());
    }

    #[test]
    fn test_resource_key_is_trimmed() {
        let key = ResourceKey::try_new("  slot:42  ").expect("valid key");
        assert_eq!(key.as_ref(), "slot:42");
    }

    #[test]
    fn test_resource_key_rejects_overlong_input() {
        assert!(ResourceKey::try_new("k".repeat(513)).is_err());
        assert!(ResourceKey::try_new("k".repeat(512)).is_ok());
    }

    #[test]
    fn test_lock_version_starts_at_zero_and_increments() {
        let v = LockVersion::initial();
        assert!(v.is_initial());
        assert_eq!(v.next().into_inner(), 1);
        assert!(v.next() > v);
    }

    #[test]
    fn test_lock_timeout_rejects_zero() {
        assert!(LockTimeout::from_millis(0).is_err());
        let timeout = LockTimeout::from_millis(100).expect("valid timeout");
        assert_eq!(timeout.as_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_retries_and_zero_concurrency_are_rejected() {
        assert!(MaxRetries::try_new(0).is_err());
        assert!(ConcurrencyLevel::try_new(0).is_err());
        assert!(MaxRetries::try_new(3).is_ok());
    }

    #[test]
    fn test_user_room_is_prefixed() {
        let user = UserId::try_new("u-17").expect("valid user id");
        let room = RoomName::for_user(&user).expect("user rooms always fit");
        assert_eq!(room.as_ref(), "user:u-17");
    }

    #[test]
    fn test_longest_user_id_still_yields_a_room() {
        let user = UserId::try_new("x".repeat(128)).expect("valid user id");
        assert!(RoomName::for_user(&user).is_ok());
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }
}
