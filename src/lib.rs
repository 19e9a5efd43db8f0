//! Slotwarden - concurrency coordination for capacity-bounded booking resources
//!
//! Arbitrates access to resources such as time slots, league seats, and
//! payment records when many requests race on the same key. Provides
//! queued, timeout-bounded pessimistic locking, version-checked optimistic
//! retry, fire-and-forget event fan-out, and a harness for provoking and
//! classifying race conditions.

pub mod application;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod harness;
pub mod notifier;

pub use application::Coordinator;
pub use error::{Error, Result};
