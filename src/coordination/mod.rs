//! Mutual-exclusion disciplines for capacity-bounded resources
//!
//! - [`ResourceLockTable`]: per-key exclusive locks with versions and counters
//! - [`PessimisticExecutor`]: run an operation while holding a key's lock
//! - [`OptimisticExecutor`]: read/compute without a lock, validate at commit

pub mod lock_table;
pub mod metrics;
pub mod optimistic;
pub mod pessimistic;

pub use lock_table::{Acquisition, FairnessPolicy, LockGuard, LockSnapshot, ResourceLockTable};
pub use metrics::LockMetrics;
pub use optimistic::{OptimisticExecutor, OptimisticOptions};
pub use pessimistic::PessimisticExecutor;
