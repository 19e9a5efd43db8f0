//! Registry of per-key exclusive locks
//!
//! Each resource key maps to a lazily created lock record holding the
//! held flag, a monotonic version, and bookkeeping counters. Records live
//! as long as the table does; there is no eviction.
//!
//! Waiting is event-driven: a release wakes the waiters registered on the
//! key's [`Notify`], and each waiter re-checks whether it may claim. Under
//! [`FairnessPolicy::Fifo`] only the longest-waiting caller may claim a
//! freed lock; under [`FairnessPolicy::Barging`] any woken caller may.

use crate::coordination::metrics::{LockMetrics, MetricCounters};
use crate::domain::{CoordinationFailure, LockTimeout, LockVersion, ResourceKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Ordering policy among callers waiting on the same key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessPolicy {
    /// Waiters are admitted in arrival order
    #[default]
    Fifo,
    /// Any woken waiter may win; no ordering guarantee
    Barging,
}

/// Result of a raw acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Acquisition {
    pub acquired: bool,
    pub version: LockVersion,
}

/// Observable state of one lock record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockSnapshot {
    pub key: ResourceKey,
    pub held: bool,
    pub version: LockVersion,
    pub acquired_at: Option<DateTime<Utc>>,
    pub waiting: usize,
    pub metrics: LockMetrics,
}

#[derive(Debug)]
struct LockState {
    held: bool,
    version: LockVersion,
    acquired_at: Option<DateTime<Utc>>,
    waiters: VecDeque<u64>,
}

impl Default for LockState {
    fn default() -> Self {
        Self {
            held: false,
            version: LockVersion::initial(),
            acquired_at: None,
            waiters: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Released,
    NotHeld,
    HeldByOther,
}

#[derive(Debug, Default)]
struct LockEntry {
    state: Mutex<LockState>,
    released: Notify,
    metrics: MetricCounters,
}

impl LockEntry {
    /// Claim the lock if it is free and the caller is allowed to take it.
    ///
    /// `ticket` is `None` for a first, non-queued attempt.
    fn claim(&self, ticket: Option<u64>, fairness: FairnessPolicy) -> Option<LockVersion> {
        let mut state = self.state.lock();
        if state.held {
            return None;
        }
        if fairness == FairnessPolicy::Fifo {
            let at_head = match ticket {
                None => state.waiters.is_empty(),
                Some(ticket) => state.waiters.front() == Some(&ticket),
            };
            if !at_head {
                return None;
            }
        }
        if let Some(ticket) = ticket {
            state.waiters.retain(|waiting| *waiting != ticket);
        }

        state.held = true;
        state.version = state.version.next();
        state.acquired_at = Some(Utc::now());
        self.metrics.record_acquired();
        Some(state.version)
    }

    /// Release the lock; with `expected`, only if that acquisition still holds it
    fn release(&self, expected: Option<LockVersion>) -> Release {
        let outcome = {
            let mut state = self.state.lock();
            if !state.held {
                Release::NotHeld
            } else if expected.is_some_and(|version| version != state.version) {
                Release::HeldByOther
            } else {
                state.held = false;
                state.acquired_at = None;
                Release::Released
            }
        };
        if outcome == Release::Released {
            self.metrics.record_released();
            self.released.notify_waiters();
        }
        outcome
    }

    fn enqueue(&self, ticket: u64) {
        self.state.lock().waiters.push_back(ticket);
    }

    fn leave_queue(&self, ticket: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.waiters.len();
        state.waiters.retain(|waiting| *waiting != ticket);
        state.waiters.len() != before
    }

    fn version(&self) -> LockVersion {
        self.state.lock().version
    }
}

/// Removes a waiter's ticket when it stops waiting for any reason,
/// including the acquiring future being dropped.
struct QueuedWaiter<'a> {
    entry: &'a LockEntry,
    ticket: u64,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if self.entry.leave_queue(self.ticket) {
            // The queue head may have changed; let the remaining waiters re-check.
            self.entry.released.notify_waiters();
        }
    }
}

/// Scoped ownership of a key's lock; released on drop
#[derive(Debug)]
pub struct LockGuard {
    entry: Arc<LockEntry>,
    key: ResourceKey,
    version: LockVersion,
}

impl LockGuard {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Version assigned to this acquisition
    pub fn version(&self) -> LockVersion {
        self.version
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match self.entry.release(Some(self.version)) {
            Release::Released => {
                debug!(key = %self.key, version = %self.version, "Lock released");
            }
            Release::NotHeld => {
                debug!(key = %self.key, version = %self.version, "Lock already released before guard dropped");
            }
            Release::HeldByOther => {
                warn!(key = %self.key, version = %self.version, "Lock was released externally and re-acquired; leaving the new holder in place");
            }
        }
    }
}

/// Process-local lock table
///
/// Construct one per coordinator; independent tables never share state.
#[derive(Debug, Default)]
pub struct ResourceLockTable {
    entries: Mutex<HashMap<ResourceKey, Arc<LockEntry>>>,
    fairness: FairnessPolicy,
    next_ticket: AtomicU64,
}

impl ResourceLockTable {
    pub fn new(fairness: FairnessPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fairness,
            next_ticket: AtomicU64::new(0),
        }
    }

    pub fn fairness(&self) -> FairnessPolicy {
        self.fairness
    }

    fn entry(&self, key: &ResourceKey) -> Arc<LockEntry> {
        let mut entries = self.entries.lock();
        Arc::clone(entries.entry(key.clone()).or_default())
    }

    fn existing(&self, key: &ResourceKey) -> Option<Arc<LockEntry>> {
        self.entries.lock().get(key).map(Arc::clone)
    }

    /// Claim a key only if it is immediately available
    pub fn try_acquire(&self, key: &ResourceKey) -> Acquisition {
        let entry = self.entry(key);
        match entry.claim(None, self.fairness) {
            Some(version) => {
                debug!(key = %key, version = %version, "Lock acquired");
                Acquisition {
                    acquired: true,
                    version,
                }
            }
            None => Acquisition {
                acquired: false,
                version: entry.version(),
            },
        }
    }

    /// Acquire a key, waiting up to `timeout` for the current holder.
    ///
    /// The caller owns the lock on success and must call
    /// [`release_lock`](Self::release_lock). Prefer
    /// [`acquire_guard`](Self::acquire_guard) which releases automatically.
    pub async fn acquire_lock(&self, key: &ResourceKey, timeout: LockTimeout) -> Acquisition {
        let (entry, result) = self.wait_for(key, timeout).await;
        match result {
            Ok(version) => Acquisition {
                acquired: true,
                version,
            },
            Err(_) => Acquisition {
                acquired: false,
                version: entry.version(),
            },
        }
    }

    /// Acquire a key and return a guard that releases it when dropped
    pub async fn acquire_guard(
        &self,
        key: &ResourceKey,
        timeout: LockTimeout,
    ) -> Result<LockGuard, CoordinationFailure> {
        let (entry, result) = self.wait_for(key, timeout).await;
        let version = result?;
        Ok(LockGuard {
            entry,
            key: key.clone(),
            version,
        })
    }

    async fn wait_for(
        &self,
        key: &ResourceKey,
        timeout: LockTimeout,
    ) -> (Arc<LockEntry>, Result<LockVersion, CoordinationFailure>) {
        let entry = self.entry(key);
        if let Some(version) = entry.claim(None, self.fairness) {
            debug!(key = %key, version = %version, "Lock acquired");
            return (entry, Ok(version));
        }

        let started = Instant::now();
        let deadline = started + timeout.as_duration();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        entry.metrics.record_queued();
        entry.enqueue(ticket);
        debug!(key = %key, ticket, "Lock held; waiting");

        let result = {
            let _waiter = QueuedWaiter {
                entry: &entry,
                ticket,
            };
            loop {
                // Register interest before checking so a release in between is not missed.
                let notified = entry.released.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(version) = entry.claim(Some(ticket), self.fairness) {
                    debug!(
                        key = %key,
                        version = %version,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Lock acquired after waiting"
                    );
                    break Ok(version);
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    if let Some(version) = entry.claim(Some(ticket), self.fairness) {
                        break Ok(version);
                    }
                    let waited = started.elapsed();
                    let version = entry.version();
                    entry.metrics.record_timeout();
                    warn!(
                        key = %key,
                        version = %version,
                        waited_ms = waited.as_millis() as u64,
                        "Timed out waiting for lock"
                    );
                    break Err(CoordinationFailure::LockTimeout {
                        key: key.clone(),
                        waited,
                        version,
                    });
                }
            }
        };
        (entry, result)
    }

    /// Mark a key free. Releasing an unknown or free key is logged and ignored.
    pub fn release_lock(&self, key: &ResourceKey) -> bool {
        let Some(entry) = self.existing(key) else {
            warn!(key = %key, "Attempted to release a lock that was never acquired");
            return false;
        };
        match entry.release(None) {
            Release::Released => {
                debug!(key = %key, "Lock released");
                true
            }
            Release::NotHeld | Release::HeldByOther => {
                warn!(key = %key, "Attempted to release a lock that is not held");
                false
            }
        }
    }

    /// Current version of a key; 0 if it was never acquired
    pub fn current_version(&self, key: &ResourceKey) -> LockVersion {
        self.existing(key)
            .map(|entry| entry.version())
            .unwrap_or_else(LockVersion::initial)
    }

    /// Version and held flag read together
    pub(crate) fn observe(&self, key: &ResourceKey) -> (LockVersion, bool) {
        self.existing(key)
            .map(|entry| {
                let state = entry.state.lock();
                (state.version, state.held)
            })
            .unwrap_or_else(|| (LockVersion::initial(), false))
    }

    pub fn is_held(&self, key: &ResourceKey) -> bool {
        self.existing(key)
            .is_some_and(|entry| entry.state.lock().held)
    }

    pub fn snapshot(&self, key: &ResourceKey) -> Option<LockSnapshot> {
        let entry = self.existing(key)?;
        let state = entry.state.lock();
        Some(LockSnapshot {
            key: key.clone(),
            held: state.held,
            version: state.version,
            acquired_at: state.acquired_at,
            waiting: state.waiters.len(),
            metrics: entry.metrics.snapshot(),
        })
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Counters for one key; zeros if the key was never touched
    pub fn metrics(&self, key: &ResourceKey) -> LockMetrics {
        self.existing(key)
            .map(|entry| entry.metrics.snapshot())
            .unwrap_or_default()
    }

    pub fn all_metrics(&self) -> BTreeMap<ResourceKey, LockMetrics> {
        self.entries
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.metrics.snapshot()))
            .collect()
    }

    /// Administrative reset of every key's counters
    pub fn reset_metrics(&self) {
        for entry in self.entries.lock().values() {
            entry.metrics.reset();
        }
        debug!("Lock metrics reset");
    }

    pub(crate) fn record_version_conflict(&self, key: &ResourceKey) {
        self.entry(key).metrics.record_version_conflict();
    }
}
