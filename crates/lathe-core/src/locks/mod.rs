//! Per-resource multi-reader/single-writer locks for tool execution.
//!
//! Keys are resource identifiers (normally absolute file paths). A waiting
//! task suspends on a shared [`Notify`] and re-checks at least every
//! `recheck_interval`, so a lost wakeup costs one interval and nothing more.
//! Entries are removed once they have no holders and no waiting writers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::LockConfig;
use crate::error::{LatheError, Result};

/// Requested access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LockMode {
    Read,
    Write,
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a logical operation, used for writer re-entrancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Allocate a token no other caller in this process holds.
    pub fn new() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Emitted once per acquisition that waits longer than the watchdog interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDiagnostic {
    pub key: String,
    pub mode: LockMode,
    pub waited: Duration,
    pub readers: usize,
    pub writer_depth: usize,
    pub waiting_writers: usize,
}

/// Holder counts for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockSnapshot {
    pub readers: usize,
    pub writer_depth: usize,
    pub waiting_writers: usize,
}

pub type DiagnosticCallback = Arc<dyn Fn(LockDiagnostic) + Send + Sync>;

#[derive(Default)]
struct Entry {
    writer_owner: Option<OwnerToken>,
    /// Lease ids of the writer, innermost last. Non-empty means write-held.
    writer_leases: Vec<u64>,
    readers: Vec<(u64, Option<OwnerToken>)>,
    waiting_writers: usize,
}

impl Entry {
    fn is_idle(&self) -> bool {
        self.writer_leases.is_empty() && self.readers.is_empty() && self.waiting_writers == 0
    }

    fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            readers: self.readers.len(),
            writer_depth: self.writer_leases.len(),
            waiting_writers: self.waiting_writers,
        }
    }

    /// Grant the request if compatible, returning the slot it occupies.
    fn try_grant(
        &mut self,
        mode: LockMode,
        owner: Option<OwnerToken>,
        lease_id: u64,
    ) -> Option<LockMode> {
        let write_held = !self.writer_leases.is_empty();
        if write_held {
            if owner.is_some() && self.writer_owner == owner {
                self.writer_leases.push(lease_id);
                return Some(LockMode::Write);
            }
            return None;
        }
        match mode {
            LockMode::Write => {
                if !self.readers.is_empty() {
                    return None;
                }
                self.writer_owner = owner;
                self.writer_leases.push(lease_id);
                Some(LockMode::Write)
            }
            LockMode::Read => {
                let owner_already_reads =
                    owner.is_some() && self.readers.iter().any(|(_, o)| *o == owner);
                if self.waiting_writers > 0 && !owner_already_reads {
                    return None;
                }
                self.readers.push((lease_id, owner));
                Some(LockMode::Read)
            }
        }
    }

    fn remove_lease(&mut self, slot: LockMode, lease_id: u64) -> bool {
        match slot {
            LockMode::Write => {
                let Some(pos) = self.writer_leases.iter().rposition(|id| *id == lease_id) else {
                    return false;
                };
                self.writer_leases.remove(pos);
                if self.writer_leases.is_empty() {
                    self.writer_owner = None;
                }
                true
            }
            LockMode::Read => {
                let Some(pos) = self.readers.iter().position(|(id, _)| *id == lease_id) else {
                    return false;
                };
                self.readers.remove(pos);
                true
            }
        }
    }
}

struct Shared {
    table: Mutex<HashMap<String, Entry>>,
    notify: Notify,
    next_lease: AtomicU64,
    config: LockConfig,
    diagnostics: Option<DiagnosticCallback>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_lease(&self, key: &str, slot: LockMode, lease_id: u64) -> bool {
        let released = {
            let mut table = self.table();
            let Some(entry) = table.get_mut(key) else {
                return false;
            };
            let released = entry.remove_lease(slot, lease_id);
            if entry.is_idle() {
                table.remove(key);
            }
            released
        };
        if released {
            self.notify.notify_waiters();
        }
        released
    }

    fn stop_waiting(&self, key: &str) {
        {
            let mut table = self.table();
            if let Some(entry) = table.get_mut(key) {
                entry.waiting_writers = entry.waiting_writers.saturating_sub(1);
                if entry.is_idle() {
                    table.remove(key);
                }
            }
        }
        // Readers held back by this writer may proceed now.
        self.notify.notify_waiters();
    }
}

/// Withdraws a writer's waiting registration if its acquisition is abandoned.
struct WaitRegistration<'a> {
    shared: &'a Shared,
    key: &'a str,
    active: bool,
}

impl Drop for WaitRegistration<'_> {
    fn drop(&mut self) {
        if self.active {
            self.shared.stop_waiting(self.key);
        }
    }
}

/// Lock table shared by every tool execution of a run.
///
/// Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct ResourceLockManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ResourceLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLockManager")
            .field("keys", &self.shared.table().len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Default for ResourceLockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl ResourceLockManager {
    pub fn new(config: LockConfig) -> Self {
        Self::build(config, None)
    }

    /// Like [`ResourceLockManager::new`], delivering watchdog diagnostics to `callback`.
    pub fn with_diagnostics(config: LockConfig, callback: DiagnosticCallback) -> Self {
        Self::build(config, Some(callback))
    }

    fn build(config: LockConfig, diagnostics: Option<DiagnosticCallback>) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                next_lease: AtomicU64::new(1),
                config,
                diagnostics,
            }),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.shared.config
    }

    /// Acquire `key` in `mode`.
    ///
    /// Suspends until compatible with the current holders, `timeout`
    /// (default: the configured acquire timeout) elapses, or `cancel` fires.
    /// When `owner` matches the current writer, the request is granted at
    /// once as a nested write.
    pub async fn acquire(
        &self,
        key: &str,
        mode: LockMode,
        owner: Option<OwnerToken>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<LockLease> {
        let shared = &*self.shared;
        let timeout = timeout.unwrap_or_else(|| shared.config.acquire_timeout());
        let recheck = shared.config.recheck_interval();
        let watchdog = shared.config.watchdog();
        let lease_id = shared.next_lease.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut registration = WaitRegistration {
            shared,
            key,
            active: false,
        };
        let mut diagnosed = false;

        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut table = shared.table();
                let entry = table.entry(key.to_string()).or_default();
                if let Some(slot) = entry.try_grant(mode, owner, lease_id) {
                    if registration.active {
                        entry.waiting_writers -= 1;
                        registration.active = false;
                    }
                    drop(table);
                    tracing::trace!(key, %mode, lease_id, "lock granted");
                    return Ok(LockLease {
                        shared: Arc::clone(&self.shared),
                        key: key.to_string(),
                        mode,
                        slot,
                        lease_id,
                        released: false,
                    });
                }
                if mode == LockMode::Write && !registration.active {
                    entry.waiting_writers += 1;
                    registration.active = true;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                tracing::debug!(key, %mode, waited_ms, "lock acquisition timed out");
                return Err(LatheError::LockTimeout {
                    key: key.to_string(),
                    mode,
                    waited_ms,
                });
            }

            let wake_at = deadline.min(now + recheck);
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(key, %mode, "lock acquisition cancelled");
                    return Err(LatheError::Cancelled);
                }
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }

            let waited = started.elapsed();
            if !diagnosed && waited >= watchdog {
                diagnosed = true;
                let snapshot = self.snapshot(key);
                tracing::warn!(
                    key,
                    %mode,
                    waited_ms = waited.as_millis() as u64,
                    readers = snapshot.readers,
                    writer_depth = snapshot.writer_depth,
                    "long wait for resource lock"
                );
                if let Some(callback) = &shared.diagnostics {
                    callback(LockDiagnostic {
                        key: key.to_string(),
                        mode,
                        waited,
                        readers: snapshot.readers,
                        writer_depth: snapshot.writer_depth,
                        waiting_writers: snapshot.waiting_writers,
                    });
                }
            }
        }
    }

    /// Release the innermost hold of `owner` on `key` in `mode`.
    ///
    /// Returns `false` when nothing matched; releasing twice is harmless.
    /// A lease released this way becomes inert.
    pub fn release(&self, key: &str, mode: LockMode, owner: Option<OwnerToken>) -> bool {
        let target = {
            let table = self.shared.table();
            let Some(entry) = table.get(key) else {
                return false;
            };
            let nested_write = owner.is_some() && entry.writer_owner == owner;
            match mode {
                LockMode::Write => (entry.writer_owner == owner)
                    .then(|| entry.writer_leases.last().copied())
                    .flatten()
                    .map(|id| (LockMode::Write, id)),
                LockMode::Read if nested_write && !entry.writer_leases.is_empty() => entry
                    .writer_leases
                    .last()
                    .copied()
                    .map(|id| (LockMode::Write, id)),
                LockMode::Read => entry
                    .readers
                    .iter()
                    .rev()
                    .find(|(_, o)| *o == owner)
                    .map(|(id, _)| (LockMode::Read, *id)),
            }
        };
        match target {
            Some((slot, lease_id)) => self.shared.release_lease(key, slot, lease_id),
            None => false,
        }
    }

    /// Wait until no key is held or awaited.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<()> {
        let recheck = self.shared.config.recheck_interval();
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.table().is_empty() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(LatheError::Cancelled),
                _ = &mut notified => {}
                _ = tokio::time::sleep(recheck) => {}
            }
        }
    }

    /// Current holder counts for `key`; all zero when the key is free.
    pub fn snapshot(&self, key: &str) -> LockSnapshot {
        self.shared
            .table()
            .get(key)
            .map(Entry::snapshot)
            .unwrap_or_default()
    }

    /// Number of keys with holders or waiting writers.
    pub fn active_keys(&self) -> usize {
        self.shared.table().len()
    }
}

/// A granted hold on a key. Released on drop.
#[must_use = "dropping a lease releases the lock immediately"]
pub struct LockLease {
    shared: Arc<Shared>,
    key: String,
    mode: LockMode,
    slot: LockMode,
    lease_id: u64,
    released: bool,
}

impl LockLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The mode that was requested.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Whether this lease nests inside a write held by the same owner.
    pub fn is_reentrant(&self) -> bool {
        self.slot == LockMode::Write && self.mode == LockMode::Read
    }

    /// Release now. Returns `false` if the hold was already gone.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.shared.release_lease(&self.key, self.slot, self.lease_id)
    }
}

impl fmt::Debug for LockLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockLease")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("lease_id", &self.lease_id)
            .finish()
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if !self.released {
            self.shared.release_lease(&self.key, self.slot, self.lease_id);
        }
    }
}
