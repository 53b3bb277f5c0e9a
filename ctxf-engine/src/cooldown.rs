//! Cooldown throttle
//!
//! Per-company rate limiter for proposal batches. Durations are clamped to
//! [`MIN_COOLDOWN_SECS`, `MAX_COOLDOWN_SECS`] whatever the caller asks for.
//! Entries expire lazily: a read past `expires_at` reports no cooldown and
//! prunes the entry.
//!
//! Storage sits behind [`CooldownStore`] so tests get isolated instances and
//! hosts running several processes can back it with a shared cache. The
//! in-memory store is not persisted; a restart clears every cooldown.

use chrono::{DateTime, Duration, Utc};
use ctxf_common::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const MIN_COOLDOWN_SECS: u64 = 30;
pub const MAX_COOLDOWN_SECS: u64 = 120;

/// Clamp a requested duration into the allowed window
pub fn clamp_cooldown(seconds: u64) -> u64 {
    seconds.clamp(MIN_COOLDOWN_SECS, MAX_COOLDOWN_SECS)
}

/// Keyed expiry storage; every method is atomic per company
pub trait CooldownStore: Send + Sync {
    fn get(&self, company_id: &str) -> Option<DateTime<Utc>>;
    fn set(&self, company_id: &str, expires_at: DateTime<Utc>);
    fn clear(&self, company_id: &str);

    /// Set `expires_at` unless an unexpired entry exists
    ///
    /// Returns the blocking expiry when one does.
    fn try_acquire(
        &self,
        company_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DateTime<Utc>>;

    /// Remove only if the stored expiry is still `expires_at`
    fn clear_if(&self, company_id: &str, expires_at: DateTime<Utc>);

    /// Drop every entry expired at `now`; returns how many were removed
    fn prune(&self, now: DateTime<Utc>) -> usize;
}

/// Process-local cooldown storage
#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CooldownStore for MemoryCooldownStore {
    fn get(&self, company_id: &str) -> Option<DateTime<Utc>> {
        self.entries().get(company_id).copied()
    }

    fn set(&self, company_id: &str, expires_at: DateTime<Utc>) {
        self.entries().insert(company_id.to_string(), expires_at);
    }

    fn clear(&self, company_id: &str) {
        self.entries().remove(company_id);
    }

    fn try_acquire(
        &self,
        company_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DateTime<Utc>> {
        let mut entries = self.entries();
        match entries.get(company_id) {
            Some(current) if *current > now => Err(*current),
            _ => {
                entries.insert(company_id.to_string(), expires_at);
                Ok(())
            }
        }
    }

    fn clear_if(&self, company_id: &str, expires_at: DateTime<Utc>) {
        let mut entries = self.entries();
        if entries.get(company_id) == Some(&expires_at) {
            entries.remove(company_id);
        }
    }

    fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }
}

/// A granted cooldown window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownGrant {
    pub seconds: u64,
    pub expires_at: DateTime<Utc>,
}

pub struct CooldownThrottle {
    store: Arc<dyn CooldownStore>,
    clock: Arc<dyn Clock>,
}

impl CooldownThrottle {
    pub fn new(store: Arc<dyn CooldownStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// In-memory throttle driven by `clock`
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryCooldownStore::new()), clock)
    }

    /// Start (or restart) a cooldown; returns the clamped duration applied
    pub fn set_cooldown(&self, company_id: &str, seconds: u64) -> u64 {
        let applied = clamp_cooldown(seconds);
        let expires_at = self.clock.now() + Duration::seconds(applied as i64);
        self.store.set(company_id, expires_at);

        if applied != seconds {
            debug!(company_id, requested = seconds, applied, "Clamped cooldown duration");
        }
        info!(company_id, seconds = applied, "Cooldown set");
        applied
    }

    /// Whole seconds left (rounded up), or `None` when not in cooldown
    pub fn get_cooldown_remaining(&self, company_id: &str) -> Option<u64> {
        let expires_at = self.store.get(company_id)?;
        let now = self.clock.now();

        if expires_at <= now {
            self.store.clear_if(company_id, expires_at);
            return None;
        }

        Some(remaining_seconds(expires_at, now))
    }

    pub fn is_in_cooldown(&self, company_id: &str) -> bool {
        self.get_cooldown_remaining(company_id).is_some()
    }

    pub fn clear_cooldown(&self, company_id: &str) {
        self.store.clear(company_id);
    }

    /// Atomically check and start a cooldown
    ///
    /// `Err` carries the remaining seconds of the cooldown already running.
    pub fn try_begin(&self, company_id: &str, seconds: u64) -> Result<CooldownGrant, u64> {
        let applied = clamp_cooldown(seconds);
        let now = self.clock.now();
        let expires_at = now + Duration::seconds(applied as i64);

        self.store
            .try_acquire(company_id, now, expires_at)
            .map(|()| CooldownGrant {
                seconds: applied,
                expires_at,
            })
            .map_err(|blocking| remaining_seconds(blocking, now))
    }

    /// Undo a grant from `try_begin`, unless a newer cooldown replaced it
    pub fn release(&self, company_id: &str, grant: CooldownGrant) {
        self.store.clear_if(company_id, grant.expires_at);
    }

    /// Remove all expired entries
    pub fn prune_expired(&self) -> usize {
        self.store.prune(self.clock.now())
    }
}

fn remaining_seconds(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (expires_at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}
