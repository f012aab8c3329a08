//! In-memory [`PersistentStore`] for tests.
//!
//! Mirrors the PostgreSQL semantics that matter to callers: insert-if-absent
//! leases, conditional invite consumption, age-based batch deletion. Supports
//! failure injection and call counting.
//!
//! ```rust,ignore
//! let store = InMemoryStore::new().with_lease(stale_lease);
//! store.set_failing(true);
//! assert!(store.get_invite("code").await.is_err());
//! ```

use super::PersistentStore;
use crate::errors::LcError;
use crate::models::{Invite, ParticipantCredential, StageLease};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{SessionId, StageRef, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    leases: HashMap<String, StageLease>,
    invites: HashMap<String, Invite>,
    /// Row written by a simulated concurrent writer on the next `put_lease`.
    concurrent_lease: Option<StageLease>,
}

/// In-memory store backed by hash maps.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    failing: AtomicBool,
    lease_lookups: AtomicUsize,
    lease_puts: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a lease as if persisted by an earlier process.
    #[must_use]
    pub fn with_lease(self, lease: StageLease) -> Self {
        self.lock().leases.insert(lease.stage_key.clone(), lease);
        self
    }

    /// Seed an invite.
    #[must_use]
    pub fn with_invite(self, invite: Invite) -> Self {
        self.lock().invites.insert(invite.code.clone(), invite);
        self
    }

    /// Make every subsequent call fail with `LcError::Database`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Simulate another writer inserting `lease` just before the next
    /// `put_lease` lands.
    pub fn race_next_put(&self, lease: StageLease) {
        self.lock().concurrent_lease = Some(lease);
    }

    pub fn lease(&self, stage_key: &str) -> Option<StageLease> {
        self.lock().leases.get(stage_key).cloned()
    }

    pub fn lease_count(&self) -> usize {
        self.lock().leases.len()
    }

    pub fn invite(&self, code: &str) -> Option<Invite> {
        self.lock().invites.get(code).cloned()
    }

    pub fn invite_count(&self) -> usize {
        self.lock().invites.len()
    }

    /// Number of `get_lease_by_key` calls.
    pub fn lease_lookups(&self) -> usize {
        self.lease_lookups.load(Ordering::SeqCst)
    }

    /// Number of `put_lease` calls.
    pub fn lease_puts(&self) -> usize {
        self.lease_puts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self) -> Result<(), LcError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LcError::Database("injected store failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get_lease_by_key(&self, stage_key: &str) -> Result<Option<StageLease>, LcError> {
        self.lease_lookups.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.lock().leases.get(stage_key).cloned())
    }

    async fn put_lease(&self, lease: &StageLease) -> Result<StageLease, LcError> {
        self.lease_puts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut inner = self.lock();
        if let Some(racer) = inner.concurrent_lease.take() {
            inner.leases.insert(racer.stage_key.clone(), racer);
        }
        Ok(inner
            .leases
            .entry(lease.stage_key.clone())
            .or_insert_with(|| lease.clone())
            .clone())
    }

    async fn touch_lease(&self, stage_key: &str, at: DateTime<Utc>) -> Result<bool, LcError> {
        self.check()?;
        Ok(match self.lock().leases.get_mut(stage_key) {
            Some(lease) => {
                lease.last_touched_at = lease.last_touched_at.max(at);
                true
            }
            None => false,
        })
    }

    async fn bind_lease_session(
        &self,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError> {
        self.check()?;
        Ok(match self.lock().leases.get_mut(stage_key) {
            Some(lease) => {
                lease.bound_session_id = Some(session_id.clone());
                lease.last_touched_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn unbind_lease_session(
        &self,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError> {
        self.check()?;
        Ok(match self.lock().leases.get_mut(stage_key) {
            Some(lease) if lease.bound_session_id.as_ref() == Some(session_id) => {
                lease.bound_session_id = None;
                true
            }
            _ => false,
        })
    }

    async fn delete_lease(&self, stage_key: &str) -> Result<bool, LcError> {
        self.check()?;
        Ok(self.lock().leases.remove(stage_key).is_some())
    }

    async fn delete_stale_leases(
        &self,
        max_age_hours: u64,
        batch_size: u64,
    ) -> Result<Vec<StageRef>, LcError> {
        self.check()?;
        let hours = i64::try_from(max_age_hours).unwrap_or(i64::MAX);
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let limit = usize::try_from(batch_size).unwrap_or(usize::MAX);

        let mut inner = self.lock();
        let mut stale: Vec<(DateTime<Utc>, String)> = inner
            .leases
            .values()
            .filter(|lease| lease.last_touched_at < cutoff)
            .map(|lease| (lease.last_touched_at, lease.stage_key.clone()))
            .collect();
        stale.sort();

        Ok(stale
            .into_iter()
            .take(limit)
            .filter_map(|(_, key)| inner.leases.remove(&key))
            .map(|lease| lease.stage_ref)
            .collect())
    }

    async fn get_invite(&self, code: &str) -> Result<Option<Invite>, LcError> {
        self.check()?;
        Ok(self.lock().invites.get(code).cloned())
    }

    async fn put_invite(&self, invite: &Invite) -> Result<(), LcError> {
        self.check()?;
        let mut inner = self.lock();
        if inner.invites.contains_key(&invite.code) {
            return Err(LcError::Conflict("invite code already exists".to_string()));
        }
        inner.invites.insert(invite.code.clone(), invite.clone());
        Ok(())
    }

    async fn mark_invite_consumed(
        &self,
        code: &str,
        user_id: &UserId,
        credential: &ParticipantCredential,
        at: DateTime<Utc>,
    ) -> Result<bool, LcError> {
        self.check()?;
        Ok(match self.lock().invites.get_mut(code) {
            Some(invite) if invite.consumed_at.is_none() => {
                invite.consumed_at = Some(at);
                invite.consumed_by = Some(user_id.clone());
                invite.cached_credential = Some(credential.clone());
                invite.cached_credential_at = Some(at);
                true
            }
            _ => false,
        })
    }

    async fn delete_invite(&self, code: &str) -> Result<bool, LcError> {
        self.check()?;
        Ok(self.lock().invites.remove(code).is_some())
    }

    async fn delete_expired_invites(
        &self,
        grace: Duration,
        batch_size: u64,
    ) -> Result<u64, LcError> {
        self.check()?;
        let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero());
        let now = Utc::now();
        let limit = usize::try_from(batch_size).unwrap_or(usize::MAX);

        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .invites
            .values()
            .filter(|invite| !invite.is_consumed() && invite.is_expired_at(now, grace))
            .map(|invite| invite.code.clone())
            .take(limit)
            .collect();

        for code in &expired {
            inner.invites.remove(code);
        }
        Ok(expired.len() as u64)
    }

    async fn ping(&self) -> Result<(), LcError> {
        self.check()
    }
}
