//! Stage Coordinator.
//!
//! Leases exactly one media stage per (event, host) pair. Lookups go through
//! three layers in strict order:
//!
//! 1. In-process cache keyed by `stage_key`
//! 2. Persistent store (survives restarts)
//! 3. Media transport `create_stage`, followed by an insert-if-absent write
//!
//! Cold creation is serialized by a process-wide lock so two concurrent
//! requests for the same key cannot both create a stage. Across processes
//! the store insert decides the winner; the loser deletes the stage it just
//! created and adopts the winner's.
//!
//! The stale-lease sweep deletes store rows first and remote stages second.

use crate::errors::LcError;
use crate::models::StageLease;
use crate::observability::metrics;
use crate::repositories::PersistentStore;
use crate::services::media_transport::MediaTransport;
use chrono::Utc;
use common::types::{EventId, SessionId, StageRef, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Coordinates stage leases across cache, store and media transport.
pub struct StageCoordinator {
    cache: RwLock<HashMap<String, StageLease>>,
    creation_lock: Mutex<()>,
    store: Arc<dyn PersistentStore>,
    media: Arc<dyn MediaTransport>,
}

impl StageCoordinator {
    pub fn new(store: Arc<dyn PersistentStore>, media: Arc<dyn MediaTransport>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            creation_lock: Mutex::new(()),
            store,
            media,
        }
    }

    /// Return the lease for `(event_id, host_user_id)`, creating the stage if
    /// none exists.
    ///
    /// Repeated calls return the same `stage_ref`, including after a restart
    /// that cleared the cache.
    ///
    /// # Errors
    ///
    /// - `LcError::MediaTransport` - the stage could not be created
    /// - `LcError::Database` - the store lookup or write failed
    #[instrument(skip_all, fields(event_id = %event_id, host_user_id = %host_user_id))]
    pub async fn lease_stage(
        &self,
        event_id: &EventId,
        host_user_id: &UserId,
        host_display_name: &str,
    ) -> Result<StageLease, LcError> {
        let start = Instant::now();
        let stage_key = StageLease::key_for(event_id, host_user_id);

        if let Some(lease) = self.cached(&stage_key).await {
            if let Some(lease) = self.touch(lease).await {
                metrics::record_stage_lease("cache", start.elapsed());
                return Ok(lease);
            }
        }

        let _guard = self.creation_lock.lock().await;

        // Another request may have populated the cache while we waited.
        if let Some(lease) = self.cached(&stage_key).await {
            if let Some(lease) = self.touch(lease).await {
                metrics::record_stage_lease("cache", start.elapsed());
                return Ok(lease);
            }
        }

        if let Some(lease) = self.store.get_lease_by_key(&stage_key).await? {
            debug!(
                target: "lc.services.stage_coordinator",
                stage_ref = %lease.stage_ref,
                "Found persisted stage lease"
            );
            if let Some(lease) = self.touch(lease).await {
                metrics::record_stage_lease("store", start.elapsed());
                return Ok(lease);
            }
        }

        let stage_ref = self
            .media
            .create_stage(event_id, host_user_id, host_display_name)
            .await?;

        let candidate = StageLease::new(
            event_id.clone(),
            host_user_id.clone(),
            stage_ref.clone(),
            Utc::now(),
        );

        let stored = match self.store.put_lease(&candidate).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    target: "lc.services.stage_coordinator",
                    stage_ref = %stage_ref,
                    error = %e,
                    "Failed to persist stage lease, deleting new stage"
                );
                self.delete_remote(&stage_ref).await;
                return Err(e);
            }
        };

        let source = if stored.stage_ref == stage_ref {
            info!(
                target: "lc.services.stage_coordinator",
                stage_ref = %stage_ref,
                "Created stage lease"
            );
            "created"
        } else {
            info!(
                target: "lc.services.stage_coordinator",
                ours = %stage_ref,
                winner = %stored.stage_ref,
                "Lost stage lease race, adopting existing stage"
            );
            self.delete_remote(&stage_ref).await;
            "race_lost"
        };

        self.cache
            .write()
            .await
            .insert(stored.stage_key.clone(), stored.clone());
        metrics::record_stage_lease(source, start.elapsed());

        Ok(stored)
    }

    /// Drop a lease from the cache and the store. The remote stage is left to
    /// the media transport's own expiry.
    ///
    /// # Errors
    ///
    /// `LcError::Database` if the store delete fails.
    #[instrument(skip_all, fields(stage_key = %stage_key))]
    pub async fn release_stage(&self, stage_key: &str) -> Result<bool, LcError> {
        self.cache.write().await.remove(stage_key);
        let deleted = self.store.delete_lease(stage_key).await?;

        debug!(
            target: "lc.services.stage_coordinator",
            deleted = deleted,
            "Released stage lease"
        );
        Ok(deleted)
    }

    /// Record the session currently broadcasting on a lease.
    ///
    /// # Errors
    ///
    /// `LcError::Database` if the store update fails.
    #[instrument(skip_all, fields(stage_key = %stage_key, session_id = %session_id))]
    pub async fn bind_session(
        &self,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError> {
        let bound = self.store.bind_lease_session(stage_key, session_id).await?;

        if let Some(lease) = self.cache.write().await.get_mut(stage_key) {
            lease.bound_session_id = Some(session_id.clone());
            lease.last_touched_at = Utc::now();
        }

        Ok(bound)
    }

    /// Clear a lease's binding if it still names `session_id`. A newer
    /// session bound to the same lease is left alone.
    ///
    /// # Errors
    ///
    /// `LcError::Database` if the store update fails.
    #[instrument(skip_all, fields(stage_key = %stage_key, session_id = %session_id))]
    pub async fn unbind_session(
        &self,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError> {
        let cleared = self.store.unbind_lease_session(stage_key, session_id).await?;

        if let Some(lease) = self.cache.write().await.get_mut(stage_key) {
            if lease.bound_session_id.as_ref() == Some(session_id) {
                lease.bound_session_id = None;
            }
        }

        debug!(
            target: "lc.services.stage_coordinator",
            cleared = cleared,
            "Unbound session from stage lease"
        );
        Ok(cleared)
    }

    /// Delete up to `batch_size` leases untouched for `max_age_hours`, then
    /// their remote stages.
    ///
    /// Remote delete failures are logged and counted; they never abort the
    /// batch. Returns the stage refs removed from the store.
    ///
    /// # Errors
    ///
    /// `LcError::Database` if the store delete fails. Nothing is deleted
    /// remotely in that case.
    #[instrument(skip_all, fields(max_age_hours = max_age_hours, batch_size = batch_size))]
    pub async fn sweep_stale_leases(
        &self,
        max_age_hours: u64,
        batch_size: u64,
    ) -> Result<Vec<StageRef>, LcError> {
        let removed = self
            .store
            .delete_stale_leases(max_age_hours, batch_size)
            .await?;

        if removed.is_empty() {
            return Ok(removed);
        }

        self.cache
            .write()
            .await
            .retain(|_, lease| !removed.contains(&lease.stage_ref));

        let mut failures = 0usize;
        for stage_ref in &removed {
            if !self.delete_remote(stage_ref).await {
                failures += 1;
            }
        }

        info!(
            target: "lc.services.stage_coordinator",
            removed = removed.len(),
            remote_failures = failures,
            "Swept stale stage leases"
        );

        Ok(removed)
    }

    /// Number of cached leases.
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Forget every cached lease, as a restart would.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn cached(&self, stage_key: &str) -> Option<StageLease> {
        self.cache.read().await.get(stage_key).cloned()
    }

    /// Refresh `last_touched_at` in the store and the cache. A failed touch
    /// does not fail the lease.
    ///
    /// Returns `None` when the store no longer has the row (a sweep removed
    /// it and its remote stage); the cache entry is dropped so the caller
    /// falls through to store lookup and creation.
    async fn touch(&self, mut lease: StageLease) -> Option<StageLease> {
        let now = Utc::now();

        match self.store.touch_lease(&lease.stage_key, now).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    target: "lc.services.stage_coordinator",
                    stage_ref = %lease.stage_ref,
                    "Stage lease missing from store, dropping cached copy"
                );
                self.cache.write().await.remove(&lease.stage_key);
                return None;
            }
            Err(e) => {
                warn!(
                    target: "lc.services.stage_coordinator",
                    stage_ref = %lease.stage_ref,
                    error = %e,
                    "Failed to touch stage lease"
                );
            }
        }

        lease.last_touched_at = lease.last_touched_at.max(now);
        self.cache
            .write()
            .await
            .insert(lease.stage_key.clone(), lease.clone());
        Some(lease)
    }

    /// Best-effort remote delete. Returns whether it succeeded.
    async fn delete_remote(&self, stage_ref: &StageRef) -> bool {
        match self.media.delete_stage(stage_ref).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "lc.services.stage_coordinator",
                    stage_ref = %stage_ref,
                    error = %e,
                    "Failed to delete remote stage"
                );
                metrics::record_remote_stage_delete_failure();
                false
            }
        }
    }
}
