//! Repository layer for the Live Controller.
//!
//! Stage leases and invites are the only durable state. Live sessions are
//! never persisted.
//!
//! The [`PersistentStore`] trait is the seam the coordinator and the invite
//! ledger depend on. [`PgStore`] backs it with PostgreSQL; [`mock`] provides
//! an in-memory implementation for tests.

pub mod invites;
pub mod mock;
pub mod stage_leases;

pub use invites::InvitesRepository;
pub use stage_leases::StageLeasesRepository;

use crate::errors::LcError;
use crate::models::{Invite, ParticipantCredential, StageLease};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{SessionId, StageRef, UserId};
use sqlx::PgPool;
use std::time::Duration;

/// Durable store for stage leases and invites.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_lease_by_key(&self, stage_key: &str) -> Result<Option<StageLease>, LcError>;

    /// Insert `lease` unless a lease with the same key already exists.
    ///
    /// Returns the persisted lease: `lease` itself when inserted, otherwise
    /// the row that won.
    async fn put_lease(&self, lease: &StageLease) -> Result<StageLease, LcError>;

    /// Refresh `last_touched_at`. Returns false when the lease is absent.
    async fn touch_lease(&self, stage_key: &str, at: DateTime<Utc>) -> Result<bool, LcError>;

    /// Record the session broadcasting on a lease. Returns false when absent.
    async fn bind_lease_session(
        &self,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError>;

    /// Clear the binding, only if it still names `session_id`.
    ///
    /// Returns true when this call cleared it.
    async fn unbind_lease_session(
        &self,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError>;

    async fn delete_lease(&self, stage_key: &str) -> Result<bool, LcError>;

    /// Delete up to `batch_size` leases untouched for more than
    /// `max_age_hours` and return their stage refs.
    async fn delete_stale_leases(
        &self,
        max_age_hours: u64,
        batch_size: u64,
    ) -> Result<Vec<StageRef>, LcError>;

    async fn get_invite(&self, code: &str) -> Result<Option<Invite>, LcError>;

    async fn put_invite(&self, invite: &Invite) -> Result<(), LcError>;

    /// Mark an invite consumed, only if it is still unconsumed.
    ///
    /// Returns true when this call performed the transition, false when the
    /// invite was already consumed (or is absent).
    async fn mark_invite_consumed(
        &self,
        code: &str,
        user_id: &UserId,
        credential: &ParticipantCredential,
        at: DateTime<Utc>,
    ) -> Result<bool, LcError>;

    async fn delete_invite(&self, code: &str) -> Result<bool, LcError>;

    /// Delete up to `batch_size` never-consumed invites whose expiry plus
    /// `grace` has passed. Returns the number deleted.
    async fn delete_expired_invites(&self, grace: Duration, batch_size: u64)
        -> Result<u64, LcError>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), LcError>;
}

/// PostgreSQL-backed [`PersistentStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Convert an unsigned config value into the signed type Postgres expects.
pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl PersistentStore for PgStore {
    async fn get_lease_by_key(&self, stage_key: &str) -> Result<Option<StageLease>, LcError> {
        StageLeasesRepository::get_by_key(&self.pool, stage_key).await
    }

    async fn put_lease(&self, lease: &StageLease) -> Result<StageLease, LcError> {
        StageLeasesRepository::insert_if_absent(&self.pool, lease).await
    }

    async fn touch_lease(&self, stage_key: &str, at: DateTime<Utc>) -> Result<bool, LcError> {
        StageLeasesRepository::touch(&self.pool, stage_key, at).await
    }

    async fn bind_lease_session(
        &self,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError> {
        StageLeasesRepository::bind_session(&self.pool, stage_key, session_id).await
    }

    async fn unbind_lease_session(
        &self,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError> {
        StageLeasesRepository::unbind_session(&self.pool, stage_key, session_id).await
    }

    async fn delete_lease(&self, stage_key: &str) -> Result<bool, LcError> {
        StageLeasesRepository::delete(&self.pool, stage_key).await
    }

    async fn delete_stale_leases(
        &self,
        max_age_hours: u64,
        batch_size: u64,
    ) -> Result<Vec<StageRef>, LcError> {
        StageLeasesRepository::delete_stale(&self.pool, max_age_hours, batch_size).await
    }

    async fn get_invite(&self, code: &str) -> Result<Option<Invite>, LcError> {
        InvitesRepository::get(&self.pool, code).await
    }

    async fn put_invite(&self, invite: &Invite) -> Result<(), LcError> {
        InvitesRepository::insert(&self.pool, invite).await
    }

    async fn mark_invite_consumed(
        &self,
        code: &str,
        user_id: &UserId,
        credential: &ParticipantCredential,
        at: DateTime<Utc>,
    ) -> Result<bool, LcError> {
        InvitesRepository::mark_consumed(&self.pool, code, user_id, credential, at).await
    }

    async fn delete_invite(&self, code: &str) -> Result<bool, LcError> {
        InvitesRepository::delete(&self.pool, code).await
    }

    async fn delete_expired_invites(
        &self,
        grace: Duration,
        batch_size: u64,
    ) -> Result<u64, LcError> {
        InvitesRepository::delete_expired(&self.pool, grace, batch_size).await
    }

    async fn ping(&self) -> Result<(), LcError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
