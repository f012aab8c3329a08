//! Stage lease repository.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Lease creation is `INSERT ... ON CONFLICT DO NOTHING`, so concurrent
//!   creators for the same key converge on a single row

use crate::errors::LcError;
use crate::models::StageLease;
use crate::repositories::to_i64;
use chrono::{DateTime, Utc};
use common::types::{EventId, SessionId, StageRef, UserId};
use sqlx::PgPool;
use tracing::instrument;

/// Repository for stage lease operations.
pub struct StageLeasesRepository;

impl StageLeasesRepository {
    #[instrument(skip_all, fields(stage_key = %stage_key))]
    pub async fn get_by_key(pool: &PgPool, stage_key: &str) -> Result<Option<StageLease>, LcError> {
        let row: Option<StageLeaseRow> = sqlx::query_as(
            r#"
            SELECT stage_key, stage_ref, event_id, host_user_id, bound_session_id,
                   created_at, last_touched_at
            FROM stage_leases
            WHERE stage_key = $1
            "#,
        )
        .bind(stage_key)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(StageLease::from))
    }

    /// Insert a lease unless one already exists for its key.
    ///
    /// Returns the persisted lease, which is the caller's lease if it won
    /// and the existing row otherwise.
    #[instrument(skip_all, fields(stage_key = %lease.stage_key, stage_ref = %lease.stage_ref))]
    pub async fn insert_if_absent(pool: &PgPool, lease: &StageLease) -> Result<StageLease, LcError> {
        let inserted: Option<StageLeaseRow> = sqlx::query_as(
            r#"
            INSERT INTO stage_leases
                (stage_key, stage_ref, event_id, host_user_id, bound_session_id,
                 created_at, last_touched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (stage_key) DO NOTHING
            RETURNING stage_key, stage_ref, event_id, host_user_id, bound_session_id,
                      created_at, last_touched_at
            "#,
        )
        .bind(&lease.stage_key)
        .bind(lease.stage_ref.as_str())
        .bind(lease.event_id.as_str())
        .bind(lease.host_user_id.as_str())
        .bind(lease.bound_session_id.as_ref().map(SessionId::as_str))
        .bind(lease.created_at)
        .bind(lease.last_touched_at)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        tracing::debug!(
            target: "lc.repository.stage_leases",
            stage_key = %lease.stage_key,
            "Lease insert conflicted, fetching existing row"
        );

        Self::get_by_key(pool, &lease.stage_key).await?.ok_or_else(|| {
            // The conflicting row was swept between the insert and the read.
            LcError::Database(format!(
                "lease {} vanished after insert conflict",
                lease.stage_key
            ))
        })
    }

    #[instrument(skip_all, fields(stage_key = %stage_key))]
    pub async fn touch(pool: &PgPool, stage_key: &str, at: DateTime<Utc>) -> Result<bool, LcError> {
        let result = sqlx::query(
            r#"
            UPDATE stage_leases
            SET last_touched_at = GREATEST(last_touched_at, $2)
            WHERE stage_key = $1
            "#,
        )
        .bind(stage_key)
        .bind(at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(stage_key = %stage_key, session_id = %session_id))]
    pub async fn bind_session(
        pool: &PgPool,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError> {
        let result = sqlx::query(
            r#"
            UPDATE stage_leases
            SET bound_session_id = $2,
                last_touched_at = NOW()
            WHERE stage_key = $1
            "#,
        )
        .bind(stage_key)
        .bind(session_id.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear the binding only while it still names `session_id`, so retiring
    /// an older session never unbinds a newer one on the same lease.
    #[instrument(skip_all, fields(stage_key = %stage_key, session_id = %session_id))]
    pub async fn unbind_session(
        pool: &PgPool,
        stage_key: &str,
        session_id: &SessionId,
    ) -> Result<bool, LcError> {
        let result = sqlx::query(
            r#"
            UPDATE stage_leases
            SET bound_session_id = NULL
            WHERE stage_key = $1 AND bound_session_id = $2
            "#,
        )
        .bind(stage_key)
        .bind(session_id.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(stage_key = %stage_key))]
    pub async fn delete(pool: &PgPool, stage_key: &str) -> Result<bool, LcError> {
        let result = sqlx::query("DELETE FROM stage_leases WHERE stage_key = $1")
            .bind(stage_key)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete leases untouched for more than `max_age_hours`, oldest first,
    /// at most `batch_size` per call. Returns the released stage refs.
    ///
    /// `SKIP LOCKED` lets two instances sweep concurrently without blocking.
    #[instrument(skip_all, fields(max_age_hours = max_age_hours, batch_size = batch_size))]
    pub async fn delete_stale(
        pool: &PgPool,
        max_age_hours: u64,
        batch_size: u64,
    ) -> Result<Vec<StageRef>, LcError> {
        let refs: Vec<(String,)> = sqlx::query_as(
            r#"
            DELETE FROM stage_leases
            WHERE stage_key IN (
                SELECT stage_key
                FROM stage_leases
                WHERE last_touched_at < NOW() - ($1 || ' hours')::INTERVAL
                ORDER BY last_touched_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING stage_ref
            "#,
        )
        .bind(max_age_hours.to_string())
        .bind(to_i64(batch_size))
        .fetch_all(pool)
        .await?;

        if !refs.is_empty() {
            tracing::info!(
                target: "lc.repository.stage_leases",
                count = refs.len(),
                max_age_hours = max_age_hours,
                "Deleted stale stage leases"
            );
        }

        Ok(refs.into_iter().map(|(r,)| StageRef::new(r)).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StageLeaseRow {
    stage_key: String,
    stage_ref: String,
    event_id: String,
    host_user_id: String,
    bound_session_id: Option<String>,
    created_at: DateTime<Utc>,
    last_touched_at: DateTime<Utc>,
}

impl From<StageLeaseRow> for StageLease {
    fn from(row: StageLeaseRow) -> Self {
        Self {
            stage_key: row.stage_key,
            stage_ref: StageRef::new(row.stage_ref),
            event_id: EventId::new(row.event_id),
            host_user_id: UserId::new(row.host_user_id),
            bound_session_id: row.bound_session_id.map(SessionId::new),
            created_at: row.created_at,
            last_touched_at: row.last_touched_at,
        }
    }
}
