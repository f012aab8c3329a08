//! Invite repository.
//!
//! # Security
//!
//! - Invite codes are bearer capabilities: only their log prefix is logged
//! - Consumption is a single conditional UPDATE, so at most one redeemer
//!   can ever observe a successful transition

use crate::errors::LcError;
use crate::models::{Invite, ParticipantCredential};
use crate::repositories::to_i64;
use chrono::{DateTime, Utc};
use common::secret::log_prefix;
use common::types::{SessionId, UserId};
use sqlx::PgPool;
use std::time::Duration;
use tracing::instrument;

/// Repository for invite operations.
pub struct InvitesRepository;

impl InvitesRepository {
    #[instrument(skip_all, fields(code = %log_prefix(code)))]
    pub async fn get(pool: &PgPool, code: &str) -> Result<Option<Invite>, LcError> {
        let row: Option<InviteRow> = sqlx::query_as(
            r#"
            SELECT code, session_id, issued_by, expires_at, consumed_at, consumed_by,
                   cached_credential, cached_credential_expires_at, cached_credential_at,
                   created_at
            FROM stage_invites
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(Invite::from))
    }

    #[instrument(skip_all, fields(code = %log_prefix(&invite.code), session_id = %invite.session_id))]
    pub async fn insert(pool: &PgPool, invite: &Invite) -> Result<(), LcError> {
        let credential = invite.cached_credential.as_ref();

        sqlx::query(
            r#"
            INSERT INTO stage_invites
                (code, session_id, issued_by, expires_at, consumed_at, consumed_by,
                 cached_credential, cached_credential_expires_at, cached_credential_at,
                 created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&invite.code)
        .bind(invite.session_id.as_str())
        .bind(invite.issued_by.as_str())
        .bind(invite.expires_at)
        .bind(invite.consumed_at)
        .bind(invite.consumed_by.as_ref().map(UserId::as_str))
        .bind(credential.map(|c| c.token.as_str()))
        .bind(credential.and_then(|c| c.expires_at))
        .bind(invite.cached_credential_at)
        .bind(invite.created_at)
        .execute(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                LcError::Conflict("invite code already exists".to_string())
            }
            other => other.into(),
        })?;

        Ok(())
    }

    /// Record the first successful redemption of an invite.
    ///
    /// Returns false when the invite was already consumed (or is absent),
    /// which callers treat as `used`.
    #[instrument(skip_all, fields(code = %log_prefix(code), user_id = %user_id))]
    pub async fn mark_consumed(
        pool: &PgPool,
        code: &str,
        user_id: &UserId,
        credential: &ParticipantCredential,
        at: DateTime<Utc>,
    ) -> Result<bool, LcError> {
        let result = sqlx::query(
            r#"
            UPDATE stage_invites
            SET consumed_at = $3,
                consumed_by = $2,
                cached_credential = $4,
                cached_credential_expires_at = $5,
                cached_credential_at = $3
            WHERE code = $1
              AND consumed_at IS NULL
            "#,
        )
        .bind(code)
        .bind(user_id.as_str())
        .bind(at)
        .bind(&credential.token)
        .bind(credential.expires_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip_all, fields(code = %log_prefix(code)))]
    pub async fn delete(pool: &PgPool, code: &str) -> Result<bool, LcError> {
        let result = sqlx::query("DELETE FROM stage_invites WHERE code = $1")
            .bind(code)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Purge never-consumed invites whose expiry plus `grace` has passed.
    #[instrument(skip_all, fields(batch_size = batch_size))]
    pub async fn delete_expired(
        pool: &PgPool,
        grace: Duration,
        batch_size: u64,
    ) -> Result<u64, LcError> {
        let result = sqlx::query(
            r#"
            DELETE FROM stage_invites
            WHERE code IN (
                SELECT code
                FROM stage_invites
                WHERE consumed_at IS NULL
                  AND expires_at < NOW() - ($1 || ' seconds')::INTERVAL
                ORDER BY expires_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(grace.as_secs().to_string())
        .bind(to_i64(batch_size))
        .execute(pool)
        .await?;

        let count = result.rows_affected();

        if count > 0 {
            tracing::info!(
                target: "lc.repository.invites",
                count = count,
                "Purged expired invites"
            );
        }

        Ok(count)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InviteRow {
    code: String,
    session_id: String,
    issued_by: String,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
    consumed_by: Option<String>,
    cached_credential: Option<String>,
    cached_credential_expires_at: Option<DateTime<Utc>>,
    cached_credential_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<InviteRow> for Invite {
    fn from(row: InviteRow) -> Self {
        Self {
            code: row.code,
            session_id: SessionId::new(row.session_id),
            issued_by: UserId::new(row.issued_by),
            expires_at: row.expires_at,
            consumed_at: row.consumed_at,
            consumed_by: row.consumed_by.map(UserId::new),
            cached_credential: row.cached_credential.map(|token| ParticipantCredential {
                token,
                expires_at: row.cached_credential_expires_at,
            }),
            cached_credential_at: row.cached_credential_at,
            created_at: row.created_at,
        }
    }
}
