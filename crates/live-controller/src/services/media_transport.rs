//! Media Transport Service client.
//!
//! The media transport owns the actual audio stages and mints short-lived
//! participant credentials. This controller only creates, deletes and
//! requests credentials for stages through the [`MediaTransport`] trait.
//!
//! # Security
//!
//! - Requests carry the controller's API key as a bearer token
//! - Credentials returned by the service are never logged
//! - Timeouts prevent hanging connections

use crate::errors::LcError;
use crate::models::{Capabilities, ParticipantCredential, ParticipantRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::{EventId, SessionId, StageRef, UserId};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Default timeout for media transport requests in seconds.
const MEDIA_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default connect timeout for media transport requests in seconds.
const MEDIA_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Parameters of a credential request.
#[derive(Debug, Clone)]
pub struct CredentialGrant {
    pub stage_ref: StageRef,
    pub session_id: SessionId,
    pub participant_id: UserId,
    pub capabilities: Capabilities,
    pub role: ParticipantRole,
}

/// Operations this controller needs from the media transport.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Create a new stage for a host's broadcast.
    async fn create_stage(
        &self,
        event_id: &EventId,
        host_user_id: &UserId,
        host_display_name: &str,
    ) -> Result<StageRef, LcError>;

    /// Delete a stage. A stage that is already gone counts as success.
    async fn delete_stage(&self, stage_ref: &StageRef) -> Result<(), LcError>;

    /// Mint a credential scoped to one stage and capability set.
    async fn mint_participant_credential(
        &self,
        grant: &CredentialGrant,
    ) -> Result<ParticipantCredential, LcError>;
}

#[derive(Debug, Serialize)]
struct CreateStageRequest<'a> {
    event_id: &'a str,
    host_user_id: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateStageResponse {
    stage_ref: String,
}

#[derive(Debug, Serialize)]
struct MintCredentialRequest<'a> {
    session_id: &'a str,
    participant_id: &'a str,
    grants: &'static [&'static str],
    role: &'static str,
}

#[derive(Deserialize)]
struct MintCredentialResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// HTTP client for the media transport service.
#[derive(Clone)]
pub struct HttpMediaTransport {
    client: Client,
    base_url: Url,
    api_key: SecretString,
}

impl HttpMediaTransport {
    /// Create a new media transport client.
    ///
    /// # Errors
    ///
    /// Returns `LcError::Internal` if the base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self, LcError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            error!(target: "lc.services.media_transport", error = %e, "Invalid media transport URL");
            LcError::Internal(format!("invalid media transport URL: {e}"))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(MEDIA_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(MEDIA_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "lc.services.media_transport", error = %e, "Failed to build HTTP client");
                LcError::Internal("failed to build HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Build `{base}/v1/stages[/{stage_ref}[/credentials]]` with the stage ref
    /// percent-encoded as a single path segment.
    fn stage_url(&self, stage_ref: Option<&StageRef>, suffix: Option<&str>) -> Result<Url, LcError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                LcError::Internal("media transport URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty().extend(["v1", "stages"]);
            if let Some(stage_ref) = stage_ref {
                segments.push(stage_ref.as_str());
            }
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key.expose_secret())
    }

    /// Map a non-success status to an error, logging the server-side detail.
    async fn error_for(response: reqwest::Response, operation: &'static str) -> LcError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(
                target: "lc.services.media_transport",
                status = %status,
                operation = operation,
                "Media transport rejected controller API key"
            );
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target: "lc.services.media_transport",
                status = %status,
                operation = operation,
                body = %body,
                "Media transport returned error"
            );
        }
        LcError::MediaTransport(format!("{operation} failed with status {status}"))
    }
}

#[async_trait]
impl MediaTransport for HttpMediaTransport {
    #[instrument(skip_all, fields(event_id = %event_id, host_user_id = %host_user_id))]
    async fn create_stage(
        &self,
        event_id: &EventId,
        host_user_id: &UserId,
        host_display_name: &str,
    ) -> Result<StageRef, LcError> {
        let url = self.stage_url(None, None)?;

        let response = self
            .client
            .post(url)
            .header("Authorization", self.bearer())
            .json(&CreateStageRequest {
                event_id: event_id.as_str(),
                host_user_id: host_user_id.as_str(),
                name: host_display_name,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response, "create_stage").await);
        }

        let body: CreateStageResponse = response.json().await?;
        if body.stage_ref.is_empty() {
            return Err(LcError::MediaTransport(
                "create_stage returned an empty stage_ref".to_string(),
            ));
        }
        Ok(StageRef::new(body.stage_ref))
    }

    #[instrument(skip_all, fields(stage_ref = %stage_ref))]
    async fn delete_stage(&self, stage_ref: &StageRef) -> Result<(), LcError> {
        let url = self.stage_url(Some(stage_ref), None)?;

        let response = self
            .client
            .delete(url)
            .header("Authorization", self.bearer())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(());
        }
        Err(Self::error_for(response, "delete_stage").await)
    }

    #[instrument(skip_all, fields(stage_ref = %grant.stage_ref, session_id = %grant.session_id, participant_id = %grant.participant_id))]
    async fn mint_participant_credential(
        &self,
        grant: &CredentialGrant,
    ) -> Result<ParticipantCredential, LcError> {
        let url = self.stage_url(Some(&grant.stage_ref), Some("credentials"))?;

        let response = self
            .client
            .post(url)
            .header("Authorization", self.bearer())
            .json(&MintCredentialRequest {
                session_id: grant.session_id.as_str(),
                participant_id: grant.participant_id.as_str(),
                grants: grant.capabilities.as_grants(),
                role: grant.role.as_str(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response, "mint_participant_credential").await);
        }

        let body: MintCredentialResponse = response.json().await?;
        Ok(ParticipantCredential {
            token: body.token,
            expires_at: body.expires_at,
        })
    }
}

/// Mock media transport for unit and integration tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock media transport. Stage refs are `stage-{n}`, credentials are
    /// `cred-{n}-{participant}`.
    #[derive(Default)]
    pub struct MockMediaTransport {
        create_calls: AtomicUsize,
        delete_calls: AtomicUsize,
        mint_calls: AtomicUsize,
        fail_create: AtomicBool,
        fail_delete: AtomicBool,
        fail_mint: AtomicBool,
        create_delay: Option<Duration>,
        deleted: Mutex<Vec<StageRef>>,
        grants: Mutex<Vec<CredentialGrant>>,
    }

    impl MockMediaTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sleep inside every `create_stage`, widening race windows.
        #[must_use]
        pub fn with_create_delay(mut self, delay: Duration) -> Self {
            self.create_delay = Some(delay);
            self
        }

        pub fn set_fail_create(&self, fail: bool) {
            self.fail_create.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_delete(&self, fail: bool) {
            self.fail_delete.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_mint(&self, fail: bool) {
            self.fail_mint.store(fail, Ordering::SeqCst);
        }

        pub fn create_calls(&self) -> usize {
            self.create_calls.load(Ordering::SeqCst)
        }

        pub fn delete_calls(&self) -> usize {
            self.delete_calls.load(Ordering::SeqCst)
        }

        pub fn mint_calls(&self) -> usize {
            self.mint_calls.load(Ordering::SeqCst)
        }

        /// Stage refs successfully deleted, in call order.
        pub fn deleted(&self) -> Vec<StageRef> {
            self.deleted
                .lock()
                .map(|d| d.clone())
                .unwrap_or_default()
        }

        /// Credential grants requested, in call order.
        pub fn grants(&self) -> Vec<CredentialGrant> {
            self.grants.lock().map(|g| g.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl MediaTransport for MockMediaTransport {
        async fn create_stage(
            &self,
            _event_id: &EventId,
            _host_user_id: &UserId,
            _host_display_name: &str,
        ) -> Result<StageRef, LcError> {
            let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(LcError::MediaTransport("mock create failure".to_string()));
            }
            Ok(StageRef::new(format!("stage-{n}")))
        }

        async fn delete_stage(&self, stage_ref: &StageRef) -> Result<(), LcError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(LcError::MediaTransport("mock delete failure".to_string()));
            }
            if let Ok(mut deleted) = self.deleted.lock() {
                deleted.push(stage_ref.clone());
            }
            Ok(())
        }

        async fn mint_participant_credential(
            &self,
            grant: &CredentialGrant,
        ) -> Result<ParticipantCredential, LcError> {
            let n = self.mint_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_mint.load(Ordering::SeqCst) {
                return Err(LcError::MediaTransport("mock mint failure".to_string()));
            }
            if let Ok(mut grants) = self.grants.lock() {
                grants.push(grant.clone());
            }
            Ok(ParticipantCredential {
                token: format!("cred-{n}-{}", grant.participant_id),
                expires_at: None,
            })
        }
    }
}
