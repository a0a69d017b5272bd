//! External publishing collaborator.
//!
//! The core hands a video's metadata and the acting admin's platform
//! credential to a [`Publisher`] and gets back the platform's video id. One
//! call is one attempt; retries happen from the `approved` state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::video::Video;

/// Opaque external-platform tokens. Never inspected by the core.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    pub video_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub file_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub scheduled_publish_at: Option<DateTime<Utc>>,
}

impl From<&Video> for PublishRequest {
    fn from(v: &Video) -> Self {
        Self {
            video_id: v.id,
            title: v.title.clone(),
            description: v.description.clone(),
            tags: v.tags.clone(),
            file_url: v.file_url.clone(),
            thumbnail_url: v.thumbnail_url.clone(),
            scheduled_publish_at: v.scheduled_publish_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publishing is not configured")]
    NotConfigured,
    #[error("request to publisher failed: {0}")]
    Transport(String),
    #[error("publisher rejected the video ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected publisher response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        request: &PublishRequest,
        credential: &Credential,
    ) -> Result<String, PublishError>;
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    id: String,
}

/// Posts video metadata as JSON to a configured endpoint.
#[derive(Clone)]
pub struct HttpPublisher {
    client: Client,
    endpoint: String,
}

impl HttpPublisher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(
        &self,
        request: &PublishRequest,
        credential: &Credential,
    ) -> Result<String, PublishError> {
        let mut req = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &credential.access_token {
            req = req.bearer_auth(token);
        }
        if let Some(refresh) = &credential.refresh_token {
            req = req.header("X-Refresh-Token", refresh);
        }

        let response = req
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;

        if parsed.id.trim().is_empty() {
            return Err(PublishError::InvalidResponse("empty video id".into()));
        }
        Ok(parsed.id)
    }
}

/// Stand-in used when no publisher endpoint is configured.
pub struct DisabledPublisher;

#[async_trait]
impl Publisher for DisabledPublisher {
    async fn publish(
        &self,
        _request: &PublishRequest,
        _credential: &Credential,
    ) -> Result<String, PublishError> {
        Err(PublishError::NotConfigured)
    }
}
