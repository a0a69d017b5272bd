//! The video-approval core.
//!
//! Every operation takes the acting user's id and the team it is acting in,
//! re-reads whatever it needs from the store, asks the guard, validates the
//! lifecycle transition and then commits the mutation together with its
//! review and audit entry in a single batch. A batch that loses a race
//! against a concurrent write is re-planned from freshly read state.

pub mod activity;
pub mod guard;
pub mod lifecycle;
mod members;
pub mod reviews;
mod teams;
mod videos;

use std::sync::Arc;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::User;
use crate::publisher::Publisher;
use crate::store::{Store, StoreError};
use guard::{Action, Actor, Ownership};

const MAX_NAME_LEN: usize = 255;
const MAX_TAG_LEN: usize = 30;
const MAX_TAGS: usize = 50;

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// How long a new invitation stays acceptable.
    pub invitation_ttl: chrono::Duration,
    /// Upper bound on a single call to the publisher.
    pub publish_timeout: std::time::Duration,
    /// How many times a lost compare-and-swap is re-planned before giving up.
    pub max_conflict_retries: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            invitation_ttl: chrono::Duration::hours(72),
            publish_timeout: std::time::Duration::from_secs(30),
            max_conflict_retries: 3,
        }
    }
}

#[derive(Clone)]
pub struct Workflow {
    store: Arc<dyn Store>,
    publisher: Arc<dyn Publisher>,
    settings: WorkflowSettings,
}

impl Workflow {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn Publisher>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            settings,
        }
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.store.ping().await?;
        Ok(())
    }

    /// Resolve the acting user and make sure they belong to `team_id`.
    ///
    /// Runs before any team-scoped read so that "not a member" and "no such
    /// entity" are indistinguishable to the caller.
    async fn member(&self, actor_id: Uuid, team_id: Uuid) -> Result<(User, Actor), AppError> {
        let user = self
            .store
            .find_user(actor_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        let actor = Actor::from(&user);
        guard::authorize(&actor, team_id, Action::ViewTeam, Ownership::Other)?;
        Ok((user, actor))
    }

    fn should_retry(&self, err: &StoreError, attempt: u32, op: &str, target: Uuid) -> bool {
        if !matches!(err, StoreError::Conflict(_)) || attempt >= self.settings.max_conflict_retries
        {
            return false;
        }
        tracing::warn!(%target, attempt = attempt + 1, op, "lost concurrent update, retrying: {err}");
        true
    }
}

fn required_text(value: &str, field: &str, max_len: usize) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max_len {
        return Err(AppError::Validation(format!(
            "{field} must be at most {max_len} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Empty or whitespace-only strings become `None`.
fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn normalize_email(email: &str) -> Result<String, AppError> {
    let normalized = email.trim().to_lowercase();
    let valid = normalized.len() <= MAX_NAME_LEN
        && !normalized.chars().any(char::is_whitespace)
        && normalized
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AppError::Validation("A valid email address is required".into()));
    }
    Ok(normalized)
}

fn validate_tag(name: &str) -> Result<String, AppError> {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() || normalized.chars().count() > MAX_TAG_LEN {
        return Err(AppError::Validation(format!(
            "Tag must be 1-{MAX_TAG_LEN} characters"
        )));
    }
    if normalized.chars().any(|c| c.is_whitespace()) {
        return Err(AppError::Validation("Tags cannot contain whitespace".into()));
    }
    Ok(normalized)
}

/// Validate tags and drop duplicates, keeping first-seen order.
fn normalize_tags(tags: &[String]) -> Result<Vec<String>, AppError> {
    if tags.len() > MAX_TAGS {
        return Err(AppError::Validation(format!(
            "A video can have at most {MAX_TAGS} tags"
        )));
    }
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = validate_tag(tag)?;
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    Ok(normalized)
}
