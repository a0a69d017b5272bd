use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "activity_action")]
pub enum ActionType {
    #[sqlx(rename = "team.created")]
    #[serde(rename = "team.created")]
    TeamCreated,
    #[sqlx(rename = "team.updated")]
    #[serde(rename = "team.updated")]
    TeamUpdated,
    #[sqlx(rename = "user.invited")]
    #[serde(rename = "user.invited")]
    UserInvited,
    #[sqlx(rename = "user.joined")]
    #[serde(rename = "user.joined")]
    UserJoined,
    #[sqlx(rename = "user.updated")]
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[sqlx(rename = "user.removed")]
    #[serde(rename = "user.removed")]
    UserRemoved,
    #[sqlx(rename = "invitation.revoked")]
    #[serde(rename = "invitation.revoked")]
    InvitationRevoked,
    #[sqlx(rename = "video.created")]
    #[serde(rename = "video.created")]
    VideoCreated,
    #[sqlx(rename = "video.edited")]
    #[serde(rename = "video.edited")]
    VideoEdited,
    #[sqlx(rename = "video.submitted")]
    #[serde(rename = "video.submitted")]
    VideoSubmitted,
    #[sqlx(rename = "video.approved")]
    #[serde(rename = "video.approved")]
    VideoApproved,
    #[sqlx(rename = "video.rejected")]
    #[serde(rename = "video.rejected")]
    VideoRejected,
    #[sqlx(rename = "video.published")]
    #[serde(rename = "video.published")]
    VideoPublished,
    #[sqlx(rename = "video.deleted")]
    #[serde(rename = "video.deleted")]
    VideoDeleted,
}

/// What an activity entry points at. Never dereferenced through a foreign key:
/// the target may be gone by the time someone reads the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "activity_target_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Team,
    User,
    Invitation,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TargetRef {
    #[sqlx(rename = "target_kind")]
    pub kind: TargetKind,
    #[sqlx(rename = "target_id")]
    pub id: Uuid,
}

impl TargetRef {
    pub fn team(id: Uuid) -> Self {
        Self { kind: TargetKind::Team, id }
    }

    pub fn user(id: Uuid) -> Self {
        Self { kind: TargetKind::User, id }
    }

    pub fn invitation(id: Uuid) -> Self {
        Self { kind: TargetKind::Invitation, id }
    }

    pub fn video(id: Uuid) -> Self {
        Self { kind: TargetKind::Video, id }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ActivityLog {
    pub id: Uuid,
    pub team_id: Uuid,
    pub actor_id: Uuid,
    pub action: ActionType,
    #[sqlx(flatten)]
    pub target: TargetRef,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ActivityFilter {
    pub target_kind: Option<TargetKind>,
    pub target_id: Option<Uuid>,
    pub action: Option<ActionType>,
    pub limit: Option<i64>,
}

impl ActivityFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn matches(&self, entry: &ActivityLog) -> bool {
        self.target_kind.is_none_or(|k| k == entry.target.kind)
            && self.target_id.is_none_or(|id| id == entry.target.id)
            && self.action.is_none_or(|a| a == entry.action)
    }
}
