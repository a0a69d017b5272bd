//! Entity store abstraction.
//!
//! The workflow core reads entities through the typed getters below and
//! writes only through [`Store::commit`], which applies a batch of [`Write`]s
//! as one atomic unit. Video and user updates carry the version they were
//! planned against, so a lost race surfaces as [`StoreError::Conflict`] instead of
//! silently overwriting another operation's result.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::activity::{ActivityFilter, ActivityLog};
use crate::models::invitation::{Invitation, InvitationStatus};
use crate::models::review::Review;
use crate::models::team::Team;
use crate::models::user::User;
use crate::models::video::{Video, VideoFilter};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A precondition of the write no longer holds (stale version, uniqueness).
    #[error("{0}")]
    Conflict(String),
    /// The backing store could not be reached.
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Backend(String),
}

/// One mutation inside an atomic batch.
///
/// No variant updates or removes an activity entry.
#[derive(Debug, Clone)]
pub enum Write {
    InsertTeam(Team),
    UpdateTeam(Team),
    /// Cascades to the team's users, invitations, videos, reviews and activity.
    DeleteTeam(Uuid),
    InsertUser(User),
    /// `user.version` must already be the new version.
    UpdateUser {
        user: User,
        expected_version: i64,
    },
    /// Videos uploaded by the user keep existing with no uploader.
    DeleteUser(Uuid),
    InsertInvitation(Invitation),
    UpdateInvitation {
        invitation: Invitation,
        expected_status: InvitationStatus,
    },
    DeleteInvitation {
        id: Uuid,
        expected_status: InvitationStatus,
    },
    InsertVideo(Video),
    /// `video.version` must already be the new version.
    UpdateVideo {
        video: Video,
        expected_version: i64,
    },
    DeleteVideo {
        id: Uuid,
        expected_version: i64,
    },
    InsertReview(Review),
    AppendLog(ActivityLog),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, StoreError>;

    /// Look up a user regardless of team. Used to resolve the acting user.
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Team-scoped: a user of another team is reported as absent.
    async fn get_user(&self, team_id: Uuid, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn list_users(&self, team_id: Uuid) -> Result<Vec<User>, StoreError>;

    async fn get_invitation(
        &self,
        team_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Invitation>, StoreError>;

    async fn find_invitation_by_token(&self, token: &str)
        -> Result<Option<Invitation>, StoreError>;

    async fn find_pending_invitation(
        &self,
        team_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, StoreError>;

    async fn list_invitations(&self, team_id: Uuid) -> Result<Vec<Invitation>, StoreError>;

    /// Team-scoped: a video of another team is reported as absent.
    async fn get_video(&self, team_id: Uuid, id: Uuid) -> Result<Option<Video>, StoreError>;

    /// Newest first.
    async fn list_videos(
        &self,
        team_id: Uuid,
        filter: &VideoFilter,
    ) -> Result<Vec<Video>, StoreError>;

    /// Oldest first.
    async fn list_reviews(&self, video_id: Uuid) -> Result<Vec<Review>, StoreError>;

    /// Newest first, capped at the filter's limit.
    async fn list_activity(
        &self,
        team_id: Uuid,
        filter: &ActivityFilter,
    ) -> Result<Vec<ActivityLog>, StoreError>;

    /// Apply every write or none of them.
    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError>;
}
