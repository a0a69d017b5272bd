//! In-memory implementation of `Store`.
//!
//! All relations live behind a single `RwLock`. A commit stages its writes on a
//! copy of the tables and swaps the copy in only if every write succeeded, so a
//! failing batch leaves nothing behind. State is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError, Write};
use crate::models::activity::{ActivityFilter, ActivityLog};
use crate::models::invitation::{Invitation, InvitationStatus};
use crate::models::review::Review;
use crate::models::team::Team;
use crate::models::user::User;
use crate::models::video::{Video, VideoFilter};

#[derive(Debug, Clone, Default)]
struct Tables {
    teams: HashMap<Uuid, Team>,
    users: HashMap<Uuid, User>,
    invitations: HashMap<Uuid, Invitation>,
    videos: HashMap<Uuid, Video>,
    reviews: Vec<Review>,
    activity: Vec<ActivityLog>,
}

impl Tables {
    fn apply(&mut self, write: Write) -> Result<(), StoreError> {
        match write {
            Write::InsertTeam(team) => {
                if self.teams.contains_key(&team.id) {
                    return Err(conflict("team already exists"));
                }
                self.teams.insert(team.id, team);
            }
            Write::UpdateTeam(team) => {
                let existing = self
                    .teams
                    .get_mut(&team.id)
                    .ok_or_else(|| conflict("team no longer exists"))?;
                *existing = team;
            }
            Write::DeleteTeam(id) => {
                self.teams
                    .remove(&id)
                    .ok_or_else(|| conflict("team no longer exists"))?;
                self.users.retain(|_, u| u.team_id != id);
                self.invitations.retain(|_, i| i.team_id != id);
                let videos = &mut self.videos;
                videos.retain(|_, v| v.team_id != id);
                self.reviews.retain(|r| videos.contains_key(&r.video_id));
                self.activity.retain(|a| a.team_id != id);
            }
            Write::InsertUser(user) => {
                if self.users.contains_key(&user.id) {
                    return Err(conflict("user already exists"));
                }
                self.ensure_email_free(&user.email, user.id)?;
                self.users.insert(user.id, user);
            }
            Write::UpdateUser {
                user,
                expected_version,
            } => {
                self.ensure_email_free(&user.email, user.id)?;
                let existing = self
                    .users
                    .get_mut(&user.id)
                    .ok_or_else(|| conflict("user no longer exists"))?;
                if existing.version != expected_version {
                    return Err(conflict("user was modified concurrently"));
                }
                // Team membership is fixed for the user's lifetime.
                let team_id = existing.team_id;
                *existing = User { team_id, ..user };
            }
            Write::DeleteUser(id) => {
                self.users
                    .remove(&id)
                    .ok_or_else(|| conflict("user no longer exists"))?;
                for video in self.videos.values_mut() {
                    if video.uploader_id == Some(id) {
                        video.uploader_id = None;
                    }
                }
            }
            Write::InsertInvitation(invitation) => {
                if self.invitations.values().any(|i| i.token == invitation.token) {
                    return Err(conflict("invitation token already in use"));
                }
                self.ensure_single_pending(&invitation)?;
                self.invitations.insert(invitation.id, invitation);
            }
            Write::UpdateInvitation {
                invitation,
                expected_status,
            } => {
                let current = self
                    .invitations
                    .get(&invitation.id)
                    .ok_or_else(|| conflict("invitation no longer exists"))?;
                if current.status != expected_status {
                    return Err(conflict("invitation status changed concurrently"));
                }
                if self
                    .invitations
                    .values()
                    .any(|i| i.id != invitation.id && i.token == invitation.token)
                {
                    return Err(conflict("invitation token already in use"));
                }
                self.ensure_single_pending(&invitation)?;
                self.invitations.insert(invitation.id, invitation);
            }
            Write::DeleteInvitation {
                id,
                expected_status,
            } => {
                let current = self
                    .invitations
                    .get(&id)
                    .ok_or_else(|| conflict("invitation no longer exists"))?;
                if current.status != expected_status {
                    return Err(conflict("invitation status changed concurrently"));
                }
                self.invitations.remove(&id);
            }
            Write::InsertVideo(video) => {
                if self.videos.contains_key(&video.id) {
                    return Err(conflict("video already exists"));
                }
                self.videos.insert(video.id, video);
            }
            Write::UpdateVideo {
                video,
                expected_version,
            } => {
                let existing = self
                    .videos
                    .get_mut(&video.id)
                    .ok_or_else(|| conflict("video no longer exists"))?;
                if existing.version != expected_version {
                    return Err(conflict("video was modified concurrently"));
                }
                // Ownership columns are never rewritten by an update.
                let team_id = existing.team_id;
                let uploader_id = existing.uploader_id;
                *existing = Video {
                    team_id,
                    uploader_id,
                    ..video
                };
            }
            Write::DeleteVideo {
                id,
                expected_version,
            } => {
                let existing = self
                    .videos
                    .get(&id)
                    .ok_or_else(|| conflict("video no longer exists"))?;
                if existing.version != expected_version {
                    return Err(conflict("video was modified concurrently"));
                }
                self.videos.remove(&id);
                self.reviews.retain(|r| r.video_id != id);
            }
            Write::InsertReview(review) => {
                if !self.videos.contains_key(&review.video_id) {
                    return Err(conflict("reviewed video no longer exists"));
                }
                self.reviews.push(review);
            }
            Write::AppendLog(entry) => {
                if !self.teams.contains_key(&entry.team_id) {
                    return Err(conflict("team no longer exists"));
                }
                self.activity.push(entry);
            }
        }
        Ok(())
    }

    fn ensure_email_free(&self, email: &str, user_id: Uuid) -> Result<(), StoreError> {
        if self
            .users
            .values()
            .any(|u| u.id != user_id && u.email == email)
        {
            return Err(conflict("email already registered"));
        }
        Ok(())
    }

    fn ensure_single_pending(&self, invitation: &Invitation) -> Result<(), StoreError> {
        if invitation.status != InvitationStatus::Pending {
            return Ok(());
        }
        let duplicate = self.invitations.values().any(|i| {
            i.id != invitation.id
                && i.team_id == invitation.team_id
                && i.invitee_email == invitation.invitee_email
                && i.status == InvitationStatus::Pending
        });
        if duplicate {
            return Err(conflict("a pending invitation already exists for this email"));
        }
        Ok(())
    }
}

fn conflict(msg: &str) -> StoreError {
    StoreError::Conflict(msg.to_string())
}

/// In-memory entity store.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.teams.get(&id).cloned())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user(&self, team_id: Uuid, id: Uuid) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .get(&id)
            .filter(|u| u.team_id == team_id)
            .cloned())
    }

    async fn list_users(&self, team_id: Uuid) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| u.team_id == team_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        Ok(users)
    }

    async fn get_invitation(
        &self,
        team_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Invitation>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .invitations
            .get(&id)
            .filter(|i| i.team_id == team_id)
            .cloned())
    }

    async fn find_invitation_by_token(
        &self,
        token: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .invitations
            .values()
            .find(|i| i.token == token)
            .cloned())
    }

    async fn find_pending_invitation(
        &self,
        team_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .invitations
            .values()
            .find(|i| {
                i.team_id == team_id
                    && i.invitee_email == email
                    && i.status == InvitationStatus::Pending
            })
            .cloned())
    }

    async fn list_invitations(&self, team_id: Uuid) -> Result<Vec<Invitation>, StoreError> {
        let tables = self.tables.read().await;
        let mut invitations: Vec<Invitation> = tables
            .invitations
            .values()
            .filter(|i| i.team_id == team_id)
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invitations)
    }

    async fn get_video(&self, team_id: Uuid, id: Uuid) -> Result<Option<Video>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .videos
            .get(&id)
            .filter(|v| v.team_id == team_id)
            .cloned())
    }

    async fn list_videos(
        &self,
        team_id: Uuid,
        filter: &VideoFilter,
    ) -> Result<Vec<Video>, StoreError> {
        let tables = self.tables.read().await;
        let mut videos: Vec<Video> = tables
            .videos
            .values()
            .filter(|v| v.team_id == team_id)
            .filter(|v| filter.status.is_none_or(|s| s == v.status))
            .filter(|v| filter.uploader_id.is_none_or(|u| Some(u) == v.uploader_id))
            .cloned()
            .collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(videos)
    }

    async fn list_reviews(&self, video_id: Uuid) -> Result<Vec<Review>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .reviews
            .iter()
            .filter(|r| r.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn list_activity(
        &self,
        team_id: Uuid,
        filter: &ActivityFilter,
    ) -> Result<Vec<ActivityLog>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .activity
            .iter()
            .rev()
            .filter(|a| a.team_id == team_id && filter.matches(a))
            .take(filter.effective_limit() as usize)
            .cloned()
            .collect())
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for write in writes {
            staged.apply(write)?;
        }
        *tables = staged;
        Ok(())
    }
}
