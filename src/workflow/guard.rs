//! Authorization decisions.
//!
//! `authorize` is a pure function of the actor's role and team, the target
//! team, the requested action and whether the actor owns the target. It reads
//! nothing and writes nothing, so it can run before any store access.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::{User, UserRole};

/// The acting user as far as authorization is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub team_id: Uuid,
    pub role: UserRole,
}

impl From<&User> for Actor {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.id,
            team_id: u.team_id,
            role: u.role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewTeam,
    UpdateTeam,
    DeleteTeam,
    CreateVideo,
    EditVideo,
    SubmitVideo,
    ResubmitVideo,
    ApproveVideo,
    RejectVideo,
    PublishVideo,
    DeleteVideo,
    ManageInvitations,
    ManageMembers,
    UpdateProfile,
}

#[cfg(test)]
impl Action {
    pub const ALL: [Action; 14] = [
        Self::ViewTeam,
        Self::UpdateTeam,
        Self::DeleteTeam,
        Self::CreateVideo,
        Self::EditVideo,
        Self::SubmitVideo,
        Self::ResubmitVideo,
        Self::ApproveVideo,
        Self::RejectVideo,
        Self::PublishVideo,
        Self::DeleteVideo,
        Self::ManageInvitations,
        Self::ManageMembers,
        Self::UpdateProfile,
    ];
}

/// Whether the actor is the owner of the target: the uploader of a video, the
/// owner of a team, or the user whose profile is being changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Own,
    Other,
}

impl Ownership {
    pub fn of(actor: &Actor, owner_id: Option<Uuid>) -> Self {
        if owner_id == Some(actor.user_id) {
            Self::Own
        } else {
            Self::Other
        }
    }
}

/// The decision table.
pub fn permits(role: UserRole, action: Action, ownership: Ownership) -> bool {
    use Action::*;

    let own = ownership == Ownership::Own;
    match (role, action) {
        (_, ViewTeam | CreateVideo) => true,
        (_, UpdateProfile) => own,
        (UserRole::Admin, EditVideo | SubmitVideo | ResubmitVideo) => true,
        (UserRole::Editor, EditVideo | SubmitVideo | ResubmitVideo) => own,
        (
            UserRole::Admin,
            UpdateTeam | ApproveVideo | RejectVideo | PublishVideo | DeleteVideo
            | ManageInvitations | ManageMembers,
        ) => true,
        (UserRole::Admin, DeleteTeam) => own,
        (UserRole::Editor, _) => false,
    }
}

/// Reject actions outside the actor's team as `NotFound`, so other teams'
/// entities stay invisible. Role failures are `Forbidden`.
pub fn authorize(
    actor: &Actor,
    team_id: Uuid,
    action: Action,
    ownership: Ownership,
) -> Result<(), AppError> {
    if actor.team_id != team_id {
        return Err(AppError::NotFound("Not found".into()));
    }
    if !permits(actor.role, action, ownership) {
        tracing::debug!(actor_id = %actor.user_id, ?action, "action denied");
        return Err(AppError::Forbidden);
    }
    Ok(())
}
